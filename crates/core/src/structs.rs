//! Store structs: items carrying content and GC placeholders.

use crate::content::Content;
use crate::id::Id;
use crate::types::BranchRef;

/// Keep this struct alive across garbage collection passes.
pub const ITEM_KEEP: u8 = 1;
pub const ITEM_COUNTABLE: u8 = 2;
pub const ITEM_DELETED: u8 = 4;

/// Index into the struct slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructRef(pub(crate) u32);

impl StructRef {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an item hangs in the document tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Parent {
    /// Not yet resolved; filled in during integration from a neighbor.
    Unset,
    Branch(BranchRef),
    /// Root branch by name, before the branch exists locally.
    Name(String),
    /// The id of the item whose content embeds the parent branch.
    Id(Id),
}

#[derive(Debug)]
pub struct ItemData {
    /// Id of the last unit of the left neighbor at creation time.
    pub origin: Option<Id>,
    /// Id of the right neighbor at creation time.
    pub right_origin: Option<Id>,
    pub left: Option<StructRef>,
    pub right: Option<StructRef>,
    pub parent: Parent,
    /// Map key; `None` for sequence items.
    pub parent_sub: Option<String>,
    /// First unit of the item that replaced this one via undo/redo.
    pub redone: Option<Id>,
    pub content: Content,
    pub info: u8,
}

#[derive(Debug)]
pub enum StructKind {
    /// A range of ids whose content was dropped entirely.
    Gc,
    Item(Box<ItemData>),
}

/// One entry of the struct slab. `len` is the clock span.
#[derive(Debug)]
pub struct StructNode {
    pub id: Id,
    pub len: u64,
    pub kind: StructKind,
}

impl StructNode {
    pub fn new_item(
        id: Id,
        origin: Option<Id>,
        right_origin: Option<Id>,
        left: Option<StructRef>,
        right: Option<StructRef>,
        parent: Parent,
        parent_sub: Option<String>,
        content: Content,
    ) -> Self {
        let len = content.len();
        let info = if content.countable() {
            ITEM_COUNTABLE
        } else {
            0
        };
        Self {
            id,
            len,
            kind: StructKind::Item(Box::new(ItemData {
                origin,
                right_origin,
                left,
                right,
                parent,
                parent_sub,
                redone: None,
                content,
                info,
            })),
        }
    }

    pub fn new_gc(id: Id, len: u64) -> Self {
        Self {
            id,
            len,
            kind: StructKind::Gc,
        }
    }

    /// Id of the last clock unit covered by this struct.
    pub fn last_id(&self) -> Id {
        Id::new(self.id.client, self.id.clock + self.len - 1)
    }

    pub fn is_item(&self) -> bool {
        matches!(self.kind, StructKind::Item(_))
    }

    pub fn as_item(&self) -> Option<&ItemData> {
        match &self.kind {
            StructKind::Item(item) => Some(item),
            StructKind::Gc => None,
        }
    }

    pub fn as_item_mut(&mut self) -> Option<&mut ItemData> {
        match &mut self.kind {
            StructKind::Item(item) => Some(item),
            StructKind::Gc => None,
        }
    }

    /// GC structs count as deleted.
    pub fn deleted(&self) -> bool {
        match &self.kind {
            StructKind::Gc => true,
            StructKind::Item(item) => item.info & ITEM_DELETED != 0,
        }
    }

    pub fn countable(&self) -> bool {
        match &self.kind {
            StructKind::Gc => false,
            StructKind::Item(item) => item.info & ITEM_COUNTABLE != 0,
        }
    }

    pub fn keep(&self) -> bool {
        match &self.kind {
            StructKind::Gc => false,
            StructKind::Item(item) => item.info & ITEM_KEEP != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_length_and_flags_follow_content() {
        let node = StructNode::new_item(
            Id::new(1, 0),
            None,
            None,
            None,
            None,
            Parent::Unset,
            None,
            Content::String("hello".to_owned()),
        );
        assert_eq!(node.len, 5);
        assert!(node.countable());
        assert!(!node.deleted());
        assert_eq!(node.last_id(), Id::new(1, 4));

        let format = StructNode::new_item(
            Id::new(1, 5),
            None,
            None,
            None,
            None,
            Parent::Unset,
            None,
            Content::Format {
                key: "bold".to_owned(),
                value: serde_json::json!(true),
            },
        );
        assert!(!format.countable());
        assert_eq!(format.len, 1);
    }

    #[test]
    fn gc_is_deleted_and_uncountable() {
        let node = StructNode::new_gc(Id::new(7, 3), 4);
        assert!(node.deleted());
        assert!(!node.countable());
        assert!(node.as_item().is_none());
        assert_eq!(node.last_id(), Id::new(7, 6));
    }
}
