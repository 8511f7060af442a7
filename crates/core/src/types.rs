//! Shared container substrate.
//!
//! Items hang off a `Branch`: the sequence head (`start`), the map of
//! last-writer-wins keys (`map`), and the item that embeds the branch
//! in its own parent (`item`, `None` for roots). The user-facing
//! collection types are intentionally not modeled here; the generic
//! list/map operations below are what the engine and hosts drive.

use std::collections::HashMap;

use serde_json::Value;

use crate::content::Content;
use crate::doc::DocState;
use crate::error::UpdateError;
use crate::id::Id;
use crate::structs::{Parent, StructRef};
use crate::transaction::Transaction;

pub const TYPE_REF_ARRAY: u64 = 0;
pub const TYPE_REF_MAP: u64 = 1;
pub const TYPE_REF_TEXT: u64 = 2;

/// Placeholder for root branches created from a remote parent name
/// before any local accessor declared their shape.
pub(crate) const TYPE_REF_UNDEFINED: u64 = 15;

/// Index into the [`BranchArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchRef(u32);

impl BranchRef {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub struct Branch {
    /// First item of the sequence chain.
    pub start: Option<StructRef>,
    /// Current (possibly deleted) item per map key.
    pub map: HashMap<String, StructRef>,
    /// The item whose content embeds this branch; `None` for roots.
    pub item: Option<StructRef>,
    /// Countable, non-deleted sequence length.
    pub len: u64,
    pub type_ref: u64,
    /// Root name, set only for branches reachable from `Doc.share`.
    pub name: Option<String>,
}

impl Branch {
    pub fn new(type_ref: u64) -> Self {
        Self {
            start: None,
            map: HashMap::new(),
            item: None,
            len: 0,
            type_ref,
            name: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct BranchArena {
    slab: Vec<Branch>,
}

impl BranchArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, branch: Branch) -> BranchRef {
        let index = self.slab.len() as u32;
        self.slab.push(branch);
        BranchRef(index)
    }

    pub fn get(&self, r: BranchRef) -> &Branch {
        &self.slab[r.index()]
    }

    pub fn get_mut(&mut self, r: BranchRef) -> &mut Branch {
        &mut self.slab[r.index()]
    }
}

/// One step in the path from an observed branch down to an event
/// target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(u64),
}

/// Change notification for a single branch.
#[derive(Debug)]
pub struct Event {
    pub target: BranchRef,
    /// Path from the observed branch to `target`; empty for shallow
    /// events.
    pub path: Vec<PathSegment>,
    /// Changed map keys; `None` marks sequence changes.
    pub keys: std::collections::HashSet<Option<String>>,
}

impl<'doc> Transaction<'doc> {
    /// Inserts content into the sequence at a countable index.
    pub fn list_insert(
        &mut self,
        branch: BranchRef,
        index: u64,
        content: Content,
    ) -> Result<(), UpdateError> {
        let (left, right) = self.find_list_position(branch, index)?;
        self.insert_between(branch, left, right, None, content)?;
        Ok(())
    }

    /// Appends content to the end of the sequence.
    pub fn list_push(&mut self, branch: BranchRef, content: Content) -> Result<(), UpdateError> {
        let mut left = None;
        let mut cur = self.doc.branches.get(branch).start;
        while let Some(c) = cur {
            left = Some(c);
            cur = self.doc.store.item(c).right;
        }
        self.insert_between(branch, left, None, None, content)?;
        Ok(())
    }

    /// Inserts text at a position counted in utf-16 code units.
    pub fn text_insert(
        &mut self,
        branch: BranchRef,
        index: u64,
        text: &str,
    ) -> Result<(), UpdateError> {
        if text.is_empty() {
            return Ok(());
        }
        self.list_insert(branch, index, Content::String(text.to_owned()))
    }

    /// Deletes `len` countable units starting at `index`.
    pub fn list_remove(
        &mut self,
        branch: BranchRef,
        index: u64,
        len: u64,
    ) -> Result<(), UpdateError> {
        if len == 0 {
            return Ok(());
        }
        let (_, mut cur) = self.find_list_position(branch, index)?;
        let mut remaining = len;
        while remaining > 0 {
            let c = cur.ok_or(UpdateError::OutOfRange)?;
            let node = self.doc.store.node(c);
            let countable = !node.deleted() && node.countable();
            if countable {
                let (client, clock, node_len) = (node.id.client, node.id.clock, node.len);
                if node_len > remaining {
                    self.get_item_clean_start(Id::new(client, clock + remaining))?;
                }
                remaining -= self.doc.store.node(c).len;
                self.delete_item(c);
            }
            cur = self.doc.store.item(c).right;
        }
        Ok(())
    }

    /// Sets a map key, superseding the previous value.
    pub fn map_set(
        &mut self,
        branch: BranchRef,
        key: &str,
        content: Content,
    ) -> Result<(), UpdateError> {
        let left = self.doc.branches.get(branch).map.get(key).copied();
        self.insert_between(branch, left, None, Some(key.to_owned()), content)?;
        Ok(())
    }

    /// Deletes a map key if it currently holds a value.
    pub fn map_remove(&mut self, branch: BranchRef, key: &str) {
        if let Some(&r) = self.doc.branches.get(branch).map.get(key) {
            if !self.doc.store.node(r).deleted() {
                self.delete_item(r);
            }
        }
    }

    pub(crate) fn insert_between(
        &mut self,
        branch: BranchRef,
        left: Option<StructRef>,
        right: Option<StructRef>,
        parent_sub: Option<String>,
        content: Content,
    ) -> Result<StructRef, UpdateError> {
        let id = self.next_id();
        let origin = left.map(|l| self.doc.store.node(l).last_id());
        let right_origin = right.map(|r| self.doc.store.node(r).id);
        let r = self.doc.store.alloc_item(
            id,
            origin,
            right_origin,
            left,
            right,
            Parent::Branch(branch),
            parent_sub,
            content,
        );
        self.integrate(r, 0)?;
        Ok(r)
    }

    /// Locates the insert position for a countable index, splitting a
    /// struct when the index lands inside one.
    fn find_list_position(
        &mut self,
        branch: BranchRef,
        index: u64,
    ) -> Result<(Option<StructRef>, Option<StructRef>), UpdateError> {
        let mut left: Option<StructRef> = None;
        let mut cur = self.doc.branches.get(branch).start;
        let mut remaining = index;
        while remaining > 0 {
            let c = cur.ok_or(UpdateError::OutOfRange)?;
            let node = self.doc.store.node(c);
            if !node.deleted() && node.countable() {
                if remaining < node.len {
                    let at = Id::new(node.id.client, node.id.clock + remaining);
                    self.get_item_clean_start(at)?;
                    left = Some(c);
                    remaining = 0;
                    continue;
                }
                remaining -= node.len;
            }
            left = Some(c);
            cur = self.doc.store.item(c).right;
        }
        let right = match left {
            Some(l) => self.doc.store.item(l).right,
            None => self.doc.branches.get(branch).start,
        };
        Ok((left, right))
    }
}

impl DocState {
    /// Materialized values of the sequence, one entry per countable
    /// unit.
    pub fn list_content(&self, branch: BranchRef) -> Vec<Value> {
        let mut out = Vec::new();
        let mut cur = self.branches.get(branch).start;
        while let Some(c) = cur {
            let node = self.store.node(c);
            let item = self.store.item(c);
            if !node.deleted() && node.countable() {
                out.extend(item.content.values());
            }
            cur = item.right;
        }
        out
    }

    /// Concatenated non-deleted string content of the sequence.
    pub fn text_of(&self, branch: BranchRef) -> String {
        let mut out = String::new();
        let mut cur = self.branches.get(branch).start;
        while let Some(c) = cur {
            let item = self.store.item(c);
            if !self.store.node(c).deleted() {
                if let Content::String(s) = &item.content {
                    out.push_str(s);
                }
            }
            cur = item.right;
        }
        out
    }

    /// Current value of a map key, if it holds a live entry.
    pub fn map_get(&self, branch: BranchRef, key: &str) -> Option<Value> {
        let &r = self.branches.get(branch).map.get(key)?;
        if self.store.node(r).deleted() {
            return None;
        }
        self.store.item(r).content.values().last().cloned()
    }

    /// Keys that currently hold live entries.
    pub fn map_keys(&self, branch: BranchRef) -> Vec<String> {
        let mut keys: Vec<String> = self
            .branches
            .get(branch)
            .map
            .iter()
            .filter(|(_, &r)| !self.store.node(r).deleted())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Countable length of the sequence.
    pub fn list_len(&self, branch: BranchRef) -> u64 {
        self.branches.get(branch).len
    }

    /// Path from `ancestor` down to `target`, or `None` when `target`
    /// does not live under `ancestor`.
    pub fn path_between(
        &self,
        ancestor: BranchRef,
        target: BranchRef,
    ) -> Option<Vec<PathSegment>> {
        if ancestor == target {
            return Some(Vec::new());
        }
        let mut segments = Vec::new();
        let mut cur = target;
        loop {
            let item_ref = self.branches.get(cur).item?;
            let item = self.store.item(item_ref);
            let segment = match &item.parent_sub {
                Some(key) => PathSegment::Key(key.clone()),
                None => PathSegment::Index(self.list_index_of(item_ref)),
            };
            let parent = match item.parent {
                Parent::Branch(b) => b,
                _ => return None,
            };
            segments.push(segment);
            if parent == ancestor {
                segments.reverse();
                return Some(segments);
            }
            cur = parent;
        }
    }

    /// Countable index of an item within its parent sequence.
    fn list_index_of(&self, item_ref: StructRef) -> u64 {
        let mut index = 0;
        let mut cur = self.store.item(item_ref).left;
        while let Some(c) = cur {
            let node = self.store.node(c);
            if !node.deleted() && node.countable() {
                index += node.len;
            }
            cur = self.store.item(c).left;
        }
        index
    }
}
