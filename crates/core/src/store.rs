//! Struct storage.
//!
//! All structs live in one slab; per-client lists hold slab indices
//! sorted by clock, with no gaps between consecutive structs. Structs
//! that arrived ahead of their dependencies wait in `pending` until
//! the missing clock ranges show up.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::content::Content;
use crate::delete_set::DeleteSet;
use crate::error::UpdateError;
use crate::id::{Id, StateVector};
use crate::structs::{ItemData, Parent, StructKind, StructNode, StructRef};

/// Decoded structs of one client waiting for integration. `next` is
/// the index of the first ref not yet consumed.
#[derive(Debug, Default)]
pub(crate) struct PendingRefs {
    pub(crate) next: usize,
    pub(crate) refs: Vec<StructRef>,
}

#[derive(Debug, Default)]
pub struct StructStore {
    slab: Vec<StructNode>,
    pub(crate) clients: HashMap<u64, Vec<StructRef>>,
    pub(crate) pending: HashMap<u64, PendingRefs>,
    /// Refs parked while waiting on another client's missing range.
    pub(crate) pending_stack: Vec<StructRef>,
    /// Delete sets whose ranges were not fully covered by known
    /// structs yet.
    pub(crate) pending_delete_sets: Vec<DeleteSet>,
}

impl StructStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, node: StructNode) -> StructRef {
        let index = self.slab.len() as u32;
        self.slab.push(node);
        StructRef(index)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn alloc_item(
        &mut self,
        id: Id,
        origin: Option<Id>,
        right_origin: Option<Id>,
        left: Option<StructRef>,
        right: Option<StructRef>,
        parent: Parent,
        parent_sub: Option<String>,
        content: Content,
    ) -> StructRef {
        self.alloc(StructNode::new_item(
            id,
            origin,
            right_origin,
            left,
            right,
            parent,
            parent_sub,
            content,
        ))
    }

    pub fn node(&self, r: StructRef) -> &StructNode {
        &self.slab[r.index()]
    }

    pub(crate) fn node_mut(&mut self, r: StructRef) -> &mut StructNode {
        &mut self.slab[r.index()]
    }

    /// Item payload of a struct known to be an item.
    pub(crate) fn item(&self, r: StructRef) -> &ItemData {
        match &self.slab[r.index()].kind {
            StructKind::Item(item) => item,
            StructKind::Gc => panic!("struct {} is gc, expected item", r.index()),
        }
    }

    pub(crate) fn item_mut(&mut self, r: StructRef) -> &mut ItemData {
        match &mut self.slab[r.index()].kind {
            StructKind::Item(item) => item,
            StructKind::Gc => panic!("struct {} is gc, expected item", r.index()),
        }
    }

    /// First clock not covered for `client`.
    pub fn get_state(&self, client: u64) -> u64 {
        match self.clients.get(&client).and_then(|refs| refs.last()) {
            Some(&last) => {
                let node = self.node(last);
                node.id.clock + node.len
            }
            None => 0,
        }
    }

    pub fn state_vector(&self) -> StateVector {
        self.clients
            .iter()
            .map(|(&client, refs)| {
                let node = self.node(refs[refs.len() - 1]);
                (client, node.id.clock + node.len)
            })
            .collect()
    }

    /// Appends an integrated struct to its client list. The caller
    /// guarantees the clock continues the list without a gap.
    pub(crate) fn add_struct(&mut self, r: StructRef) {
        let (client, clock) = {
            let node = self.node(r);
            (node.id.client, node.id.clock)
        };
        let refs = self.clients.entry(client).or_default();
        if let Some(&last) = refs.last() {
            let last_node = &self.slab[last.index()];
            debug_assert_eq!(last_node.id.clock + last_node.len, clock);
        } else {
            debug_assert_eq!(clock, 0);
        }
        refs.push(r);
    }

    /// Index of the struct containing `clock` in the client list.
    /// The caller has already checked `clock < get_state(client)`.
    pub(crate) fn find_index(&self, client: u64, clock: u64) -> usize {
        let refs = &self.clients[&client];
        let mut left: i64 = 0;
        let mut right: i64 = refs.len() as i64 - 1;
        let mut node = self.node(refs[right as usize]);
        let mut mid_clock = node.id.clock;
        if mid_clock == clock {
            return right as usize;
        }
        // Pivot on the assumption of roughly uniform struct lengths.
        let mut mid_index =
            ((clock as u128 * right as u128) / (mid_clock as u128 + node.len as u128 - 1)) as i64;
        while left <= right {
            node = self.node(refs[mid_index as usize]);
            mid_clock = node.id.clock;
            if mid_clock <= clock {
                if clock < mid_clock + node.len {
                    return mid_index as usize;
                }
                left = mid_index + 1;
            } else {
                right = mid_index - 1;
            }
            mid_index = (left + right) / 2;
        }
        panic!("struct store missing clock {clock} for client {client}");
    }

    /// Struct containing `id`, or `None` when the clock is beyond the
    /// known state for that client.
    pub(crate) fn find(&self, id: Id) -> Option<StructRef> {
        let refs = self.clients.get(&id.client)?;
        if id.clock >= self.get_state(id.client) {
            return None;
        }
        Some(refs[self.find_index(id.client, id.clock)])
    }

    /// Folds freshly decoded refs into the pending queues, keeping
    /// each queue sorted by clock.
    pub(crate) fn merge_read_structs_into_pending(
        &mut self,
        refs: HashMap<u64, Vec<StructRef>>,
    ) {
        let StructStore { slab, pending, .. } = self;
        for (client, new_refs) in refs {
            match pending.entry(client) {
                Entry::Vacant(slot) => {
                    slot.insert(PendingRefs {
                        next: 0,
                        refs: new_refs,
                    });
                }
                Entry::Occupied(mut slot) => {
                    let queue = slot.get_mut();
                    let next = queue.next.min(queue.refs.len());
                    let mut merged = queue.refs.split_off(next);
                    merged.extend(new_refs);
                    merged.sort_by_key(|&r| slab[r.index()].id.clock);
                    *queue = PendingRefs {
                        next: 0,
                        refs: merged,
                    };
                }
            }
        }
    }

    /// Drops fully consumed pending queues and compacts the rest.
    pub(crate) fn cleanup_pending_structs(&mut self) {
        self.pending.retain(|_, queue| {
            if queue.next >= queue.refs.len() {
                return false;
            }
            if queue.next > 0 {
                queue.refs.drain(..queue.next);
                queue.next = 0;
            }
            true
        });
    }

    /// Verifies that every client list covers a contiguous clock range
    /// starting at zero.
    pub fn integrity_check(&self) -> Result<(), UpdateError> {
        for refs in self.clients.values() {
            let mut expected = 0;
            for &r in refs {
                let node = self.node(r);
                if node.id.clock != expected || node.len == 0 {
                    return Err(UpdateError::InvalidClock);
                }
                expected = node.id.clock + node.len;
            }
        }
        Ok(())
    }
}
