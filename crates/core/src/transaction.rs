//! Transaction lifecycle.
//!
//! Every mutation of a document happens inside a transaction. While it
//! runs it records the delete set, the touched branches, and the state
//! vector from before the first change; commit then garbage collects,
//! merges adjacent structs, and produces the outgoing update message.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::content::Content;
use crate::delete_set::DeleteSet;
use crate::doc::{generate_client_id, DocState};
use crate::error::UpdateError;
use crate::id::{Id, StateVector};
use crate::store::PendingRefs;
use crate::structs::{Parent, StructKind, StructRef, ITEM_COUNTABLE, ITEM_DELETED, ITEM_KEEP};
use crate::types::{BranchRef, TYPE_REF_UNDEFINED};
use crate::update_codec::{write_clients_structs, UpdateEncoderV2};

pub struct Transaction<'doc> {
    pub(crate) doc: &'doc mut DocState,
    pub(crate) local: bool,
    pub(crate) origin: Option<Value>,
    pub(crate) before_state: StateVector,
    after_state: StateVector,
    pub(crate) delete_set: DeleteSet,
    pub(crate) changed: HashMap<BranchRef, HashSet<Option<String>>>,
    pub(crate) merge_structs: Vec<StructRef>,
    pub(crate) subdocs_added: Vec<String>,
    pub(crate) subdocs_removed: Vec<String>,
    pub(crate) subdocs_loaded: Vec<String>,
}

/// What a committed transaction hands back to the document for event
/// dispatch.
pub(crate) struct TransactionOutcome {
    pub changed: HashMap<BranchRef, HashSet<Option<String>>>,
    pub update: Option<Vec<u8>>,
    pub origin: Option<Value>,
    pub local: bool,
    pub subdocs_added: Vec<String>,
    pub subdocs_removed: Vec<String>,
    pub subdocs_loaded: Vec<String>,
}

impl<'doc> Transaction<'doc> {
    pub(crate) fn new(doc: &'doc mut DocState, origin: Option<Value>, local: bool) -> Self {
        let before_state = doc.store.state_vector();
        Self {
            doc,
            local,
            origin,
            before_state,
            after_state: StateVector::new(),
            delete_set: DeleteSet::new(),
            changed: HashMap::new(),
            merge_structs: Vec::new(),
            subdocs_added: Vec::new(),
            subdocs_removed: Vec::new(),
            subdocs_loaded: Vec::new(),
        }
    }

    /// Id for the next unit of locally produced content.
    pub(crate) fn next_id(&self) -> Id {
        let client = self.doc.client_id;
        Id::new(client, self.doc.store.get_state(client))
    }

    /// Splits an item so that `id.clock` becomes the first unit of the
    /// returned struct.
    pub(crate) fn get_item_clean_start(&mut self, id: Id) -> Result<StructRef, UpdateError> {
        let r = self.doc.store.find(id).ok_or(UpdateError::InvalidClock)?;
        let node = self.doc.store.node(r);
        if node.id.clock < id.clock && node.is_item() {
            return self.split_item(r, id.clock - node.id.clock);
        }
        Ok(r)
    }

    /// Splits an item so that `id.clock` becomes the last unit of the
    /// returned struct.
    pub(crate) fn get_item_clean_end(&mut self, id: Id) -> Result<StructRef, UpdateError> {
        let r = self.doc.store.find(id).ok_or(UpdateError::InvalidClock)?;
        let node = self.doc.store.node(r);
        if id.clock != node.id.clock + node.len - 1 && node.is_item() {
            let diff = id.clock - node.id.clock + 1;
            self.split_item(r, diff)?;
        }
        Ok(r)
    }

    /// Splits an integrated item at `diff` clock units, inserting the
    /// new right part into the client list.
    pub(crate) fn split_item(&mut self, left_ref: StructRef, diff: u64) -> Result<StructRef, UpdateError> {
        let (client, clock, left_len) = {
            let node = self.doc.store.node(left_ref);
            (node.id.client, node.id.clock, node.len)
        };
        let right_content = self.doc.store.item_mut(left_ref).content.splice(diff)?;
        let (right_node, parent_sub) = {
            let left = self.doc.store.item(left_ref);
            let mut node = crate::structs::StructNode::new_item(
                Id::new(client, clock + diff),
                Some(Id::new(client, clock + diff - 1)),
                left.right_origin,
                Some(left_ref),
                left.right,
                left.parent.clone(),
                left.parent_sub.clone(),
                right_content,
            );
            node.len = left_len - diff;
            if let StructKind::Item(item) = &mut node.kind {
                item.redone = left
                    .redone
                    .map(|id| Id::new(id.client, id.clock + diff));
                item.info |= left.info & (ITEM_DELETED | ITEM_KEEP);
            }
            (node, left.parent_sub.clone())
        };
        let right_ref = self.doc.store.alloc(right_node);
        let old_right = {
            let left = self.doc.store.item_mut(left_ref);
            let old_right = left.right;
            left.right = Some(right_ref);
            old_right
        };
        self.doc.store.node_mut(left_ref).len = diff;
        if let Some(rr) = old_right {
            self.doc.store.item_mut(rr).left = Some(right_ref);
        } else if let Some(sub) = parent_sub {
            let parent_branch = match &self.doc.store.item(left_ref).parent {
                Parent::Branch(b) => Some(*b),
                _ => None,
            };
            if let Some(b) = parent_branch {
                self.doc.branches.get_mut(b).map.insert(sub, right_ref);
            }
        }
        self.merge_structs.push(right_ref);
        let index = self.doc.store.find_index(client, clock);
        if let Some(refs) = self.doc.store.clients.get_mut(&client) {
            refs.insert(index + 1, right_ref);
        }
        Ok(right_ref)
    }

    /// Returns the client whose structs must arrive before this one
    /// can integrate, or fixes up the item's neighbors and parent and
    /// returns `None`.
    fn get_missing(&mut self, r: StructRef) -> Result<Option<u64>, UpdateError> {
        if !self.doc.store.node(r).is_item() {
            return Ok(None);
        }
        let this_client = self.doc.store.node(r).id.client;
        let (origin, right_origin, parent) = {
            let item = self.doc.store.item(r);
            (item.origin, item.right_origin, item.parent.clone())
        };
        if let Some(origin) = origin {
            if origin.client != this_client
                && origin.clock >= self.doc.store.get_state(origin.client)
            {
                return Ok(Some(origin.client));
            }
        }
        if let Some(right_origin) = right_origin {
            if right_origin.client != this_client
                && right_origin.clock >= self.doc.store.get_state(right_origin.client)
            {
                return Ok(Some(right_origin.client));
            }
        }
        if let Parent::Id(parent_id) = parent {
            if parent_id.client != this_client
                && parent_id.clock >= self.doc.store.get_state(parent_id.client)
            {
                return Ok(Some(parent_id.client));
            }
        }

        if let Some(origin) = origin {
            let left = self.get_item_clean_end(origin)?;
            let left_last = self.doc.store.node(left).last_id();
            let item = self.doc.store.item_mut(r);
            item.left = Some(left);
            item.origin = Some(left_last);
        }
        if let Some(right_origin) = right_origin {
            let right = self.get_item_clean_start(right_origin)?;
            let right_id = self.doc.store.node(right).id;
            let item = self.doc.store.item_mut(r);
            item.right = Some(right);
            item.right_origin = Some(right_id);
        }
        let (left, right) = {
            let item = self.doc.store.item(r);
            (item.left, item.right)
        };
        let left_gc = left.is_some_and(|l| !self.doc.store.node(l).is_item());
        let right_gc = right.is_some_and(|rt| !self.doc.store.node(rt).is_item());
        let parent = self.doc.store.item(r).parent.clone();
        if left_gc || right_gc {
            // A neighbor was garbage collected, so this content is
            // stale too.
            self.doc.store.item_mut(r).parent = Parent::Unset;
        } else if matches!(parent, Parent::Unset) {
            let copied = left
                .filter(|&l| self.doc.store.node(l).is_item())
                .or(right.filter(|&rt| self.doc.store.node(rt).is_item()));
            if let Some(neighbor) = copied {
                let (parent, parent_sub) = {
                    let n = self.doc.store.item(neighbor);
                    (n.parent.clone(), n.parent_sub.clone())
                };
                let item = self.doc.store.item_mut(r);
                item.parent = parent;
                item.parent_sub = parent_sub;
            }
        } else if let Parent::Id(parent_id) = parent {
            let resolved = match self.doc.store.find(parent_id) {
                Some(p) => match self.doc.store.node(p).as_item().map(|i| &i.content) {
                    Some(Content::Type(b)) => Parent::Branch(*b),
                    _ => Parent::Unset,
                },
                None => Parent::Unset,
            };
            self.doc.store.item_mut(r).parent = resolved;
        } else if let Parent::Name(name) = parent {
            let branch = self.doc.get_or_create_root(&name, TYPE_REF_UNDEFINED);
            self.doc.store.item_mut(r).parent = Parent::Branch(branch);
        }
        Ok(None)
    }

    /// Places a struct into the document, resolving concurrent inserts
    /// at the same position. `offset` skips units already known
    /// locally.
    pub(crate) fn integrate(&mut self, r: StructRef, offset: u64) -> Result<(), UpdateError> {
        if !self.doc.store.node(r).is_item() {
            if offset > 0 {
                let node = self.doc.store.node_mut(r);
                node.id.clock += offset;
                node.len -= offset;
            }
            self.doc.store.add_struct(r);
            return Ok(());
        }

        if offset > 0 {
            let (client, new_clock) = {
                let node = self.doc.store.node_mut(r);
                node.id.clock += offset;
                (node.id.client, node.id.clock)
            };
            let left = self.get_item_clean_end(Id::new(client, new_clock - 1))?;
            let left_last = self.doc.store.node(left).last_id();
            let kept = self.doc.store.item_mut(r).content.splice(offset)?;
            let node = self.doc.store.node_mut(r);
            node.len -= offset;
            if let StructKind::Item(item) = &mut node.kind {
                item.origin = Some(left_last);
                item.left = Some(left);
                item.content = kept;
            }
        }

        let parent_branch = match &self.doc.store.item(r).parent {
            Parent::Branch(b) => *b,
            _ => {
                // No reachable parent; keep the id range as a
                // tombstone.
                self.doc.store.node_mut(r).kind = StructKind::Gc;
                self.doc.store.add_struct(r);
                return Ok(());
            }
        };

        let (this_origin, this_right_origin, this_parent_sub, this_client) = {
            let node = self.doc.store.node(r);
            let item = self.doc.store.item(r);
            (
                item.origin,
                item.right_origin,
                item.parent_sub.clone(),
                node.id.client,
            )
        };
        let mut left = self.doc.store.item(r).left;
        let right = self.doc.store.item(r).right;

        let should_scan = match (left, right) {
            (None, None) => true,
            (None, Some(rt)) => self.doc.store.item(rt).left.is_some(),
            (Some(l), _) => self.doc.store.item(l).right != right,
        };
        if should_scan {
            let mut o = if let Some(l) = left {
                self.doc.store.item(l).right
            } else if let Some(sub) = &this_parent_sub {
                self.map_chain_head(parent_branch, sub)
            } else {
                self.doc.branches.get(parent_branch).start
            };
            let mut items_before_origin: HashSet<StructRef> = HashSet::new();
            let mut conflicting_items: HashSet<StructRef> = HashSet::new();
            while let Some(c) = o {
                if Some(c) == right {
                    break;
                }
                items_before_origin.insert(c);
                conflicting_items.insert(c);
                let (c_origin, c_right_origin, c_client, c_right) = {
                    let node = self.doc.store.node(c);
                    let item = self.doc.store.item(c);
                    (item.origin, item.right_origin, node.id.client, item.right)
                };
                if this_origin == c_origin {
                    // Both anchor on the same left neighbor; the lower
                    // client id stays to the left.
                    if c_client < this_client {
                        left = Some(c);
                        conflicting_items.clear();
                    } else if this_right_origin == c_right_origin {
                        break;
                    }
                } else {
                    match c_origin.and_then(|oid| self.doc.store.find(oid)) {
                        Some(os) if items_before_origin.contains(&os) => {
                            if !conflicting_items.contains(&os) {
                                left = Some(c);
                                conflicting_items.clear();
                            }
                        }
                        _ => break,
                    }
                }
                o = c_right;
            }
            self.doc.store.item_mut(r).left = left;
        }

        let left = self.doc.store.item(r).left;
        let right = if let Some(l) = left {
            let right = self.doc.store.item(l).right;
            self.doc.store.item_mut(l).right = Some(r);
            right
        } else if let Some(sub) = &this_parent_sub {
            self.map_chain_head(parent_branch, sub)
        } else {
            let branch = self.doc.branches.get_mut(parent_branch);
            let start = branch.start;
            branch.start = Some(r);
            start
        };
        self.doc.store.item_mut(r).right = right;
        match right {
            Some(rt) => self.doc.store.item_mut(rt).left = Some(r),
            None => {
                if let Some(sub) = &this_parent_sub {
                    self.doc
                        .branches
                        .get_mut(parent_branch)
                        .map
                        .insert(sub.clone(), r);
                    if let Some(l) = left {
                        // The previous value of the key is superseded.
                        self.delete_item(l);
                    }
                }
            }
        }

        let (client, clock, len, countable, deleted) = {
            let node = self.doc.store.node(r);
            (
                node.id.client,
                node.id.clock,
                node.len,
                node.countable(),
                node.deleted(),
            )
        };
        if this_parent_sub.is_none() && countable && !deleted {
            self.doc.branches.get_mut(parent_branch).len += len;
        }
        self.doc.store.add_struct(r);

        match &self.doc.store.item(r).content {
            Content::Type(b) => {
                let b = *b;
                self.doc.branches.get_mut(b).item = Some(r);
            }
            Content::Deleted(deleted_len) => {
                let deleted_len = *deleted_len;
                self.delete_set.add(client, clock, deleted_len);
                self.doc.store.item_mut(r).info |= ITEM_DELETED;
            }
            Content::Doc { guid, .. } => {
                let guid = guid.clone();
                self.subdocs_added.push(guid.clone());
                if self.doc.options.auto_load {
                    self.subdocs_loaded.push(guid);
                }
            }
            _ => {}
        }
        self.add_changed_type(parent_branch, this_parent_sub.clone());

        let parent_item_deleted = self
            .doc
            .branches
            .get(parent_branch)
            .item
            .is_some_and(|pi| self.doc.store.node(pi).deleted());
        let has_right = self.doc.store.item(r).right.is_some();
        if parent_item_deleted || (this_parent_sub.is_some() && has_right) {
            self.delete_item(r);
        }
        Ok(())
    }

    /// Leftmost item of the chain behind a map key.
    fn map_chain_head(&self, branch: BranchRef, sub: &str) -> Option<StructRef> {
        let mut o = self.doc.branches.get(branch).map.get(sub).copied();
        while let Some(c) = o {
            match self.doc.store.item(c).left {
                Some(left) => o = Some(left),
                None => break,
            }
        }
        o
    }

    /// Marks an item deleted, records the range, and cascades into
    /// nested containers.
    pub(crate) fn delete_item(&mut self, r: StructRef) {
        {
            let node = self.doc.store.node(r);
            if node.deleted() || !node.is_item() {
                return;
            }
        }
        let (client, clock, len, countable) = {
            let node = self.doc.store.node(r);
            (node.id.client, node.id.clock, node.len, node.countable())
        };
        let (parent, parent_sub) = {
            let item = self.doc.store.item(r);
            (item.parent.clone(), item.parent_sub.clone())
        };
        if let Parent::Branch(b) = parent {
            if countable && parent_sub.is_none() {
                self.doc.branches.get_mut(b).len -= len;
            }
        }
        self.doc.store.item_mut(r).info |= ITEM_DELETED;
        self.delete_set.add(client, clock, len);
        if let Parent::Branch(b) = parent {
            self.add_changed_type(b, parent_sub);
        }
        let nested = match &self.doc.store.item(r).content {
            Content::Type(b) => Some(*b),
            Content::Doc { guid, .. } => {
                let guid = guid.clone();
                self.subdocs_removed.push(guid);
                None
            }
            _ => None,
        };
        if let Some(b) = nested {
            let mut children: Vec<StructRef> = Vec::new();
            let mut cur = self.doc.branches.get(b).start;
            while let Some(c) = cur {
                children.push(c);
                cur = self.doc.store.item(c).right;
            }
            children.extend(self.doc.branches.get(b).map.values().copied());
            for child in children {
                if self.doc.store.node(child).deleted() {
                    self.merge_structs.push(child);
                } else {
                    self.delete_item(child);
                }
            }
            self.changed.remove(&b);
        }
    }

    /// Records a change on a branch unless the branch itself was
    /// created inside this transaction.
    fn add_changed_type(&mut self, branch: BranchRef, parent_sub: Option<String>) {
        let trigger = match self.doc.branches.get(branch).item {
            None => true,
            Some(item_ref) => {
                let node = self.doc.store.node(item_ref);
                node.id.clock < self.before_state.get(&node.id.client).copied().unwrap_or(0)
                    && !node.deleted()
            }
        };
        if trigger {
            self.changed.entry(branch).or_default().insert(parent_sub);
        }
    }

    /// Drives the pending queues until everything integrable is in.
    /// Structs whose dependencies are still missing stay parked.
    pub(crate) fn resume_struct_integration(&mut self) -> Result<(), UpdateError> {
        let mut pending = std::mem::take(&mut self.doc.store.pending);
        let mut stack = std::mem::take(&mut self.doc.store.pending_stack);
        if pending.is_empty() && stack.is_empty() {
            return Ok(());
        }

        let mut client_ids: Vec<u64> = pending.keys().copied().collect();
        client_ids.sort_unstable();

        // Highest client first; in a conflict the lower id usually
        // does not depend on the higher one.
        fn next_target(
            client_ids: &mut Vec<u64>,
            pending: &HashMap<u64, PendingRefs>,
        ) -> Option<u64> {
            while let Some(&client) = client_ids.last() {
                let queue = &pending[&client];
                if queue.next < queue.refs.len() {
                    return Some(client);
                }
                client_ids.pop();
            }
            None
        }
        fn take_next(pending: &mut HashMap<u64, PendingRefs>, client: u64) -> Option<StructRef> {
            let queue = pending.get_mut(&client)?;
            let r = queue.refs.get(queue.next).copied()?;
            queue.next += 1;
            Some(r)
        }

        let mut cur_target = next_target(&mut client_ids, &pending);
        let mut stack_head = match stack.pop() {
            Some(r) => r,
            None => match cur_target.and_then(|client| take_next(&mut pending, client)) {
                Some(r) => r,
                None => {
                    self.doc.store.pending = pending;
                    self.doc.store.pending_stack = stack;
                    return Ok(());
                }
            },
        };

        let mut state_cache: HashMap<u64, u64> = HashMap::new();
        let mut completed = false;
        loop {
            let (head_client, head_clock, head_len) = {
                let node = self.doc.store.node(stack_head);
                (node.id.client, node.id.clock, node.len)
            };
            let local_clock = match state_cache.get(&head_client) {
                Some(&clock) => clock,
                None => {
                    let clock = self.doc.store.get_state(head_client);
                    state_cache.insert(head_client, clock);
                    clock
                }
            };
            let offset = if head_clock < local_clock {
                local_clock - head_clock
            } else {
                0
            };
            if head_clock + offset != local_clock {
                // A previous range from this client is missing. If a
                // queued ref starts earlier, run that one first.
                let mut swapped = false;
                if let Some(queue) = pending.get_mut(&head_client) {
                    if queue.next < queue.refs.len() {
                        let candidate = queue.refs[queue.next];
                        if self.doc.store.node(candidate).id.clock < head_clock {
                            queue.refs[queue.next] = stack_head;
                            let mut rest = queue.refs.split_off(queue.next);
                            rest.sort_by_key(|&x| self.doc.store.node(x).id.clock);
                            queue.refs = rest;
                            queue.next = 0;
                            stack_head = candidate;
                            swapped = true;
                        }
                    }
                }
                if swapped {
                    continue;
                }
                // Park until the gap is filled by a later update.
                stack.push(stack_head);
                break;
            }

            match self.get_missing(stack_head)? {
                None => {
                    if offset == 0 || offset < head_len {
                        self.integrate(stack_head, offset)?;
                        state_cache.insert(head_client, head_clock + head_len);
                    }
                    if let Some(next) = stack.pop() {
                        stack_head = next;
                        continue;
                    }
                    let client = match cur_target {
                        Some(c) if pending[&c].next < pending[&c].refs.len() => Some(c),
                        _ => {
                            cur_target = next_target(&mut client_ids, &pending);
                            cur_target
                        }
                    };
                    match client.and_then(|c| take_next(&mut pending, c)) {
                        Some(next) => stack_head = next,
                        None => {
                            completed = true;
                            break;
                        }
                    }
                }
                Some(missing_client) => {
                    let has_queued = pending
                        .get(&missing_client)
                        .is_some_and(|q| q.next < q.refs.len());
                    stack.push(stack_head);
                    if !has_queued {
                        // Causally depends on an update not seen yet.
                        break;
                    }
                    match take_next(&mut pending, missing_client) {
                        Some(next) => stack_head = next,
                        None => break,
                    }
                }
            }
        }

        if completed {
            pending.clear();
        } else {
            tracing::debug!(
                clients = pending.len(),
                stacked = stack.len(),
                "struct integration stalled on missing updates"
            );
        }
        self.doc.store.pending = pending;
        self.doc.store.pending_stack = stack;
        Ok(())
    }

    /// Applies a decoded delete set, splitting struct boundaries as
    /// needed. Ranges beyond the known state are kept for later.
    pub(crate) fn apply_delete_set(&mut self, ds: &DeleteSet) -> Result<(), UpdateError> {
        let mut unapplied = DeleteSet::new();
        for (&client, ranges) in &ds.clients {
            let state = self.doc.store.get_state(client);
            for range in ranges {
                let clock = range.clock;
                let clock_end = clock + range.len;
                if clock >= state {
                    unapplied.add(client, clock, range.len);
                    continue;
                }
                if state < clock_end {
                    unapplied.add(client, state, clock_end - state);
                }
                let mut index = self.doc.store.find_index(client, clock);
                {
                    let r = self.doc.store.clients[&client][index];
                    let node = self.doc.store.node(r);
                    if !node.deleted() && node.id.clock < clock {
                        self.split_item(r, clock - node.id.clock)?;
                        index += 1;
                    }
                }
                loop {
                    let refs = &self.doc.store.clients[&client];
                    if index >= refs.len() {
                        break;
                    }
                    let r = refs[index];
                    index += 1;
                    let (node_clock, node_len, deleted) = {
                        let node = self.doc.store.node(r);
                        (node.id.clock, node.len, node.deleted())
                    };
                    if node_clock >= clock_end {
                        break;
                    }
                    if !deleted {
                        if clock_end < node_clock + node_len {
                            self.split_item(r, clock_end - node_clock)?;
                        }
                        self.delete_item(r);
                    }
                }
            }
        }
        if !unapplied.is_empty() {
            tracing::debug!(
                clients = unapplied.clients.len(),
                "delete ranges ahead of local state, parked"
            );
            self.doc.store.pending_delete_sets.push(unapplied);
        }
        Ok(())
    }

    /// Retries delete sets that previously referenced unknown clocks.
    pub(crate) fn try_resume_pending_delete_sets(&mut self) -> Result<(), UpdateError> {
        let pending = std::mem::take(&mut self.doc.store.pending_delete_sets);
        for ds in pending {
            self.apply_delete_set(&ds)?;
        }
        Ok(())
    }

    /// Replaces the content of a deleted item with a tombstone, or the
    /// whole struct when its parent is gone too.
    fn gc_item(&mut self, r: StructRef, parent_gcd: bool) {
        {
            let node = self.doc.store.node(r);
            if !node.is_item() || !node.deleted() {
                return;
            }
        }
        let nested = match &self.doc.store.item(r).content {
            Content::Type(b) => Some(*b),
            _ => None,
        };
        if let Some(b) = nested {
            let mut cur = self.doc.branches.get(b).start;
            while let Some(c) = cur {
                let next = self.doc.store.node(c).as_item().and_then(|i| i.right);
                self.gc_item(c, true);
                cur = next;
            }
            self.doc.branches.get_mut(b).start = None;
            let values: Vec<StructRef> = self.doc.branches.get(b).map.values().copied().collect();
            for value in values {
                let mut cur = Some(value);
                while let Some(c) = cur {
                    let left = self.doc.store.node(c).as_item().and_then(|i| i.left);
                    self.gc_item(c, true);
                    cur = left;
                }
            }
            self.doc.branches.get_mut(b).map.clear();
        }
        let node = self.doc.store.node_mut(r);
        if parent_gcd {
            node.kind = StructKind::Gc;
        } else if let StructKind::Item(item) = &mut node.kind {
            item.content = Content::Deleted(node.len);
            item.info &= !ITEM_COUNTABLE;
        }
    }

    /// Drops the content of every struct this transaction deleted,
    /// unless it is pinned or the filter objects.
    fn try_gc_delete_set(&mut self) {
        let mut candidates: Vec<StructRef> = Vec::new();
        {
            let gc_filter = &self.doc.options.gc_filter;
            for (&client, ranges) in &self.delete_set.clients {
                for range in ranges {
                    let end = range.clock + range.len;
                    let mut si = self.doc.store.find_index(client, range.clock);
                    loop {
                        let refs = &self.doc.store.clients[&client];
                        if si >= refs.len() {
                            break;
                        }
                        let r = refs[si];
                        si += 1;
                        let node = self.doc.store.node(r);
                        if node.id.clock >= end {
                            break;
                        }
                        if node.is_item() && node.deleted() && !node.keep() && gc_filter(node) {
                            candidates.push(r);
                        }
                    }
                }
            }
        }
        for r in candidates {
            self.gc_item(r, false);
        }
    }

    /// Squashes runs of deleted structs back together.
    fn try_merge_delete_set(&mut self) {
        let clients: Vec<u64> = self.delete_set.clients.keys().copied().collect();
        for client in clients {
            let ranges = self.delete_set.clients[&client].clone();
            if !self.doc.store.clients.contains_key(&client) {
                continue;
            }
            for range in ranges.iter().rev() {
                let refs_len = self.doc.store.clients[&client].len();
                let most_right = (refs_len - 1)
                    .min(1 + self.doc.store.find_index(client, range.clock + range.len - 1));
                let mut si = most_right;
                while si > 0 {
                    let r = self.doc.store.clients[&client][si];
                    if self.doc.store.node(r).id.clock < range.clock {
                        break;
                    }
                    self.try_to_merge_with_left(client, si);
                    si -= 1;
                }
            }
        }
    }

    /// Merges `clients[client][index]` into its left neighbor when the
    /// two form one contiguous, equally-deleted, mergeable range.
    fn try_to_merge_with_left(&mut self, client: u64, index: usize) -> bool {
        if index == 0 {
            return false;
        }
        let (left_ref, right_ref) = {
            let refs = &self.doc.store.clients[&client];
            if index >= refs.len() {
                return false;
            }
            (refs[index - 1], refs[index])
        };
        let (is_gc_pair, compatible) = {
            let left = self.doc.store.node(left_ref);
            let right = self.doc.store.node(right_ref);
            if left.deleted() != right.deleted()
                || left.id.clock + left.len != right.id.clock
            {
                (false, false)
            } else {
                match (&left.kind, &right.kind) {
                    (StructKind::Gc, StructKind::Gc) => (true, true),
                    (StructKind::Item(li), StructKind::Item(ri)) => (
                        false,
                        ri.origin == Some(left.last_id())
                            && li.right == Some(right_ref)
                            && ri.right_origin == li.right_origin
                            && li.redone.is_none()
                            && ri.redone.is_none()
                            && std::mem::discriminant(&li.content)
                                == std::mem::discriminant(&ri.content),
                    ),
                    _ => (false, false),
                }
            }
        };
        if !compatible {
            return false;
        }
        let right_len = self.doc.store.node(right_ref).len;
        if is_gc_pair {
            self.doc.store.node_mut(left_ref).len += right_len;
            if let Some(refs) = self.doc.store.clients.get_mut(&client) {
                refs.remove(index);
            }
            return true;
        }
        let (right_content, right_right, right_keep, right_parent, right_parent_sub) = {
            let ri = self.doc.store.item(right_ref);
            (
                ri.content.clone(),
                ri.right,
                ri.info & ITEM_KEEP,
                ri.parent.clone(),
                ri.parent_sub.clone(),
            )
        };
        if !self
            .doc
            .store
            .item_mut(left_ref)
            .content
            .merge_with(&right_content)
        {
            return false;
        }
        {
            let li = self.doc.store.item_mut(left_ref);
            li.right = right_right;
            li.info |= right_keep;
        }
        self.doc.store.node_mut(left_ref).len += right_len;
        if let Some(rr) = right_right {
            self.doc.store.item_mut(rr).left = Some(left_ref);
        }
        if let Some(refs) = self.doc.store.clients.get_mut(&client) {
            refs.remove(index);
        }
        if let (Parent::Branch(b), Some(sub)) = (right_parent, right_parent_sub) {
            let map = &mut self.doc.branches.get_mut(b).map;
            if map.get(&sub) == Some(&right_ref) {
                map.insert(sub, left_ref);
            }
        }
        true
    }

    /// Finalizes the transaction: normalizes the delete set, garbage
    /// collects, merges structs, and emits the update message.
    pub(crate) fn commit(mut self) -> Result<TransactionOutcome, UpdateError> {
        self.delete_set.sort_and_merge();
        self.after_state = self.doc.store.state_vector();

        if self.doc.options.gc {
            self.try_gc_delete_set();
        }
        self.try_merge_delete_set();

        let after = self.after_state.clone();
        for (&client, &after_clock) in &after {
            let before_clock = self.before_state.get(&client).copied().unwrap_or(0);
            if before_clock == after_clock {
                continue;
            }
            let first = self.doc.store.find_index(client, before_clock).max(1);
            let mut i = self.doc.store.clients[&client].len() - 1;
            while i >= first {
                self.try_to_merge_with_left(client, i);
                i -= 1;
            }
        }

        let merge_candidates = std::mem::take(&mut self.merge_structs);
        for r in merge_candidates {
            let (client, clock) = {
                let node = self.doc.store.node(r);
                (node.id.client, node.id.clock)
            };
            if !self.doc.store.clients.contains_key(&client) {
                continue;
            }
            let pos = self.doc.store.find_index(client, clock);
            if pos + 1 < self.doc.store.clients[&client].len() {
                self.try_to_merge_with_left(client, pos + 1);
            }
            if pos > 0 {
                self.try_to_merge_with_left(client, pos);
            }
        }

        let local_client = self.doc.client_id;
        if !self.local
            && self.after_state.get(&local_client) != self.before_state.get(&local_client)
        {
            // A remote update produced structs under our client id;
            // continuing to use it would fork the clock.
            let fresh = generate_client_id();
            tracing::debug!(
                old_client = local_client,
                new_client = fresh,
                "remote update advanced the local clock, rotating client id"
            );
            self.doc.client_id = fresh;
        }

        let clocks_advanced = self.after_state.iter().any(|(client, &clock)| {
            self.before_state.get(client).copied().unwrap_or(0) != clock
        });
        let update = if clocks_advanced || !self.delete_set.is_empty() {
            let mut encoder = UpdateEncoderV2::new();
            write_clients_structs(
                &mut encoder,
                &self.doc.store,
                &self.doc.branches,
                &self.before_state,
            )?;
            self.delete_set.write(&mut encoder);
            Some(encoder.to_bytes())
        } else {
            None
        };

        Ok(TransactionOutcome {
            changed: self.changed,
            update,
            origin: self.origin,
            local: self.local,
            subdocs_added: self.subdocs_added,
            subdocs_removed: self.subdocs_removed,
            subdocs_loaded: self.subdocs_loaded,
        })
    }
}
