//! Document handle.
//!
//! A [`Doc`] owns the struct store, the branch arena, the shared root
//! map, and the reader registries. Mutations go through
//! [`Doc::transact`]; remote updates through [`Doc::apply_update_v2`].
//! Observers fire after a transaction commits.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::content::{ContentReader, ContentReaderRegistry, TypeReader, TypeReaderRegistry};
use crate::delete_set::DeleteSet;
use crate::error::{ObserverError, UpdateError};
use crate::id::StateVector;
use crate::store::StructStore;
use crate::structs::StructNode;
use crate::transaction::{Transaction, TransactionOutcome};
use crate::types::{
    Branch, BranchArena, BranchRef, Event, TYPE_REF_ARRAY, TYPE_REF_MAP, TYPE_REF_TEXT,
    TYPE_REF_UNDEFINED,
};
use crate::update_codec::{
    self, read_client_struct_refs, write_clients_structs, UpdateDecoderV2, UpdateEncoderV2,
};

pub(crate) fn generate_client_id() -> u64 {
    rand::random::<u32>() as u64
}

fn generate_guid() -> String {
    format!(
        "{:08x}-{:08x}",
        rand::random::<u32>(),
        rand::random::<u32>()
    )
}

pub struct DocOptions {
    pub guid: String,
    /// Replace deleted content with tombstones at commit time.
    pub gc: bool,
    /// Mark subdocuments as loaded as soon as they integrate.
    pub auto_load: bool,
    /// Free-form application metadata, not replicated.
    pub meta: Value,
    /// Veto for garbage collection of individual structs.
    pub gc_filter: Box<dyn Fn(&StructNode) -> bool>,
}

impl Default for DocOptions {
    fn default() -> Self {
        Self {
            guid: generate_guid(),
            gc: true,
            auto_load: false,
            meta: Value::Null,
            gc_filter: Box::new(|_| true),
        }
    }
}

impl fmt::Debug for DocOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocOptions")
            .field("guid", &self.guid)
            .field("gc", &self.gc)
            .field("auto_load", &self.auto_load)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Everything a transaction mutates, bundled so the transaction can
/// hold one mutable borrow.
pub struct DocState {
    pub(crate) client_id: u64,
    pub store: StructStore,
    pub branches: BranchArena,
    pub(crate) share: HashMap<String, BranchRef>,
    pub(crate) content_readers: ContentReaderRegistry,
    pub(crate) type_readers: TypeReaderRegistry,
    pub(crate) options: DocOptions,
}

impl DocState {
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Root branch by name. An existing placeholder root created from
    /// a remote update is re-typed on first local access.
    pub(crate) fn get_or_create_root(&mut self, name: &str, type_ref: u64) -> BranchRef {
        if let Some(&b) = self.share.get(name) {
            let branch = self.branches.get_mut(b);
            if branch.type_ref == TYPE_REF_UNDEFINED && type_ref != TYPE_REF_UNDEFINED {
                branch.type_ref = type_ref;
            }
            return b;
        }
        let mut branch = Branch::new(type_ref);
        branch.name = Some(name.to_owned());
        let b = self.branches.alloc(branch);
        self.share.insert(name.to_owned(), b);
        b
    }
}

/// Update message produced by a committed transaction.
#[derive(Debug)]
pub struct UpdateEvent {
    pub update: Vec<u8>,
    pub origin: Option<Value>,
    pub local: bool,
}

/// Subdocument handles that appeared or disappeared in a transaction.
#[derive(Debug)]
pub struct SubdocsEvent {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub loaded: Vec<String>,
}

pub type EventCallback = Box<dyn FnMut(&Event) -> Result<(), ObserverError>>;
pub type UpdateCallback = Box<dyn FnMut(&UpdateEvent) -> Result<(), ObserverError>>;
pub type SubdocsCallback = Box<dyn FnMut(&SubdocsEvent) -> Result<(), ObserverError>>;

pub struct Doc {
    state: DocState,
    observers: HashMap<BranchRef, Vec<(u64, EventCallback)>>,
    deep_observers: HashMap<BranchRef, Vec<(u64, EventCallback)>>,
    update_subscribers: Vec<(u64, UpdateCallback)>,
    subdocs_subscribers: Vec<(u64, SubdocsCallback)>,
    next_subscription: u64,
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Doc {
    pub fn new() -> Self {
        Self::with_options(DocOptions::default())
    }

    pub fn with_options(options: DocOptions) -> Self {
        Self {
            state: DocState {
                client_id: generate_client_id(),
                store: StructStore::new(),
                branches: BranchArena::new(),
                share: HashMap::new(),
                content_readers: ContentReaderRegistry::builtin(),
                type_readers: TypeReaderRegistry::builtin(),
                options,
            },
            observers: HashMap::new(),
            deep_observers: HashMap::new(),
            update_subscribers: Vec::new(),
            subdocs_subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn client_id(&self) -> u64 {
        self.state.client_id
    }

    pub fn guid(&self) -> &str {
        &self.state.options.guid
    }

    /// Read access to the document state.
    pub fn state(&self) -> &DocState {
        &self.state
    }

    pub fn get_array(&mut self, name: &str) -> BranchRef {
        self.state.get_or_create_root(name, TYPE_REF_ARRAY)
    }

    pub fn get_map(&mut self, name: &str) -> BranchRef {
        self.state.get_or_create_root(name, TYPE_REF_MAP)
    }

    pub fn get_text(&mut self, name: &str) -> BranchRef {
        self.state.get_or_create_root(name, TYPE_REF_TEXT)
    }

    /// Extends the decodable content refs of this document.
    pub fn register_content_reader(&mut self, content_ref: u8, reader: ContentReader) {
        self.state.content_readers.register(content_ref, reader);
    }

    /// Extends the decodable container shapes of this document.
    pub fn register_type_reader(&mut self, type_ref: u64, reader: TypeReader) {
        self.state.type_readers.register(type_ref, reader);
    }

    /// Runs `f` inside a local transaction. The transaction commits
    /// even when the closure fails, so partial changes still merge,
    /// gc, and notify consistently.
    pub fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Transaction) -> Result<T, UpdateError>,
    ) -> Result<T, UpdateError> {
        self.transact_with(None, true, f)
    }

    pub fn transact_with<T>(
        &mut self,
        origin: Option<Value>,
        local: bool,
        f: impl FnOnce(&mut Transaction) -> Result<T, UpdateError>,
    ) -> Result<T, UpdateError> {
        let mut txn = Transaction::new(&mut self.state, origin, local);
        let result = f(&mut txn);
        match txn.commit() {
            Ok(outcome) => {
                self.dispatch(outcome);
                result
            }
            Err(commit_err) => result.and(Err(commit_err)),
        }
    }

    /// Applies a remote update. The message is decoded in full before
    /// any store mutation, so a malformed update leaves the document
    /// untouched.
    pub fn apply_update_v2(
        &mut self,
        update: &[u8],
        origin: Option<Value>,
    ) -> Result<(), UpdateError> {
        let (refs, ds) = {
            let DocState {
                store,
                branches,
                content_readers,
                type_readers,
                ..
            } = &mut self.state;
            let mut decoder = UpdateDecoderV2::new(update)?;
            let refs =
                read_client_struct_refs(&mut decoder, store, branches, content_readers, type_readers)?;
            let ds = DeleteSet::read(&mut decoder)?;
            (refs, ds)
        };
        self.transact_with(origin, false, move |txn| {
            txn.doc.store.merge_read_structs_into_pending(refs);
            txn.resume_struct_integration()?;
            txn.doc.store.cleanup_pending_structs();
            txn.apply_delete_set(&ds)?;
            txn.try_resume_pending_delete_sets()?;
            Ok(())
        })
    }

    /// Everything the remote described by `target` is missing, as one
    /// update message.
    pub fn encode_state_as_update_v2(
        &self,
        target: &StateVector,
    ) -> Result<Vec<u8>, UpdateError> {
        let mut encoder = UpdateEncoderV2::new();
        write_clients_structs(&mut encoder, &self.state.store, &self.state.branches, target)?;
        DeleteSet::from_store(&self.state.store).write(&mut encoder);
        Ok(encoder.to_bytes())
    }

    pub fn encode_state_vector_v2(&self) -> Vec<u8> {
        update_codec::encode_state_vector(&self.state.store.state_vector())
    }

    pub fn observe(&mut self, branch: BranchRef, callback: EventCallback) -> u64 {
        let id = self.next_subscription();
        self.observers.entry(branch).or_default().push((id, callback));
        id
    }

    pub fn unobserve(&mut self, branch: BranchRef, subscription: u64) -> bool {
        remove_subscription(self.observers.get_mut(&branch), subscription)
    }

    /// Observes a branch and every container nested under it.
    pub fn observe_deep(&mut self, branch: BranchRef, callback: EventCallback) -> u64 {
        let id = self.next_subscription();
        self.deep_observers
            .entry(branch)
            .or_default()
            .push((id, callback));
        id
    }

    pub fn unobserve_deep(&mut self, branch: BranchRef, subscription: u64) -> bool {
        remove_subscription(self.deep_observers.get_mut(&branch), subscription)
    }

    pub fn on_update(&mut self, callback: UpdateCallback) -> u64 {
        let id = self.next_subscription();
        self.update_subscribers.push((id, callback));
        id
    }

    pub fn off_update(&mut self, subscription: u64) -> bool {
        remove_subscription(Some(&mut self.update_subscribers), subscription)
    }

    pub fn on_subdocs(&mut self, callback: SubdocsCallback) -> u64 {
        let id = self.next_subscription();
        self.subdocs_subscribers.push((id, callback));
        id
    }

    pub fn off_subdocs(&mut self, subscription: u64) -> bool {
        remove_subscription(Some(&mut self.subdocs_subscribers), subscription)
    }

    fn next_subscription(&mut self) -> u64 {
        let id = self.next_subscription;
        self.next_subscription += 1;
        id
    }

    /// Fan-out after a commit: shallow observers, then deep observers,
    /// then update subscribers, then subdocument subscribers.
    fn dispatch(&mut self, outcome: TransactionOutcome) {
        let state = &self.state;
        let live = |branch: BranchRef| match state.branches.get(branch).item {
            Some(item) => !state.store.node(item).deleted(),
            None => true,
        };

        for (&branch, keys) in &outcome.changed {
            if !live(branch) {
                continue;
            }
            if let Some(observers) = self.observers.get_mut(&branch) {
                let event = Event {
                    target: branch,
                    path: Vec::new(),
                    keys: keys.clone(),
                };
                for (_, callback) in observers {
                    if let Err(err) = callback(&event) {
                        tracing::warn!(error = %err, "observer failed");
                    }
                }
            }
        }

        for (&observed, observers) in &mut self.deep_observers {
            let mut events: Vec<Event> = outcome
                .changed
                .iter()
                .filter_map(|(&target, keys)| {
                    if !live(target) {
                        return None;
                    }
                    let path = state.path_between(observed, target)?;
                    Some(Event {
                        target,
                        path,
                        keys: keys.clone(),
                    })
                })
                .collect();
            // Parents before children.
            events.sort_by_key(|event| event.path.len());
            for event in &events {
                for (_, callback) in observers.iter_mut() {
                    if let Err(err) = callback(event) {
                        tracing::warn!(error = %err, "deep observer failed");
                    }
                }
            }
        }

        if let Some(update) = &outcome.update {
            let event = UpdateEvent {
                update: update.clone(),
                origin: outcome.origin.clone(),
                local: outcome.local,
            };
            for (_, callback) in &mut self.update_subscribers {
                if let Err(err) = callback(&event) {
                    tracing::warn!(error = %err, "update subscriber failed");
                }
            }
        }

        if !(outcome.subdocs_added.is_empty()
            && outcome.subdocs_removed.is_empty()
            && outcome.subdocs_loaded.is_empty())
        {
            let event = SubdocsEvent {
                added: outcome.subdocs_added,
                removed: outcome.subdocs_removed,
                loaded: outcome.subdocs_loaded,
            };
            for (_, callback) in &mut self.subdocs_subscribers {
                if let Err(err) = callback(&event) {
                    tracing::warn!(error = %err, "subdocs subscriber failed");
                }
            }
        }
    }
}

fn remove_subscription<T>(list: Option<&mut Vec<(u64, T)>>, subscription: u64) -> bool {
    match list {
        Some(list) => {
            let before = list.len();
            list.retain(|(id, _)| *id != subscription);
            list.len() != before
        }
        None => false,
    }
}
