//! Replicated document engine.
//!
//! Documents are trees of shared containers (sequences, maps, text)
//! whose edits commute: two replicas that have seen the same set of
//! update messages hold identical state, regardless of order or
//! interleaving. Concurrent inserts are resolved per the YATA rules,
//! deletions travel as compact id-range sets, and the whole state or
//! any diff against a remote state vector serializes into the v2
//! binary update format.
//!
//! Entry point is [`Doc`]; mutations run inside [`Transaction`]s and
//! replication happens through [`Doc::apply_update_v2`] and
//! [`Doc::encode_state_as_update_v2`].

pub mod any;
pub mod content;
pub mod delete_set;
pub mod doc;
pub mod error;
pub mod id;
pub mod store;
pub mod structs;
pub mod transaction;
pub mod types;
pub mod update_codec;

pub use content::{Content, ContentReaderRegistry, TypeReaderRegistry};
pub use delete_set::{DeleteItem, DeleteSet};
pub use doc::{Doc, DocOptions, DocState, SubdocsEvent, UpdateEvent};
pub use error::{ContentError, ObserverError, UpdateError};
pub use id::{Id, StateVector};
pub use store::StructStore;
pub use structs::{Parent, StructKind, StructNode};
pub use transaction::Transaction;
pub use types::{Branch, BranchRef, Event, PathSegment};
pub use update_codec::{
    decode_state_vector, encode_state_vector, DsDecoder, DsDecoderV2, DsEncoder, DsEncoderV2,
    UpdateDecoderV2, UpdateEncoderV2,
};
