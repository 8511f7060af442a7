//! Logical identifiers for operations.
//!
//! Every operation is identified by the client that produced it and a
//! per-client Lamport clock. Clocks are dense: a client's n-th unit of
//! content carries clock n.

use std::collections::HashMap;

/// Map from client id to the first clock value NOT covered by the
/// local store (i.e. the number of known units per client).
pub type StateVector = HashMap<u64, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    pub client: u64,
    pub clock: u64,
}

impl Id {
    pub fn new(client: u64, clock: u64) -> Self {
        Self { client, clock }
    }
}
