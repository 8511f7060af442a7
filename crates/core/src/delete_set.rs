//! Compact description of deleted id ranges.
//!
//! A delete set maps client ids to sorted, non-overlapping clock
//! ranges. Transactions accumulate one while they run; updates carry
//! one after the struct section.

use std::collections::HashMap;

use crate::error::UpdateError;
use crate::id::Id;
use crate::store::StructStore;
use crate::update_codec::{DsDecoder, DsEncoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteItem {
    pub clock: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteSet {
    pub clients: HashMap<u64, Vec<DeleteItem>>,
}

impl DeleteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Records a deleted range, keeping the client's list sorted and
    /// coalescing with adjacent or overlapping ranges.
    pub fn add(&mut self, client: u64, clock: u64, len: u64) {
        if len == 0 {
            return;
        }
        let items = self.clients.entry(client).or_default();
        let pos = items.partition_point(|d| d.clock < clock);
        let merged = if pos > 0 && items[pos - 1].clock + items[pos - 1].len >= clock {
            let end = (clock + len).max(items[pos - 1].clock + items[pos - 1].len);
            items[pos - 1].len = end - items[pos - 1].clock;
            pos - 1
        } else if pos < items.len() && clock + len >= items[pos].clock {
            let end = (clock + len).max(items[pos].clock + items[pos].len);
            items[pos] = DeleteItem {
                clock,
                len: end - clock,
            };
            pos
        } else {
            items.insert(pos, DeleteItem { clock, len });
            return;
        };
        // The grown range may now span any number of its successors.
        let mut end = items[merged].clock + items[merged].len;
        let mut next = merged + 1;
        while next < items.len() && end >= items[next].clock {
            end = end.max(items[next].clock + items[next].len);
            next += 1;
        }
        items[merged].len = end - items[merged].clock;
        items.drain(merged + 1..next);
    }

    /// Re-sorts and merges every client list. Ranges produced through
    /// [`DeleteSet::add`] stay normalized already; this covers sets
    /// assembled from decoded wire data.
    pub fn sort_and_merge(&mut self) {
        for items in self.clients.values_mut() {
            items.sort_unstable_by_key(|d| d.clock);
            let mut write = 0;
            for read in 1..items.len() {
                let cur = items[read];
                let prev = &mut items[write];
                if prev.clock + prev.len >= cur.clock {
                    let end = (cur.clock + cur.len).max(prev.clock + prev.len);
                    prev.len = end - prev.clock;
                } else {
                    write += 1;
                    items[write] = cur;
                }
            }
            items.truncate(write + 1);
        }
        self.clients.retain(|_, items| !items.is_empty());
    }

    /// Index of the range containing `clock`, if any.
    pub(crate) fn find_index(items: &[DeleteItem], clock: u64) -> Option<usize> {
        let mut left: i64 = 0;
        let mut right: i64 = items.len() as i64 - 1;
        while left <= right {
            let mid = ((left + right) / 2) as usize;
            let item = items[mid];
            if item.clock <= clock {
                if clock < item.clock + item.len {
                    return Some(mid);
                }
                left = mid as i64 + 1;
            } else {
                right = mid as i64 - 1;
            }
        }
        None
    }

    pub fn is_deleted(&self, id: Id) -> bool {
        self.clients
            .get(&id.client)
            .map(|items| Self::find_index(items, id.clock).is_some())
            .unwrap_or(false)
    }

    /// Rebuilds the full delete set from the deletion flags of the
    /// store.
    pub fn from_store(store: &StructStore) -> Self {
        let mut ds = DeleteSet::new();
        for (&client, refs) in &store.clients {
            let mut i = 0;
            while i < refs.len() {
                let node = store.node(refs[i]);
                if node.deleted() {
                    let clock = node.id.clock;
                    let mut len = node.len;
                    while i + 1 < refs.len() {
                        let next = store.node(refs[i + 1]);
                        if !next.deleted() {
                            break;
                        }
                        len += next.len;
                        i += 1;
                    }
                    ds.add(client, clock, len);
                }
                i += 1;
            }
        }
        ds
    }

    /// Clients are written in ascending id order so equal sets encode
    /// to equal bytes.
    pub fn write<E: DsEncoder>(&self, encoder: &mut E) {
        ydelta_lib0::varint::write_var_uint(encoder.rest(), self.clients.len() as u64);
        let mut client_ids: Vec<u64> = self.clients.keys().copied().collect();
        client_ids.sort_unstable();
        for client in client_ids {
            let items = &self.clients[&client];
            encoder.reset_ds_cur_val();
            ydelta_lib0::varint::write_var_uint(encoder.rest(), client);
            ydelta_lib0::varint::write_var_uint(encoder.rest(), items.len() as u64);
            for item in items {
                encoder.write_ds_clock(item.clock);
                encoder.write_ds_len(item.len);
            }
        }
    }

    pub fn read<D: DsDecoder>(decoder: &mut D) -> Result<Self, UpdateError> {
        let mut ds = DeleteSet::new();
        let num_clients = decoder.read_var()?;
        for _ in 0..num_clients {
            decoder.reset_ds_cur_val();
            let client = decoder.read_var()?;
            let num_ranges = decoder.read_var()?;
            for _ in 0..num_ranges {
                let clock = decoder.read_ds_clock()?;
                let len = decoder.read_ds_len()?;
                ds.add(client, clock, len);
            }
        }
        Ok(ds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_keeps_ranges_sorted_and_merged() {
        let mut ds = DeleteSet::new();
        ds.add(1, 10, 2);
        ds.add(1, 0, 3);
        ds.add(1, 5, 2);
        assert_eq!(
            ds.clients[&1],
            vec![
                DeleteItem { clock: 0, len: 3 },
                DeleteItem { clock: 5, len: 2 },
                DeleteItem { clock: 10, len: 2 },
            ]
        );
        // Bridge the middle gap from both sides.
        ds.add(1, 3, 2);
        ds.add(1, 7, 3);
        assert_eq!(
            ds.clients[&1],
            vec![DeleteItem { clock: 0, len: 12 }]
        );
    }

    #[test]
    fn overlapping_add_extends_existing_range() {
        let mut ds = DeleteSet::new();
        ds.add(2, 4, 4);
        ds.add(2, 6, 10);
        assert_eq!(ds.clients[&2], vec![DeleteItem { clock: 4, len: 12 }]);
        ds.add(2, 0, 20);
        assert_eq!(ds.clients[&2], vec![DeleteItem { clock: 0, len: 20 }]);
    }

    #[test]
    fn add_spanning_several_ranges_absorbs_them_all() {
        let mut ds = DeleteSet::new();
        ds.add(1, 50, 1);
        ds.add(1, 60, 1);
        ds.add(1, 70, 1);
        ds.add(1, 0, 100);
        assert_eq!(ds.clients[&1], vec![DeleteItem { clock: 0, len: 100 }]);
        assert!(ds.is_deleted(Id::new(1, 80)));

        let mut ds = DeleteSet::new();
        ds.add(2, 0, 2);
        ds.add(2, 10, 2);
        ds.add(2, 20, 2);
        ds.add(2, 1, 15);
        assert_eq!(
            ds.clients[&2],
            vec![
                DeleteItem { clock: 0, len: 16 },
                DeleteItem { clock: 20, len: 2 },
            ]
        );
    }

    #[test]
    fn is_deleted_checks_range_bounds() {
        let mut ds = DeleteSet::new();
        ds.add(1, 5, 3);
        assert!(!ds.is_deleted(Id::new(1, 4)));
        assert!(ds.is_deleted(Id::new(1, 5)));
        assert!(ds.is_deleted(Id::new(1, 7)));
        assert!(!ds.is_deleted(Id::new(1, 8)));
        assert!(!ds.is_deleted(Id::new(9, 5)));
    }

    #[test]
    fn sort_and_merge_normalizes_raw_ranges() {
        let mut ds = DeleteSet::new();
        ds.clients.insert(
            1,
            vec![
                DeleteItem { clock: 8, len: 2 },
                DeleteItem { clock: 0, len: 4 },
                DeleteItem { clock: 3, len: 2 },
            ],
        );
        ds.sort_and_merge();
        assert_eq!(
            ds.clients[&1],
            vec![
                DeleteItem { clock: 0, len: 5 },
                DeleteItem { clock: 8, len: 2 },
            ]
        );
    }
}
