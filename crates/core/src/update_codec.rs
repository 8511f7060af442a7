//! Binary update format, version 2.
//!
//! An update is a feature-flag byte, nine var-length-prefixed column
//! streams, and a raw rest region shared by variable payloads and the
//! struct/delete-set framing. Struct fields with high redundancy
//! (clocks, info bytes, type refs) each get their own column so the
//! run-length tricks in `ydelta_lib0` can bite.

use std::collections::HashMap;

use serde_json::Value;
use ydelta_lib0::decoding::{
    IntDiffOptRleDecoder, RleDecoder, StringDecoder, UintOptRleDecoder,
};
use ydelta_lib0::encoding::{IntDiffOptRleEncoder, RleEncoder, StringEncoder, UintOptRleEncoder};
use ydelta_lib0::varint::{
    read_var_bytes, read_var_uint, write_var_bytes, write_var_uint, ReadError,
};

use crate::any;
use crate::content::{ContentReaderRegistry, TypeReaderRegistry};
use crate::error::UpdateError;
use crate::id::{Id, StateVector};
use crate::store::StructStore;
use crate::structs::{Parent, StructKind, StructNode, StructRef};
use crate::types::BranchArena;

pub(crate) const INFO_PARENT_SUB: u8 = 0x20;
pub(crate) const INFO_RIGHT_ORIGIN: u8 = 0x40;
pub(crate) const INFO_LEFT_ORIGIN: u8 = 0x80;
pub(crate) const INFO_CONTENT_MASK: u8 = 0x1f;

/// Sink for the delete-set section. Implemented by the standalone
/// [`DsEncoderV2`] and by [`UpdateEncoderV2`].
pub trait DsEncoder {
    fn rest(&mut self) -> &mut Vec<u8>;
    fn reset_ds_cur_val(&mut self);
    fn write_ds_clock(&mut self, clock: u64);
    fn write_ds_len(&mut self, len: u64);
}

pub trait DsDecoder {
    fn read_var(&mut self) -> Result<u64, ReadError>;
    fn reset_ds_cur_val(&mut self);
    fn read_ds_clock(&mut self) -> Result<u64, ReadError>;
    fn read_ds_len(&mut self) -> Result<u64, ReadError>;
}

/// Encoder for messages that carry only delete-set or state-vector
/// data. Clocks are delta-compressed against a per-client cursor.
#[derive(Debug, Default)]
pub struct DsEncoderV2 {
    rest: Vec<u8>,
    ds_cur_val: u64,
}

impl DsEncoderV2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.rest
    }
}

impl DsEncoder for DsEncoderV2 {
    fn rest(&mut self) -> &mut Vec<u8> {
        &mut self.rest
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_cur_val = 0;
    }

    fn write_ds_clock(&mut self, clock: u64) {
        let diff = clock - self.ds_cur_val;
        self.ds_cur_val = clock;
        write_var_uint(&mut self.rest, diff);
    }

    fn write_ds_len(&mut self, len: u64) {
        // Ranges are never empty, so len - 1 saves a byte at 128.
        write_var_uint(&mut self.rest, len - 1);
        self.ds_cur_val += len;
    }
}

#[derive(Debug)]
pub struct DsDecoderV2<'a> {
    data: &'a [u8],
    pos: usize,
    ds_cur_val: u64,
}

impl<'a> DsDecoderV2<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            ds_cur_val: 0,
        }
    }
}

impl DsDecoder for DsDecoderV2<'_> {
    fn read_var(&mut self) -> Result<u64, ReadError> {
        read_var_uint(self.data, &mut self.pos)
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_cur_val = 0;
    }

    fn read_ds_clock(&mut self) -> Result<u64, ReadError> {
        let diff = read_var_uint(self.data, &mut self.pos)?;
        self.ds_cur_val = self
            .ds_cur_val
            .checked_add(diff)
            .ok_or(ReadError::Overflow)?;
        Ok(self.ds_cur_val)
    }

    fn read_ds_len(&mut self) -> Result<u64, ReadError> {
        let diff = read_var_uint(self.data, &mut self.pos)?
            .checked_add(1)
            .ok_or(ReadError::Overflow)?;
        self.ds_cur_val = self
            .ds_cur_val
            .checked_add(diff)
            .ok_or(ReadError::Overflow)?;
        Ok(diff)
    }
}

#[derive(Debug, Default)]
pub struct UpdateEncoderV2 {
    rest: Vec<u8>,
    ds_cur_val: u64,
    key_clock: u64,
    key_map: HashMap<String, u64>,
    key_clock_encoder: IntDiffOptRleEncoder,
    client_encoder: UintOptRleEncoder,
    left_clock_encoder: IntDiffOptRleEncoder,
    right_clock_encoder: IntDiffOptRleEncoder,
    info_encoder: RleEncoder,
    string_encoder: StringEncoder,
    parent_info_encoder: RleEncoder,
    type_ref_encoder: UintOptRleEncoder,
    length_encoder: UintOptRleEncoder,
}

impl UpdateEncoderV2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_left_id(&mut self, id: Id) {
        self.client_encoder.write(id.client);
        self.left_clock_encoder.write(id.clock as i64);
    }

    pub fn write_right_id(&mut self, id: Id) {
        self.client_encoder.write(id.client);
        self.right_clock_encoder.write(id.clock as i64);
    }

    pub fn write_client(&mut self, client: u64) {
        self.client_encoder.write(client);
    }

    pub fn write_info(&mut self, info: u8) {
        self.info_encoder.write(info);
    }

    pub fn write_string(&mut self, s: &str) {
        self.string_encoder.write(s);
    }

    pub fn write_parent_info(&mut self, is_root: bool) {
        self.parent_info_encoder.write(u8::from(is_root));
    }

    pub fn write_type_ref(&mut self, type_ref: u64) {
        self.type_ref_encoder.write(type_ref);
    }

    pub fn write_len(&mut self, len: u64) {
        self.length_encoder.write(len);
    }

    pub fn write_any(&mut self, value: &Value) {
        any::write_any(&mut self.rest, value);
    }

    pub fn write_buf(&mut self, buf: &[u8]) {
        write_var_bytes(&mut self.rest, buf);
    }

    pub fn write_json(&mut self, value: &Value) {
        self.write_any(value);
    }

    /// Interns map keys: a key seen before is written as its table
    /// index only, a new key as the next index plus its string.
    pub fn write_key(&mut self, key: &str) {
        match self.key_map.get(key) {
            Some(&clock) => self.key_clock_encoder.write(clock as i64),
            None => {
                self.key_clock_encoder.write(self.key_clock as i64);
                self.string_encoder.write(key);
                self.key_map.insert(key.to_owned(), self.key_clock);
                self.key_clock += 1;
            }
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::new();
        // Feature flags, none defined yet.
        out.push(0);
        for column in [
            self.key_clock_encoder.to_bytes(),
            self.client_encoder.to_bytes(),
            self.left_clock_encoder.to_bytes(),
            self.right_clock_encoder.to_bytes(),
            self.info_encoder.to_bytes(),
            self.string_encoder.to_bytes(),
            self.parent_info_encoder.to_bytes(),
            self.type_ref_encoder.to_bytes(),
            self.length_encoder.to_bytes(),
        ] {
            write_var_bytes(&mut out, &column);
        }
        out.extend_from_slice(&self.rest);
        out
    }
}

impl DsEncoder for UpdateEncoderV2 {
    fn rest(&mut self) -> &mut Vec<u8> {
        &mut self.rest
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_cur_val = 0;
    }

    fn write_ds_clock(&mut self, clock: u64) {
        let diff = clock - self.ds_cur_val;
        self.ds_cur_val = clock;
        write_var_uint(&mut self.rest, diff);
    }

    fn write_ds_len(&mut self, len: u64) {
        write_var_uint(&mut self.rest, len - 1);
        self.ds_cur_val += len;
    }
}

pub struct UpdateDecoderV2<'a> {
    rest: &'a [u8],
    rest_pos: usize,
    ds_cur_val: u64,
    keys: Vec<String>,
    key_clock_decoder: IntDiffOptRleDecoder<'a>,
    client_decoder: UintOptRleDecoder<'a>,
    left_clock_decoder: IntDiffOptRleDecoder<'a>,
    right_clock_decoder: IntDiffOptRleDecoder<'a>,
    info_decoder: RleDecoder<'a>,
    string_decoder: StringDecoder<'a>,
    parent_info_decoder: RleDecoder<'a>,
    type_ref_decoder: UintOptRleDecoder<'a>,
    length_decoder: UintOptRleDecoder<'a>,
}

impl<'a> UpdateDecoderV2<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, UpdateError> {
        let mut pos = 0;
        let _flags = read_var_uint(data, &mut pos)?;
        let key_clock_col = read_var_bytes(data, &mut pos)?;
        let client_col = read_var_bytes(data, &mut pos)?;
        let left_clock_col = read_var_bytes(data, &mut pos)?;
        let right_clock_col = read_var_bytes(data, &mut pos)?;
        let info_col = read_var_bytes(data, &mut pos)?;
        let string_col = read_var_bytes(data, &mut pos)?;
        let parent_info_col = read_var_bytes(data, &mut pos)?;
        let type_ref_col = read_var_bytes(data, &mut pos)?;
        let length_col = read_var_bytes(data, &mut pos)?;
        Ok(Self {
            rest: &data[pos..],
            rest_pos: 0,
            ds_cur_val: 0,
            keys: Vec::new(),
            key_clock_decoder: IntDiffOptRleDecoder::new(key_clock_col),
            client_decoder: UintOptRleDecoder::new(client_col),
            left_clock_decoder: IntDiffOptRleDecoder::new(left_clock_col),
            right_clock_decoder: IntDiffOptRleDecoder::new(right_clock_col),
            info_decoder: RleDecoder::new(info_col),
            string_decoder: StringDecoder::new(string_col)?,
            parent_info_decoder: RleDecoder::new(parent_info_col),
            type_ref_decoder: UintOptRleDecoder::new(type_ref_col),
            length_decoder: UintOptRleDecoder::new(length_col),
        })
    }

    pub fn read_left_id(&mut self) -> Result<Id, UpdateError> {
        let client = self.client_decoder.read()?;
        let clock = clock_from(self.left_clock_decoder.read()?)?;
        Ok(Id::new(client, clock))
    }

    pub fn read_right_id(&mut self) -> Result<Id, UpdateError> {
        let client = self.client_decoder.read()?;
        let clock = clock_from(self.right_clock_decoder.read()?)?;
        Ok(Id::new(client, clock))
    }

    pub fn read_client(&mut self) -> Result<u64, UpdateError> {
        Ok(self.client_decoder.read()?)
    }

    pub fn read_info(&mut self) -> Result<u8, UpdateError> {
        Ok(self.info_decoder.read()?)
    }

    pub fn read_string(&mut self) -> Result<String, UpdateError> {
        Ok(self.string_decoder.read()?.to_owned())
    }

    pub fn read_parent_info(&mut self) -> Result<bool, UpdateError> {
        Ok(self.parent_info_decoder.read()? == 1)
    }

    pub fn read_type_ref(&mut self) -> Result<u64, UpdateError> {
        Ok(self.type_ref_decoder.read()?)
    }

    pub fn read_len(&mut self) -> Result<u64, UpdateError> {
        Ok(self.length_decoder.read()?)
    }

    pub fn read_any(&mut self) -> Result<Value, UpdateError> {
        Ok(any::read_any(self.rest, &mut self.rest_pos)?)
    }

    pub fn read_buf(&mut self) -> Result<Vec<u8>, UpdateError> {
        Ok(read_var_bytes(self.rest, &mut self.rest_pos)?.to_vec())
    }

    pub fn read_json(&mut self) -> Result<Value, UpdateError> {
        self.read_any()
    }

    pub fn read_key(&mut self) -> Result<String, UpdateError> {
        let key_clock = clock_from(self.key_clock_decoder.read()?)?;
        match self.keys.get(key_clock as usize) {
            Some(key) => Ok(key.clone()),
            None => {
                let key = self.string_decoder.read()?.to_owned();
                self.keys.push(key.clone());
                Ok(key)
            }
        }
    }
}

impl DsDecoder for UpdateDecoderV2<'_> {
    fn read_var(&mut self) -> Result<u64, ReadError> {
        read_var_uint(self.rest, &mut self.rest_pos)
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_cur_val = 0;
    }

    fn read_ds_clock(&mut self) -> Result<u64, ReadError> {
        let diff = read_var_uint(self.rest, &mut self.rest_pos)?;
        self.ds_cur_val = self
            .ds_cur_val
            .checked_add(diff)
            .ok_or(ReadError::Overflow)?;
        Ok(self.ds_cur_val)
    }

    fn read_ds_len(&mut self) -> Result<u64, ReadError> {
        let diff = read_var_uint(self.rest, &mut self.rest_pos)?
            .checked_add(1)
            .ok_or(ReadError::Overflow)?;
        self.ds_cur_val = self
            .ds_cur_val
            .checked_add(diff)
            .ok_or(ReadError::Overflow)?;
        Ok(diff)
    }
}

fn clock_from(value: i64) -> Result<u64, UpdateError> {
    u64::try_from(value).map_err(|_| UpdateError::InvalidClock)
}

/// Writes one struct, skipping its first `offset` clock units.
pub(crate) fn write_struct(
    encoder: &mut UpdateEncoderV2,
    store: &StructStore,
    branches: &BranchArena,
    r: StructRef,
    offset: u64,
) -> Result<(), UpdateError> {
    let node = store.node(r);
    match &node.kind {
        StructKind::Gc => {
            encoder.write_info(0);
            encoder.write_len(node.len - offset);
        }
        StructKind::Item(item) => {
            let origin = if offset > 0 {
                Some(Id::new(node.id.client, node.id.clock + offset - 1))
            } else {
                item.origin
            };
            let info = (item.content.ref_id() & INFO_CONTENT_MASK)
                | origin.map_or(0, |_| INFO_LEFT_ORIGIN)
                | item.right_origin.map_or(0, |_| INFO_RIGHT_ORIGIN)
                | item.parent_sub.as_ref().map_or(0, |_| INFO_PARENT_SUB);
            encoder.write_info(info);
            if let Some(origin) = origin {
                encoder.write_left_id(origin);
            }
            if let Some(right_origin) = item.right_origin {
                encoder.write_right_id(right_origin);
            }
            if origin.is_none() && item.right_origin.is_none() {
                // The receiver copies the parent from a neighbor when
                // an origin is present, so it only goes on the wire
                // here.
                match &item.parent {
                    Parent::Branch(branch) => {
                        let branch = branches.get(*branch);
                        match branch.item {
                            Some(parent_item) => {
                                encoder.write_parent_info(false);
                                encoder.write_left_id(store.node(parent_item).id);
                            }
                            None => {
                                let name =
                                    branch.name.as_deref().ok_or(UpdateError::InvalidParent)?;
                                encoder.write_parent_info(true);
                                encoder.write_string(name);
                            }
                        }
                    }
                    Parent::Name(name) => {
                        encoder.write_parent_info(true);
                        encoder.write_string(name);
                    }
                    Parent::Id(id) => {
                        encoder.write_parent_info(false);
                        encoder.write_left_id(*id);
                    }
                    Parent::Unset => return Err(UpdateError::InvalidParent),
                }
                if let Some(sub) = &item.parent_sub {
                    encoder.write_string(sub);
                }
            }
            item.content.write(encoder, offset, branches);
        }
    }
    Ok(())
}

/// Writes every struct of `client` from `clock` on.
fn write_structs(
    encoder: &mut UpdateEncoderV2,
    store: &StructStore,
    branches: &BranchArena,
    client: u64,
    clock: u64,
) -> Result<(), UpdateError> {
    let start = store.find_index(client, clock);
    let refs = &store.clients[&client];
    write_var_uint(encoder.rest(), (refs.len() - start) as u64);
    encoder.write_client(client);
    write_var_uint(encoder.rest(), clock);
    let first = refs[start];
    let first_clock = store.node(first).id.clock;
    write_struct(encoder, store, branches, first, clock - first_clock)?;
    for &r in &refs[start + 1..] {
        write_struct(encoder, store, branches, r, 0)?;
    }
    Ok(())
}

/// Writes all structs the remote described by `target` is missing.
/// Clients go out in descending id order.
pub(crate) fn write_clients_structs(
    encoder: &mut UpdateEncoderV2,
    store: &StructStore,
    branches: &BranchArena,
    target: &StateVector,
) -> Result<(), UpdateError> {
    let mut sm: Vec<(u64, u64)> = Vec::new();
    for (&client, &clock) in target {
        if store.get_state(client) > clock {
            sm.push((client, clock));
        }
    }
    for &client in store.clients.keys() {
        if !target.contains_key(&client) {
            sm.push((client, 0));
        }
    }
    write_var_uint(encoder.rest(), sm.len() as u64);
    sm.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    for (client, clock) in sm {
        write_structs(encoder, store, branches, client, clock)?;
    }
    Ok(())
}

/// Decodes the struct section into detached slab nodes, grouped by
/// client. Nothing is linked into the store lists yet.
pub(crate) fn read_client_struct_refs(
    decoder: &mut UpdateDecoderV2,
    store: &mut StructStore,
    branches: &mut BranchArena,
    content_readers: &ContentReaderRegistry,
    type_readers: &TypeReaderRegistry,
) -> Result<HashMap<u64, Vec<StructRef>>, UpdateError> {
    let mut client_refs: HashMap<u64, Vec<StructRef>> = HashMap::new();
    let num_clients = decoder.read_var()?;
    for _ in 0..num_clients {
        let num_structs = decoder.read_var()?;
        let client = decoder.read_client()?;
        let mut clock = decoder.read_var()?;
        let refs = client_refs.entry(client).or_default();
        refs.reserve(num_structs as usize);
        for _ in 0..num_structs {
            let info = decoder.read_info()?;
            let node = if info & INFO_CONTENT_MASK == 0 {
                let len = decoder.read_len()?;
                StructNode::new_gc(Id::new(client, clock), len)
            } else {
                let origin = if info & INFO_LEFT_ORIGIN != 0 {
                    Some(decoder.read_left_id()?)
                } else {
                    None
                };
                let right_origin = if info & INFO_RIGHT_ORIGIN != 0 {
                    Some(decoder.read_right_id()?)
                } else {
                    None
                };
                let cant_copy_parent_info = info & (INFO_LEFT_ORIGIN | INFO_RIGHT_ORIGIN) == 0;
                let parent = if cant_copy_parent_info {
                    if decoder.read_parent_info()? {
                        Parent::Name(decoder.read_string()?)
                    } else {
                        Parent::Id(decoder.read_left_id()?)
                    }
                } else {
                    Parent::Unset
                };
                let parent_sub = if cant_copy_parent_info && info & INFO_PARENT_SUB != 0 {
                    Some(decoder.read_string()?)
                } else {
                    None
                };
                let content = content_readers.read(
                    info & INFO_CONTENT_MASK,
                    decoder,
                    branches,
                    type_readers,
                )?;
                StructNode::new_item(
                    Id::new(client, clock),
                    origin,
                    right_origin,
                    None,
                    None,
                    parent,
                    parent_sub,
                    content,
                )
            };
            if node.len == 0 {
                return Err(UpdateError::EmptyStruct);
            }
            clock = clock
                .checked_add(node.len)
                .ok_or(UpdateError::Codec(ReadError::Overflow))?;
            refs.push(store.alloc(node));
        }
    }
    Ok(client_refs)
}

/// State vector codec. Entries go out in ascending client order so
/// equal vectors encode to equal bytes.
pub(crate) fn write_state_vector<E: DsEncoder>(encoder: &mut E, sv: &StateVector) {
    let mut entries: Vec<(u64, u64)> = sv.iter().map(|(&client, &clock)| (client, clock)).collect();
    entries.sort_unstable();
    write_var_uint(encoder.rest(), entries.len() as u64);
    for (client, clock) in entries {
        write_var_uint(encoder.rest(), client);
        write_var_uint(encoder.rest(), clock);
    }
}

pub fn encode_state_vector(sv: &StateVector) -> Vec<u8> {
    let mut encoder = DsEncoderV2::new();
    write_state_vector(&mut encoder, sv);
    encoder.to_bytes()
}

pub fn decode_state_vector(data: &[u8]) -> Result<StateVector, UpdateError> {
    let mut decoder = DsDecoderV2::new(data);
    let mut sv = StateVector::new();
    let len = decoder.read_var()?;
    for _ in 0..len {
        let client = decoder.read_var()?;
        let clock = decoder.read_var()?;
        sv.insert(client, clock);
    }
    Ok(sv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::delete_set::DeleteSet;
    use crate::types::Branch;

    #[test]
    fn state_vector_round_trips() {
        let mut sv = StateVector::new();
        sv.insert(1, 10);
        sv.insert(99, 0);
        sv.insert(7, 300);
        let bytes = encode_state_vector(&sv);
        assert_eq!(decode_state_vector(&bytes).expect("decode"), sv);
        // Ascending client order makes the encoding canonical.
        assert_eq!(bytes, encode_state_vector(&sv));
    }

    #[test]
    fn delete_set_round_trips_through_ds_codec() {
        let mut ds = DeleteSet::new();
        ds.add(1, 0, 4);
        ds.add(1, 10, 2);
        ds.add(3, 500, 1);
        let mut encoder = DsEncoderV2::new();
        ds.write(&mut encoder);
        let bytes = encoder.to_bytes();
        let mut decoder = DsDecoderV2::new(&bytes);
        let decoded = DeleteSet::read(&mut decoder).expect("decode");
        assert_eq!(decoded, ds);
    }

    #[test]
    fn overflowing_delete_range_is_rejected() {
        // One client, one range: clock diff 0, then len - 1 encoded as
        // u64::MAX so adding the offset back would wrap.
        let mut bytes = vec![1, 1, 1, 0];
        bytes.extend_from_slice(&[0xff; 9]);
        bytes.push(0x01);
        let mut decoder = DsDecoderV2::new(&bytes);
        assert!(DeleteSet::read(&mut decoder).is_err());
    }

    #[test]
    fn keys_are_interned_once() {
        let mut encoder = UpdateEncoderV2::new();
        encoder.write_key("bold");
        encoder.write_key("italic");
        encoder.write_key("bold");
        let bytes = encoder.to_bytes();
        let mut decoder = UpdateDecoderV2::new(&bytes).expect("decoder");
        assert_eq!(decoder.read_key().expect("key"), "bold");
        assert_eq!(decoder.read_key().expect("key"), "italic");
        assert_eq!(decoder.read_key().expect("key"), "bold");
    }

    #[test]
    fn item_struct_round_trips() {
        let mut store = StructStore::new();
        let mut branches = BranchArena::new();
        let mut root = Branch::new(crate::types::TYPE_REF_TEXT);
        root.name = Some("content".to_owned());
        let root = branches.alloc(root);
        let r = store.alloc_item(
            Id::new(42, 0),
            None,
            None,
            None,
            None,
            Parent::Branch(root),
            None,
            Content::String("hello".to_owned()),
        );
        store.add_struct(r);

        let mut encoder = UpdateEncoderV2::new();
        write_clients_structs(&mut encoder, &store, &branches, &StateVector::new())
            .expect("encode");
        DeleteSet::new().write(&mut encoder);
        let bytes = encoder.to_bytes();

        let mut target_store = StructStore::new();
        let mut target_branches = BranchArena::new();
        let content_readers = ContentReaderRegistry::builtin();
        let type_readers = TypeReaderRegistry::builtin();
        let mut decoder = UpdateDecoderV2::new(&bytes).expect("decoder");
        let refs = read_client_struct_refs(
            &mut decoder,
            &mut target_store,
            &mut target_branches,
            &content_readers,
            &type_readers,
        )
        .expect("decode");
        let ds = DeleteSet::read(&mut decoder).expect("ds");
        assert!(ds.is_empty());

        let refs = &refs[&42];
        assert_eq!(refs.len(), 1);
        let node = target_store.node(refs[0]);
        assert_eq!(node.id, Id::new(42, 0));
        assert_eq!(node.len, 5);
        let item = node.as_item().expect("item");
        assert_eq!(item.parent, Parent::Name("content".to_owned()));
        assert_eq!(item.content, Content::String("hello".to_owned()));
        assert_eq!(item.origin, None);
        assert_eq!(item.right_origin, None);
    }

    #[test]
    fn truncated_update_fails_to_decode() {
        let mut encoder = UpdateEncoderV2::new();
        encoder.write_key("k");
        let bytes = encoder.to_bytes();
        assert!(UpdateDecoderV2::new(&bytes[..bytes.len() - 1]).is_err());
    }
}
