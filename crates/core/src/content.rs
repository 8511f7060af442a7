//! Item content variants and their wire readers.
//!
//! The low five bits of an item's info byte carry the content ref that
//! selects the reader. Ref 0 is reserved for GC structs and never maps
//! to content.

use serde_json::Value;

use crate::error::{ContentError, UpdateError};
use crate::types::{Branch, BranchArena, BranchRef};
use crate::update_codec::{UpdateDecoderV2, UpdateEncoderV2};

pub const CONTENT_REF_DELETED: u8 = 1;
pub const CONTENT_REF_JSON: u8 = 2;
pub const CONTENT_REF_BINARY: u8 = 3;
pub const CONTENT_REF_STRING: u8 = 4;
pub const CONTENT_REF_EMBED: u8 = 5;
pub const CONTENT_REF_FORMAT: u8 = 6;
pub const CONTENT_REF_TYPE: u8 = 7;
pub const CONTENT_REF_ANY: u8 = 8;
pub const CONTENT_REF_DOC: u8 = 9;

/// The payload an item carries. Closed set; new payload kinds come in
/// through the reader registries, not through this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Tombstone for content whose value was garbage collected.
    Deleted(u64),
    /// One JSON-serialized value per clock unit.
    Json(Vec<Value>),
    Binary(Vec<u8>),
    /// Text; its length counts utf-16 code units.
    String(String),
    Embed(Value),
    Format { key: String, value: Value },
    /// A nested container.
    Type(BranchRef),
    /// One dynamic value per clock unit.
    Any(Vec<Value>),
    /// A subdocument handle.
    Doc { guid: String, options: Value },
}

impl Content {
    pub fn ref_id(&self) -> u8 {
        match self {
            Content::Deleted(_) => CONTENT_REF_DELETED,
            Content::Json(_) => CONTENT_REF_JSON,
            Content::Binary(_) => CONTENT_REF_BINARY,
            Content::String(_) => CONTENT_REF_STRING,
            Content::Embed(_) => CONTENT_REF_EMBED,
            Content::Format { .. } => CONTENT_REF_FORMAT,
            Content::Type(_) => CONTENT_REF_TYPE,
            Content::Any(_) => CONTENT_REF_ANY,
            Content::Doc { .. } => CONTENT_REF_DOC,
        }
    }

    /// Clock units this content occupies.
    pub fn len(&self) -> u64 {
        match self {
            Content::Deleted(len) => *len,
            Content::Json(values) => values.len() as u64,
            Content::String(s) => s.encode_utf16().count() as u64,
            Content::Any(values) => values.len() as u64,
            Content::Binary(_)
            | Content::Embed(_)
            | Content::Format { .. }
            | Content::Type(_)
            | Content::Doc { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the content contributes to the parent's countable
    /// length.
    pub fn countable(&self) -> bool {
        !matches!(self, Content::Deleted(_) | Content::Format { .. })
    }

    /// Splits off and returns the suffix starting at `offset`, keeping
    /// the prefix in `self`. Offsets are in clock units.
    pub fn splice(&mut self, offset: u64) -> Result<Content, ContentError> {
        match self {
            Content::Deleted(len) => {
                let right = *len - offset;
                *len = offset;
                Ok(Content::Deleted(right))
            }
            Content::Json(values) => Ok(Content::Json(values.split_off(offset as usize))),
            Content::Any(values) => Ok(Content::Any(values.split_off(offset as usize))),
            Content::String(s) => {
                let (head, tail) = split_utf16(s, offset);
                *s = head;
                Ok(Content::String(tail))
            }
            Content::Binary(_)
            | Content::Embed(_)
            | Content::Format { .. }
            | Content::Type(_)
            | Content::Doc { .. } => Err(ContentError::AtomicSplice),
        }
    }

    /// Appends `right` when the variants are mergeable. Returns false
    /// and leaves `self` untouched otherwise.
    pub fn merge_with(&mut self, right: &Content) -> bool {
        match (self, right) {
            (Content::Deleted(len), Content::Deleted(other)) => {
                *len += other;
                true
            }
            (Content::Json(values), Content::Json(other)) => {
                values.extend(other.iter().cloned());
                true
            }
            (Content::Any(values), Content::Any(other)) => {
                values.extend(other.iter().cloned());
                true
            }
            (Content::String(s), Content::String(other)) => {
                s.push_str(other);
                true
            }
            _ => false,
        }
    }

    /// Materialized values, one per clock unit for countable content.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Content::Deleted(_) | Content::Format { .. } => Vec::new(),
            Content::Json(values) | Content::Any(values) => values.clone(),
            Content::Binary(data) => {
                vec![Value::Array(data.iter().map(|b| Value::from(*b)).collect())]
            }
            Content::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
            Content::Embed(value) => vec![value.clone()],
            Content::Type(_) => vec![Value::Null],
            Content::Doc { guid, .. } => vec![Value::String(guid.clone())],
        }
    }

    pub(crate) fn write(
        &self,
        encoder: &mut UpdateEncoderV2,
        offset: u64,
        branches: &BranchArena,
    ) {
        match self {
            Content::Deleted(len) => encoder.write_len(len - offset),
            Content::Json(values) => {
                encoder.write_len(values.len() as u64 - offset);
                for value in &values[offset as usize..] {
                    match serde_json::to_string(value) {
                        Ok(s) => encoder.write_string(&s),
                        Err(_) => encoder.write_string("null"),
                    }
                }
            }
            Content::Binary(data) => encoder.write_buf(data),
            Content::String(s) => {
                let (_, tail) = split_utf16(s, offset);
                encoder.write_string(&tail);
            }
            Content::Embed(value) => encoder.write_json(value),
            Content::Format { key, value } => {
                encoder.write_key(key);
                encoder.write_json(value);
            }
            Content::Type(branch) => encoder.write_type_ref(branches.get(*branch).type_ref),
            Content::Any(values) => {
                encoder.write_len(values.len() as u64 - offset);
                for value in &values[offset as usize..] {
                    encoder.write_any(value);
                }
            }
            Content::Doc { guid, options } => {
                encoder.write_string(guid);
                encoder.write_any(options);
            }
        }
    }
}

/// Splits a string at a utf-16 code-unit offset. An offset landing
/// inside a surrogate pair replaces both halves with U+FFFD so the
/// code-unit lengths on the wire stay consistent.
pub(crate) fn split_utf16(s: &str, offset: u64) -> (String, String) {
    let mut units = 0u64;
    for (i, ch) in s.char_indices() {
        if units == offset {
            return (s[..i].to_owned(), s[i..].to_owned());
        }
        let width = ch.len_utf16() as u64;
        if units + width > offset {
            let mut head = s[..i].to_owned();
            head.push('\u{fffd}');
            let mut tail = String::from('\u{fffd}');
            tail.push_str(&s[i + ch.len_utf8()..]);
            return (head, tail);
        }
        units += width;
    }
    (s.to_owned(), String::new())
}

/// Decodes one content payload.
pub type ContentReader = fn(
    &mut UpdateDecoderV2,
    &mut BranchArena,
    &TypeReaderRegistry,
) -> Result<Content, UpdateError>;

/// Maps content refs 1..=31 to readers. Owned by the document; never
/// global.
pub struct ContentReaderRegistry {
    readers: [Option<ContentReader>; 32],
}

impl ContentReaderRegistry {
    /// Registry with the nine built-in readers.
    pub fn builtin() -> Self {
        let mut registry = Self {
            readers: [None; 32],
        };
        registry.register(CONTENT_REF_DELETED, read_content_deleted);
        registry.register(CONTENT_REF_JSON, read_content_json);
        registry.register(CONTENT_REF_BINARY, read_content_binary);
        registry.register(CONTENT_REF_STRING, read_content_string);
        registry.register(CONTENT_REF_EMBED, read_content_embed);
        registry.register(CONTENT_REF_FORMAT, read_content_format);
        registry.register(CONTENT_REF_TYPE, read_content_type);
        registry.register(CONTENT_REF_ANY, read_content_any);
        registry.register(CONTENT_REF_DOC, read_content_doc);
        registry
    }

    pub fn register(&mut self, content_ref: u8, reader: ContentReader) {
        if (1..32).contains(&content_ref) {
            self.readers[content_ref as usize] = Some(reader);
        }
    }

    pub fn read(
        &self,
        content_ref: u8,
        decoder: &mut UpdateDecoderV2,
        branches: &mut BranchArena,
        type_readers: &TypeReaderRegistry,
    ) -> Result<Content, UpdateError> {
        let reader = self
            .readers
            .get(content_ref as usize)
            .copied()
            .flatten()
            .ok_or(UpdateError::UnknownContentRef(content_ref))?;
        reader(decoder, branches, type_readers)
    }
}

/// Builds the in-memory container for a decoded type ref.
pub type TypeReader =
    fn(&mut UpdateDecoderV2, &mut BranchArena, u64) -> Result<BranchRef, UpdateError>;

pub struct TypeReaderRegistry {
    readers: std::collections::HashMap<u64, TypeReader>,
}

impl TypeReaderRegistry {
    /// Registry for the built-in container shapes: array, map, text.
    pub fn builtin() -> Self {
        let mut registry = Self {
            readers: std::collections::HashMap::new(),
        };
        for type_ref in [
            crate::types::TYPE_REF_ARRAY,
            crate::types::TYPE_REF_MAP,
            crate::types::TYPE_REF_TEXT,
        ] {
            registry.register(type_ref, read_plain_container);
        }
        registry
    }

    pub fn register(&mut self, type_ref: u64, reader: TypeReader) {
        self.readers.insert(type_ref, reader);
    }

    pub fn read(
        &self,
        decoder: &mut UpdateDecoderV2,
        branches: &mut BranchArena,
        type_ref: u64,
    ) -> Result<BranchRef, UpdateError> {
        let reader = self
            .readers
            .get(&type_ref)
            .copied()
            .ok_or(UpdateError::UnknownTypeRef(type_ref))?;
        reader(decoder, branches, type_ref)
    }
}

fn read_plain_container(
    _decoder: &mut UpdateDecoderV2,
    branches: &mut BranchArena,
    type_ref: u64,
) -> Result<BranchRef, UpdateError> {
    Ok(branches.alloc(Branch::new(type_ref)))
}

fn read_content_deleted(
    decoder: &mut UpdateDecoderV2,
    _branches: &mut BranchArena,
    _type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    Ok(Content::Deleted(decoder.read_len()?))
}

fn read_content_json(
    decoder: &mut UpdateDecoderV2,
    _branches: &mut BranchArena,
    _type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    let len = decoder.read_len()?;
    let mut values = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let raw = decoder.read_string()?;
        if raw == "undefined" {
            values.push(Value::Null);
        } else {
            values.push(serde_json::from_str(&raw).map_err(|_| UpdateError::InvalidJson)?);
        }
    }
    Ok(Content::Json(values))
}

fn read_content_binary(
    decoder: &mut UpdateDecoderV2,
    _branches: &mut BranchArena,
    _type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    Ok(Content::Binary(decoder.read_buf()?))
}

fn read_content_string(
    decoder: &mut UpdateDecoderV2,
    _branches: &mut BranchArena,
    _type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    Ok(Content::String(decoder.read_string()?))
}

fn read_content_embed(
    decoder: &mut UpdateDecoderV2,
    _branches: &mut BranchArena,
    _type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    Ok(Content::Embed(decoder.read_any()?))
}

fn read_content_format(
    decoder: &mut UpdateDecoderV2,
    _branches: &mut BranchArena,
    _type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    let key = decoder.read_key()?;
    let value = decoder.read_any()?;
    Ok(Content::Format { key, value })
}

fn read_content_type(
    decoder: &mut UpdateDecoderV2,
    branches: &mut BranchArena,
    type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    let type_ref = decoder.read_type_ref()?;
    let branch = type_readers.read(decoder, branches, type_ref)?;
    Ok(Content::Type(branch))
}

fn read_content_any(
    decoder: &mut UpdateDecoderV2,
    _branches: &mut BranchArena,
    _type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    let len = decoder.read_len()?;
    let mut values = Vec::with_capacity(len as usize);
    for _ in 0..len {
        values.push(decoder.read_any()?);
    }
    Ok(Content::Any(values))
}

fn read_content_doc(
    decoder: &mut UpdateDecoderV2,
    _branches: &mut BranchArena,
    _type_readers: &TypeReaderRegistry,
) -> Result<Content, UpdateError> {
    let guid = decoder.read_string()?;
    let options = decoder.read_any()?;
    Ok(Content::Doc { guid, options })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_splice_counts_utf16_units() {
        let mut content = Content::String("ab🙂cd".to_owned());
        assert_eq!(content.len(), 6);
        let right = content.splice(4).expect("string splice must succeed");
        assert_eq!(content, Content::String("ab🙂".to_owned()));
        assert_eq!(right, Content::String("cd".to_owned()));
    }

    #[test]
    fn string_splice_inside_surrogate_pair_replaces_both_halves() {
        let mut content = Content::String("a🙂b".to_owned());
        let right = content.splice(2).expect("string splice must succeed");
        assert_eq!(content, Content::String("a\u{fffd}".to_owned()));
        assert_eq!(right, Content::String("\u{fffd}b".to_owned()));
        assert_eq!(content.len() + right.len(), 4);
    }

    #[test]
    fn atomic_content_rejects_splice() {
        let mut content = Content::Binary(vec![1, 2, 3]);
        assert_eq!(content.splice(1), Err(ContentError::AtomicSplice));
        let mut content = Content::Embed(json!({"k": 1}));
        assert_eq!(content.splice(1), Err(ContentError::AtomicSplice));
    }

    #[test]
    fn splice_then_merge_restores_the_original() {
        let originals = [
            Content::String("stable text".to_owned()),
            Content::Any(vec![json!(1), json!("two"), json!(null), json!({"k": 3})]),
            Content::Json(vec![json!(true), json!(7), json!([1, 2])]),
            Content::Deleted(5),
        ];
        for original in originals {
            let len = original.len();
            for k in 1..len {
                let mut left = original.clone();
                let right = left.splice(k).expect("splice must succeed");
                assert_eq!(left.len(), k, "left length at k={k}");
                assert_eq!(right.len(), len - k, "right length at k={k}");
                assert!(left.merge_with(&right), "merge at k={k}");
                assert_eq!(left, original, "round trip at k={k}");
            }
        }
    }

    #[test]
    fn merge_is_rejection_safe() {
        let mut left = Content::Any(vec![json!(1)]);
        let right = Content::String("x".to_owned());
        assert!(!left.merge_with(&right));
        assert_eq!(left, Content::Any(vec![json!(1)]));
        assert!(left.merge_with(&Content::Any(vec![json!(2)])));
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn deleted_splice_keeps_total_length() {
        let mut content = Content::Deleted(10);
        let right = content.splice(4).expect("deleted splice must succeed");
        assert_eq!(content, Content::Deleted(4));
        assert_eq!(right, Content::Deleted(6));
    }
}
