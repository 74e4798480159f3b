//! The CBOR decoder.
//!
//! [`decode`] reads one item from a byte slice and returns the [`Value`] plus
//! the offset of the next item, recursing through arrays, maps and tags and
//! concatenating indefinite-length strings up to their Break terminator.
//! Semantic tags are resolved through the [`Registry`]; the reference tags
//! (`stringref`/`nthstring`, `shareable`/`sharedref`) are handled here
//! because they need the per-call reference tracker.
//!
//! Every error carries the byte offset where it was detected, and any nested
//! failure aborts the whole decode; there are no partial results.

use super::dnf::Dnf;
use super::header::{self, Head};
use super::refs::{StrKind, Tracker};
use super::tags::{self, Registry};
use super::value::{Array, Map, Value, Width};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Truncated input or a reserved additional-info value.
    #[error("malformed item header at offset {offset}")]
    MalformedHeader { offset: usize },

    #[error("declared length at offset {offset} runs past the end of input")]
    TruncatedBody { offset: usize },

    #[error("text string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("indefinite-length string chunk at offset {offset} is not a definite {expected}")]
    ChunkTypeMismatch {
        offset: usize,
        expected: &'static str,
    },

    #[error("tag {tag} at offset {offset} expects {expected}, found {actual}")]
    TagMismatch {
        offset: usize,
        tag: u64,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("reference index {index} at offset {offset} is out of range")]
    BadReference { offset: usize, index: u64 },

    #[error("break at offset {offset} outside an indefinite-length item")]
    UnexpectedBreak { offset: usize },

    #[error("nesting deeper than {limit} at offset {offset}")]
    MaxDepth { offset: usize, limit: usize },
}

impl Error {
    /// The byte offset the error was detected at.
    pub fn offset(&self) -> usize {
        match self {
            Error::MalformedHeader { offset }
            | Error::TruncatedBody { offset }
            | Error::InvalidUtf8 { offset }
            | Error::ChunkTypeMismatch { offset, .. }
            | Error::TagMismatch { offset, .. }
            | Error::BadReference { offset, .. }
            | Error::UnexpectedBreak { offset }
            | Error::MaxDepth { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum nesting depth.  Wire input controls recursion, so the limit
    /// is what stands between a hostile buffer and the call stack.
    pub max_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { max_depth: 128 }
    }
}

/// Decode one item from the start of `data`.
pub fn decode(data: &[u8]) -> Result<(Value, usize), Error> {
    decode_from(data, 0)
}

/// Decode one item starting at `offset`, returning the value and the offset
/// of the first byte past it.
pub fn decode_from(data: &[u8], offset: usize) -> Result<(Value, usize), Error> {
    decode_in(data, offset, Registry::global(), &Options::default())
}

pub fn decode_in(
    data: &[u8],
    offset: usize,
    registry: &Registry,
    options: &Options,
) -> Result<(Value, usize), Error> {
    Decoder {
        data,
        registry,
        options,
        refs: Tracker::new(),
    }
    .item(offset, 0)
}

struct Decoder<'a> {
    data: &'a [u8],
    registry: &'a Registry,
    options: &'a Options,
    refs: Tracker,
}

impl Decoder<'_> {
    fn item(&mut self, offset: usize, depth: usize) -> Result<(Value, usize), Error> {
        if depth >= self.options.max_depth {
            return Err(Error::MaxDepth {
                offset,
                limit: self.options.max_depth,
            });
        }
        let head = header::read(self.data, offset)?;
        match head.major {
            0 if head.is_indefinite() => Err(Error::MalformedHeader { offset }),
            0 => Ok((Value::UInt(head.value), head.end)),
            1 if head.is_indefinite() => Err(Error::MalformedHeader { offset }),
            1 => Ok((Value::NInt(head.value), head.end)),
            2 => self.string(head, offset, StrKind::Bytes),
            3 => self.string(head, offset, StrKind::Text),
            4 => self.array_body(head, depth, Array::new()),
            5 => self.map_body(head, depth, Map::new()),
            6 => self.tag(head, offset, depth),
            _ => self.simple(head, offset),
        }
    }

    fn string(&mut self, head: Head, offset: usize, kind: StrKind) -> Result<(Value, usize), Error> {
        let (bytes, end) = if head.is_indefinite() {
            self.chunked(head, kind)?
        } else {
            let (slice, end) = self.slice(head, offset)?;
            if kind == StrKind::Text {
                check_utf8(slice, offset)?;
            }
            (slice.to_vec(), end)
        };
        // Qualifying literals feed the innermost string-reference scope, in
        // order of appearance.
        self.refs.note_string(kind, &bytes);
        let value = match kind {
            StrKind::Bytes => Value::Bytes(bytes),
            StrKind::Text => {
                Value::Text(String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8 { offset })?)
            }
        };
        Ok((value, end))
    }

    /// Concatenate definite chunks of the same major type up to the Break.
    fn chunked(&mut self, head: Head, kind: StrKind) -> Result<(Vec<u8>, usize), Error> {
        let expected = match kind {
            StrKind::Bytes => "byte string",
            StrKind::Text => "text string",
        };
        let mut bytes = Vec::new();
        let mut pos = head.end;
        loop {
            let chunk = header::read(self.data, pos)?;
            if chunk.major == 7 && chunk.info == 31 {
                return Ok((bytes, chunk.end));
            }
            if chunk.major != head.major || chunk.is_indefinite() {
                return Err(Error::ChunkTypeMismatch {
                    offset: pos,
                    expected,
                });
            }
            let (slice, end) = self.slice(chunk, pos)?;
            if kind == StrKind::Text {
                check_utf8(slice, pos)?;
            }
            bytes.extend_from_slice(slice);
            pos = end;
        }
    }

    fn slice(&self, head: Head, offset: usize) -> Result<(&[u8], usize), Error> {
        let end = (head.end as u64)
            .checked_add(head.value)
            .ok_or(Error::TruncatedBody { offset })?;
        if end > self.data.len() as u64 {
            return Err(Error::TruncatedBody { offset });
        }
        let end = end as usize;
        Ok((&self.data[head.end..end], end))
    }

    fn array_body(
        &mut self,
        head: Head,
        depth: usize,
        target: Array,
    ) -> Result<(Value, usize), Error> {
        let mut pos = head.end;
        if head.is_indefinite() {
            loop {
                let (value, next) = self.item(pos, depth + 1)?;
                pos = next;
                if matches!(value, Value::Break) {
                    break;
                }
                target.push(value);
            }
        } else {
            for _ in 0..head.value {
                let (value, next) = self.item(pos, depth + 1)?;
                pos = next;
                // A Break inside a definite count ends it early; tolerated
                // rather than rejected.
                if matches!(value, Value::Break) {
                    break;
                }
                target.push(value);
            }
        }
        Ok((Value::Array(target), pos))
    }

    fn map_body(&mut self, head: Head, depth: usize, target: Map) -> Result<(Value, usize), Error> {
        let mut pos = head.end;
        let mut remaining = if head.is_indefinite() {
            u64::MAX
        } else {
            head.value
        };
        while remaining > 0 {
            let (key, next) = self.item(pos, depth + 1)?;
            pos = next;
            if matches!(key, Value::Break) {
                break;
            }
            let value_offset = pos;
            let (value, next) = self.item(pos, depth + 1)?;
            pos = next;
            if matches!(value, Value::Break) {
                // A key with no value is malformed however the map ends.
                return Err(Error::UnexpectedBreak {
                    offset: value_offset,
                });
            }
            target.insert(key, value);
            if !head.is_indefinite() {
                remaining -= 1;
            }
        }
        Ok((Value::Map(target), pos))
    }

    fn tag(&mut self, head: Head, offset: usize, depth: usize) -> Result<(Value, usize), Error> {
        if head.is_indefinite() {
            return Err(Error::MalformedHeader { offset });
        }
        let id = head.value;
        match id {
            tags::NTH_STRING => {
                let (index, end) = self.uint_body(head, offset, depth, id)?;
                match self.refs.nth_string(index) {
                    Some((StrKind::Text, bytes)) => Ok((
                        Value::Text(
                            String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8 { offset })?,
                        ),
                        end,
                    )),
                    Some((StrKind::Bytes, bytes)) => Ok((Value::Bytes(bytes), end)),
                    None => Err(Error::BadReference { offset, index }),
                }
            }
            tags::STRING_REF => {
                self.refs.push_scope();
                let result = self.item(head.end, depth + 1);
                self.refs.pop_scope();
                result
            }
            tags::SHAREABLE => {
                // Register the placeholder before decoding the contents so a
                // child sharedref can resolve to the container it sits in.
                let inner = header::read(self.data, head.end)?;
                match inner.major {
                    4 => {
                        let target = Array::new();
                        self.refs.register_shared_value(Value::Array(target.clone()));
                        self.array_body(inner, depth + 1, target)
                    }
                    5 => {
                        let target = Map::new();
                        self.refs.register_shared_value(Value::Map(target.clone()));
                        self.map_body(inner, depth + 1, target)
                    }
                    major => Err(Error::TagMismatch {
                        offset,
                        tag: id,
                        expected: "array or map",
                        actual: major_name(major),
                    }),
                }
            }
            tags::SHARED_REF => {
                let (index, end) = self.uint_body(head, offset, depth, id)?;
                trace!(index, "resolving shared container reference");
                match self.refs.shared_value(index) {
                    Some(value) => Ok((value, end)),
                    None => Err(Error::BadReference { offset, index }),
                }
            }
            _ => {
                let (inner, end) = self.item(head.end, depth + 1)?;
                if matches!(inner, Value::Break) {
                    return Err(Error::UnexpectedBreak { offset: head.end });
                }
                let value = self.registry.resolve(id).decode(id, inner, offset)?;
                Ok((value, end))
            }
        }
    }

    /// The unsigned-integer body the reference tags require.
    fn uint_body(
        &mut self,
        head: Head,
        offset: usize,
        depth: usize,
        id: u64,
    ) -> Result<(u64, usize), Error> {
        let (inner, end) = self.item(head.end, depth + 1)?;
        match inner {
            Value::UInt(index) => Ok((index, end)),
            v => Err(Error::TagMismatch {
                offset,
                tag: id,
                expected: "unsigned integer",
                actual: v.type_name(),
            }),
        }
    }

    fn simple(&mut self, head: Head, offset: usize) -> Result<(Value, usize), Error> {
        let value = match head.info {
            20 => Value::Bool(false),
            21 => Value::Bool(true),
            22 => Value::Null,
            23 => Value::Undefined,
            24 => {
                // The two-byte form below 32 shadows the one-byte values.
                if head.value < 32 {
                    return Err(Error::MalformedHeader { offset });
                }
                Value::Simple(head.value as u8)
            }
            25 => Value::Float {
                width: Width::Half,
                value: Dnf::from_half(half::f16::from_bits(head.value as u16))
                    .to_double()
                    .map_err(|_| Error::MalformedHeader { offset })?,
            },
            26 => Value::Float {
                width: Width::Single,
                value: Dnf::from_single(f32::from_bits(head.value as u32))
                    .to_double()
                    .map_err(|_| Error::MalformedHeader { offset })?,
            },
            27 => Value::Float {
                width: Width::Double,
                value: f64::from_bits(head.value),
            },
            31 => Value::Break,
            info => Value::Simple(info),
        };
        Ok((value, head.end))
    }
}

fn check_utf8(bytes: &[u8], offset: usize) -> Result<(), Error> {
    std::str::from_utf8(bytes)
        .map(|_| ())
        .map_err(|_| Error::InvalidUtf8 { offset })
}

fn major_name(major: u8) -> &'static str {
    match major {
        0 => "unsigned integer",
        1 => "negative integer",
        2 => "byte string",
        3 => "text string",
        4 => "array",
        5 => "map",
        6 => "tag",
        _ => "simple value",
    }
}
