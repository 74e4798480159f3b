//! Per-call reference tracking for shared containers and repeated strings.
//!
//! One tracker lives for exactly one top-level encode or decode.  Shared
//! containers use a single flat table for the whole call; string references
//! are scoped, each `stringref` tag pushing a fresh table that shadows the
//! enclosing one.

use super::value::Value;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StrKind {
    Text,
    Bytes,
}

/// Minimum length a string must have before it earns a table slot.  The
/// steps track the encoded width of the index that would replace a repeat of
/// the literal, so a reference is never larger than the string it stands for.
fn threshold(table_len: usize) -> usize {
    match table_len as u64 {
        0..=23 => 3,
        24..=255 => 4,
        256..=65535 => 5,
        65536..=4294967295 => 7,
        _ => 11,
    }
}

#[derive(Default)]
struct StringTable {
    entries: Vec<(StrKind, Vec<u8>)>,
}

pub(crate) struct Tracker {
    /// Encode side: container ids, in registration order.
    shared_ids: Vec<u64>,
    /// Decode side: placeholder containers, in registration order.
    shared_values: Vec<Value>,
    /// String-reference scopes, innermost last.  Empty means references are
    /// not active and strings pass through untracked.
    scopes: Vec<StringTable>,
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            shared_ids: Vec::new(),
            shared_values: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn shared_index(&self, id: u64) -> Option<u64> {
        self.shared_ids.iter().position(|&i| i == id).map(|p| p as u64)
    }

    pub fn register_shared_id(&mut self, id: u64) {
        self.shared_ids.push(id)
    }

    pub fn register_shared_value(&mut self, value: Value) {
        self.shared_values.push(value)
    }

    pub fn shared_value(&self, index: u64) -> Option<Value> {
        self.shared_values.get(usize::try_from(index).ok()?).cloned()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(StringTable::default())
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Look up `bytes` in the innermost scope.  An equal entry yields its
    /// index; otherwise the string is recorded (when it meets the length
    /// threshold for the table's current size) and `None` is returned.
    /// Outside any scope this is a no-op.
    pub fn note_string(&mut self, kind: StrKind, bytes: &[u8]) -> Option<u64> {
        let table = self.scopes.last_mut()?;
        if let Some(pos) = table
            .entries
            .iter()
            .position(|(k, b)| *k == kind && b == bytes)
        {
            return Some(pos as u64);
        }
        if bytes.len() >= threshold(table.entries.len()) {
            table.entries.push((kind, bytes.to_vec()));
        }
        None
    }

    pub fn nth_string(&self, index: u64) -> Option<(StrKind, Vec<u8>)> {
        self.scopes
            .last()?
            .entries
            .get(usize::try_from(index).ok()?)
            .cloned()
    }
}
