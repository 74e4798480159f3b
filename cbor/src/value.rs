//! The in-memory CBOR value model.
//!
//! Arrays and maps are shared handles rather than plain vectors: each one is
//! allocated with a stable integer id, and cloning a [`Value`] clones the
//! handle, not the contents.  This is what lets the codec express shared and
//! self-referential structures: a decoded `sharedref` is the *same*
//! container, not a copy.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Width of the wire encoding a float was last read from or written to.
/// Informational only: two floats with equal bits compare equal whatever
/// width they travelled at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Width {
    Half,
    Single,
    Double,
}

#[derive(Clone)]
pub enum Value {
    UInt(u64),
    /// A negative integer `-1 - n`, stored as the raw wire value `n`.
    NInt(u64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Array),
    Map(Map),
    Bool(bool),
    Null,
    Undefined,
    Float { width: Width, value: f64 },
    /// An unassigned simple value (major 7).
    Simple(u8),
    /// A semantically tagged value, either one of the built-in
    /// interpretations or an unrecognised tag passed through verbatim.
    Tagged(Box<Tagged>),
    /// The indefinite-length terminator.  Only ever seen at the top level of
    /// a decode; it cannot be encoded.
    Break,
}

/// Semantic interpretations produced by the built-in tag hooks.  The numeric
/// tag is consumed during decode and reconstructed on encode; only
/// [`Tagged::Unknown`] carries its id around.
#[derive(Clone, PartialEq)]
pub enum Tagged {
    DateTime(String),
    Epoch(f64),
    PosBignum(Vec<u8>),
    NegBignum(Vec<u8>),
    DecimalFraction { exponent: i128, mantissa: i128 },
    BigFloat { exponent: i128, mantissa: i128 },
    ToBase64Url(Value),
    ToBase64(Value),
    ToBase16(Value),
    EmbeddedCbor(Vec<u8>),
    PerlObj(Array),
    SerialObj(Array),
    Rational { numerator: Value, denominator: Value },
    Url(String),
    Base64UrlText(String),
    Base64Text(String),
    Regex(String),
    Mime(String),
    Uuid([u8; 16]),
    Language { tag: String, text: String },
    Id(Value),
    Bmime(Vec<u8>),
    /// 4 bytes (IPv4), 16 bytes (IPv6) or 6 bytes (MAC address).
    IpAddress(Vec<u8>),
    DecimalFractionExp { exponent: Value, mantissa: Value },
    BigFloatExp { exponent: Value, mantissa: Value },
    Indirection(Value),
    MagicCbor(Value),
    Rains(Map),
    Unknown { id: u64, inner: Value },
}

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

fn next_container_id() -> u64 {
    NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed)
}

struct Container<T> {
    id: u64,
    items: RefCell<T>,
}

impl<T> Container<T> {
    fn new(items: T) -> Rc<Self> {
        Rc::new(Self {
            id: next_container_id(),
            items: RefCell::new(items),
        })
    }
}

/// A shared, growable CBOR array.
#[derive(Clone)]
pub struct Array(Rc<Container<Vec<Value>>>);

impl Array {
    pub fn new() -> Self {
        Self(Container::new(Vec::new()))
    }

    /// The handle's stable identity.  Two handles refer to the same array
    /// exactly when their ids are equal.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.borrow().is_empty()
    }

    pub fn push(&self, value: Value) {
        self.0.items.borrow_mut().push(value)
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    pub fn items(&self) -> Ref<'_, Vec<Value>> {
        self.0.items.borrow()
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self(Container::new(items))
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(Container::new(iter.into_iter().collect()))
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id || *self.0.items.borrow() == *other.0.items.borrow()
    }
}

/// A shared CBOR map.  Entries keep insertion order, and the model does not
/// force keys to be unique; valid CBOR wants them unique, but that is the
/// producer's problem, not the container's.
#[derive(Clone)]
pub struct Map(Rc<Container<Vec<(Value, Value)>>>);

impl Map {
    pub fn new() -> Self {
        Self(Container::new(Vec::new()))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.borrow().is_empty()
    }

    pub fn insert(&self, key: Value, value: Value) {
        self.0.items.borrow_mut().push((key, value))
    }

    /// First value whose key compares structurally equal.
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.0
            .items
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn entries(&self) -> Ref<'_, Vec<(Value, Value)>> {
        self.0.items.borrow()
    }
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<(Value, Value)>> for Map {
    fn from(entries: Vec<(Value, Value)>) -> Self {
        Self(Container::new(entries))
    }
}

impl FromIterator<(Value, Value)> for Map {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        Self(Container::new(iter.into_iter().collect()))
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id || *self.0.items.borrow() == *other.0.items.borrow()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::NInt(a), Value::NInt(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Undefined, Value::Undefined) => true,
            // Width is a transport detail; NaNs compare by bit pattern.
            (Value::Float { value: a, .. }, Value::Float { value: b, .. }) => {
                a.to_bits() == b.to_bits()
            }
            (Value::Simple(a), Value::Simple(b)) => a == b,
            (Value::Tagged(a), Value::Tagged(b)) => a == b,
            (Value::Break, Value::Break) => true,
            _ => false,
        }
    }
}

impl Value {
    /// Classify an untyped byte string the way the encoder does when asked to
    /// serialize "a string": text if it is valid UTF-8 containing no control
    /// characters beyond HT, LF and CR, bytes otherwise.
    pub fn from_raw_str(bytes: &[u8]) -> Value {
        match std::str::from_utf8(bytes) {
            Ok(s) if s.chars().all(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r')) => {
                Value::Text(s.to_string())
            }
            _ => Value::Bytes(bytes.to_vec()),
        }
    }

    /// The logical integer value of `UInt`/`NInt`.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::UInt(n) => Some(*n as i128),
            Value::NInt(n) => Some(-1 - *n as i128),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::UInt(_) => "unsigned integer",
            Value::NInt(_) => "negative integer",
            Value::Bytes(_) => "byte string",
            Value::Text(_) => "text string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Float { .. } => "float",
            Value::Simple(_) => "simple value",
            Value::Tagged(_) => "tagged value",
            Value::Break => "break",
        }
    }
}

macro_rules! impl_from_uint {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::UInt(value as u64)
                }
            }
        )*
    };
}

impl_from_uint!(u8, u16, u32, u64, usize);

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    if value >= 0 {
                        Value::UInt(value as u64)
                    } else {
                        Value::NInt(!(value as i64) as u64)
                    }
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, isize);

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float {
            width: Width::Double,
            value,
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float {
            width: Width::Single,
            value: value as f64,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items.into())
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Value::Array(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(value)
    }
}

impl From<Tagged> for Value {
    fn from(value: Tagged) -> Self {
        Value::Tagged(Box::new(value))
    }
}

const MAX_DEBUG_DEPTH: usize = 16;

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_value(self, f, MAX_DEBUG_DEPTH)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_array(self, f, MAX_DEBUG_DEPTH)
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_map(self, f, MAX_DEBUG_DEPTH)
    }
}

// Containers can be cyclic, so the Debug walk is depth-capped rather than
// letting a self-referential array recurse forever.
fn debug_value(value: &Value, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match value {
        Value::UInt(n) => write!(f, "{n}"),
        Value::NInt(n) => write!(f, "{}", -1 - *n as i128),
        Value::Bytes(b) => write!(f, "h'{}'", hex(b)),
        Value::Text(s) => write!(f, "{s:?}"),
        Value::Array(a) => debug_array(a, f, depth),
        Value::Map(m) => debug_map(m, f, depth),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Null => f.write_str("null"),
        Value::Undefined => f.write_str("undefined"),
        Value::Float { value, .. } => write!(f, "{value}"),
        Value::Simple(n) => write!(f, "simple({n})"),
        Value::Tagged(t) => debug_tagged(t, f, depth),
        Value::Break => f.write_str("break"),
    }
}

fn debug_array(array: &Array, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    if depth == 0 {
        return f.write_str("[...]");
    }
    f.write_str("[")?;
    for (i, item) in array.items().iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        debug_value(item, f, depth - 1)?;
    }
    f.write_str("]")
}

fn debug_map(map: &Map, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    if depth == 0 {
        return f.write_str("{...}");
    }
    f.write_str("{")?;
    for (i, (k, v)) in map.entries().iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        debug_value(k, f, depth - 1)?;
        f.write_str(": ")?;
        debug_value(v, f, depth - 1)?;
    }
    f.write_str("}")
}

fn debug_tagged(tagged: &Tagged, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match tagged {
        Tagged::DateTime(s) => write!(f, "datetime({s})"),
        Tagged::Epoch(v) => write!(f, "epoch({v})"),
        Tagged::PosBignum(b) => write!(f, "bignum(h'{}')", hex(b)),
        Tagged::NegBignum(b) => write!(f, "-bignum(h'{}')", hex(b)),
        Tagged::DecimalFraction { exponent, mantissa } => {
            write!(f, "decimal({mantissa}e{exponent})")
        }
        Tagged::BigFloat { exponent, mantissa } => write!(f, "bigfloat({mantissa}p{exponent})"),
        Tagged::ToBase64Url(v) => wrap(f, "base64url", v, depth),
        Tagged::ToBase64(v) => wrap(f, "base64", v, depth),
        Tagged::ToBase16(v) => wrap(f, "base16", v, depth),
        Tagged::EmbeddedCbor(b) => write!(f, "embedded(h'{}')", hex(b)),
        Tagged::PerlObj(a) => {
            f.write_str("perlobj(")?;
            debug_array(a, f, depth.saturating_sub(1))?;
            f.write_str(")")
        }
        Tagged::SerialObj(a) => {
            f.write_str("serialobj(")?;
            debug_array(a, f, depth.saturating_sub(1))?;
            f.write_str(")")
        }
        Tagged::Rational {
            numerator,
            denominator,
        } => {
            f.write_str("rational(")?;
            debug_value(numerator, f, depth.saturating_sub(1))?;
            f.write_str("/")?;
            debug_value(denominator, f, depth.saturating_sub(1))?;
            f.write_str(")")
        }
        Tagged::Url(s) => write!(f, "url({s})"),
        Tagged::Base64UrlText(s) => write!(f, "b64url({s:?})"),
        Tagged::Base64Text(s) => write!(f, "b64({s:?})"),
        Tagged::Regex(s) => write!(f, "regex({s:?})"),
        Tagged::Mime(s) => write!(f, "mime({s:?})"),
        Tagged::Uuid(b) => write!(f, "uuid(h'{}')", hex(b)),
        Tagged::Language { tag, text } => write!(f, "lang({tag}, {text:?})"),
        Tagged::Id(v) => wrap(f, "id", v, depth),
        Tagged::Bmime(b) => write!(f, "bmime(h'{}')", hex(b)),
        Tagged::IpAddress(b) => write!(f, "ip(h'{}')", hex(b)),
        Tagged::DecimalFractionExp { exponent, mantissa } => {
            f.write_str("decimal(")?;
            debug_value(mantissa, f, depth.saturating_sub(1))?;
            f.write_str("e")?;
            debug_value(exponent, f, depth.saturating_sub(1))?;
            f.write_str(")")
        }
        Tagged::BigFloatExp { exponent, mantissa } => {
            f.write_str("bigfloat(")?;
            debug_value(mantissa, f, depth.saturating_sub(1))?;
            f.write_str("p")?;
            debug_value(exponent, f, depth.saturating_sub(1))?;
            f.write_str(")")
        }
        Tagged::Indirection(v) => wrap(f, "indirect", v, depth),
        Tagged::MagicCbor(v) => wrap(f, "magic", v, depth),
        Tagged::Rains(m) => {
            f.write_str("rains(")?;
            debug_map(m, f, depth.saturating_sub(1))?;
            f.write_str(")")
        }
        Tagged::Unknown { id, inner } => {
            write!(f, "{id}(")?;
            debug_value(inner, f, depth.saturating_sub(1))?;
            f.write_str(")")
        }
    }
}

fn wrap(f: &mut fmt::Formatter<'_>, name: &str, inner: &Value, depth: usize) -> fmt::Result {
    write!(f, "{name}(")?;
    debug_value(inner, f, depth.saturating_sub(1))?;
    f.write_str(")")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
