//! The CBOR encoder.
//!
//! [`encode`] walks a [`Value`] and emits the minimal wire form: integer
//! headers shrink to the smallest extension width, floats shrink to the
//! shortest lossless IEEE-754 width.  [`Options`] turns on the two reference
//! schemes: `shared_refs` tags every array and map as shareable and replaces
//! repeats with an index, `string_refs` opens a string-reference scope around
//! the whole item so repeated strings encode once.

use super::dnf::{self, Dnf};
use super::header;
use super::refs::{StrKind, Tracker};
use super::tags::{self, Registry};
use super::value::{Array, Map, Tagged, Value, Width};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("a {0} value has no CBOR encoding")]
    Unencodable(&'static str),

    #[error("float cannot be encoded at the requested width without losing precision")]
    PrecisionLoss,

    #[error("float exponent exceeds the range of the requested width")]
    Range,

    #[error("integer {0} exceeds the wire range")]
    IntRange(i128),

    #[error("nesting deeper than {0}")]
    MaxDepth(usize),
}

impl From<dnf::Error> for Error {
    fn from(e: dnf::Error) -> Self {
        match e {
            dnf::Error::Range => Error::Range,
            dnf::Error::Precision => Error::PrecisionLoss,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Tag every array and map as shareable and encode repeats (including
    /// cycles) as references to the first occurrence.
    pub shared_refs: bool,
    /// Wrap the item in a string-reference scope so repeated long strings
    /// encode as back-references.
    pub string_refs: bool,
    /// Refuse to recurse deeper than this.
    pub max_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            shared_refs: false,
            string_refs: false,
            max_depth: 128,
        }
    }
}

/// The low-level byte builder.  Most callers want [`encode`]; the builder is
/// the surface custom tag encode hooks write through.
#[derive(Default)]
pub struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }

    pub fn offset(&self) -> usize {
        self.data.len()
    }

    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes)
    }

    pub fn emit_uint(&mut self, value: u64) {
        header::write(&mut self.data, 0, value)
    }

    /// Emit the negative integer `-1 - n` from its raw wire value `n`.
    pub fn emit_nint(&mut self, n: u64) {
        header::write(&mut self.data, 1, n)
    }

    pub fn emit_int(&mut self, value: i128) -> Result<(), Error> {
        if let Ok(v) = u64::try_from(value) {
            self.emit_uint(v);
            Ok(())
        } else if let Ok(n) = u64::try_from(-1 - value) {
            self.emit_nint(n);
            Ok(())
        } else {
            Err(Error::IntRange(value))
        }
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        header::write(&mut self.data, 2, bytes.len() as u64);
        self.data.extend_from_slice(bytes)
    }

    pub fn emit_text(&mut self, text: &str) {
        header::write(&mut self.data, 3, text.len() as u64);
        self.data.extend_from_slice(text.as_bytes())
    }

    pub fn emit_tag<T>(&mut self, tag: T)
    where
        T: num_traits::ToPrimitive,
    {
        header::write(
            &mut self.data,
            6,
            tag.to_u64().expect("Tags must be unsigned integers"),
        )
    }

    pub fn emit_bool(&mut self, value: bool) {
        self.data.push((7 << 5) | if value { 21 } else { 20 })
    }

    pub fn emit_null(&mut self) {
        self.data.push((7 << 5) | 22)
    }

    pub fn emit_undefined(&mut self) {
        self.data.push((7 << 5) | 23)
    }

    pub fn emit_simple(&mut self, value: u8) -> Result<(), Error> {
        match value {
            0..=19 => {
                self.data.push((7 << 5) | value);
                Ok(())
            }
            // 20..=23 are the booleans, null and undefined; 24..=31 are
            // reserved on the wire.
            20..=31 => Err(Error::Unencodable("reserved simple")),
            _ => {
                self.data.push((7 << 5) | 24);
                self.data.push(value);
                Ok(())
            }
        }
    }

    /// Emit at the shortest width that loses nothing: half, then single,
    /// then the always-exact double.
    pub fn emit_float(&mut self, value: f64) {
        let v = Dnf::from_double(value);
        if let Ok(h) = v.to_half() {
            self.data.push((7 << 5) | 25);
            self.data.extend(h.to_bits().to_be_bytes())
        } else if let Ok(s) = v.to_single() {
            self.data.push((7 << 5) | 26);
            self.data.extend(s.to_bits().to_be_bytes())
        } else {
            self.data.push((7 << 5) | 27);
            self.data.extend(value.to_bits().to_be_bytes())
        }
    }

    /// Emit at exactly `width`, failing rather than widening or rounding.
    pub fn emit_float_width(&mut self, width: Width, value: f64) -> Result<(), Error> {
        let v = Dnf::from_double(value);
        match width {
            Width::Half => {
                let h = v.to_half()?;
                self.data.push((7 << 5) | 25);
                self.data.extend(h.to_bits().to_be_bytes())
            }
            Width::Single => {
                let s = v.to_single()?;
                self.data.push((7 << 5) | 26);
                self.data.extend(s.to_bits().to_be_bytes())
            }
            Width::Double => {
                self.data.push((7 << 5) | 27);
                self.data.extend(value.to_bits().to_be_bytes())
            }
        }
        Ok(())
    }

    fn emit_text_raw(&mut self, bytes: &[u8]) {
        header::write(&mut self.data, 3, bytes.len() as u64);
        self.data.extend_from_slice(bytes)
    }
}

/// Encode with default options and the process-wide tag registry.
pub fn encode(value: &Value) -> Result<Vec<u8>, Error> {
    encode_with(value, &Options::default())
}

pub fn encode_with(value: &Value, options: &Options) -> Result<Vec<u8>, Error> {
    encode_in(value, options, Registry::global())
}

pub fn encode_in(value: &Value, options: &Options, registry: &Registry) -> Result<Vec<u8>, Error> {
    let mut walk = Walk {
        out: Encoder::new(),
        options,
        registry,
        refs: Tracker::new(),
    };
    if options.string_refs {
        walk.out.emit_tag(tags::STRING_REF);
        walk.refs.push_scope();
    }
    walk.item(value, 0)?;
    Ok(walk.out.build())
}

/// Convert-and-encode convenience for host types.
pub fn emit<T>(value: T) -> Result<Vec<u8>, Error>
where
    T: Into<Value>,
{
    encode(&value.into())
}

struct Walk<'a> {
    out: Encoder,
    options: &'a Options,
    registry: &'a Registry,
    refs: Tracker,
}

impl Walk<'_> {
    fn item(&mut self, value: &Value, depth: usize) -> Result<(), Error> {
        if depth >= self.options.max_depth {
            return Err(Error::MaxDepth(self.options.max_depth));
        }
        match value {
            Value::UInt(n) => {
                self.out.emit_uint(*n);
                Ok(())
            }
            Value::NInt(n) => {
                self.out.emit_nint(*n);
                Ok(())
            }
            Value::Bytes(b) => {
                self.string(StrKind::Bytes, b);
                Ok(())
            }
            Value::Text(s) => {
                self.string(StrKind::Text, s.as_bytes());
                Ok(())
            }
            Value::Array(a) => self.array(a, depth),
            Value::Map(m) => self.map(m, depth),
            Value::Bool(b) => {
                self.out.emit_bool(*b);
                Ok(())
            }
            Value::Null => {
                self.out.emit_null();
                Ok(())
            }
            Value::Undefined => {
                self.out.emit_undefined();
                Ok(())
            }
            Value::Float { value, .. } => {
                self.out.emit_float(*value);
                Ok(())
            }
            Value::Simple(n) => self.out.emit_simple(*n),
            Value::Tagged(t) => self.tagged(t, depth),
            Value::Break => Err(Error::Unencodable("break")),
        }
    }

    /// Emit a string literal, or a back-reference when an equal string was
    /// already emitted inside the active string-reference scope.
    fn string(&mut self, kind: StrKind, bytes: &[u8]) {
        if let Some(index) = self.refs.note_string(kind, bytes) {
            self.out.emit_tag(tags::NTH_STRING);
            self.out.emit_uint(index);
            return;
        }
        match kind {
            StrKind::Bytes => self.out.emit_bytes(bytes),
            // The model only holds validated text, so re-emitting the raw
            // bytes is safe.
            StrKind::Text => self.out.emit_text_raw(bytes),
        }
    }

    fn array(&mut self, array: &Array, depth: usize) -> Result<(), Error> {
        if self.options.shared_refs {
            if let Some(index) = self.refs.shared_index(array.id()) {
                self.out.emit_tag(tags::SHARED_REF);
                self.out.emit_uint(index);
                return Ok(());
            }
            // Register before recursing so children that point back at this
            // array resolve to a valid index.
            self.out.emit_tag(tags::SHAREABLE);
            self.refs.register_shared_id(array.id());
        }
        let items = array.items();
        header::write(&mut self.out.data, 4, items.len() as u64);
        for item in items.iter() {
            self.item(item, depth + 1)?;
        }
        Ok(())
    }

    fn map(&mut self, map: &Map, depth: usize) -> Result<(), Error> {
        if self.options.shared_refs {
            if let Some(index) = self.refs.shared_index(map.id()) {
                self.out.emit_tag(tags::SHARED_REF);
                self.out.emit_uint(index);
                return Ok(());
            }
            self.out.emit_tag(tags::SHAREABLE);
            self.refs.register_shared_id(map.id());
        }
        let entries = map.entries();
        header::write(&mut self.out.data, 5, entries.len() as u64);
        for (key, value) in entries.iter() {
            if matches!(key, Value::Break) {
                return Err(Error::Unencodable("break map key"));
            }
            self.item(key, depth + 1)?;
            self.item(value, depth + 1)?;
        }
        Ok(())
    }

    fn tagged(&mut self, tagged: &Tagged, depth: usize) -> Result<(), Error> {
        match tagged {
            Tagged::DateTime(s) => self.text_tag(tags::DATETIME, s),
            Tagged::Epoch(v) => {
                self.out.emit_tag(tags::EPOCH);
                // Whole-number epochs ride as integers, and 2^53 bounds the
                // exactly-representable range.
                if v.is_finite() && v.fract() == 0.0 && v.abs() <= 9007199254740992.0 {
                    self.out.emit_int(*v as i128)
                } else {
                    self.out.emit_float(*v);
                    Ok(())
                }
            }
            Tagged::PosBignum(b) => self.bytes_tag(tags::POS_BIGNUM, b),
            Tagged::NegBignum(b) => self.bytes_tag(tags::NEG_BIGNUM, b),
            Tagged::DecimalFraction { exponent, mantissa } => {
                self.int_pair(tags::DECIMAL_FRACTION, *exponent, *mantissa)
            }
            Tagged::BigFloat { exponent, mantissa } => {
                self.int_pair(tags::BIGFLOAT, *exponent, *mantissa)
            }
            Tagged::ToBase64Url(v) => self.wrap(tags::TO_BASE64URL, v, depth),
            Tagged::ToBase64(v) => self.wrap(tags::TO_BASE64, v, depth),
            Tagged::ToBase16(v) => self.wrap(tags::TO_BASE16, v, depth),
            Tagged::EmbeddedCbor(b) => self.bytes_tag(tags::EMBEDDED_CBOR, b),
            Tagged::PerlObj(a) => {
                self.out.emit_tag(tags::PERL_OBJ);
                self.array(a, depth)
            }
            Tagged::SerialObj(a) => {
                self.out.emit_tag(tags::SERIAL_OBJ);
                self.array(a, depth)
            }
            Tagged::Rational {
                numerator,
                denominator,
            } => {
                self.out.emit_tag(tags::RATIONAL);
                header::write(&mut self.out.data, 4, 2);
                self.item(numerator, depth + 1)?;
                self.item(denominator, depth + 1)
            }
            Tagged::Url(s) => self.text_tag(tags::URL, s),
            Tagged::Base64UrlText(s) => self.text_tag(tags::BASE64URL_TEXT, s),
            Tagged::Base64Text(s) => self.text_tag(tags::BASE64_TEXT, s),
            Tagged::Regex(s) => self.text_tag(tags::REGEX, s),
            Tagged::Mime(s) => self.text_tag(tags::MIME, s),
            Tagged::Uuid(b) => self.bytes_tag(tags::UUID, b),
            Tagged::Language { tag, text } => {
                self.out.emit_tag(tags::LANGUAGE);
                header::write(&mut self.out.data, 4, 2);
                self.string(StrKind::Text, tag.as_bytes());
                self.string(StrKind::Text, text.as_bytes());
                Ok(())
            }
            Tagged::Id(v) => self.wrap(tags::ID, v, depth),
            Tagged::Bmime(b) => self.bytes_tag(tags::BMIME, b),
            Tagged::IpAddress(b) => self.bytes_tag(tags::IP_ADDRESS, b),
            Tagged::DecimalFractionExp { exponent, mantissa } => {
                self.out.emit_tag(tags::DECIMAL_FRACTION_EXP);
                header::write(&mut self.out.data, 4, 2);
                self.item(exponent, depth + 1)?;
                self.item(mantissa, depth + 1)
            }
            Tagged::BigFloatExp { exponent, mantissa } => {
                self.out.emit_tag(tags::BIGFLOAT_EXP);
                header::write(&mut self.out.data, 4, 2);
                self.item(exponent, depth + 1)?;
                self.item(mantissa, depth + 1)
            }
            Tagged::Indirection(v) => self.wrap(tags::INDIRECTION, v, depth),
            Tagged::MagicCbor(v) => self.wrap(tags::MAGIC_CBOR, v, depth),
            Tagged::Rains(m) => {
                self.out.emit_tag(tags::RAINS);
                self.map(m, depth)
            }
            Tagged::Unknown { id, inner } => {
                self.out.emit_tag(*id);
                if let Some(hook) = self.registry.resolve(*id).encode_hook() {
                    hook(inner, &mut self.out)
                } else {
                    self.item(inner, depth + 1)
                }
            }
        }
    }

    fn wrap(&mut self, tag: u64, inner: &Value, depth: usize) -> Result<(), Error> {
        self.out.emit_tag(tag);
        self.item(inner, depth + 1)
    }

    fn text_tag(&mut self, tag: u64, text: &str) -> Result<(), Error> {
        self.out.emit_tag(tag);
        self.string(StrKind::Text, text.as_bytes());
        Ok(())
    }

    fn bytes_tag(&mut self, tag: u64, bytes: &[u8]) -> Result<(), Error> {
        self.out.emit_tag(tag);
        self.string(StrKind::Bytes, bytes);
        Ok(())
    }

    fn int_pair(&mut self, tag: u64, exponent: i128, mantissa: i128) -> Result<(), Error> {
        self.out.emit_tag(tag);
        header::write(&mut self.out.data, 4, 2);
        self.out.emit_int(exponent)?;
        self.out.emit_int(mantissa)
    }
}
