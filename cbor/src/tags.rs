//! The semantic tag registry.
//!
//! Maps numeric CBOR tags to named hooks that turn a wire-decoded inner value
//! into its semantic interpretation (and back).  The registry is populated
//! with the RFC 7049 / IANA built-ins and may be extended by the host with
//! [`Registry::register`], but only before codec use begins: the process-wide
//! instance installs once and is read-only from then on.
//!
//! The reference machinery tags (`nthstring` 25, `shareable` 28, `sharedref`
//! 29, `stringref` 256) are not hooks; they need the decode engine's
//! reference tracker and are handled there.

use super::decode;
use super::encode;
use super::value::{Tagged, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::trace;

pub const DATETIME: u64 = 0;
pub const EPOCH: u64 = 1;
pub const POS_BIGNUM: u64 = 2;
pub const NEG_BIGNUM: u64 = 3;
pub const DECIMAL_FRACTION: u64 = 4;
pub const BIGFLOAT: u64 = 5;
pub const TO_BASE64URL: u64 = 21;
pub const TO_BASE64: u64 = 22;
pub const TO_BASE16: u64 = 23;
pub const EMBEDDED_CBOR: u64 = 24;
pub const NTH_STRING: u64 = 25;
pub const PERL_OBJ: u64 = 26;
pub const SERIAL_OBJ: u64 = 27;
pub const SHAREABLE: u64 = 28;
pub const SHARED_REF: u64 = 29;
pub const RATIONAL: u64 = 30;
pub const URL: u64 = 32;
pub const BASE64URL_TEXT: u64 = 33;
pub const BASE64_TEXT: u64 = 34;
pub const REGEX: u64 = 35;
pub const MIME: u64 = 36;
pub const UUID: u64 = 37;
pub const LANGUAGE: u64 = 38;
pub const ID: u64 = 39;
pub const STRING_REF: u64 = 256;
pub const BMIME: u64 = 257;
pub const IP_ADDRESS: u64 = 260;
pub const DECIMAL_FRACTION_EXP: u64 = 264;
pub const BIGFLOAT_EXP: u64 = 265;
pub const INDIRECTION: u64 = 22098;
pub const MAGIC_CBOR: u64 = 55799;
pub const RAINS: u64 = 15309736;

pub type DecodeHook =
    dyn Fn(u64, Value, usize) -> Result<Value, decode::Error> + Send + Sync;
pub type EncodeHook =
    dyn Fn(&Value, &mut encode::Encoder) -> Result<(), encode::Error> + Send + Sync;

pub struct Hook {
    name: Cow<'static, str>,
    decode: Box<DecodeHook>,
    encode: Option<Box<EncodeHook>>,
}

impl Hook {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn decode(&self, id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
        (self.decode)(id, inner, offset)
    }

    /// The custom body encoder, if one was registered.  The engine has
    /// already written the tag header when this runs.
    pub(crate) fn encode_hook(&self) -> Option<&EncodeHook> {
        self.encode.as_deref()
    }
}

pub struct Registry {
    hooks: HashMap<u64, Hook>,
    unknown: Hook,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry holding the built-in tag set.
    pub fn new() -> Self {
        let mut registry = Self {
            hooks: HashMap::new(),
            unknown: Hook {
                name: Cow::Borrowed("unknown"),
                decode: Box::new(|id, inner, _| {
                    trace!(tag = id, "no handler registered, passing tag through");
                    Ok(Tagged::Unknown { id, inner }.into())
                }),
                encode: None,
            },
        };
        for &(id, name, decode) in BUILTINS {
            registry.hooks.insert(
                id,
                Hook {
                    name: Cow::Borrowed(name),
                    decode: Box::new(decode),
                    encode: None,
                },
            );
        }
        registry
    }

    /// The process-wide registry.  Built with the defaults on first use
    /// unless [`Registry::install`] got there earlier.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Registry::new)
    }

    /// Install `registry` as the process-wide instance.  Must happen before
    /// the first encode or decode that consults the global registry; once
    /// anything has used it the call fails and hands the registry back.
    pub fn install(registry: Registry) -> Result<(), Registry> {
        GLOBAL.set(registry)
    }

    /// Register or override a tag hook.  Overriding a built-in is allowed;
    /// doing it while decodes are in flight is not guarded against, which is
    /// why the global instance is frozen at install time.
    pub fn register<N, D>(
        &mut self,
        id: u64,
        name: N,
        encode: Option<Box<EncodeHook>>,
        decode: D,
    ) where
        N: Into<Cow<'static, str>>,
        D: Fn(u64, Value, usize) -> Result<Value, decode::Error> + Send + Sync + 'static,
    {
        self.hooks.insert(
            id,
            Hook {
                name: name.into(),
                decode: Box::new(decode),
                encode,
            },
        );
    }

    /// Every id resolves; unregistered ones get the passthrough hook.
    pub fn resolve(&self, id: u64) -> &Hook {
        self.hooks.get(&id).unwrap_or(&self.unknown)
    }

    pub fn name(&self, id: u64) -> Option<&str> {
        self.hooks.get(&id).map(|h| h.name())
    }
}

fn mismatch(offset: usize, tag: u64, expected: &'static str, actual: &Value) -> decode::Error {
    decode::Error::TagMismatch {
        offset,
        tag,
        expected,
        actual: actual.type_name(),
    }
}

type BuiltinDecode = fn(u64, Value, usize) -> Result<Value, decode::Error>;

const BUILTINS: &[(u64, &str, BuiltinDecode)] = &[
    (DATETIME, "datetime", decode_datetime),
    (EPOCH, "epoch", decode_epoch),
    (POS_BIGNUM, "pos-bignum", decode_pos_bignum),
    (NEG_BIGNUM, "neg-bignum", decode_neg_bignum),
    (DECIMAL_FRACTION, "decimalfraction", decode_decimal_fraction),
    (BIGFLOAT, "bigfloat", decode_bigfloat),
    (TO_BASE64URL, "base64url-hint", decode_to_base64url),
    (TO_BASE64, "base64-hint", decode_to_base64),
    (TO_BASE16, "base16-hint", decode_to_base16),
    (EMBEDDED_CBOR, "embedded-cbor", decode_embedded_cbor),
    (PERL_OBJ, "perlobj", decode_perl_obj),
    (SERIAL_OBJ, "serialobj", decode_serial_obj),
    (RATIONAL, "rational", decode_rational),
    (URL, "url", decode_url),
    (BASE64URL_TEXT, "base64url-text", decode_base64url_text),
    (BASE64_TEXT, "base64-text", decode_base64_text),
    (REGEX, "regex", decode_regex),
    (MIME, "mime", decode_mime),
    (UUID, "uuid", decode_uuid),
    (LANGUAGE, "language", decode_language),
    (ID, "id", decode_id),
    (BMIME, "bmime", decode_bmime),
    (IP_ADDRESS, "ipaddress", decode_ip_address),
    (DECIMAL_FRACTION_EXP, "decimalfractionexp", decode_decimal_fraction_exp),
    (BIGFLOAT_EXP, "bigfloatexp", decode_bigfloat_exp),
    (INDIRECTION, "indirection", decode_indirection),
    (MAGIC_CBOR, "magic-cbor", decode_magic_cbor),
    (RAINS, "rains", decode_rains),
];

fn decode_datetime(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Text(s) => Ok(Tagged::DateTime(s).into()),
        v => Err(mismatch(offset, id, "text string", &v)),
    }
}

fn decode_epoch(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::UInt(n) => Ok(Tagged::Epoch(n as f64).into()),
        Value::NInt(n) => Ok(Tagged::Epoch(-1.0 - n as f64).into()),
        Value::Float { value, .. } => Ok(Tagged::Epoch(value).into()),
        v => Err(mismatch(offset, id, "number", &v)),
    }
}

fn decode_pos_bignum(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Bytes(b) => Ok(Tagged::PosBignum(b).into()),
        v => Err(mismatch(offset, id, "byte string", &v)),
    }
}

fn decode_neg_bignum(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Bytes(b) => Ok(Tagged::NegBignum(b).into()),
        v => Err(mismatch(offset, id, "byte string", &v)),
    }
}

/// Both exponent and mantissa must be wire integers for tags 4 and 5; the
/// extended forms 264/265 relax this to bignums.
fn int_pair(id: u64, inner: &Value, offset: usize) -> Result<(i128, i128), decode::Error> {
    let Value::Array(a) = inner else {
        return Err(mismatch(offset, id, "2-element array", inner));
    };
    let items = a.items();
    if items.len() != 2 {
        return Err(mismatch(offset, id, "2-element array", inner));
    }
    match (items[0].as_int(), items[1].as_int()) {
        (Some(exponent), Some(mantissa)) => Ok((exponent, mantissa)),
        _ => Err(mismatch(offset, id, "array of two integers", inner)),
    }
}

fn decode_decimal_fraction(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    let (exponent, mantissa) = int_pair(id, &inner, offset)?;
    Ok(Tagged::DecimalFraction { exponent, mantissa }.into())
}

fn decode_bigfloat(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    let (exponent, mantissa) = int_pair(id, &inner, offset)?;
    Ok(Tagged::BigFloat { exponent, mantissa }.into())
}

fn decode_to_base64url(_id: u64, inner: Value, _offset: usize) -> Result<Value, decode::Error> {
    Ok(Tagged::ToBase64Url(inner).into())
}

fn decode_to_base64(_id: u64, inner: Value, _offset: usize) -> Result<Value, decode::Error> {
    Ok(Tagged::ToBase64(inner).into())
}

fn decode_to_base16(_id: u64, inner: Value, _offset: usize) -> Result<Value, decode::Error> {
    Ok(Tagged::ToBase16(inner).into())
}

fn decode_embedded_cbor(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Bytes(b) => Ok(Tagged::EmbeddedCbor(b).into()),
        v => Err(mismatch(offset, id, "byte string", &v)),
    }
}

fn decode_perl_obj(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Array(a) => Ok(Tagged::PerlObj(a).into()),
        v => Err(mismatch(offset, id, "array", &v)),
    }
}

fn decode_serial_obj(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Array(a) => Ok(Tagged::SerialObj(a).into()),
        v => Err(mismatch(offset, id, "array", &v)),
    }
}

fn is_integerish(value: &Value) -> bool {
    match value {
        Value::UInt(_) | Value::NInt(_) => true,
        Value::Tagged(t) => matches!(**t, Tagged::PosBignum(_) | Tagged::NegBignum(_)),
        _ => false,
    }
}

fn decode_rational(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    let Value::Array(a) = &inner else {
        return Err(mismatch(offset, id, "2-element array", &inner));
    };
    let (numerator, denominator) = {
        let items = a.items();
        if items.len() != 2 {
            return Err(mismatch(offset, id, "2-element array", &inner));
        }
        (items[0].clone(), items[1].clone())
    };
    if !is_integerish(&numerator) || !is_integerish(&denominator) {
        return Err(mismatch(offset, id, "array of two integers", &inner));
    }
    if denominator.as_int() == Some(0) {
        return Err(decode::Error::TagMismatch {
            offset,
            tag: id,
            expected: "non-zero denominator",
            actual: "zero",
        });
    }
    Ok(Tagged::Rational {
        numerator,
        denominator,
    }
    .into())
}

fn decode_url(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Text(s) => Ok(Tagged::Url(s).into()),
        v => Err(mismatch(offset, id, "text string", &v)),
    }
}

fn decode_base64url_text(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Text(s) => Ok(Tagged::Base64UrlText(s).into()),
        v => Err(mismatch(offset, id, "text string", &v)),
    }
}

fn decode_base64_text(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Text(s) => Ok(Tagged::Base64Text(s).into()),
        v => Err(mismatch(offset, id, "text string", &v)),
    }
}

fn decode_regex(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Text(s) => Ok(Tagged::Regex(s).into()),
        v => Err(mismatch(offset, id, "text string", &v)),
    }
}

fn decode_mime(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Text(s) => Ok(Tagged::Mime(s).into()),
        v => Err(mismatch(offset, id, "text string", &v)),
    }
}

fn decode_uuid(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Bytes(b) => match <[u8; 16]>::try_from(b.as_slice()) {
            Ok(uuid) => Ok(Tagged::Uuid(uuid).into()),
            Err(_) => Err(decode::Error::TagMismatch {
                offset,
                tag: id,
                expected: "16-byte byte string",
                actual: "byte string of another length",
            }),
        },
        v => Err(mismatch(offset, id, "16-byte byte string", &v)),
    }
}

fn decode_language(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    if let Value::Array(a) = &inner {
        let items = a.items();
        if let (Some(Value::Text(tag)), Some(Value::Text(text)), 2) =
            (items.first(), items.get(1), items.len())
        {
            return Ok(Tagged::Language {
                tag: tag.clone(),
                text: text.clone(),
            }
            .into());
        }
    }
    Err(mismatch(offset, id, "array of two text strings", &inner))
}

fn decode_id(_id: u64, inner: Value, _offset: usize) -> Result<Value, decode::Error> {
    Ok(Tagged::Id(inner).into())
}

fn decode_bmime(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Bytes(b) => Ok(Tagged::Bmime(b).into()),
        v => Err(mismatch(offset, id, "byte string", &v)),
    }
}

fn decode_ip_address(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Bytes(b) if matches!(b.len(), 4 | 6 | 16) => Ok(Tagged::IpAddress(b).into()),
        v => Err(mismatch(offset, id, "4, 6 or 16-byte byte string", &v)),
    }
}

fn bignum_pair(id: u64, inner: &Value, offset: usize) -> Result<(Value, Value), decode::Error> {
    let Value::Array(a) = inner else {
        return Err(mismatch(offset, id, "2-element array", inner));
    };
    let items = a.items();
    if items.len() != 2 {
        return Err(mismatch(offset, id, "2-element array", inner));
    }
    if !is_integerish(&items[0]) || !is_integerish(&items[1]) {
        return Err(mismatch(offset, id, "array of two integers or bignums", inner));
    }
    Ok((items[0].clone(), items[1].clone()))
}

fn decode_decimal_fraction_exp(
    id: u64,
    inner: Value,
    offset: usize,
) -> Result<Value, decode::Error> {
    let (exponent, mantissa) = bignum_pair(id, &inner, offset)?;
    Ok(Tagged::DecimalFractionExp { exponent, mantissa }.into())
}

fn decode_bigfloat_exp(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    let (exponent, mantissa) = bignum_pair(id, &inner, offset)?;
    Ok(Tagged::BigFloatExp { exponent, mantissa }.into())
}

fn decode_indirection(_id: u64, inner: Value, _offset: usize) -> Result<Value, decode::Error> {
    Ok(Tagged::Indirection(inner).into())
}

fn decode_magic_cbor(_id: u64, inner: Value, _offset: usize) -> Result<Value, decode::Error> {
    Ok(Tagged::MagicCbor(inner).into())
}

fn decode_rains(id: u64, inner: Value, offset: usize) -> Result<Value, decode::Error> {
    match inner {
        Value::Map(m) => Ok(Tagged::Rains(m).into()),
        v => Err(mismatch(offset, id, "map", &v)),
    }
}
