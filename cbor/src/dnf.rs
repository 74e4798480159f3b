//! Width-independent IEEE-754 float conversion.
//!
//! Every half, single or double value is widened into a common intermediate
//! form: a sign, an unbounded exponent, and a 64-bit fraction normalized so
//! that the leading 1 bit of a finite non-zero value sits at bit 63.
//! Converting back *narrows* exactly or not at all: [`Error::Range`] when the
//! exponent does not fit the target width, [`Error::Precision`] when fraction
//! bits below the target's mantissa would be lost.  Chaining the two halves
//! gives the shortest lossless float encoding, which is what the CBOR encoder
//! wants.

use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("exponent exceeds the range of the target width")]
    Range,

    #[error("fraction bits would be lost at the target width")]
    Precision,
}

/// Number class, kept explicit rather than encoded as an exponent sentinel so
/// that widths with different exponent ranges cannot confuse a large finite
/// value with an infinity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Class {
    Finite,
    Infinite,
    Nan,
}

/// The common intermediate form.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Dnf {
    sign: bool,
    class: Class,
    /// Unbiased exponent.  Unused for infinities and NaNs.
    exp: i32,
    /// Fraction, left-aligned.  Finite non-zero values carry the implicit
    /// leading 1 at bit 63; NaNs carry only the payload bits.
    frac: u64,
}

/// Field layout of one IEEE-754 width.
struct Width {
    /// Lowest representable exponent, subnormals included.
    min_exp: i32,
    /// Lowest exponent of a normal value.
    min_norm_exp: i32,
    /// Highest exponent of a normal value (also the bias).
    max_exp: i32,
    /// Count of low fraction bits the width cannot store.
    drop: u32,
    /// Bit position of the exponent field.
    exp_shift: u32,
    /// Bit position of the sign.
    sign_shift: u32,
}

const HALF: Width = Width {
    min_exp: -24,
    min_norm_exp: -14,
    max_exp: 15,
    drop: 53,
    exp_shift: 10,
    sign_shift: 15,
};

const SINGLE: Width = Width {
    min_exp: -149,
    min_norm_exp: -126,
    max_exp: 127,
    drop: 40,
    exp_shift: 23,
    sign_shift: 31,
};

const DOUBLE: Width = Width {
    min_exp: -1074,
    min_norm_exp: -1022,
    max_exp: 1023,
    drop: 11,
    exp_shift: 52,
    sign_shift: 63,
};

impl Dnf {
    pub fn from_half(h: half::f16) -> Self {
        let bits = h.to_bits();
        Self::widen(
            (bits >> 15) != 0,
            ((bits >> 10) & 0x1F) as i32,
            ((bits & 0x3FF) as u64) << 53,
            0x1F,
            &HALF,
        )
    }

    pub fn from_single(f: f32) -> Self {
        let bits = f.to_bits();
        Self::widen(
            (bits >> 31) != 0,
            ((bits >> 23) & 0xFF) as i32,
            ((bits & 0x007F_FFFF) as u64) << 40,
            0xFF,
            &SINGLE,
        )
    }

    pub fn from_double(d: f64) -> Self {
        let bits = d.to_bits();
        Self::widen(
            (bits >> 63) != 0,
            ((bits >> 52) & 0x7FF) as i32,
            (bits & 0x000F_FFFF_FFFF_FFFF) << 11,
            0x7FF,
            &DOUBLE,
        )
    }

    fn widen(sign: bool, exp: i32, frac: u64, max_exp_field: i32, w: &Width) -> Self {
        if exp == max_exp_field {
            Self {
                sign,
                class: if frac == 0 { Class::Infinite } else { Class::Nan },
                exp: 0,
                frac,
            }
        } else if exp == 0 {
            // Subnormal, or (signed) zero when the fraction is empty.
            // Renormalize by rotating the fraction up until the leading bit
            // is set, adjusting the exponent as we go.
            if frac == 0 {
                Self {
                    sign,
                    class: Class::Finite,
                    exp: 0,
                    frac: 0,
                }
            } else {
                let shift = frac.leading_zeros();
                Self {
                    sign,
                    class: Class::Finite,
                    exp: w.min_norm_exp - shift as i32,
                    frac: frac << shift,
                }
            }
        } else {
            Self {
                sign,
                class: Class::Finite,
                exp: exp - w.max_exp,
                frac: frac | (1 << 63),
            }
        }
    }

    pub fn to_half(&self) -> Result<half::f16, Error> {
        self.narrow(&HALF).map(|bits| half::f16::from_bits(bits as u16))
    }

    pub fn to_single(&self) -> Result<f32, Error> {
        self.narrow(&SINGLE).map(|bits| f32::from_bits(bits as u32))
    }

    pub fn to_double(&self) -> Result<f64, Error> {
        self.narrow(&DOUBLE).map(f64::from_bits)
    }

    fn narrow(&self, w: &Width) -> Result<u64, Error> {
        let mut frac = self.frac;
        let exp_field = match self.class {
            // Infinities and NaNs live at the all-ones exponent; a NaN
            // payload is narrowed below like any other fraction.
            Class::Infinite | Class::Nan => (w.max_exp - w.min_norm_exp + 2) as u64,
            Class::Finite if self.exp == 0 && frac == 0 => 0,
            Class::Finite if self.exp < w.min_exp || self.exp > w.max_exp => {
                return Err(Error::Range);
            }
            Class::Finite if self.exp < w.min_norm_exp => {
                // Subnormal at the target width: shift the fraction down to
                // the width's minimum exponent and store a zero exponent.
                frac >>= (w.min_norm_exp - self.exp) as u32;
                0
            }
            Class::Finite => (self.exp + w.max_exp) as u64,
        };

        if frac & ((1 << w.drop) - 1) != 0 {
            return Err(Error::Precision);
        }

        let mut bits = exp_field << w.exp_shift;
        bits |= (frac >> w.drop) & ((1 << w.exp_shift) - 1);
        if self.sign {
            bits |= 1 << w.sign_shift;
        }
        Ok(bits)
    }

    pub fn is_nan(&self) -> bool {
        self.class == Class::Nan
    }

    pub fn is_infinite(&self) -> bool {
        self.class == Class::Infinite
    }
}
