use crate::longdouble;
use serde_derive::{Deserialize, Serialize};
use simbind_types::{CType, Literal, ScalarClass};
use std::fmt;
use std::mem::size_of;
use thiserror::Error;

/// A single numeric value moving between Rust and native memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversionError {
    #[error("{value} is out of range for {ctype}")]
    OutOfRange { value: String, ctype: CType },

    #[error("cannot store floating point value {value} in {ctype}")]
    FloatToInteger { value: f64, ctype: CType },

    #[error("cannot store {value} in bool")]
    NotBoolean { value: String },
}

impl Scalar {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) | Scalar::UInt(_) => "integer",
            Scalar::Float(_) => "float",
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Bool(b) => b as u8 as f64,
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    /// Exact integer value; `None` for floats.
    pub fn as_i128(self) -> Option<i128> {
        match self {
            Scalar::Bool(b) => Some(b as i128),
            Scalar::Int(v) => Some(v as i128),
            Scalar::UInt(v) => Some(v as i128),
            Scalar::Float(_) => None,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Checked conversion used for scalar assignment and call arguments.
    pub fn convert(self, ctype: CType) -> Result<Scalar, ConversionError> {
        match ctype.class() {
            ScalarClass::Float => Ok(Scalar::Float(self.as_f64())),
            ScalarClass::Bool => match self {
                Scalar::Bool(b) => Ok(Scalar::Bool(b)),
                Scalar::Int(0) | Scalar::UInt(0) => Ok(Scalar::Bool(false)),
                Scalar::Int(1) | Scalar::UInt(1) => Ok(Scalar::Bool(true)),
                other => Err(ConversionError::NotBoolean { value: other.to_string() }),
            },
            class => {
                let value = match self {
                    Scalar::Float(value) => return Err(ConversionError::FloatToInteger { value, ctype }),
                    other => other.as_i128().unwrap_or_default(),
                };
                let (lo, hi) = ctype.integer_range().unwrap_or((i64::MIN as i128, u64::MAX as i128));
                if value < lo || value > hi {
                    return Err(ConversionError::OutOfRange { value: value.to_string(), ctype });
                }
                Ok(match class {
                    ScalarClass::Unsigned => Scalar::UInt(value as u64),
                    _ => Scalar::Int(value as i64),
                })
            }
        }
    }

    /// Lossy conversion with C cast semantics, used for element-wise array copies.
    pub fn cast(self, ctype: CType) -> Scalar {
        let bits = (ctype.size() * 8) as u32;
        match ctype.class() {
            ScalarClass::Float => Scalar::Float(self.as_f64()),
            ScalarClass::Bool => Scalar::Bool(self.as_f64() != 0.0),
            ScalarClass::Signed => {
                let raw = self.wrapping_i64();
                let shift = 64 - bits.min(64);
                Scalar::Int((raw << shift) >> shift)
            }
            ScalarClass::Byte | ScalarClass::Unsigned => {
                let raw = self.wrapping_i64() as u64;
                let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
                match ctype.class() {
                    ScalarClass::Byte => Scalar::Int((raw & mask) as i64),
                    _ => Scalar::UInt(raw & mask),
                }
            }
        }
    }

    fn wrapping_i64(self) -> i64 {
        match self {
            Scalar::Bool(b) => b as i64,
            Scalar::Int(v) => v,
            Scalar::UInt(v) => v as i64,
            Scalar::Float(v) => v as i64,
        }
    }

    /// Writes the value into `dst` (exactly `ctype.size()` bytes) in native layout.
    pub(crate) fn encode(self, ctype: CType, dst: &mut [u8]) {
        let value = self.cast(ctype);
        match (ctype, value) {
            (CType::LongDouble, v) => longdouble::encode(v.as_f64(), dst),
            (CType::Float, v) => dst.copy_from_slice(&(v.as_f64() as f32).to_ne_bytes()),
            (CType::Double, v) => dst.copy_from_slice(&v.as_f64().to_ne_bytes()),
            (CType::Bool, Scalar::Bool(b)) => dst[0] = b as u8,
            (_, v) => {
                let raw = v.wrapping_i64();
                match dst.len() {
                    1 => dst.copy_from_slice(&(raw as u8).to_ne_bytes()),
                    2 => dst.copy_from_slice(&(raw as u16).to_ne_bytes()),
                    4 => dst.copy_from_slice(&(raw as u32).to_ne_bytes()),
                    _ => dst.copy_from_slice(&(raw as u64).to_ne_bytes()),
                }
            }
        }
    }

    /// Reads a value of `ctype` from `src` (exactly `ctype.size()` bytes).
    pub(crate) fn decode(ctype: CType, src: &[u8]) -> Scalar {
        match ctype {
            CType::LongDouble => return Scalar::Float(longdouble::decode(src)),
            CType::Float => return Scalar::Float(f32::from_ne_bytes(fixed(src)) as f64),
            CType::Double => return Scalar::Float(f64::from_ne_bytes(fixed(src))),
            CType::Bool => return Scalar::Bool(src[0] != 0),
            _ => {}
        }
        let (signed, unsigned) = match src.len() {
            1 => (i8::from_ne_bytes(fixed(src)) as i64, u8::from_ne_bytes(fixed(src)) as u64),
            2 => (i16::from_ne_bytes(fixed(src)) as i64, u16::from_ne_bytes(fixed(src)) as u64),
            4 => (i32::from_ne_bytes(fixed(src)) as i64, u32::from_ne_bytes(fixed(src)) as u64),
            _ => (i64::from_ne_bytes(fixed(src)), u64::from_ne_bytes(fixed(src))),
        };
        match ctype.class() {
            ScalarClass::Signed => Scalar::Int(signed),
            ScalarClass::Byte => Scalar::Int(unsigned as i64),
            _ => Scalar::UInt(unsigned),
        }
    }
}

fn fixed<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&src[..N]);
    out
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::UInt(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! scalar_from {
    ($variant:ident as $target:ty: $($source:ty),*) => {
        $(impl From<$source> for Scalar {
            fn from(value: $source) -> Self {
                Scalar::$variant(value as $target)
            }
        })*
    };
}

scalar_from!(Int as i64: i8, i16, i32, i64, isize);
scalar_from!(UInt as u64: u8, u16, u32, u64, usize);
scalar_from!(Float as f64: f32, f64);

impl From<Literal> for Scalar {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Bool(v) => Scalar::Bool(v),
            Literal::Int(v) => Scalar::Int(v),
            Literal::Float(v) => Scalar::Float(v),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Rust types that can view array storage directly.
pub trait Element: Copy + 'static {
    /// Type used when an array is built from a `Vec<Self>`.
    const CTYPE: CType;

    /// Same class and width, so the bytes are reinterpretable.
    fn accepts(ctype: CType) -> bool {
        ctype.class() == Self::CTYPE.class() && ctype.size() == size_of::<Self>()
    }

    fn to_scalar(self) -> Scalar;
}

macro_rules! element {
    ($($rust:ty => $ctype:ident),*) => {
        $(impl Element for $rust {
            const CTYPE: CType = CType::$ctype;

            fn to_scalar(self) -> Scalar {
                Scalar::from(self)
            }
        })*
    };
}

element!(
    u8 => Char,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => LongLong,
    u64 => ULongLong,
    usize => SizeT,
    f32 => Float,
    f64 => Double
);
