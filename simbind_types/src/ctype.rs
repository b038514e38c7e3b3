use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::mem::size_of;
use std::os::raw::{c_long, c_ulong};

/// Primitive C types a member or argument can be declared with.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CType {
    Char,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    LongDouble,
    Bool,
    #[serde(rename = "size_t")]
    SizeT,
}

/// How a primitive's bits are interpreted.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ScalarClass {
    Byte,
    Signed,
    Unsigned,
    Float,
    Bool,
}

/// Storage format of C `long double` on the build target.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LongDoubleFormat {
    /// Same representation as `double`.
    Double,
    /// x87 80-bit extended precision, padded to the type's size.
    X87Extended,
    /// IEEE 754 binary128.
    Binary128,
}

impl LongDoubleFormat {
    pub const fn native() -> Self {
        if cfg!(all(windows, target_env = "msvc")) {
            LongDoubleFormat::Double
        } else if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
            LongDoubleFormat::X87Extended
        } else if cfg!(any(target_vendor = "apple", target_arch = "arm")) {
            LongDoubleFormat::Double
        } else if cfg!(target_pointer_width = "64") {
            LongDoubleFormat::Binary128
        } else {
            LongDoubleFormat::Double
        }
    }

    /// (size, alignment) in bytes.
    pub const fn layout(self) -> (usize, usize) {
        match self {
            LongDoubleFormat::Double => (8, 8),
            LongDoubleFormat::X87Extended => {
                if cfg!(target_arch = "x86") {
                    (12, 4)
                } else {
                    (16, 16)
                }
            }
            LongDoubleFormat::Binary128 => (16, 16),
        }
    }
}

impl CType {
    pub const ALL: [CType; 14] = [
        CType::Char,
        CType::Short,
        CType::UShort,
        CType::Int,
        CType::UInt,
        CType::Long,
        CType::ULong,
        CType::LongLong,
        CType::ULongLong,
        CType::Float,
        CType::Double,
        CType::LongDouble,
        CType::Bool,
        CType::SizeT,
    ];

    /// Declaration token, as written in member and argument declarations.
    pub fn token(self) -> &'static str {
        match self {
            CType::Char => "char",
            CType::Short => "short",
            CType::UShort => "ushort",
            CType::Int => "int",
            CType::UInt => "uint",
            CType::Long => "long",
            CType::ULong => "ulong",
            CType::LongLong => "longlong",
            CType::ULongLong => "ulonglong",
            CType::Float => "float",
            CType::Double => "double",
            CType::LongDouble => "longdouble",
            CType::Bool => "bool",
            CType::SizeT => "size_t",
        }
    }

    pub fn from_token(token: &str) -> Option<CType> {
        CType::ALL.iter().copied().find(|ty| ty.token() == token)
    }

    /// Spelling used in generated C code.
    pub fn c_name(self) -> &'static str {
        match self {
            CType::Char => "char",
            CType::Short => "short",
            CType::UShort => "unsigned short",
            CType::Int => "int",
            CType::UInt => "unsigned int",
            CType::Long => "long",
            CType::ULong => "unsigned long",
            CType::LongLong => "long long",
            CType::ULongLong => "unsigned long long",
            CType::Float => "float",
            CType::Double => "double",
            CType::LongDouble => "long double",
            CType::Bool => "bool",
            CType::SizeT => "size_t",
        }
    }

    pub fn size(self) -> usize {
        match self {
            CType::Char | CType::Bool => 1,
            CType::Short | CType::UShort => 2,
            CType::Int | CType::UInt | CType::Float => 4,
            CType::Long => size_of::<c_long>(),
            CType::ULong => size_of::<c_ulong>(),
            CType::LongLong | CType::ULongLong | CType::Double => 8,
            CType::LongDouble => LongDoubleFormat::native().layout().0,
            CType::SizeT => size_of::<usize>(),
        }
    }

    pub fn align(self) -> usize {
        match self {
            CType::LongDouble => LongDoubleFormat::native().layout().1,
            CType::LongLong | CType::ULongLong | CType::Double if cfg!(target_arch = "x86") => 4,
            other => other.size(),
        }
    }

    pub fn class(self) -> ScalarClass {
        match self {
            CType::Char => ScalarClass::Byte,
            CType::Short | CType::Int | CType::Long | CType::LongLong => ScalarClass::Signed,
            CType::UShort | CType::UInt | CType::ULong | CType::ULongLong | CType::SizeT => {
                ScalarClass::Unsigned
            }
            CType::Float | CType::Double | CType::LongDouble => ScalarClass::Float,
            CType::Bool => ScalarClass::Bool,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self.class(),
            ScalarClass::Byte | ScalarClass::Signed | ScalarClass::Unsigned
        )
    }

    pub fn is_float(self) -> bool {
        self.class() == ScalarClass::Float
    }

    /// Inclusive range of values an integer type can hold.
    pub fn integer_range(self) -> Option<(i128, i128)> {
        let bits = (self.size() * 8) as u32;
        match self.class() {
            ScalarClass::Byte => Some((i8::MIN as i128, u8::MAX as i128)),
            ScalarClass::Signed => Some((-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)),
            ScalarClass::Unsigned => Some((0, (1i128 << bits) - 1)),
            ScalarClass::Bool => Some((0, 1)),
            ScalarClass::Float => None,
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip() {
        for ty in CType::ALL {
            assert_eq!(CType::from_token(ty.token()), Some(ty));
        }
        assert_eq!(CType::from_token("integer"), None);
    }

    #[test]
    fn fixed_sizes() {
        assert_eq!(CType::Char.size(), 1);
        assert_eq!(CType::Short.size(), 2);
        assert_eq!(CType::Int.size(), 4);
        assert_eq!(CType::LongLong.size(), 8);
        assert_eq!(CType::Double.size(), 8);
        assert_eq!(CType::Long.size(), size_of::<c_long>());
        assert_eq!(CType::SizeT.size(), size_of::<usize>());
    }

    #[test]
    fn integer_ranges() {
        assert_eq!(CType::Int.integer_range(), Some((i32::MIN as i128, i32::MAX as i128)));
        assert_eq!(CType::UShort.integer_range(), Some((0, u16::MAX as i128)));
        assert_eq!(CType::Double.integer_range(), None);
    }
}
