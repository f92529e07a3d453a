use std::fmt::{Debug, Display, Formatter};

use half::f16;
use serde::{Deserialize, Serialize};
use tensorhub_error::{HubError, HubResult, hub_err};

/// Physical element type of a tensor.
///
/// Every element is stored little-endian with a fixed byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PType {
    /// A boolean stored as a single `0`/`1` byte
    Bool,
    /// An 8-bit unsigned integer
    #[serde(alias = "uint8")]
    U8,
    /// A 16-bit unsigned integer
    #[serde(alias = "uint16")]
    U16,
    /// A 32-bit unsigned integer
    #[serde(alias = "uint32")]
    U32,
    /// A 64-bit unsigned integer
    #[serde(alias = "uint64")]
    U64,
    /// An 8-bit signed integer
    #[serde(alias = "int8")]
    I8,
    /// A 16-bit signed integer
    #[serde(alias = "int16")]
    I16,
    /// A 32-bit signed integer
    #[serde(alias = "int32")]
    I32,
    /// A 64-bit signed integer
    #[serde(alias = "int64")]
    I64,
    /// An IEEE 754 16-bit floating point number
    #[serde(alias = "float16")]
    F16,
    /// An IEEE 754 32-bit floating point number
    #[serde(alias = "float32")]
    F32,
    /// An IEEE 754 64-bit floating point number
    #[serde(alias = "float64")]
    F64,
}

impl PType {
    /// Number of bytes per element.
    pub const fn byte_width(&self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 | Self::F16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Whether the type is an integer (signed or unsigned).
    pub const fn is_int(&self) -> bool {
        matches!(
            self,
            Self::U8 | Self::U16 | Self::U32 | Self::U64 | Self::I8 | Self::I16 | Self::I32 | Self::I64
        )
    }

    /// Whether the type is a floating point number.
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }
}

impl Display for PType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
            Self::U32 => write!(f, "u32"),
            Self::U64 => write!(f, "u64"),
            Self::I8 => write!(f, "i8"),
            Self::I16 => write!(f, "i16"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F16 => write!(f, "f16"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
        }
    }
}

impl TryFrom<&str> for PType {
    type Error = HubError;

    fn try_from(value: &str) -> HubResult<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
            .map_err(|_| hub_err!("unknown element type {value}"))
    }
}

/// A Rust type that can be stored as the elements of a tensor.
pub trait NativePType: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// The [`PType`] of this native type.
    const PTYPE: PType;

    /// Write `self` into `out`, which is exactly `PTYPE.byte_width()` bytes long.
    fn write_le(self, out: &mut [u8]);

    /// Read a value from `bytes`, which is exactly `PTYPE.byte_width()` bytes long.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! native_ptype {
    ($T:ty, $ptype:tt) => {
        impl NativePType for $T {
            const PTYPE: PType = PType::$ptype;

            #[inline]
            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; size_of::<$T>()];
                buf.copy_from_slice(bytes);
                <$T>::from_le_bytes(buf)
            }
        }
    };
}

native_ptype!(u8, U8);
native_ptype!(u16, U16);
native_ptype!(u32, U32);
native_ptype!(u64, U64);
native_ptype!(i8, I8);
native_ptype!(i16, I16);
native_ptype!(i32, I32);
native_ptype!(i64, I64);
native_ptype!(f16, F16);
native_ptype!(f32, F32);
native_ptype!(f64, F64);

impl NativePType for bool {
    const PTYPE: PType = PType::Bool;

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("u8", PType::U8)]
    #[case("uint8", PType::U8)]
    #[case("INT64", PType::I64)]
    #[case("float32", PType::F32)]
    #[case("bool", PType::Bool)]
    fn parse_names(#[case] name: &str, #[case] expected: PType) {
        assert_eq!(PType::try_from(name).unwrap(), expected);
    }

    #[test]
    fn unknown_name() {
        assert!(PType::try_from("complex128").is_err());
    }

    #[test]
    fn serde_lowercase() {
        assert_eq!(serde_json::to_string(&PType::U16).unwrap(), "\"u16\"");
        assert_eq!(serde_json::from_str::<PType>("\"uint16\"").unwrap(), PType::U16);
    }

    #[test]
    fn le_roundtrip() {
        let mut buf = [0u8; 4];
        (-7i32).write_le(&mut buf);
        assert_eq!(buf, (-7i32).to_le_bytes());
        assert_eq!(i32::read_le(&buf), -7);

        let mut buf = [0u8; 2];
        f16::from_f32(1.5).write_le(&mut buf);
        assert_eq!(f16::read_le(&buf), f16::from_f32(1.5));

        let mut buf = [0u8; 1];
        true.write_le(&mut buf);
        assert!(bool::read_le(&buf));
    }
}
