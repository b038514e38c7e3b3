//! `long double` storage: values travel as `f64` and are widened or
//! narrowed to the target's native format at the memory boundary.

use simbind_types::LongDoubleFormat;

const F64_EXP_BIAS: i32 = 1023;
const WIDE_EXP_BIAS: i32 = 16383;
const WIDE_EXP_MAX: u16 = 0x7fff;

pub(crate) fn encode(value: f64, dst: &mut [u8]) {
    dst.fill(0);
    match LongDoubleFormat::native() {
        LongDoubleFormat::Double => dst[..8].copy_from_slice(&value.to_ne_bytes()),
        LongDoubleFormat::X87Extended => {
            let (mantissa, sign_exp) = to_x87(value);
            dst[..8].copy_from_slice(&mantissa.to_le_bytes());
            dst[8..10].copy_from_slice(&sign_exp.to_le_bytes());
        }
        LongDoubleFormat::Binary128 => dst[..16].copy_from_slice(&to_binary128(value).to_ne_bytes()),
    }
}

pub(crate) fn decode(src: &[u8]) -> f64 {
    match LongDoubleFormat::native() {
        LongDoubleFormat::Double => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&src[..8]);
            f64::from_ne_bytes(bytes)
        }
        LongDoubleFormat::X87Extended => {
            let mut mantissa = [0u8; 8];
            mantissa.copy_from_slice(&src[..8]);
            let sign_exp = u16::from_le_bytes([src[8], src[9]]);
            from_x87(u64::from_le_bytes(mantissa), sign_exp)
        }
        LongDoubleFormat::Binary128 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&src[..16]);
            from_binary128(u128::from_ne_bytes(bytes))
        }
    }
}

/// Splits an `f64` into sign, unbiased exponent and a significand whose
/// leading one sits at bit 52. `None` for zero, infinity and NaN.
fn normalize(value: f64) -> Option<(bool, i32, u64)> {
    let bits = value.to_bits();
    let sign = bits >> 63 == 1;
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & ((1u64 << 52) - 1);
    match exp {
        0x7ff => None,
        0 if frac == 0 => None,
        0 => {
            /* subnormal: shift the highest set bit up to bit 52 */
            let top = 63 - frac.leading_zeros() as i32;
            let shift = 52 - top;
            Some((sign, 1 - F64_EXP_BIAS - shift, frac << shift))
        }
        _ => Some((sign, exp - F64_EXP_BIAS, frac | (1u64 << 52))),
    }
}

fn special_bits(value: f64) -> (bool, bool) {
    (value.is_nan(), value.is_infinite())
}

fn to_x87(value: f64) -> (u64, u16) {
    let sign = if value.is_sign_negative() { 0x8000u16 } else { 0 };
    match normalize(value) {
        Some((_, exp, significand)) => (significand << 11, sign | (exp + WIDE_EXP_BIAS) as u16),
        None => match special_bits(value) {
            (true, _) => (0xC000_0000_0000_0000, sign | WIDE_EXP_MAX),
            (_, true) => (0x8000_0000_0000_0000, sign | WIDE_EXP_MAX),
            _ => (0, sign),
        },
    }
}

fn from_x87(mantissa: u64, sign_exp: u16) -> f64 {
    let negative = sign_exp & 0x8000 != 0;
    let exp = sign_exp & WIDE_EXP_MAX;
    let magnitude = if exp == 0 && mantissa == 0 {
        0.0
    } else if exp == WIDE_EXP_MAX {
        if mantissa << 1 == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        scale(mantissa as f64, exp as i32 - WIDE_EXP_BIAS - 63)
    };
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn to_binary128(value: f64) -> u128 {
    let sign = if value.is_sign_negative() { 1u128 << 127 } else { 0 };
    match normalize(value) {
        Some((_, exp, significand)) => {
            let frac = ((significand & ((1u64 << 52) - 1)) as u128) << 60;
            sign | (((exp + WIDE_EXP_BIAS) as u128) << 112) | frac
        }
        None => match special_bits(value) {
            (true, _) => sign | ((WIDE_EXP_MAX as u128) << 112) | (1u128 << 111),
            (_, true) => sign | ((WIDE_EXP_MAX as u128) << 112),
            _ => sign,
        },
    }
}

fn from_binary128(bits: u128) -> f64 {
    let negative = bits >> 127 == 1;
    let exp = ((bits >> 112) as u16) & WIDE_EXP_MAX;
    let frac = bits & ((1u128 << 112) - 1);
    let magnitude = if exp == 0 {
        0.0
    } else if exp == WIDE_EXP_MAX {
        if frac == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        let significand = ((1u128 << 112) | frac) >> 60;
        scale(significand as f64, exp as i32 - WIDE_EXP_BIAS - 52)
    };
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// `value * 2^exp` in two steps so intermediate powers stay representable.
fn scale(value: f64, exp: i32) -> f64 {
    let half = exp / 2;
    value * 2f64.powi(half) * 2f64.powi(exp - half)
}
