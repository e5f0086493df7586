//! Byte codec — big-endian integer pack/unpack and the float/fixed-point
//! encodings used by the wire chunk format.
//!
//! # Endianness
//! Every integer on the wire is big-endian, two's-complement, fixed by
//! the container format in `container.rs` and never negotiated.
//!
//! # Floats
//! A float or double is never written as a raw IEEE-754 word directly —
//! doing so ties the wire format to the platform's float representation.
//! Instead it is serialized as its `%a`-style hexadecimal text form inside
//! a length-prefixed string. The decoder also accepts a raw word prefixed
//! by a one-byte discriminator, so callers that can certify platform
//! float compatibility can skip the text round-trip.
//!
//! # Fixed point
//! `F32P32`/`F16P16`/`F8P24` are big-endian integers with an implicit
//! binary point: the low N bits are the fractional part.

use std::io::{self, Read, Write};

/// Discriminator byte prefixing a serialized float/double payload.
/// `0` = hex text form follows; `1` = raw IEEE-754 word follows.
const FLOAT_FORM_HEX: u8 = 0;
const FLOAT_FORM_RAW: u8 = 1;

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}
pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

macro_rules! be_pair {
    ($write_name:ident, $read_name:ident, $ty:ty) => {
        pub fn $write_name<W: Write>(w: &mut W, v: $ty) -> io::Result<()> {
            w.write_all(&v.to_be_bytes())
        }
        pub fn $read_name<R: Read>(r: &mut R) -> io::Result<$ty> {
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            r.read_exact(&mut buf)?;
            Ok(<$ty>::from_be_bytes(buf))
        }
    };
}

be_pair!(write_i8, read_i8, i8);
be_pair!(write_u16, read_u16, u16);
be_pair!(write_i16, read_i16, i16);
be_pair!(write_u32, read_u32, u32);
be_pair!(write_i32, read_i32, i32);
be_pair!(write_u64, read_u64, u64);
be_pair!(write_i64, read_i64, i64);

/// Length-prefixed byte string: `len:u32` then `len` raw bytes.
pub fn write_bytes<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    write_u32(w, data.len() as u32)?;
    w.write_all(data)
}

pub fn read_bytes<R: Read>(r: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("byte string length {len} exceeds allowed maximum {max_len}"),
        ));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// NUL-terminated C string, used for chunk field names and dictionary
/// blob entries. Rejects embedded-NUL-free strings longer than `max_len`.
pub fn write_cstring<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(s.as_bytes())?;
    w.write_all(&[0u8])
}

pub fn read_cstring<R: Read>(r: &mut R, max_len: usize) -> io::Result<String> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        out.push(byte[0]);
        if out.len() > max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("cstring exceeds allowed maximum {max_len} bytes"),
            ));
        }
    }
    String::from_utf8(out).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

// ── Float / double ───────────────────────────────────────────────────────────

/// Serialize an `f64` in the wire's hex-text form: a discriminator byte,
/// then a length-prefixed ASCII string produced by Rust's `{:x}`-less
/// hex-float formatter (we hand-roll `%a` since the standard library has
/// no native hex-float formatter).
pub fn write_double<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    write_u8(w, FLOAT_FORM_HEX)?;
    let text = format_hexfloat(v);
    write_bytes(w, text.as_bytes())
}

pub fn read_double<R: Read>(r: &mut R) -> io::Result<f64> {
    match read_u8(r)? {
        FLOAT_FORM_HEX => {
            let bytes = read_bytes(r, 64)?;
            let text = String::from_utf8(bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            parse_hexfloat(&text)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed hex float"))
        }
        FLOAT_FORM_RAW => {
            let bits = read_u64(r)?;
            Ok(f64::from_bits(bits))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown float encoding discriminator {other}"),
        )),
    }
}

pub fn write_float<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    write_double(w, v as f64)
}
pub fn read_float<R: Read>(r: &mut R) -> io::Result<f32> {
    Ok(read_double(r)? as f32)
}

/// Render an `f64` as a deterministic, platform-independent hex-float
/// string: `sign 0x1.mmmmmmmmmmmmmp+eee`. Mirrors C99 `%a` closely enough
/// for exact binary round-trip — every value decodes back to the same
/// bit pattern (subnormals and NaN/Inf are handled via their mantissa
/// directly rather than through the normalized `1.` form).
fn format_hexfloat(v: f64) -> String {
    if v == 0.0 {
        return if v.is_sign_negative() { "-0x0.0p+0".into() } else { "0x0.0p+0".into() };
    }
    if v.is_nan() {
        return "nan".into();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf".into() } else { "inf".into() };
    }
    let bits = v.to_bits();
    let sign = if bits >> 63 == 1 { "-" } else { "" };
    let raw_exp = ((bits >> 52) & 0x7ff) as i64;
    let mantissa = bits & 0x000f_ffff_ffff_ffff;
    let (lead, exp) = if raw_exp == 0 {
        (0u64, -1022i64) // subnormal
    } else {
        (1u64, raw_exp - 1023)
    };
    format!("{sign}0x{lead}.{mantissa:013x}p{exp:+}")
}

fn parse_hexfloat(s: &str) -> Option<f64> {
    match s {
        "nan" => return Some(f64::NAN),
        "inf" => return Some(f64::INFINITY),
        "-inf" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    let (neg, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s),
    };
    let rest = rest.strip_prefix("0x")?;
    let (mantissa_part, exp_part) = rest.split_once('p')?;
    let exp: i64 = exp_part.parse().ok()?;
    let (lead_str, frac_str) = mantissa_part.split_once('.')?;
    let lead: u64 = lead_str.parse().ok()?;
    if lead == 0 && frac_str.chars().all(|c| c == '0') {
        return Some(if neg { -0.0 } else { 0.0 });
    }
    let frac_str_padded = format!("{frac_str:0<13}");
    let mantissa = u64::from_str_radix(&frac_str_padded[..13], 16).ok()?;

    let bits = if lead == 0 {
        // subnormal: biased exponent field is 0
        mantissa
    } else {
        let biased_exp = (exp + 1023) as u64;
        (biased_exp << 52) | mantissa
    };
    let bits = if neg { bits | (1u64 << 63) } else { bits };
    Some(f64::from_bits(bits))
}

// ── Fixed point ──────────────────────────────────────────────────────────────

/// Encode a float as a big-endian 64-bit fixed point value with `frac_bits`
/// bits of fractional precision below the binary point (e.g. 32 for
/// `F32P32`, 16 for `F16P16`, 24 for `F8P24`).
pub fn write_fixed<W: Write>(w: &mut W, v: f64, frac_bits: u32) -> io::Result<()> {
    let scaled = (v * (1i64 << frac_bits) as f64).round() as i64;
    write_i64(w, scaled)
}

pub fn read_fixed<R: Read>(r: &mut R, frac_bits: u32) -> io::Result<f64> {
    let scaled = read_i64(r)?;
    Ok(scaled as f64 / (1i64 << frac_bits) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn be_integer_roundtrip() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0xdead_beef).unwrap();
        write_i64(&mut buf, -123456789).unwrap();
        let mut cur = Cursor::new(buf);
        assert_eq!(read_u32(&mut cur).unwrap(), 0xdead_beef);
        assert_eq!(read_i64(&mut cur).unwrap(), -123456789);
    }

    #[test]
    fn cstring_roundtrip() {
        let mut buf = Vec::new();
        write_cstring(&mut buf, "hello").unwrap();
        let mut cur = Cursor::new(buf);
        assert_eq!(read_cstring(&mut cur, 64).unwrap(), "hello");
    }

    #[test]
    fn double_roundtrip_exact() {
        for v in [0.0, -0.0, 1.0, -1.5, 42.42, 1e300, -1e-300, f64::MIN_POSITIVE] {
            let mut buf = Vec::new();
            write_double(&mut buf, v).unwrap();
            let mut cur = Cursor::new(buf);
            let back = read_double(&mut cur).unwrap();
            assert_eq!(back.to_bits(), v.to_bits(), "mismatch for {v}");
        }
    }

    #[test]
    fn double_roundtrip_nan_inf() {
        let mut buf = Vec::new();
        write_double(&mut buf, f64::INFINITY).unwrap();
        write_double(&mut buf, f64::NEG_INFINITY).unwrap();
        write_double(&mut buf, f64::NAN).unwrap();
        let mut cur = Cursor::new(buf);
        assert!(read_double(&mut cur).unwrap().is_infinite());
        assert!(read_double(&mut cur).unwrap().is_infinite());
        assert!(read_double(&mut cur).unwrap().is_nan());
    }

    #[test]
    fn fixed_point_roundtrip() {
        let mut buf = Vec::new();
        write_fixed(&mut buf, 3.5, 32).unwrap();
        let mut cur = Cursor::new(buf);
        assert!((read_fixed(&mut cur, 32).unwrap() - 3.5).abs() < 1e-9);
    }

    proptest::proptest! {
        #[test]
        fn prop_be_u32_roundtrip(v: u32) {
            let mut buf = Vec::new();
            write_u32(&mut buf, v).unwrap();
            let mut cur = Cursor::new(buf);
            proptest::prop_assert_eq!(read_u32(&mut cur).unwrap(), v);
        }

        #[test]
        fn prop_double_roundtrips_exact_bits(bits: u64) {
            let v = f64::from_bits(bits);
            let mut buf = Vec::new();
            write_double(&mut buf, v).unwrap();
            let mut cur = Cursor::new(buf);
            let back = read_double(&mut cur).unwrap();
            if v.is_nan() {
                proptest::prop_assert!(back.is_nan());
            } else {
                proptest::prop_assert_eq!(back.to_bits(), v.to_bits());
            }
        }

        #[test]
        fn prop_cstring_roundtrip(s in "[a-zA-Z0-9 _-]{0,64}") {
            let mut buf = Vec::new();
            write_cstring(&mut buf, &s).unwrap();
            let mut cur = Cursor::new(buf);
            proptest::prop_assert_eq!(read_cstring(&mut cur, 128).unwrap(), s);
        }
    }
}
