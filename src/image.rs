//! Image sub-codec — RGBA bitmaps stored either as a lossless run-length
//! encoding of 32-bit ARGB runs, or as lossy JPEG-per-plane.
//!
//! Payload layout (all big-endian):
//! ```text
//! tag        u32   0x01000000 (lossless) | 0x02000000 (lossy)
//! width      u32
//! height     u32
//! alpha      u32   0 | 1
//! compress   u32   0..=9, deflate level used on the RLE body (lossless only)
//! quality    u32   0..=100, JPEG quality (lossy only)
//! lossy      u32   0 | 1, redundant with tag, kept for header-only reads
//! body       ..    RLE stream, or length-prefixed JPEG plane(s)
//! ```
//! The first 28 bytes are always just the header: a caller can read
//! width/height/alpha without touching (or even having) the rest of the
//! payload. The run-length scheme here runs over whole ARGB pixels
//! rather than raw bytes, since a run of identical bytes is meaningless
//! once you're looking at 4-byte pixels.

use crate::byteio::{read_u32, write_u32};
use std::io::{self, Cursor, Read};
use thiserror::Error;

pub const HEADER_LEN: usize = 28;

const TAG_LOSSLESS: u32 = 0x0100_0000;
const TAG_LOSSY: u32 = 0x0200_0000;

const MIN_DIMENSION: u32 = 1;
const MAX_DIMENSION: u32 = 8000;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("image dimensions {0}x{1} out of range [1, 8000]")]
    DimensionsOutOfRange(u32, u32),
    #[error("unknown image tag 0x{0:08x}")]
    UnknownTag(u32),
    #[error("pixel buffer length {0} does not match width*height*4 ({1})")]
    BufferLengthMismatch(usize, usize),
    #[error("malformed image payload: {0}")]
    Malformed(String),
    #[error("JPEG codec error: {0}")]
    Jpeg(String),
    #[error("compression codec error: {0}")]
    Codec(#[from] crate::codec::CodecError),
}

#[derive(Debug, Clone, Copy)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub alpha: bool,
    pub compress: u32,
    pub quality: u32,
    pub lossy: bool,
}

impl ImageHeader {
    /// Read only the 28-byte header, leaving the rest of `payload` unread.
    /// This is the fast path used by callers who only need dimensions.
    pub fn read(payload: &[u8]) -> Result<ImageHeader, ImageError> {
        if payload.len() < HEADER_LEN {
            return Err(ImageError::Malformed("payload shorter than header".into()));
        }
        let mut cur = Cursor::new(&payload[..HEADER_LEN]);
        let tag = read_u32(&mut cur)?;
        let lossy_from_tag = match tag {
            TAG_LOSSLESS => false,
            TAG_LOSSY => true,
            other => return Err(ImageError::UnknownTag(other)),
        };
        let width = read_u32(&mut cur)?;
        let height = read_u32(&mut cur)?;
        let alpha = read_u32(&mut cur)? != 0;
        let compress = read_u32(&mut cur)?;
        let quality = read_u32(&mut cur)?;
        let lossy = read_u32(&mut cur)? != 0;
        if lossy != lossy_from_tag {
            return Err(ImageError::Malformed("lossy flag disagrees with tag".into()));
        }
        validate_dimensions(width, height)?;
        Ok(ImageHeader { width, height, alpha, compress, quality, lossy })
    }
}

fn validate_dimensions(width: u32, height: u32) -> Result<(), ImageError> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&width)
        || !(MIN_DIMENSION..=MAX_DIMENSION).contains(&height)
    {
        return Err(ImageError::DimensionsOutOfRange(width, height));
    }
    Ok(())
}

/// Encode an ARGB8888 (4 bytes/pixel, row-major) buffer losslessly.
pub fn encode_lossless(
    pixels: &[u8],
    width: u32,
    height: u32,
    alpha: bool,
    compress: u32,
) -> Result<Vec<u8>, ImageError> {
    validate_dimensions(width, height)?;
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return Err(ImageError::BufferLengthMismatch(pixels.len(), expected));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + pixels.len() / 2);
    write_u32(&mut out, TAG_LOSSLESS)?;
    write_u32(&mut out, width)?;
    write_u32(&mut out, height)?;
    write_u32(&mut out, alpha as u32)?;
    write_u32(&mut out, compress.min(9))?;
    write_u32(&mut out, 0)?; // quality — unused for lossless
    write_u32(&mut out, 0)?; // lossy = false

    let rle = rle_encode_argb(pixels);
    if compress > 0 {
        write_u32(&mut out, rle.len() as u32)?;
        let compressed = crate::codec::compress(&rle, compress)?;
        out.extend_from_slice(&compressed);
    } else {
        out.extend_from_slice(&rle);
    }
    Ok(out)
}

/// Decode a full lossless payload (header already validated by the
/// caller, or re-validated here) into an ARGB8888 buffer.
pub fn decode_lossless(payload: &[u8]) -> Result<(ImageHeader, Vec<u8>), ImageError> {
    let header = ImageHeader::read(payload)?;
    if header.lossy {
        return Err(ImageError::Malformed("decode_lossless called on a lossy payload".into()));
    }
    let pixel_count = header.width as usize * header.height as usize;
    let expected_bytes = pixel_count * 4;
    let mut cur = Cursor::new(&payload[HEADER_LEN..]);
    let rle = if header.compress > 0 {
        let rle_len = read_u32(&mut cur)? as usize;
        let compressed = &payload[HEADER_LEN + 4..];
        crate::codec::decompress(compressed, rle_len).map_err(|e| ImageError::Malformed(e.to_string()))?
    } else {
        payload[HEADER_LEN..].to_vec()
    };
    let pixels = rle_decode_argb(&rle, pixel_count)
        .ok_or_else(|| ImageError::Malformed("truncated RLE stream".into()))?;
    if pixels.len() != expected_bytes {
        return Err(ImageError::BufferLengthMismatch(pixels.len(), expected_bytes));
    }
    Ok((header, pixels))
}

/// Decode a sub-rectangle `(src_x, src_y, w, h)` of a lossless payload
/// into `dest`, which is addressed with `row_stride` pixels per row
/// (`row_stride >= w`). Clips to the intersection of the requested
/// rectangle and the image bounds.
pub fn decode_to_surface(
    payload: &[u8],
    dest: &mut [u8],
    row_stride: u32,
    src_x: u32,
    src_y: u32,
    w: u32,
    h: u32,
) -> Result<(), ImageError> {
    let (header, pixels) = decode_lossless(payload)?;
    if row_stride < w {
        return Err(ImageError::Malformed("row_stride smaller than requested width".into()));
    }
    let clip_w = w.min(header.width.saturating_sub(src_x));
    let clip_h = h.min(header.height.saturating_sub(src_y));

    for row in 0..clip_h {
        let src_row = src_y + row;
        let src_off = (src_row as usize * header.width as usize + src_x as usize) * 4;
        let dst_off = (row as usize * row_stride as usize) * 4;
        let len = clip_w as usize * 4;
        if src_off + len > pixels.len() || dst_off + len > dest.len() {
            return Err(ImageError::Malformed("sub-rectangle exceeds buffer bounds".into()));
        }
        dest[dst_off..dst_off + len].copy_from_slice(&pixels[src_off..src_off + len]);
    }
    Ok(())
}

/// Encode an ARGB8888 buffer losslessly, skipped alpha plane; instead
/// splits into a color JPEG plane and (if `alpha`) a single-channel
/// JPEG alpha plane.
pub fn encode_lossy(
    pixels: &[u8],
    width: u32,
    height: u32,
    alpha: bool,
    quality: u32,
) -> Result<Vec<u8>, ImageError> {
    validate_dimensions(width, height)?;
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return Err(ImageError::BufferLengthMismatch(pixels.len(), expected));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + pixels.len() / 4);
    write_u32(&mut out, TAG_LOSSY)?;
    write_u32(&mut out, width)?;
    write_u32(&mut out, height)?;
    write_u32(&mut out, alpha as u32)?;
    write_u32(&mut out, 0)?; // compress — unused for lossy
    write_u32(&mut out, quality.min(100))?;
    write_u32(&mut out, 1)?;

    let rgb = argb_to_rgb(pixels);
    let color_jpeg = encode_jpeg_plane(&rgb, width, height, 3, quality)?;
    write_u32(&mut out, color_jpeg.len() as u32)?;
    out.extend_from_slice(&color_jpeg);

    if alpha {
        let alpha_plane = argb_alpha_plane(pixels);
        let alpha_jpeg = encode_jpeg_plane(&alpha_plane, width, height, 1, quality)?;
        write_u32(&mut out, alpha_jpeg.len() as u32)?;
        out.extend_from_slice(&alpha_jpeg);
    }
    Ok(out)
}

pub fn decode_lossy(payload: &[u8]) -> Result<(ImageHeader, Vec<u8>), ImageError> {
    let header = ImageHeader::read(payload)?;
    if !header.lossy {
        return Err(ImageError::Malformed("decode_lossy called on a lossless payload".into()));
    }
    let mut cur = Cursor::new(&payload[HEADER_LEN..]);
    let color_len = read_u32(&mut cur)? as usize;
    let mut color_jpeg = vec![0u8; color_len];
    cur.read_exact(&mut color_jpeg)?;
    let rgb = decode_jpeg_plane(&color_jpeg, 3)?;

    let alpha_plane = if header.alpha {
        let alpha_len = read_u32(&mut cur)? as usize;
        let mut alpha_jpeg = vec![0u8; alpha_len];
        cur.read_exact(&mut alpha_jpeg)?;
        Some(decode_jpeg_plane(&alpha_jpeg, 1)?)
    } else {
        None
    };

    let pixels = rgb_to_argb(&rgb, alpha_plane.as_deref());
    Ok((header, pixels))
}

fn argb_to_rgb(argb: &[u8]) -> Vec<u8> {
    argb.chunks_exact(4).flat_map(|p| [p[1], p[2], p[3]]).collect()
}

fn argb_alpha_plane(argb: &[u8]) -> Vec<u8> {
    argb.chunks_exact(4).map(|p| p[0]).collect()
}

fn rgb_to_argb(rgb: &[u8], alpha: Option<&[u8]>) -> Vec<u8> {
    rgb.chunks_exact(3)
        .enumerate()
        .flat_map(|(i, p)| {
            let a = alpha.map(|plane| plane[i]).unwrap_or(0xff);
            [a, p[0], p[1], p[2]]
        })
        .collect()
}

fn encode_jpeg_plane(
    plane: &[u8],
    width: u32,
    height: u32,
    channels: u8,
    quality: u32,
) -> Result<Vec<u8>, ImageError> {
    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;

    let color: ExtendedColorType = match channels {
        3 => ExtendedColorType::Rgb8,
        1 => ExtendedColorType::L8,
        _ => return Err(ImageError::Jpeg(format!("unsupported channel count {channels}"))),
    };
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.min(100) as u8);
    encoder
        .encode(plane, width, height, color)
        .map_err(|e| ImageError::Jpeg(e.to_string()))?;
    Ok(buf)
}

fn decode_jpeg_plane(jpeg: &[u8], channels: u8) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| ImageError::Jpeg(e.to_string()))?;
    Ok(match channels {
        3 => img.to_rgb8().into_raw(),
        1 => img.to_luma8().into_raw(),
        _ => return Err(ImageError::Jpeg(format!("unsupported channel count {channels}"))),
    })
}

// ── Lossless RLE over ARGB pixel runs ───────────────────────────────────────

/// Encode `pixels` (ARGB8888, row-major) as `{count:u8, pixel:[u8;4]}`
/// runs of up to 255 identical pixels.
fn rle_encode_argb(pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() / 2);
    let mut i = 0usize;
    while i < pixels.len() {
        let pixel = &pixels[i..i + 4];
        let mut run = 1usize;
        while run < 255 && i + run * 4 + 4 <= pixels.len() && &pixels[i + run * 4..i + run * 4 + 4] == pixel {
            run += 1;
        }
        out.push(run as u8);
        out.extend_from_slice(pixel);
        i += run * 4;
    }
    out
}

/// Decode an RLE stream produced by [`rle_encode_argb`] back into
/// `pixel_count` ARGB8888 pixels, or `None` if the stream is truncated
/// or yields the wrong number of pixels.
fn rle_decode_argb(data: &[u8], pixel_count: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(pixel_count * 4);
    let mut i = 0usize;
    while i < data.len() {
        let count = *data.get(i)? as usize;
        i += 1;
        let pixel = data.get(i..i + 4)?;
        i += 4;
        for _ in 0..count {
            out.extend_from_slice(pixel);
        }
    }
    if out.len() != pixel_count * 4 {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        pixel.iter().cloned().cycle().take(width as usize * height as usize * 4).collect()
    }

    #[test]
    fn header_read_only_needs_28_bytes() {
        let pixels = solid(4, 4, [0xff, 0x10, 0x20, 0x30]);
        let payload = encode_lossless(&pixels, 4, 4, true, 0).unwrap();
        let header = ImageHeader::read(&payload[..HEADER_LEN]).unwrap();
        assert_eq!(header.width, 4);
        assert_eq!(header.height, 4);
        assert!(header.alpha);
        assert!(!header.lossy);
    }

    #[test]
    fn lossless_roundtrip_uncompressed() {
        let mut pixels = Vec::new();
        for y in 0..8u32 {
            for x in 0..8u32 {
                pixels.extend_from_slice(&[(x + y) as u8, x as u8, y as u8, 0xff]);
            }
        }
        let payload = encode_lossless(&pixels, 8, 8, true, 0).unwrap();
        let (header, decoded) = decode_lossless(&payload).unwrap();
        assert_eq!(header.width, 8);
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn lossless_roundtrip_compressed() {
        let pixels = solid(16, 16, [0x11, 0x22, 0x33, 0xff]);
        let payload = encode_lossless(&pixels, 16, 16, false, 6).unwrap();
        let (_, decoded) = decode_lossless(&payload).unwrap();
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn rejects_out_of_range_dimensions() {
        let pixels = vec![0u8; 4];
        assert!(encode_lossless(&pixels, 0, 1, false, 0).is_err());
        assert!(encode_lossless(&pixels, 8001, 1, false, 0).is_err());
    }

    #[test]
    fn sub_rectangle_clips_to_image_bounds() {
        let mut pixels = Vec::new();
        for y in 0..4u32 {
            for x in 0..4u32 {
                pixels.extend_from_slice(&[x as u8, y as u8, 0, 0xff]);
            }
        }
        let payload = encode_lossless(&pixels, 4, 4, true, 0).unwrap();
        let mut dest = vec![0u8; 4 * 4 * 4];
        // request a 4x4 window starting at (2,2): only 2x2 actually exists
        decode_to_surface(&payload, &mut dest, 4, 2, 2, 4, 4).unwrap();
        assert_eq!(&dest[0..4], &[2, 2, 0, 0xff]);
    }

    #[test]
    fn rle_argb_roundtrip() {
        let pixels = solid(32, 32, [9, 9, 9, 9]);
        let encoded = rle_encode_argb(&pixels);
        assert!(encoded.len() < pixels.len());
        let decoded = rle_decode_argb(&encoded, 32 * 32).unwrap();
        assert_eq!(decoded, pixels);
    }
}
