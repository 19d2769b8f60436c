//! Raw SDK3 frame buffer decoding.
//!
//! A filled buffer is either the bare pixel payload or, with `MetadataEnable`
//! on, a sequence of chunks read backwards from the end of the buffer:
//!
//! ```text
//! | payload | id=0 | len | timestamp | id=1 | len=8 | frame info | id=7 | len | <- end
//! ```
//!
//! Each trailer is `(chunk_id: u32, chunk_len: u32)` little-endian, preceded by
//! `chunk_len` payload bytes. Pixels are row-major `(row, column)`.
//!
//! Supported layouts: 8, 16 and 32 bit little-endian elements (with optional
//! row padding, element-aligned or not) and `Mono12Packed`, where two 12-bit
//! pixels share three bytes.

use ndarray::{s, Array2};
use std::collections::BTreeMap;

use crate::error::{AndorError, Result};

/// Chunk id of the pixel payload.
pub const CHUNK_IMAGE: u32 = 0;
/// Chunk id of the 64-bit device timestamp.
pub const CHUNK_TIMESTAMP: u32 = 1;
/// Chunk id of the frame-info record (pixel encoding and AOI size).
pub const CHUNK_FRAME_INFO: u32 = 7;

/// Maximum number of bytes a payload may exceed `stride * height` by.
pub const SIZE_SLACK: usize = 8;

const CHUNK_TRAILER: usize = 8;

/// Storage size of one pixel as reported by the `BytesPerPixel` feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesPerPixel {
    /// `Mono8`
    One,
    /// `Mono12Packed`: two pixels in three bytes.
    OneAndHalf,
    /// `Mono16` and unpacked 12 bit
    Two,
    /// `Mono32`
    Four,
}

impl BytesPerPixel {
    /// Map the `BytesPerPixel` feature value; anything else is unsupported.
    pub fn from_value(bytes_per_pixel: f64) -> Result<Self> {
        match bytes_per_pixel {
            v if v == 1.0 => Ok(Self::One),
            v if v == 1.5 => Ok(Self::OneAndHalf),
            v if v == 2.0 => Ok(Self::Two),
            v if v == 4.0 => Ok(Self::Four),
            _ => Err(AndorError::UnsupportedPixelFormat { bytes_per_pixel }),
        }
    }

    /// Feature value this variant came from.
    pub fn value(self) -> f64 {
        match self {
            Self::One => 1.0,
            Self::OneAndHalf => 1.5,
            Self::Two => 2.0,
            Self::Four => 4.0,
        }
    }

    /// `ceil(bytes_per_pixel * width)`
    pub fn min_row_bytes(self, width: usize) -> usize {
        match self {
            Self::One => width,
            Self::OneAndHalf => (width * 3).div_ceil(2),
            Self::Two => width * 2,
            Self::Four => width * 4,
        }
    }
}

/// Geometry and layout parameters a buffer is decoded against.
///
/// Queried from the device for every read, since settings may change between
/// acquisitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    /// Pixels per row
    pub width: usize,
    /// Rows
    pub height: usize,
    /// `BytesPerPixel` feature value
    pub bytes_per_pixel: f64,
    /// Row stride in bytes
    pub stride: usize,
    /// Whether the buffer ends in metadata chunks
    pub metadata_enabled: bool,
}

/// Decoded pixel data.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelArray {
    /// 8-bit pixels
    U8(Array2<u8>),
    /// 16-bit pixels; `Mono12Packed` frames land here with 12 significant bits.
    U16(Array2<u16>),
    /// 32-bit pixels
    U32(Array2<u32>),
}

impl PixelArray {
    /// Zero-filled array with the element type `bytes_per_pixel` decodes to.
    pub fn zeros(bytes_per_pixel: BytesPerPixel, height: usize, width: usize) -> Self {
        match bytes_per_pixel {
            BytesPerPixel::One => Self::U8(Array2::zeros((height, width))),
            BytesPerPixel::OneAndHalf | BytesPerPixel::Two => {
                Self::U16(Array2::zeros((height, width)))
            }
            BytesPerPixel::Four => Self::U32(Array2::zeros((height, width))),
        }
    }

    /// `(height, width)`
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::U8(a) => a.dim(),
            Self::U16(a) => a.dim(),
            Self::U32(a) => a.dim(),
        }
    }

    /// Pixel at `(row, column)` widened to `u32`.
    pub fn get(&self, row: usize, column: usize) -> Option<u32> {
        match self {
            Self::U8(a) => a.get((row, column)).map(|&v| u32::from(v)),
            Self::U16(a) => a.get((row, column)).map(|&v| u32::from(v)),
            Self::U32(a) => a.get((row, column)).copied(),
        }
    }

    /// The 16-bit array, if that is the element type.
    pub fn as_u16(&self) -> Option<&Array2<u16>> {
        match self {
            Self::U16(a) => Some(a),
            _ => None,
        }
    }

    /// Whether every pixel is zero.
    pub fn is_all_zero(&self) -> bool {
        match self {
            Self::U8(a) => a.iter().all(|&v| v == 0),
            Self::U16(a) => a.iter().all(|&v| v == 0),
            Self::U32(a) => a.iter().all(|&v| v == 0),
        }
    }
}

/// Metadata recovered from the trailing chunks of a frame.
///
/// Empty when metadata is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Device timestamp (chunk 1), in camera clock ticks
    pub timestamp: Option<u64>,
    /// `(width, height)` from the frame-info chunk
    pub size: Option<(u16, u16)>,
    /// Pixel encoding code from the frame-info chunk
    pub pixel_type: Option<u8>,
    /// Row stride the frame was decoded with
    pub stride: Option<usize>,
    /// Chunks with unrecognised ids, passed through untouched
    pub extra_chunks: BTreeMap<u32, Vec<u8>>,
}

impl FrameMetadata {
    /// Whether no chunk was recovered.
    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none()
            && self.size.is_none()
            && self.pixel_type.is_none()
            && self.stride.is_none()
            && self.extra_chunks.is_empty()
    }
}

/// Decode one raw buffer into pixels and metadata.
pub fn decode(raw: &[u8], geometry: &FrameGeometry) -> Result<(PixelArray, FrameMetadata)> {
    let bpp = BytesPerPixel::from_value(geometry.bytes_per_pixel)?;
    if !geometry.metadata_enabled {
        let pixels = decode_pixels(raw, geometry.width, geometry.height, bpp, geometry.stride)?;
        return Ok((pixels, FrameMetadata::default()));
    }

    let mut payload = None;
    let mut metadata = FrameMetadata {
        stride: Some(geometry.stride),
        ..FrameMetadata::default()
    };
    for (id, body) in parse_chunks(raw)? {
        match id {
            CHUNK_IMAGE => payload = Some(body),
            CHUNK_TIMESTAMP => metadata.timestamp = Some(parse_timestamp(body)?),
            CHUNK_FRAME_INFO => {
                let (pixel_type, width, height) = parse_frame_info(body)?;
                metadata.pixel_type = Some(pixel_type);
                metadata.size = Some((width, height));
            }
            other => {
                metadata.extra_chunks.insert(other, body.to_vec());
            }
        }
    }

    let payload = payload.ok_or(AndorError::MissingImageData)?;
    let pixels = decode_pixels(payload, geometry.width, geometry.height, bpp, geometry.stride)?;
    Ok((pixels, metadata))
}

/// Split a metadata-enabled buffer into `(chunk_id, body)` pairs, tail first.
pub fn parse_chunks(raw: &[u8]) -> Result<Vec<(u32, &[u8])>> {
    let mut chunks = Vec::new();
    let mut end = raw.len();
    while end > 0 {
        if end < CHUNK_TRAILER {
            return Err(AndorError::MalformedMetadata {
                message: format!("{end} leading bytes cannot hold a chunk trailer"),
            });
        }
        let id = read_u32_le(raw, end - 8);
        let len = read_u32_le(raw, end - 4) as usize;
        let body_end = end - CHUNK_TRAILER;
        if len > body_end {
            return Err(AndorError::MalformedMetadata {
                message: format!("chunk {id} claims {len} bytes but only {body_end} remain"),
            });
        }
        let start = body_end - len;
        chunks.push((id, &raw[start..body_end]));
        end = start;
    }
    Ok(chunks)
}

fn parse_timestamp(body: &[u8]) -> Result<u64> {
    if body.len() < 8 {
        return Err(AndorError::MalformedMetadata {
            message: format!("timestamp chunk has {} bytes", body.len()),
        });
    }
    let mut ticks = [0u8; 8];
    ticks.copy_from_slice(&body[..8]);
    Ok(u64::from_le_bytes(ticks))
}

/// Frame-info record: `(gap: u16, flags: u8, pixel_type: u8, width: u16, height: u16)`.
///
/// Some firmware omits the leading `gap` field and sends the 6-byte tail only.
fn parse_frame_info(body: &[u8]) -> Result<(u8, u16, u16)> {
    let record = match body.len() {
        6 => body,
        n if n >= 8 => &body[2..8],
        n => {
            return Err(AndorError::MalformedMetadata {
                message: format!("frame info chunk has {n} bytes"),
            })
        }
    };
    let pixel_type = record[1];
    let width = u16::from_le_bytes([record[2], record[3]]);
    let height = u16::from_le_bytes([record[4], record[5]]);
    Ok((pixel_type, width, height))
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decode a bare pixel payload.
pub fn decode_pixels(
    payload: &[u8],
    width: usize,
    height: usize,
    bpp: BytesPerPixel,
    stride: usize,
) -> Result<PixelArray> {
    let min = bpp.min_row_bytes(width);
    if stride < min {
        return Err(AndorError::Stride { stride, min });
    }
    let expected = stride * height;
    if payload.len() < expected || payload.len() >= expected + SIZE_SLACK {
        return Err(AndorError::SizeMismatch {
            expected,
            actual: payload.len(),
        });
    }
    if width == 0 || height == 0 {
        return Ok(PixelArray::zeros(bpp, height, width));
    }

    let data = &payload[..expected];
    match bpp {
        BytesPerPixel::OneAndHalf => {
            unpack_mono12(data, width, height, stride).map(PixelArray::U16)
        }
        BytesPerPixel::One => {
            decode_elements::<u8>(data, width, height, stride).map(PixelArray::U8)
        }
        BytesPerPixel::Two => {
            decode_elements::<u16>(data, width, height, stride).map(PixelArray::U16)
        }
        BytesPerPixel::Four => {
            decode_elements::<u32>(data, width, height, stride).map(PixelArray::U32)
        }
    }
}

trait LeElement: Copy + Default + 'static {
    const SIZE: usize;
    fn from_le(bytes: &[u8]) -> Self;
    fn from_u32(value: u32) -> Self;
}

impl LeElement for u8 {
    const SIZE: usize = 1;
    fn from_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
    fn from_u32(value: u32) -> Self {
        value as u8
    }
}

impl LeElement for u16 {
    const SIZE: usize = 2;
    fn from_le(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }
    fn from_u32(value: u32) -> Self {
        value as u16
    }
}

impl LeElement for u32 {
    const SIZE: usize = 4;
    fn from_le(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    fn from_u32(value: u32) -> Self {
        value
    }
}

fn shape_error(expected: usize, actual: usize) -> AndorError {
    AndorError::SizeMismatch { expected, actual }
}

fn decode_elements<T: LeElement>(
    data: &[u8],
    width: usize,
    height: usize,
    stride: usize,
) -> Result<Array2<T>> {
    let row_bytes = width * T::SIZE;

    if stride == row_bytes {
        let elems: Vec<T> = data.chunks_exact(T::SIZE).map(T::from_le).collect();
        return Array2::from_shape_vec((height, width), elems)
            .map_err(|_| shape_error(stride * height, data.len()));
    }

    if stride % T::SIZE == 0 {
        // Element-aligned padding: view padded rows, keep the first `width` columns.
        let padded_width = stride / T::SIZE;
        let elems: Vec<T> = data.chunks_exact(T::SIZE).map(T::from_le).collect();
        let padded = Array2::from_shape_vec((height, padded_width), elems)
            .map_err(|_| shape_error(stride * height, data.len()))?;
        return Ok(padded.slice(s![.., ..width]).to_owned());
    }

    // Byte-level padding: rebuild each element from its bytes.
    let mut elems = Vec::with_capacity(width * height);
    for row in data.chunks_exact(stride) {
        for bytes in row[..row_bytes].chunks_exact(T::SIZE) {
            let value = bytes
                .iter()
                .enumerate()
                .fold(0u32, |acc, (k, &b)| acc | (u32::from(b) << (8 * k)));
            elems.push(T::from_u32(value));
        }
    }
    Array2::from_shape_vec((height, width), elems)
        .map_err(|_| shape_error(stride * height, data.len()))
}

/// Unpack `Mono12Packed` rows into 16-bit pixels.
fn unpack_mono12(data: &[u8], width: usize, height: usize, stride: usize) -> Result<Array2<u16>> {
    let row_bytes = BytesPerPixel::OneAndHalf.min_row_bytes(width);
    let mut pixels = Vec::with_capacity(width * height);
    for row in data.chunks_exact(stride) {
        pixels.extend(unpack_mono12_row(&row[..row_bytes], width));
    }
    Array2::from_shape_vec((height, width), pixels)
        .map_err(|_| shape_error(stride * height, data.len()))
}

fn unpack_mono12_row(row: &[u8], width: usize) -> Vec<u16> {
    let mut triplets = row.chunks_exact(3);
    let mut pixels = Vec::with_capacity(width);
    for t in &mut triplets {
        let (b0, b1, b2) = (u16::from(t[0]), u16::from(t[1]), u16::from(t[2]));
        pixels.push((b0 << 4) | (b1 & 0x0F));
        pixels.push((b1 >> 4) | (b2 << 4));
    }
    if width % 2 == 1 {
        let tail = triplets.remainder();
        if tail.len() >= 2 {
            pixels.push((u16::from(tail[0]) << 4) | (u16::from(tail[1]) & 0x0F));
        }
    }
    pixels
}

/// Pack 12-bit pixel values into the `Mono12Packed` layout (`ceil(1.5 * n)` bytes).
pub fn pack_mono12(values: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity((values.len() * 3).div_ceil(2));
    let mut pairs = values.chunks_exact(2);
    for pair in &mut pairs {
        let (p0, p1) = (pair[0] & 0x0FFF, pair[1] & 0x0FFF);
        out.push((p0 >> 4) as u8);
        out.push(((p0 & 0x0F) | ((p1 & 0x0F) << 4)) as u8);
        out.push((p1 >> 4) as u8);
    }
    if let [last] = pairs.remainder() {
        let p = last & 0x0FFF;
        out.push((p >> 4) as u8);
        out.push((p & 0x0F) as u8);
    }
    out
}

/// Append one `(body, id, len)` chunk to a buffer being assembled front to back.
pub fn push_chunk(buffer: &mut Vec<u8>, id: u32, body: &[u8]) {
    buffer.extend_from_slice(body);
    buffer.extend_from_slice(&id.to_le_bytes());
    buffer.extend_from_slice(&(body.len() as u32).to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(width: usize, height: usize, bpp: f64, stride: usize) -> FrameGeometry {
        FrameGeometry {
            width,
            height,
            bytes_per_pixel: bpp,
            stride,
            metadata_enabled: false,
        }
    }

    #[test]
    fn test_mono12_unpack_round_trip_even_and_odd() {
        for width in [1usize, 2, 5, 8, 13] {
            let values: Vec<u16> = (0..width).map(|i| ((i * 977 + 3) % 4096) as u16).collect();
            let packed = pack_mono12(&values);
            assert_eq!(packed.len(), BytesPerPixel::OneAndHalf.min_row_bytes(width));

            let pixels = decode_pixels(&packed, width, 1, BytesPerPixel::OneAndHalf, packed.len())
                .unwrap();
            let row: Vec<u16> = pixels.as_u16().unwrap().iter().copied().collect();
            assert_eq!(row, values, "width {width}");
        }
    }

    #[test]
    fn test_mono12_extremes() {
        let values = [0u16, 4095, 4095, 0, 0x0A5];
        let packed = pack_mono12(&values);
        let pixels = decode_pixels(&packed, 5, 1, BytesPerPixel::OneAndHalf, packed.len()).unwrap();
        assert_eq!(
            pixels.as_u16().unwrap().iter().copied().collect::<Vec<_>>(),
            values
        );
    }

    #[test]
    fn test_mono12_with_row_padding() {
        let rows = [[1u16, 2, 3], [4000, 5, 6]];
        let stride = 8;
        let mut raw = Vec::new();
        for row in &rows {
            let mut packed = pack_mono12(row);
            packed.resize(stride, 0xEE);
            raw.extend(packed);
        }
        let pixels = decode(&raw, &geometry(3, 2, 1.5, stride)).unwrap().0;
        assert_eq!(pixels.shape(), (2, 3));
        assert_eq!(pixels.get(1, 0), Some(4000));
        assert_eq!(pixels.get(0, 2), Some(3));
    }

    #[test]
    fn test_unpadded_u16_is_row_major() {
        let values: Vec<u16> = (0..6).map(|v| v * 1000).collect();
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let (pixels, meta) = decode(&raw, &geometry(3, 2, 2.0, 6)).unwrap();
        assert!(meta.is_empty());
        assert_eq!(pixels.shape(), (2, 3));
        assert_eq!(pixels.get(1, 0), Some(3000));
        assert_eq!(pixels.get(0, 2), Some(2000));
    }

    #[test]
    fn test_u8_and_u32_layouts() {
        let raw8 = vec![1u8, 2, 3, 4];
        let px8 = decode(&raw8, &geometry(2, 2, 1.0, 2)).unwrap().0;
        assert!(matches!(px8, PixelArray::U8(_)));
        assert_eq!(px8.get(1, 1), Some(4));

        let raw32: Vec<u8> = [7u32, 0xDEAD_BEEF].iter().flat_map(|v| v.to_le_bytes()).collect();
        let px32 = decode(&raw32, &geometry(2, 1, 4.0, 8)).unwrap().0;
        assert_eq!(px32.get(0, 1), Some(0xDEAD_BEEF));
    }

    #[test]
    fn test_stride_paths_agree() {
        let values = [10u16, 20, 30, 40];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        // Exact stride.
        let exact = decode(&bytes, &geometry(4, 1, 2.0, 8)).unwrap().0;

        // Element-aligned padding: stride 10 = 5 elements.
        let mut aligned = bytes.clone();
        aligned.extend([0xFF, 0xFF]);
        let aligned = decode(&aligned, &geometry(4, 1, 2.0, 10)).unwrap().0;

        // Byte-level padding: stride 9 is not a multiple of 2.
        let mut odd = bytes.clone();
        odd.push(0xFF);
        let odd = decode(&odd, &geometry(4, 1, 2.0, 9)).unwrap().0;

        assert_eq!(exact, aligned);
        assert_eq!(exact, odd);
    }

    #[test]
    fn test_byte_padding_multiple_rows() {
        // Two rows of two u32 pixels with a 3-byte pad (stride 11).
        let mut raw = Vec::new();
        for row in [[1u32, 0x0102_0304], [0xFFFF_FFFF, 9]] {
            for v in row {
                raw.extend(v.to_le_bytes());
            }
            raw.extend([0xAA, 0xBB, 0xCC]);
        }
        let pixels = decode(&raw, &geometry(2, 2, 4.0, 11)).unwrap().0;
        assert_eq!(pixels.get(0, 1), Some(0x0102_0304));
        assert_eq!(pixels.get(1, 0), Some(0xFFFF_FFFF));
        assert_eq!(pixels.get(1, 1), Some(9));
    }

    #[test]
    fn test_stride_too_small() {
        let raw = vec![0u8; 12];
        let err = decode(&raw, &geometry(4, 2, 2.0, 6)).unwrap_err();
        assert!(matches!(err, AndorError::Stride { stride: 6, min: 8 }));
    }

    #[test]
    fn test_size_slack_bounds() {
        let g = geometry(2, 2, 1.0, 2);
        assert!(decode(&[0u8; 4], &g).is_ok());
        assert!(decode(&[0u8; 11], &g).is_ok());
        assert!(matches!(
            decode(&[0u8; 12], &g).unwrap_err(),
            AndorError::SizeMismatch { expected: 4, actual: 12 }
        ));
        assert!(matches!(
            decode(&[0u8; 3], &g).unwrap_err(),
            AndorError::SizeMismatch { .. }
        ));
    }

    #[test]
    fn test_unsupported_pixel_format() {
        let err = decode(&[0u8; 12], &geometry(2, 2, 3.0, 6)).unwrap_err();
        assert!(matches!(err, AndorError::UnsupportedPixelFormat { .. }));
        assert!(BytesPerPixel::from_value(0.5).is_err());
    }

    fn metadata_frame(
        payload: &[u8],
        timestamp: u64,
        info: [u8; 8],
        extra: Option<&[u8]>,
    ) -> Vec<u8> {
        let mut raw = Vec::new();
        push_chunk(&mut raw, CHUNK_IMAGE, payload);
        push_chunk(&mut raw, CHUNK_TIMESTAMP, &timestamp.to_le_bytes());
        if let Some(extra) = extra {
            push_chunk(&mut raw, 42, extra);
        }
        push_chunk(&mut raw, CHUNK_FRAME_INFO, &info);
        raw
    }

    fn frame_info(pixel_type: u8, width: u16, height: u16) -> [u8; 8] {
        let w = width.to_le_bytes();
        let h = height.to_le_bytes();
        [0, 0, 0, pixel_type, w[0], w[1], h[0], h[1]]
    }

    #[test]
    fn test_metadata_chunks_parse() {
        let values = [1u16, 2, 3, 4, 5, 6];
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let raw = metadata_frame(&payload, 0x0123_4567_89AB, frame_info(3, 3, 2), Some(b"xyz"));

        let chunks = parse_chunks(&raw).unwrap();
        let image = chunks.iter().find(|(id, _)| *id == CHUNK_IMAGE).unwrap().1;
        assert_eq!(image, &payload[..]);

        let mut g = geometry(3, 2, 2.0, 6);
        g.metadata_enabled = true;
        let (pixels, meta) = decode(&raw, &g).unwrap();
        assert_eq!(pixels.get(1, 2), Some(6));
        assert_eq!(meta.timestamp, Some(0x0123_4567_89AB));
        assert_eq!(meta.pixel_type, Some(3));
        assert_eq!(meta.size, Some((3, 2)));
        assert_eq!(meta.stride, Some(6));
        assert_eq!(meta.extra_chunks.get(&42).map(Vec::as_slice), Some(&b"xyz"[..]));
    }

    #[test]
    fn test_six_byte_frame_info() {
        let mut raw = Vec::new();
        push_chunk(&mut raw, CHUNK_IMAGE, &[9, 8]);
        push_chunk(&mut raw, CHUNK_FRAME_INFO, &[0, 5, 2, 0, 1, 0]);
        let mut g = geometry(2, 1, 1.0, 2);
        g.metadata_enabled = true;
        let (_, meta) = decode(&raw, &g).unwrap();
        assert_eq!(meta.pixel_type, Some(5));
        assert_eq!(meta.size, Some((2, 1)));
        assert_eq!(meta.timestamp, None);
    }

    #[test]
    fn test_missing_image_chunk() {
        let mut raw = Vec::new();
        push_chunk(&mut raw, CHUNK_TIMESTAMP, &7u64.to_le_bytes());
        let mut g = geometry(2, 1, 1.0, 2);
        g.metadata_enabled = true;
        assert!(matches!(
            decode(&raw, &g).unwrap_err(),
            AndorError::MissingImageData
        ));
    }

    #[test]
    fn test_truncated_chunk_is_malformed() {
        let mut raw = vec![1, 2, 3];
        raw.extend(0u32.to_le_bytes());
        raw.extend(100u32.to_le_bytes());
        assert!(matches!(
            parse_chunks(&raw).unwrap_err(),
            AndorError::MalformedMetadata { .. }
        ));
    }
}
