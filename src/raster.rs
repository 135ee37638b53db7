//! PWG raster streams
//!
//! The standard container for rasterized print pages (PWG 5102.4): a
//! 4-byte sync word, then for each page a 1796-byte header followed by
//! the run-length encoded pixel data.  Apple's URF container is handled
//! by the same reader here; the front-end normalizes it before spooling.
//!
//! Only the header fields the service consumes are modelled; everything
//! else is preserved as zero padding on write and skipped on read.

use std::io::{Read, Write};

use crate::error::RasterError;

/// Sync word for big-endian PWG raster streams
pub const SYNC_BE: &[u8; 4] = b"RaS2";
/// Sync word for little-endian streams
pub const SYNC_LE: &[u8; 4] = b"2SaR";

const HEADER_LEN: usize = 1796;

// Byte offsets of the header fields we use (PWG 5102.4 layout).
const OFS_HW_RESOLUTION: usize = 276;
const OFS_NUM_COPIES: usize = 340;
const OFS_PAGE_SIZE: usize = 352;
const OFS_WIDTH: usize = 372;
const OFS_HEIGHT: usize = 376;
const OFS_BITS_PER_COLOR: usize = 384;
const OFS_BITS_PER_PIXEL: usize = 388;
const OFS_BYTES_PER_LINE: usize = 392;
const OFS_COLOR_ORDER: usize = 396;
const OFS_COLOR_SPACE: usize = 400;
const OFS_NUM_COLORS: usize = 420;
const OFS_TOTAL_PAGE_COUNT: usize = 452;
const OFS_IMAGE_BOX_LEFT: usize = 464;
const OFS_IMAGE_BOX_TOP: usize = 468;
const OFS_IMAGE_BOX_RIGHT: usize = 472;
const OFS_IMAGE_BOX_BOTTOM: usize = 476;

/// Color spaces we understand (PWG raster / CUPS encoding)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorSpace {
    /// Device gray, white = 255
    Gray,
    /// Device RGB
    Rgb,
    /// Device black, black = 255
    Black,
    /// sGray (gamma 2.2 grayscale), white = 255
    SGray,
    /// sRGB
    SRgb,
    /// Adobe RGB
    AdobeRgb,
}

impl ColorSpace {
    /// Whether 255 means paper in this space
    pub fn is_white_based(self) -> bool {
        !matches!(self, ColorSpace::Black)
    }

    fn from_wire(v: u32) -> Result<ColorSpace, RasterError> {
        match v {
            0 => Ok(ColorSpace::Gray),
            1 => Ok(ColorSpace::Rgb),
            3 => Ok(ColorSpace::Black),
            18 => Ok(ColorSpace::SGray),
            19 => Ok(ColorSpace::SRgb),
            20 => Ok(ColorSpace::AdobeRgb),
            other => Err(RasterError::BadHeader(format!("color space {other}"))),
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            ColorSpace::Gray => 0,
            ColorSpace::Rgb => 1,
            ColorSpace::Black => 3,
            ColorSpace::SGray => 18,
            ColorSpace::SRgb => 19,
            ColorSpace::AdobeRgb => 20,
        }
    }
}

/// The imageable region of a page, in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageBox {
    /// First addressable column
    pub left: u32,
    /// First addressable row
    pub top: u32,
    /// Column one past the last addressable one
    pub right: u32,
    /// Row one past the last addressable one
    pub bottom: u32,
}

/// A PWG raster page header, reduced to the fields the service consumes
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PageHeader {
    /// Page width in pixels
    pub width: u32,
    /// Page height in pixels
    pub height: u32,
    /// Bits per color channel (1 or 8)
    pub bits_per_color: u32,
    /// Bits per pixel (1 or 8 here)
    pub bits_per_pixel: u32,
    /// Bytes per uncompressed line
    pub bytes_per_line: u32,
    /// Color order (0 = chunky, the only order supported)
    pub color_order: u32,
    /// Color space of the pixel data
    pub color_space: ColorSpace,
    /// Number of color channels
    pub num_colors: u32,
    /// Horizontal resolution in dots per inch
    pub x_resolution: u32,
    /// Vertical resolution in dots per inch
    pub y_resolution: u32,
    /// Copies requested for this page
    pub num_copies: u32,
    /// Total pages in the job, 0 when unknown
    pub total_page_count: u32,
    /// Page size in points (width, length)
    pub page_size: (u32, u32),
    /// Imageable region
    pub image_box: ImageBox,
}

impl PageHeader {
    /// Build the canonical 1-bit black header the codecs consume
    pub fn for_bilevel(width: u32, height: u32, x_resolution: u32, y_resolution: u32) -> PageHeader {
        PageHeader {
            width,
            height,
            bits_per_color: 1,
            bits_per_pixel: 1,
            bytes_per_line: (width + 7) / 8,
            color_order: 0,
            color_space: ColorSpace::Black,
            num_colors: 1,
            x_resolution,
            y_resolution,
            num_copies: 1,
            total_page_count: 0,
            page_size: (width * 72 / x_resolution.max(1), height * 72 / y_resolution.max(1)),
            image_box: ImageBox {
                left: 0,
                top: 0,
                right: width,
                bottom: height,
            },
        }
    }

    /// Bytes per pixel value in the RLE stream (1 for sub-byte depths)
    fn value_len(&self) -> usize {
        ((self.bits_per_pixel as usize) / 8).max(1)
    }

    fn parse(buf: &[u8; HEADER_LEN], big_endian: bool) -> Result<PageHeader, RasterError> {
        let u32_at = |ofs: usize| -> u32 {
            let bytes: [u8; 4] = buf[ofs..ofs + 4].try_into().unwrap_or_default();
            if big_endian {
                u32::from_be_bytes(bytes)
            } else {
                u32::from_le_bytes(bytes)
            }
        };

        let header = PageHeader {
            width: u32_at(OFS_WIDTH),
            height: u32_at(OFS_HEIGHT),
            bits_per_color: u32_at(OFS_BITS_PER_COLOR),
            bits_per_pixel: u32_at(OFS_BITS_PER_PIXEL),
            bytes_per_line: u32_at(OFS_BYTES_PER_LINE),
            color_order: u32_at(OFS_COLOR_ORDER),
            color_space: ColorSpace::from_wire(u32_at(OFS_COLOR_SPACE))?,
            num_colors: u32_at(OFS_NUM_COLORS),
            x_resolution: u32_at(OFS_HW_RESOLUTION),
            y_resolution: u32_at(OFS_HW_RESOLUTION + 4),
            num_copies: u32_at(OFS_NUM_COPIES),
            total_page_count: u32_at(OFS_TOTAL_PAGE_COUNT),
            page_size: (u32_at(OFS_PAGE_SIZE), u32_at(OFS_PAGE_SIZE + 4)),
            image_box: ImageBox {
                left: u32_at(OFS_IMAGE_BOX_LEFT),
                top: u32_at(OFS_IMAGE_BOX_TOP),
                right: u32_at(OFS_IMAGE_BOX_RIGHT),
                bottom: u32_at(OFS_IMAGE_BOX_BOTTOM),
            },
        };

        if header.width == 0 || header.height == 0 {
            return Err(RasterError::BadHeader("zero page dimensions".into()));
        }
        if header.color_order != 0 {
            return Err(RasterError::BadHeader("banded color order".into()));
        }
        if !matches!(header.bits_per_pixel, 1 | 8) {
            return Err(RasterError::BadHeader(format!(
                "{} bits per pixel",
                header.bits_per_pixel
            )));
        }
        let min_line = (header.width as usize * header.bits_per_pixel as usize + 7) / 8;
        if (header.bytes_per_line as usize) < min_line {
            return Err(RasterError::BadHeader("bytes-per-line too small".into()));
        }

        Ok(header)
    }

    fn serialize(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..9].copy_from_slice(b"PwgRaster");

        let mut put = |ofs: usize, v: u32| {
            buf[ofs..ofs + 4].copy_from_slice(&v.to_be_bytes());
        };

        put(OFS_HW_RESOLUTION, self.x_resolution);
        put(OFS_HW_RESOLUTION + 4, self.y_resolution);
        put(OFS_NUM_COPIES, self.num_copies);
        put(OFS_PAGE_SIZE, self.page_size.0);
        put(OFS_PAGE_SIZE + 4, self.page_size.1);
        put(OFS_WIDTH, self.width);
        put(OFS_HEIGHT, self.height);
        put(OFS_BITS_PER_COLOR, self.bits_per_color);
        put(OFS_BITS_PER_PIXEL, self.bits_per_pixel);
        put(OFS_BYTES_PER_LINE, self.bytes_per_line);
        put(OFS_COLOR_ORDER, self.color_order);
        put(OFS_COLOR_SPACE, self.color_space.to_wire());
        put(OFS_NUM_COLORS, self.num_colors);
        put(OFS_TOTAL_PAGE_COUNT, self.total_page_count);
        put(OFS_IMAGE_BOX_LEFT, self.image_box.left);
        put(OFS_IMAGE_BOX_TOP, self.image_box.top);
        put(OFS_IMAGE_BOX_RIGHT, self.image_box.right);
        put(OFS_IMAGE_BOX_BOTTOM, self.image_box.bottom);

        buf
    }
}

/// Streaming PWG raster reader
#[derive(custom_debug::Debug)]
pub struct RasterReader<R: Read> {
    #[debug(skip)]
    source: R,
    big_endian: bool,
    header: Option<PageHeader>,
    /// Decoded line pending from a line-repeat group
    pending: Vec<u8>,
    pending_repeats: u32,
    lines_left: u32,
}

impl<R: Read> RasterReader<R> {
    /// Open a raster stream, validating the sync word
    pub fn new(mut source: R) -> Result<RasterReader<R>, RasterError> {
        let mut sync = [0u8; 4];
        source.read_exact(&mut sync)?;
        let big_endian = match &sync {
            SYNC_BE => true,
            SYNC_LE => false,
            _ => return Err(RasterError::BadSync(u32::from_be_bytes(sync))),
        };

        Ok(RasterReader {
            source,
            big_endian,
            header: None,
            pending: Vec::new(),
            pending_repeats: 0,
            lines_left: 0,
        })
    }

    /// Read the next page header, or `None` at end of stream
    pub fn next_page(&mut self) -> Result<Option<PageHeader>, RasterError> {
        // Drain any unread lines of the previous page first.
        let mut scratch = vec![0u8; self.header.as_ref().map_or(0, |h| h.bytes_per_line as usize)];
        while self.lines_left > 0 {
            self.read_line(&mut scratch)?;
        }

        let mut buf = [0u8; HEADER_LEN];
        match self.source.read_exact(&mut buf[..1]) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        self.source.read_exact(&mut buf[1..])?;

        let header = PageHeader::parse(&buf, self.big_endian)?;
        self.lines_left = header.height;
        self.pending.clear();
        self.pending.resize(header.bytes_per_line as usize, 0);
        self.pending_repeats = 0;
        self.header = Some(header.clone());
        Ok(Some(header))
    }

    /// Decode the next scanline of the current page into `line`
    ///
    /// `line` must be at least `bytes_per_line` long.
    pub fn read_line(&mut self, line: &mut [u8]) -> Result<(), RasterError> {
        let header = self
            .header
            .clone()
            .ok_or_else(|| RasterError::BadData("no current page".into()))?;
        if self.lines_left == 0 {
            return Err(RasterError::BadData("read past end of page".into()));
        }
        let width = header.bytes_per_line as usize;

        if self.pending_repeats == 0 {
            // New line group: repeat octet, then packed values.
            let mut repeat = [0u8; 1];
            self.source.read_exact(&mut repeat)?;
            self.pending_repeats = u32::from(repeat[0]) + 1;

            let value_len = header.value_len();
            let mut filled = 0usize;
            while filled < width {
                let mut control = [0u8; 1];
                self.source.read_exact(&mut control)?;
                let control = control[0];

                if control < 0x80 {
                    // One value repeated control+1 times.
                    let count = usize::from(control) + 1;
                    let mut value = vec![0u8; value_len];
                    self.source.read_exact(&mut value)?;
                    for _ in 0..count {
                        if filled + value_len > width {
                            return Err(RasterError::BadData("line overflow".into()));
                        }
                        self.pending[filled..filled + value_len].copy_from_slice(&value);
                        filled += value_len;
                    }
                } else {
                    // 257 - control literal values.
                    let count = 257 - usize::from(control);
                    let bytes = count * value_len;
                    if filled + bytes > width {
                        return Err(RasterError::BadData("line overflow".into()));
                    }
                    self.source.read_exact(&mut self.pending[filled..filled + bytes])?;
                    filled += bytes;
                }
            }
        }

        line[..width].copy_from_slice(&self.pending);
        self.pending_repeats -= 1;
        self.lines_left -= 1;

        // A repeat group may not cross the end of the page.
        if self.lines_left == 0 && self.pending_repeats > 0 {
            return Err(RasterError::BadData("line repeat crosses page end".into()));
        }

        Ok(())
    }

    /// Remaining undelivered lines in the current page
    pub fn lines_left(&self) -> u32 {
        self.lines_left
    }
}

/// Streaming PWG raster writer (big-endian)
pub struct RasterWriter<W: Write> {
    sink: W,
    started: bool,
    line_width: usize,
}

impl<W: Write> RasterWriter<W> {
    /// Create a writer; the sync word is emitted with the first header
    pub fn new(sink: W) -> RasterWriter<W> {
        RasterWriter {
            sink,
            started: false,
            line_width: 0,
        }
    }

    /// Begin a new page
    pub fn write_header(&mut self, header: &PageHeader) -> Result<(), RasterError> {
        if !self.started {
            self.sink.write_all(SYNC_BE)?;
            self.started = true;
        }
        self.sink.write_all(&header.serialize())?;
        self.line_width = header.bytes_per_line as usize;
        Ok(())
    }

    /// Encode one scanline
    pub fn write_line(&mut self, line: &[u8]) -> Result<(), RasterError> {
        if line.len() < self.line_width {
            return Err(RasterError::BadData("short line".into()));
        }
        let line = &line[..self.line_width];

        // Single-line group, then byte-wise runs and literals.
        self.sink.write_all(&[0])?;

        let mut pos = 0usize;
        while pos < line.len() {
            let mut run = 1usize;
            while pos + run < line.len() && line[pos + run] == line[pos] && run < 128 {
                run += 1;
            }

            if run >= 2 {
                self.sink.write_all(&[(run - 1) as u8, line[pos]])?;
                pos += run;
            } else {
                // Gather a literal up to the next run or 128 bytes.
                let start = pos;
                pos += 1;
                while pos < line.len()
                    && pos - start < 128
                    && !(pos + 1 < line.len() && line[pos] == line[pos + 1])
                {
                    pos += 1;
                }
                let n = pos - start;
                if n == 1 {
                    // A lone value is cheapest as a repeat of one.
                    self.sink.write_all(&[0, line[start]])?;
                } else {
                    self.sink.write_all(&[(257 - n) as u8])?;
                    self.sink.write_all(&line[start..pos])?;
                }
            }
        }

        Ok(())
    }

    /// Flush the underlying sink
    pub fn finish(&mut self) -> Result<(), RasterError> {
        self.sink.flush()?;
        Ok(())
    }
}
