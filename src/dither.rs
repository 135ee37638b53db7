//! Ordered dithering with run detection
//!
//! Converts multi-bit grayscale scanlines into packed 1-bit output using
//! a gamma-corrected 16×16 threshold matrix.  Areas that border fully
//! saturated runs are thresholded instead of dithered so text and
//! barcode edges stay crisp.
//!
//! The engine keeps a ring of four input lines because dithering line
//! `y` inspects its vertical neighbours: the call for line `y` emits the
//! output for line `y - 1`.  Callers must feed lines in increasing `y`
//! and issue one final call with `y` equal to the page height to flush
//! the last line.

use crate::error::JobError;
use crate::raster::PageHeader;

/// Sanity cap on line widths; guards the buffer allocations below.
const MAX_LINE: usize = 65536;

/// Classic 16×16 clustered-dot matrix, used for `bi-level` output where
/// text and barcodes must stay solid.
#[rustfmt::skip]
pub const DITHER_CLUSTERED: [[u8; 16]; 16] = [
    [  96,  40,  48, 104, 140, 188, 196, 148,  97,  41,  49, 105, 141, 189, 197, 149 ],
    [  32,   0,   8,  56, 180, 236, 244, 204,  33,   1,   9,  57, 181, 237, 245, 205 ],
    [  88,  24,  16,  64, 172, 228, 252, 212,  89,  25,  17,  65, 173, 229, 253, 213 ],
    [ 120,  80,  72, 112, 132, 164, 220, 156, 121,  81,  73, 113, 133, 165, 221, 157 ],
    [ 136, 184, 192, 144, 100,  44,  52, 108, 137, 185, 193, 145, 101,  45,  53, 109 ],
    [ 176, 232, 240, 200,  36,   4,  12,  60, 177, 233, 241, 201,  37,   5,  13,  61 ],
    [ 168, 224, 248, 208,  92,  28,  20,  68, 169, 225, 249, 209,  93,  29,  21,  69 ],
    [ 128, 160, 216, 152, 124,  84,  76, 116, 129, 161, 217, 153, 125,  85,  77, 117 ],
    [  98,  42,  50, 106, 142, 190, 198, 150,  99,  43,  51, 107, 143, 191, 199, 151 ],
    [  34,   2,  10,  58, 182, 238, 246, 206,  35,   3,  11,  59, 183, 239, 247, 207 ],
    [  90,  26,  18,  66, 174, 230, 254, 214,  91,  27,  19,  67, 175, 231, 255, 215 ],
    [ 122,  82,  74, 114, 134, 166, 222, 158, 123,  83,  75, 115, 135, 167, 223, 159 ],
    [ 138, 186, 194, 146, 102,  46,  54, 110, 139, 187, 195, 147, 103,  47,  55, 111 ],
    [ 178, 234, 242, 202,  38,   6,  14,  62, 179, 235, 243, 203,  39,   7,  15,  63 ],
    [ 170, 226, 250, 210,  94,  30,  22,  70, 171, 227, 251, 211,  95,  31,  23,  71 ],
    [ 130, 162, 218, 154, 126,  86,  78, 118, 131, 163, 219, 155, 127,  87,  79, 119 ],
];

/// 16×16 dispersed (Bayer) matrix, used for photographic content.
#[rustfmt::skip]
pub const DITHER_DISPERSED: [[u8; 16]; 16] = [
    [   0, 128,  32, 160,   8, 136,  40, 168,   2, 130,  34, 162,  10, 138,  42, 170 ],
    [ 192,  64, 224,  96, 200,  72, 232, 104, 194,  66, 226,  98, 202,  74, 234, 106 ],
    [  48, 176,  16, 144,  56, 184,  24, 152,  50, 178,  18, 146,  58, 186,  26, 154 ],
    [ 240, 112, 208,  80, 248, 120, 216,  88, 242, 114, 210,  82, 250, 122, 218,  90 ],
    [  12, 140,  44, 172,   4, 132,  36, 164,  14, 142,  46, 174,   6, 134,  38, 166 ],
    [ 204,  76, 236, 108, 196,  68, 228, 100, 206,  78, 238, 110, 198,  70, 230, 102 ],
    [  60, 188,  28, 156,  52, 180,  20, 148,  62, 190,  30, 158,  54, 182,  22, 150 ],
    [ 252, 124, 220,  92, 244, 116, 212,  84, 254, 126, 222,  94, 246, 118, 214,  86 ],
    [   3, 131,  35, 163,  11, 139,  43, 171,   1, 129,  33, 161,   9, 137,  41, 169 ],
    [ 195,  67, 227,  99, 203,  75, 235, 107, 193,  65, 225,  97, 201,  73, 233, 105 ],
    [  51, 179,  19, 147,  59, 187,  27, 155,  49, 177,  17, 145,  57, 185,  25, 153 ],
    [ 243, 115, 211,  83, 251, 123, 219,  91, 241, 113, 209,  81, 249, 121, 217,  89 ],
    [  15, 143,  47, 175,   7, 135,  39, 167,  13, 141,  45, 173,   5, 133,  37, 165 ],
    [ 207,  79, 239, 111, 199,  71, 231, 103, 205,  77, 237, 109, 197,  69, 229, 101 ],
    [  63, 191,  31, 159,  55, 183,  23, 151,  61, 189,  29, 157,  53, 181,  21, 149 ],
    [ 255, 127, 223,  95, 247, 119, 215,  87, 253, 125, 221,  93, 245, 117, 213,  85 ],
];

/// One input pixel plus the length of the identical-value run that
/// begins at it (capped at 255, 0 for isolated pixels).
#[derive(Debug, Clone, Copy, Default)]
struct Pixel {
    value: u8,
    count: u8,
}

/// Per-job dithering state
#[derive(custom_debug::Debug)]
pub struct DitherBuffer {
    /// Gamma-corrected matrix, all cells in `16..=239`
    #[debug(skip)]
    matrix: [[u8; 16]; 16],
    left: u32,
    top: u32,
    bottom: u32,
    in_width: usize,
    out_width: usize,
    in_bpp: u32,
    in_white: bool,
    out_white: u8,
    #[debug(skip)]
    input: [Vec<Pixel>; 4],
    #[debug(skip)]
    output: Vec<u8>,
}

impl DitherBuffer {
    /// Set up dithering for one page
    ///
    /// `matrix` is the raw 16×16 array selected by `print-color-mode`;
    /// `out_header` is the derived job header carrying the imageable
    /// box, `in_header` describes the incoming raster, `out_white` is
    /// the codec's paper byte (0x00 for black-is-one wire formats, 0xFF
    /// for white-is-one ones) and `out_gamma` the codec's output gamma.
    pub fn new(
        matrix: &[[u8; 16]; 16],
        out_header: &PageHeader,
        in_header: &PageHeader,
        out_white: u8,
        out_gamma: f64,
    ) -> Result<DitherBuffer, JobError> {
        // Gamma-adjust and compress the matrix into 16..=239 so pure
        // white and pure black never dither into noise.
        let mut adjusted = [[0u8; 16]; 16];
        for (row, src_row) in adjusted.iter_mut().zip(matrix.iter()) {
            for (cell, &src) in row.iter_mut().zip(src_row.iter()) {
                *cell = (223.0 * (f64::from(src) / 255.0).powf(out_gamma)).round() as u8 + 16;
            }
        }

        let left = out_header.image_box.left;
        let right = out_header.image_box.right;
        let out_width = ((right - left) as usize + 7) / 8;
        let in_width = if right <= in_header.width {
            (right - left) as usize
        } else {
            in_header.width.saturating_sub(left) as usize
        };

        if in_width == 0 || in_width > MAX_LINE || out_width > MAX_LINE {
            return Err(JobError::ResourceExhausted(format!(
                "dither line of {in_width} pixels"
            )));
        }

        Ok(DitherBuffer {
            matrix: adjusted,
            left,
            top: out_header.image_box.top,
            bottom: out_header.image_box.bottom,
            in_width,
            out_width,
            in_bpp: in_header.bits_per_pixel,
            in_white: in_header.color_space.is_white_based(),
            out_white,
            input: std::array::from_fn(|_| vec![Pixel::default(); in_width]),
            output: vec![0; out_width],
        })
    }

    /// Output line width in bytes
    pub fn out_width(&self) -> usize {
        self.out_width
    }

    /// Byte offset of the output within a full-width device line
    pub fn out_offset(&self) -> usize {
        self.left as usize / 8
    }

    /// The packed output produced by the last successful [`line`] call
    ///
    /// [`line`]: DitherBuffer::line
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Copy and dither a scanline
    ///
    /// Stores `line` (pass `None` for the flush call at `y == height`)
    /// and emits the output for line `y - 1`.  Returns `true` when
    /// [`output`](DitherBuffer::output) holds a valid line, `false`
    /// during warm-up and outside the imageable box.
    pub fn line(&mut self, y: u32, line: Option<&[u8]>) -> bool {
        self.store(y, line);
        self.find_runs(y);

        // Outside the imageable area nothing is emitted; the 1-line lag
        // also swallows the first two calls.
        if y < self.top + 2 || y > self.bottom + 1 {
            return false;
        }

        self.emit(y);
        true
    }

    /// Copy the input line into ring slot `y & 3`, normalizing so that a
    /// stored 0 means paper and 255 means maximum ink.
    fn store(&mut self, y: u32, line: Option<&[u8]>) {
        let slot = &mut self.input[(y & 3) as usize];
        slot.fill(Pixel::default());

        let Some(line) = line else {
            return;
        };

        match self.in_bpp {
            1 => {
                let mut byte_idx = self.left as usize / 8;
                let mut bit = 128u8 >> (self.left & 7);
                for pixel in slot.iter_mut() {
                    if line.get(byte_idx).is_some_and(|b| b & bit != 0) {
                        pixel.value = 255;
                    }
                    if bit > 1 {
                        bit >>= 1;
                    } else {
                        bit = 128;
                        byte_idx += 1;
                    }
                }
            }
            8 => {
                let src = &line[self.left as usize..];
                if self.in_white {
                    // Grayscale, 255 = paper: invert with clamping.
                    for (pixel, &v) in slot.iter_mut().zip(src.iter()) {
                        pixel.value = match v {
                            0..=15 => 255,
                            240..=255 => 0,
                            _ => 255 - v,
                        };
                    }
                } else {
                    // 8-bit black, 255 = maximum ink: clamp only.
                    for (pixel, &v) in slot.iter_mut().zip(src.iter()) {
                        pixel.value = match v {
                            0..=15 => 0,
                            240..=255 => 255,
                            _ => v,
                        };
                    }
                }
            }
            _ => {}
        }
    }

    /// Tag each pixel with the length of the identical-value run that
    /// starts at it.  Isolated pixels keep count 0.
    fn find_runs(&mut self, y: u32) {
        let slot = &mut self.input[(y & 3) as usize];
        let mut x = 0;
        while x + 1 < slot.len() {
            if slot[x].value != slot[x + 1].value {
                x += 1;
                continue;
            }

            let mut length = 2;
            while x + length < slot.len() && slot[x + length].value == slot[x].value {
                length += 1;
            }

            for (i, pixel) in slot[x..x + length].iter_mut().enumerate() {
                pixel.count = (length - i).min(255) as u8;
            }
            x += length;
        }
    }

    /// Produce the packed output for line `y - 1`.
    fn emit(&mut self, y: u32) {
        let prev = &self.input[((y.wrapping_sub(2)) & 3) as usize];
        let cur = &self.input[((y.wrapping_sub(1)) & 3) as usize];
        let next = &self.input[(y & 3) as usize];
        let dline = &self.matrix[(y & 15) as usize];

        let mut out_iter = self.output.iter_mut();
        let mut byte = self.out_white;
        let mut bit = 128u8;

        for x in 0..self.in_width {
            let pixel = cur[x];
            if pixel.value == 255 {
                // 100% ink.
                byte ^= bit;
            } else if pixel.value != 0 {
                // Bordering a saturated run: threshold so edges stay
                // clean; otherwise ordered dither.
                let borders_run = (pixel.count == 0
                    && x > 0
                    && cur[x - 1].value == 255
                    && cur[x - 1].count != 0)
                    || (pixel.count == 0
                        && x + 1 < self.in_width
                        && cur[x + 1].value == 255
                        && cur[x + 1].count != 0)
                    || (prev[x].value == 255 && prev[x].count != 0)
                    || (next[x].value == 255 && next[x].count != 0);

                if borders_run {
                    if pixel.value > 127 {
                        byte ^= bit;
                    }
                } else if pixel.value > dline[x & 15] {
                    byte ^= bit;
                }
            }

            if bit > 1 {
                bit >>= 1;
            } else if let Some(out) = out_iter.next() {
                *out = byte;
                byte = self.out_white;
                bit = 128;
            }
        }

        if bit < 128 {
            if let Some(out) = out_iter.next() {
                *out = byte;
            }
        }
    }
}
