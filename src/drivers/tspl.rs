//! TSC TSPL driver
//!
//! The page is configured with `SIZE`/`DIRECTION`/`DENSITY`/`SPEED`,
//! cleared with `CLS`, and downloaded as one uncompressed `BITMAP`
//! block whose rows stream through `write_line`.  `PRINT` ejects.  As
//! with EPL2, a set bit in the bitmap means blank paper.

use crate::device::Device;
use crate::error::JobError;
use crate::options::{JobOptions, Orientation};

use super::{Codec, Driver, DriverMedia, MediaTracking, MediaTrackings};

static TSPL_MEDIA: &[&str] = &[
    "oe_1.25x0.25-label_1.25x0.25in",
    "oe_1.25x2.25-label_1.25x2.25in",
    "oe_1.5x0.25-label_1.5x0.25in",
    "oe_1.5x0.5-label_1.5x0.5in",
    "oe_1.5x1-label_1.5x1in",
    "oe_1.5x2-label_1.5x2in",
    "oe_2x0.37-label_2x0.37in",
    "oe_2x0.5-label_2x0.5in",
    "oe_2x1-label_2x1in",
    "oe_2x1.25-label_2x1.25in",
    "oe_2x2-label_2x2in",
    "oe_2x3-label_2x3in",
    "oe_2x4-label_2x4in",
    "oe_2x5.5-label_2x5.5in",
    "oe_2.25x0.5-label_2.25x0.5in",
    "oe_2.25x1.25-label_2.25x1.25in",
    "oe_30859-paint-can-label_2.25x3.125in",
    "oe_2.25x4-label_2.25x4in",
    "oe_2.25x5.5-label_2.25x5.5in",
    "oe_2.38x5.5-label_2.38x5.5in",
    "oe_2.5x1-label_2.5x1in",
    "oe_2.5x2-label_2.5x2in",
    "oe_2.75x1.25-label_2.75x1.25in",
    "oe_2.9x1-label_2.9x1in",
    "oe_3x1-label_3x1in",
    "oe_3x1.25-label_3x1.25in",
    "oe_3x2-label_3x2in",
    "oe_3x3-label_3x3in",
    "na_index-3x5_3x5in",
    "oe_3.25x2-label_3.25x2in",
    "oe_3.25x5-label_3.25x5in",
    "oe_3.25x5.5-label_3.25x5.5in",
    "oe_3.25x5.83-label_3.25x5.83in",
    "oe_3.25x7.83-label_3.25x7.83in",
    "oe_3.5x1-label_3.5x1in",
    "oe_4x1-label_4x1in",
    "oe_4x2-label_4x2in",
    "oe_4x3-label_4x3in",
    "oe_4x4-label_4x4in",
    "oe_4x5-label_4x5in",
    "na_index-4x6_4x6in",
    "oe_4x6.5-label_4x6.5in",
    "oe_4x8-label_4x8in",
    "oe_4x13-label_4x13in",
    "roll_max_4x39.6in",
    "roll_min_0.75x0.25in",
];

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "application/vnd.tsc-tspl";

    let dpi = if driver.name.contains("_300dpi") { 300 } else { 203 };
    driver.resolutions = vec![(dpi, dpi)];

    driver.left_right = 1;
    driver.bottom_top = 1;
    driver.media = TSPL_MEDIA;
    driver.media_default = DriverMedia {
        size_name: "na_index-4x6_4x6in",
        media_type: "labels",
        tracking: MediaTracking::Gap,
    };
    driver.tracking_supported = MediaTrackings::CONTINUOUS | MediaTrackings::GAP | MediaTrackings::MARK;
    driver.darkness_configured = 50;
    driver.darkness_levels = 16;
}

/// Per-job TSPL state
pub(crate) struct TsplCodec;

impl TsplCodec {
    pub(crate) fn new() -> TsplCodec {
        TsplCodec
    }
}

impl Codec for TsplCodec {
    fn start_job(&mut self, _options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        Ok(())
    }

    fn start_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        let header = &options.header;
        let darkness = options.darkness();
        let speed = (options.print_speed / 2540).max(1);

        device.printf(format_args!(
            "SIZE {} mm,{} mm\n",
            options.media.size_width / 100,
            options.media.size_length / 100
        ))?;

        let rotation = match options.orientation {
            Orientation::Portrait => 0,
            Orientation::Landscape => 90,
            Orientation::ReversePortrait => 180,
            Orientation::ReverseLandscape => 270,
        };
        device.printf(format_args!("DIRECTION {rotation},0\n"))?;

        device.printf(format_args!("DENSITY {}\n", (darkness * 15 + 50) / 100))?;
        device.printf(format_args!("SPEED {speed}\n"))?;

        // Start the page image...
        device.puts("CLS\n")?;
        device.printf(format_args!(
            "BITMAP 0,0,{},{},1,",
            header.bytes_per_line, header.height
        ))?;

        Ok(())
    }

    fn write_line(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _y: u32,
        line: &[u8],
    ) -> Result<(), JobError> {
        device.write_all(&line[..options.header.bytes_per_line as usize])?;
        Ok(())
    }

    fn end_page(
        &mut self,
        _options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        // One print per page: copies are rendered as separate pages by
        // the pipeline.
        device.puts("\nPRINT 1,1\n")?;
        device.flush()?;
        Ok(())
    }

    fn end_job(&mut self, _options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        Ok(())
    }

    fn blank_byte(&self) -> u8 {
        0xff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::MemoryTransport;
    use crate::options::{AttrTable, AttrValue, JobOptions};

    #[test]
    fn full_page_stream() {
        let driver = Driver::new("tspl_203dpi").unwrap();
        let job = AttrTable::new()
            .with("media", AttrValue::Keyword("oe_2x1-label_2x1in".into()))
            .with("print-speed", AttrValue::Integer(4 * 2540));
        let options = JobOptions::prepare(&job, &AttrTable::new(), &driver, 1);

        let (mut device, written) = MemoryTransport::device();
        let mut codec = TsplCodec::new();
        codec.start_page(&options, &mut device, 0).unwrap();

        let width = options.header.bytes_per_line as usize;
        let line = vec![0x55u8; width];
        for y in 0..options.header.height {
            codec.write_line(&options, &mut device, y, &line).unwrap();
        }
        codec.end_page(&options, &mut device, 0).unwrap();

        let out = written.lock().unwrap().clone();
        let expected_prefix = format!(
            "SIZE 50 mm,25 mm\nDIRECTION 0,0\nDENSITY 8\nSPEED 4\nCLS\nBITMAP 0,0,{},{},1,",
            width, options.header.height
        );
        assert!(out.starts_with(expected_prefix.as_bytes()));

        let data = &out[expected_prefix.len()..];
        let bitmap_len = width * options.header.height as usize;
        assert_eq!(&data[..bitmap_len], &vec![0x55u8; bitmap_len][..]);
        assert_eq!(&data[bitmap_len..], b"\nPRINT 1,1\n");
    }
}
