//! PWG raster passthrough driver
//!
//! A virtual printer used for testing the pipeline: instead of device
//! I/O, pages are re-encoded as a PWG raster stream next to the job's
//! spool file.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use tracing::debug;

use crate::device::Device;
use crate::error::JobError;
use crate::options::JobOptions;
use crate::raster::RasterWriter;

use super::{Codec, Driver, DriverMedia, MediaTracking, MediaTrackings};

static PWG_2INCH_MEDIA: &[&str] = &[
    "oe_address-label_1.25x3.5in",
    "oe_lg-address-label_1.4x3.5in",
    "oe_multipurpose-label_2x2.3125in",
    "roll_max_2x3600in",
    "roll_min_0.25x0.25in",
];

static PWG_4INCH_MEDIA: &[&str] = &[
    "oe_address-label_1.25x3.5in",
    "oe_lg-address-label_1.4x3.5in",
    "oe_multipurpose-label_2x2.3125in",
    "oe_xl-shipping-label_4x6in",
    "roll_max_4x3600in",
    "roll_min_0.25x0.25in",
];

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "image/pwg-raster";
    driver.resolutions = vec![(203, 203), (300, 300)];
    driver.left_right = 1;
    driver.bottom_top = 1;

    if driver.name == "pwg_2inch" {
        driver.media = PWG_2INCH_MEDIA;
    } else {
        driver.media = PWG_4INCH_MEDIA;
    }
    driver.media_default = DriverMedia {
        size_name: "oe_address-label_1.25x3.5in",
        media_type: "labels",
        tracking: MediaTracking::Web,
    };

    driver.sources = &["main-roll", "alternate-roll"];
    driver.media_types = &["continuous", "labels"];
    driver.tracking_supported = MediaTrackings::CONTINUOUS | MediaTrackings::WEB;
}

/// Per-job passthrough state
pub(crate) struct PwgCodec {
    writer: Option<RasterWriter<Box<dyn Write + Send>>>,
}

impl PwgCodec {
    pub(crate) fn new() -> PwgCodec {
        PwgCodec { writer: None }
    }
}

impl Codec for PwgCodec {
    fn start_job(&mut self, options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        let sink: Box<dyn Write + Send> = match &options.output_path {
            Some(path) => {
                debug!(path = %path.display(), "writing raster output");
                Box::new(BufWriter::new(File::create(path).map_err(JobError::spool)?))
            }
            None => Box::new(io::sink()),
        };
        self.writer = Some(RasterWriter::new(sink));
        Ok(())
    }

    fn start_page(
        &mut self,
        options: &JobOptions,
        _device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_header(&options.header)?;
        }
        Ok(())
    }

    fn write_line(
        &mut self,
        _options: &JobOptions,
        _device: &mut Device,
        _y: u32,
        line: &[u8],
    ) -> Result<(), JobError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_line(line)?;
        }
        Ok(())
    }

    fn end_page(
        &mut self,
        _options: &JobOptions,
        _device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        Ok(())
    }

    fn end_job(&mut self, _options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        if let Some(mut writer) = self.writer.take() {
            writer.finish()?;
        }
        Ok(())
    }
}
