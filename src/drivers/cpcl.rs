//! CPCL driver for HPRT and other mobile label printers
//!
//! A page is one CPCL command session: the `!` header with resolution,
//! height and copies, the page geometry, and a full-page `BITMAP`
//! download, closed by presenter/darkness/speed options and `PRINT`.
//! CPCL bitmaps use 1 = blank, like EPL2.

use crate::device::Device;
use crate::error::JobError;
use crate::options::JobOptions;

use super::{Codec, Driver, DriverMedia, MediaTracking, MediaTrackings};

static CPCL_MEDIA: &[&str] = &[
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
    "oe_3x5-label_3x5in",
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
    "oe_4x6-label_4x6in",
    "oe_4x6.5-label_4x6.5in",
    "oe_4x7.83-label_4x7.83in",
    "oe_4x13-label_4x13in",
    "roll_max_4x50in",
    "roll_min_1.25x0.25in",
];

static HMA300E_MEDIA: &[&str] = &["roll_max_80x1000mm", "roll_min_25x25mm"];

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "application/vnd.cpcl";

    let dpi = if driver.name.contains("-300dpi") { 300 } else { 203 };
    driver.resolutions = vec![(dpi, dpi)];

    // Every supported CPCL printer has a tear bar or cutter.
    driver.cut_labels = true;

    if driver.name.starts_with("cpcl_hma300e") {
        driver.media = HMA300E_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "om_main-roll_80x150mm",
            media_type: "continuous",
            tracking: MediaTracking::Continuous,
        };
    } else {
        driver.media = CPCL_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "oe_4x6-label_4x6in",
            media_type: "labels",
            tracking: MediaTracking::Gap,
        };
    }

    driver.left_right = 1;
    driver.bottom_top = 1;
    driver.media_types = &["continuous", "labels", "labels-continuous"];
    driver.tracking_supported =
        MediaTrackings::CONTINUOUS | MediaTrackings::MARK | MediaTrackings::WEB;
    driver.tear_offset_supported = (-1500, 1500);
    driver.speed_supported = (2540, 4 * 2540);
    driver.darkness_configured = 50;
    driver.darkness_levels = 30;
}

/// Per-job CPCL state
pub(crate) struct CpclCodec {
    cut: bool,
}

impl CpclCodec {
    pub(crate) fn new(driver: &Driver) -> CpclCodec {
        CpclCodec {
            cut: driver.cut_labels,
        }
    }
}

impl Codec for CpclCodec {
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

        // One print per session: copies are rendered as separate pages
        // by the pipeline.
        device.printf(format_args!(
            "! 0 {} {} {} 1\r\n",
            header.x_resolution, header.y_resolution, header.height
        ))?;
        device.printf(format_args!("PAGE-WIDTH {}\r\n", header.width))?;
        device.printf(format_args!("PAGE-HEIGHT {}\r\n", header.height))?;

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
        options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        let header = &options.header;

        device.printf(format_args!(
            "\r\nPRESENT-AT {} 4\r\n",
            options.media.top_offset * header.y_resolution as i32 / 2540
        ))?;

        device.printf(format_args!("TONE {}\r\n", 2 * options.darkness()))?;

        if options.print_speed > 0 {
            device.printf(format_args!(
                "SPEED {}\r\n",
                5 * options.print_speed / (4 * 2540)
            ))?;
        }

        if self.cut {
            device.puts("CUT\r\n")?;
        }

        // Continuous media never form-feeds to a mark.
        let mut tracking = options.media.tracking;
        if !options.media.media_type.is_empty() && options.media.media_type != "labels" {
            tracking = Some(MediaTracking::Continuous);
        }
        if tracking != Some(MediaTracking::Continuous) {
            device.puts("FORM\r\n")?;
        }

        device.puts("PRINT\r\n")?;
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
