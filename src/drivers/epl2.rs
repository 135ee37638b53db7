//! Zebra EPL2 page-mode driver
//!
//! Each label is cleared with `N`, configured with density/speed/width
//! commands, and painted with one `GW` graphics write per non-blank
//! line.  In EPL2 graphics a set bit leaves the paper blank, so the
//! codec's paper byte is `0xFF`.

use crate::device::Device;
use crate::error::JobError;
use crate::options::JobOptions;

use super::{line_is_blank, Codec, Driver, DriverMedia, LabelMode, LabelModes, MediaTracking};

static EPL2_2INCH_MEDIA: &[&str] = &[
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
    "roll_max_2x100in",
    "roll_min_0.75x0.25in",
];

static EPL2_4INCH_MEDIA: &[&str] = &[
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
    "oe_4x13-label_4x13in",
    "roll_max_4x100in",
    "roll_min_0.75x0.25in",
];

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "application/vnd.zebra-epl";

    let dpi = if driver.name.contains("-300dpi") { 300 } else { 203 };
    driver.resolutions = vec![(dpi, dpi)];

    if driver.name.starts_with("epl2_2inch-") {
        driver.media = EPL2_2INCH_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "oe_2x3-label_2x3in",
            media_type: "labels",
            tracking: MediaTracking::Gap,
        };
    } else {
        driver.media = EPL2_4INCH_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "oe_4x6-label_4x6in",
            media_type: "labels",
            tracking: MediaTracking::Gap,
        };
    }

    driver.left_right = 1;
    driver.bottom_top = 1;
    driver.media_types = &["continuous", "labels", "labels-continuous"];
    driver.label_mode_configured = LabelMode::TearOff;
    driver.label_modes_supported = LabelModes::all();
    driver.speed_supported = (2540, 6 * 2540);
    driver.darkness_configured = 50;
    driver.darkness_levels = 30;
}

/// Per-job EPL2 state
pub(crate) struct Epl2Codec {
    cut: bool,
}

impl Epl2Codec {
    pub(crate) fn new(driver: &Driver) -> Epl2Codec {
        Epl2Codec {
            cut: driver.cut_labels,
        }
    }
}

impl Codec for Epl2Codec {
    fn start_job(&mut self, _options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        Ok(())
    }

    fn start_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        // Clear the label buffer...
        device.puts("\nN\n")?;

        // print-darkness
        device.printf(format_args!("D{}\n", 15 * options.darkness() / 100))?;

        // print-speed
        let ips = options.print_speed / 2540;
        if ips > 0 {
            device.printf(format_args!("S{ips}\n"))?;
        }

        // Label width in dots...
        device.printf(format_args!("q{}\n", options.header.bytes_per_line * 8))?;

        Ok(())
    }

    fn write_line(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        y: u32,
        line: &[u8],
    ) -> Result<(), JobError> {
        let width = options.header.bytes_per_line as usize;
        let line = &line[..width];

        if line_is_blank(line, self.blank_byte()) {
            return Ok(());
        }

        device.printf(format_args!("GW0,{y},{width},1\n"))?;
        device.write_all(line)?;
        device.puts("\n")?;

        Ok(())
    }

    fn end_page(
        &mut self,
        _options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        device.puts("P1\n")?;
        if self.cut {
            device.puts("C\n")?;
        }
        Ok(())
    }

    fn end_job(&mut self, _options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        Ok(())
    }

    fn blank_byte(&self) -> u8 {
        // GW data: 1 = blank, 0 = print.
        0xff
    }
}
