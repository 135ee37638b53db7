//! Zebra ZPL II driver
//!
//! Pages are downloaded as a run-length compressed hex bitmap
//! (`~DG R:LPRINT.GRF`), rendered with `^XG`, and purged afterwards.
//! The RLE alphabet: `z` stands for 400 repeats, `g`..`y` for 20..380
//! in steps of 20, `G`..`Y` for 1..19.  A line of nothing but zeroes is
//! `,`; a non-blank line equal to the previous one is `:`.
//!
//! Status comes from `~HQES`, whose error/warning words map onto
//! printer-state-reasons; `~HI` identifies the model and resolution for
//! driver auto-detection.

use tracing::{debug, error, warn};

use crate::device::Device;
use crate::error::{DeviceError, JobError};
use crate::options::JobOptions;
use crate::printer::StateReasons;

use super::{
    line_is_blank, Codec, Driver, DriverMedia, LabelMode, LabelModes, MediaTracking,
    MediaTrackings,
};

// ~HQES error word bits
const ERROR_MEDIA_OUT: u32 = 0x0000_0001;
const ERROR_RIBBON_OUT: u32 = 0x0000_0002;
const ERROR_HEAD_OPEN: u32 = 0x0000_0004;
const ERROR_CUTTER_FAULT: u32 = 0x0000_0008;
const ERROR_PAPER_JAM: u32 = 0x0000_1000;
const ERROR_PRESENTER: u32 = 0x0000_2000;
const ERROR_PAPER_FEED: u32 = 0x0000_4000;
const ERROR_CLEAR_PP_FAILED: u32 = 0x0000_8000;
const ERROR_PAUSED: u32 = 0x0001_0000;
const ERROR_RETRACT_TIMEOUT: u32 = 0x0002_0000;
const ERROR_MARK_CALIBRATE: u32 = 0x0004_0000;
const ERROR_MARK_NOT_FOUND: u32 = 0x0008_0000;

// ~HQES warning word bits
const WARNING_PAPER_ALMOST_OUT: u32 = 0x0000_0008;

static ZPL_2INCH_MEDIA: &[&str] = &[
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
    "roll_max_2x39.6in",
    "roll_min_0.75x0.25in",
];

static ZPL_4INCH_MEDIA: &[&str] = &[
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
    "oe_4x7.83-label_4x7.83in",
    "oe_4x8-label_4x8in",
    "oe_4x13-label_4x13in",
    "roll_max_4x39.6in",
    "roll_min_0.75x0.25in",
];

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "application/vnd.zebra-zpl";

    let dpi = if driver.name.contains("-300dpi") {
        300
    } else if driver.name.contains("-600dpi") {
        600
    } else {
        203
    };
    driver.resolutions = vec![(dpi, dpi)];

    if driver.name.starts_with("zpl_2inch-") {
        driver.media = ZPL_2INCH_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "oe_2x3-label_2x3in",
            media_type: "labels",
            tracking: MediaTracking::Gap,
        };
    } else {
        driver.media = ZPL_4INCH_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "na_index-4x6_4x6in",
            media_type: "labels",
            tracking: MediaTracking::Gap,
        };
    }

    driver.left_right = 1;
    driver.bottom_top = 1;
    driver.media_types = &["continuous", "labels", "labels-continuous"];
    driver.top_offset_supported = (-1500, 1500);
    driver.tracking_supported = MediaTrackings::CONTINUOUS
        | MediaTrackings::GAP
        | MediaTrackings::MARK
        | MediaTrackings::WEB;
    driver.label_mode_configured = LabelMode::TearOff;
    driver.label_modes_supported = LabelModes::all();
    driver.tear_offset_supported = (-1500, 1500);
    driver.speed_supported = (2540, 12 * 2540);
    driver.darkness_configured = 50;
    driver.darkness_levels = 30;
}

/// Emit one run of a repeated hex character
fn compress_run(out: &mut Vec<u8>, ch: u8, mut count: u32) {
    if count > 1 {
        // 'z' is the largest denomination, 400 characters.
        while count >= 400 {
            out.push(b'z');
            count -= 400;
        }

        // 'g'..'y' are multiples of 20...
        if count >= 20 {
            out.push(b'f' + (count / 20) as u8);
            count %= 20;
        }

        // ...and 'G'..'Y' are 1 through 19.
        if count > 0 {
            out.push(b'F' + count as u8);
        }
    }

    out.push(ch);
}

/// Per-job ZPL state
pub(crate) struct ZplCodec {
    thermal_transfer: bool,
    cut: bool,
    label_mode: LabelMode,
    tear_offset: i32,
    last_buffer: Vec<u8>,
    last_buffer_set: bool,
}

impl ZplCodec {
    pub(crate) fn new(driver: &Driver) -> ZplCodec {
        ZplCodec {
            thermal_transfer: driver.name.ends_with("-tt"),
            cut: driver.cut_labels,
            label_mode: driver.label_mode_configured,
            tear_offset: driver.tear_offset_configured,
            last_buffer: Vec::new(),
            last_buffer_set: false,
        }
    }
}

impl Codec for ZplCodec {
    fn start_job(&mut self, options: &JobOptions, device: &mut Device) -> Result<(), JobError> {
        // label-mode-configured
        let mode = match self.label_mode {
            LabelMode::Applicator => "^MMA,Y\n",
            LabelMode::Cutter => "^MMC,Y\n",
            LabelMode::CutterDelayed => "^MMD,Y\n",
            LabelMode::Kiosk => "^MMK,Y\n",
            LabelMode::PeelOff => "^MMP,N\n",
            LabelMode::PeelOffPrepeel => "^MMP,Y\n",
            LabelMode::Rewind => "^MMR,Y\n",
            LabelMode::Rfid => "^MMF,Y\n",
            LabelMode::TearOff => "^MMT,Y\n",
        };
        device.puts(mode)?;

        // label-tear-offset-configured
        if self.tear_offset < 0 {
            device.printf(format_args!("~TA{:04}\n", self.tear_offset))?;
        } else if self.tear_offset > 0 {
            device.printf(format_args!("~TA{:03}\n", self.tear_offset))?;
        }

        // print-darkness / printer-darkness-configured
        device.printf(format_args!("~SD{:02}\n", 30 * options.darkness() / 100))?;

        Ok(())
    }

    fn start_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        let header = &options.header;

        // print-speed
        let ips = options.print_speed / 2540;
        if ips > 0 {
            device.printf(format_args!("^PR{ips},{ips},{ips}\n"))?;
        }

        // Download the bitmap...
        let total = u64::from(header.width) * u64::from(header.height) / 8;
        device.printf(format_args!(
            "~DGR:LPRINT.GRF,{total},{},\n",
            header.bytes_per_line
        ))?;

        self.last_buffer = vec![0; header.bytes_per_line as usize];
        self.last_buffer_set = false;

        Ok(())
    }

    fn write_line(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _y: u32,
        line: &[u8],
    ) -> Result<(), JobError> {
        let width = options.header.bytes_per_line as usize;
        let line = &line[..width];

        // An all-zero line is end-of-line zeroes from the first column.
        if line_is_blank(line, 0) {
            device.puts(",")?;
            self.last_buffer[..width].copy_from_slice(line);
            self.last_buffer_set = true;
            return Ok(());
        }

        // A repeat of the previous line is just ':'.
        if self.last_buffer_set && line == &self.last_buffer[..width] {
            device.puts(":")?;
            return Ok(());
        }

        // Hex-encode, then run-length compress the hex characters.
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        let mut hex = Vec::with_capacity(2 * width);
        for &byte in line {
            hex.push(HEX[usize::from(byte >> 4)]);
            hex.push(HEX[usize::from(byte & 15)]);
        }

        let mut out = Vec::with_capacity(hex.len() + 8);
        let mut repeat_char = hex[0];
        let mut repeat_count = 1u32;
        for &ch in &hex[1..] {
            if ch == repeat_char {
                repeat_count += 1;
            } else {
                compress_run(&mut out, repeat_char, repeat_count);
                repeat_char = ch;
                repeat_count = 1;
            }
        }

        if repeat_char == b'0' {
            // Zeroes at the end of the line compress to ','.
            if repeat_count & 1 != 0 {
                repeat_count -= 1;
                out.push(b'0');
            }
            if repeat_count > 0 {
                out.push(b',');
            }
        } else {
            compress_run(&mut out, repeat_char, repeat_count);
        }

        device.write_all(&out)?;

        self.last_buffer[..width].copy_from_slice(line);
        self.last_buffer_set = true;

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
            "^XA\n^POI\n^PW{}\n^LH0,0\n^LT{}\n",
            header.width,
            options.media.top_offset * header.y_resolution as i32 / 2540
        ))?;

        // Continuous media types force continuous tracking.
        let mut tracking = options.media.tracking;
        if !options.media.media_type.is_empty() && options.media.media_type != "labels" {
            tracking = Some(MediaTracking::Continuous);
        }

        match tracking {
            Some(MediaTracking::Continuous) => {
                device.printf(format_args!("^LL{}\n^MNN\n", header.height))?;
            }
            Some(MediaTracking::Web) => device.puts("^MNY\n")?,
            Some(_) => device.puts("^MNM\n")?,
            None => {}
        }

        if self.thermal_transfer {
            device.puts("^MTT\n")?;
        } else {
            device.puts("^MTD\n")?;
        }

        // One print per page: copies are rendered as separate pages by
        // the pipeline.
        device.puts("^PQ1, 0, 0, N\n")?;
        device.puts("^FO0,0^XGR:LPRINT.GRF,1,1^FS\n^XZ\n")?;
        device.puts("^XA\n^IDR:LPRINT.GRF^FS\n^XZ\n")?;

        if self.cut {
            device.puts("^CN1\n")?;
        }

        Ok(())
    }

    fn end_job(&mut self, _options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        Ok(())
    }

    fn out_gamma(&self, x_resolution: u32) -> f64 {
        match x_resolution {
            600 => 1.44,
            300 => 1.2,
            _ => 1.0,
        }
    }
}

/// Map a `~HQES` error/warning pair onto printer-state-reasons
pub(crate) fn map_host_status(errors: u32, warnings: u32) -> StateReasons {
    let mut reasons = StateReasons::empty();

    if errors & ERROR_MEDIA_OUT != 0 {
        reasons |= StateReasons::MEDIA_EMPTY;
    }
    if errors & ERROR_PAPER_JAM != 0 {
        reasons |= StateReasons::MEDIA_JAM;
    }
    if errors & ERROR_PAUSED != 0 {
        reasons |= StateReasons::OFFLINE;
    }
    if errors & ERROR_RIBBON_OUT != 0 {
        reasons |= StateReasons::MARKER_SUPPLY_EMPTY;
    }

    if errors & !(ERROR_MEDIA_OUT | ERROR_PAPER_JAM | ERROR_PAUSED) != 0 {
        reasons |= StateReasons::OTHER;

        if errors & ERROR_HEAD_OPEN != 0 {
            error!("Print head open.");
        }
        if errors & ERROR_CUTTER_FAULT != 0 {
            error!("Cutter fault.");
        }
        if errors & ERROR_CLEAR_PP_FAILED != 0 {
            error!("Clear paper path failed.");
        }
        if errors & ERROR_PAPER_FEED != 0 {
            error!("Paper feed error.");
        }
        if errors & ERROR_PRESENTER != 0 {
            error!("Presenter error.");
        }
        if errors & ERROR_MARK_NOT_FOUND != 0 {
            error!("Mark not found.");
        }
        if errors & ERROR_MARK_CALIBRATE != 0 {
            error!("Mark calibration error.");
        }
        if errors & ERROR_RETRACT_TIMEOUT != 0 {
            error!("Retraction timeout.");
        }
    }

    if warnings & WARNING_PAPER_ALMOST_OUT != 0 {
        reasons |= StateReasons::MEDIA_LOW;
    }
    if warnings & !WARNING_PAPER_ALMOST_OUT != 0 {
        reasons |= StateReasons::OTHER;
        warn!(warnings = format_args!("{warnings:08x}"), "printer warning flags");
    }

    reasons
}

/// Parse the `~HQES` response text
///
/// The interesting fields are the third whitespace-separated token
/// after `ERRORS:` and `WARNINGS:`, a 32-bit hex word each.
pub(crate) fn parse_host_status(text: &str) -> StateReasons {
    let hex_word = |keyword: &str| -> u32 {
        text.split_once(keyword)
            .and_then(|(_, rest)| rest.split_whitespace().nth(2))
            .and_then(|word| u32::from_str_radix(word, 16).ok())
            .unwrap_or(0)
    };

    map_host_status(hex_word("ERRORS:"), hex_word("WARNINGS:"))
}

/// Query `~HQES` and derive printer-state-reasons
pub(crate) fn query_status(device: &mut Device) -> Result<StateReasons, DeviceError> {
    device.puts("~HQES\n")?;

    let mut buffer = [0u8; 1024];
    let n = device.read(&mut buffer)?;
    if n == 0 {
        debug!("no HQES response");
        return Ok(StateReasons::empty());
    }

    let text = String::from_utf8_lossy(&buffer[..n]).into_owned();
    debug!(response = %text, "HQES returned");
    Ok(parse_host_status(&text))
}

/// Probe the printer with `~HI` and derive a driver name
///
/// Returns `None` when the printer does not answer or the response is
/// not understood.  A 4 inch print head is assumed for auto-detection.
pub fn probe_driver(device: &mut Device) -> Option<String> {
    device.puts("~HI\n").ok()?;

    let mut buffer = [0u8; 1024];
    let n = device.read(&mut buffer).ok()?;
    let text = String::from_utf8_lossy(&buffer[..n]).into_owned();

    // <stx>MODEL,VERSION,DPMM,MEMORY,OPTIONS<etx>
    let text = text.strip_prefix('\u{2}')?;
    let mut fields = text.split(',');
    let model = fields.next()?;
    let _version = fields.next()?;
    let dpmm: u32 = fields.next()?.trim().trim_end_matches('\u{3}').parse().ok()?;

    let dpi = match dpmm {
        8 => 203,
        12 => 300,
        24 => 600,
        _ => return None,
    };

    // Direct-thermal models carry a 'd' before the dash.
    let kind = match model.split_once('-') {
        Some((prefix, _)) if prefix.ends_with('d') => "dt",
        _ => "tt",
    };

    let name = format!("zpl_4inch-{dpi}dpi-{kind}");
    debug!(%model, dpmm, %name, "ZPL auto-detect");
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::MemoryTransport;
    use crate::options::{AttrTable, JobOptions};

    fn options() -> JobOptions {
        let driver = Driver::new("zpl_4inch-203dpi-dt").unwrap();
        JobOptions::prepare(&AttrTable::new(), &AttrTable::new(), &driver, 1)
    }

    fn codec() -> ZplCodec {
        ZplCodec::new(&Driver::new("zpl_4inch-203dpi-dt").unwrap())
    }

    #[test]
    fn rle_alphabet() {
        let mut out = Vec::new();
        compress_run(&mut out, b'F', 1);
        assert_eq!(out, b"F");

        out.clear();
        compress_run(&mut out, b'A', 19);
        assert_eq!(out, b"YA");

        out.clear();
        compress_run(&mut out, b'A', 20);
        assert_eq!(out, b"gA");

        out.clear();
        compress_run(&mut out, b'A', 400);
        assert_eq!(out, b"zA");

        out.clear();
        compress_run(&mut out, b'A', 439);
        assert_eq!(out, b"zgYA");
    }

    #[test]
    fn rle_round_trips() {
        // Expand a compressed stream back into hex characters.
        fn expand(data: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            let mut count = 0u32;
            for &ch in data {
                match ch {
                    b'z' => count += 400,
                    b'g'..=b'y' => count += 20 * u32::from(ch - b'f'),
                    b'G'..=b'Y' => count += u32::from(ch - b'F'),
                    _ => {
                        for _ in 0..count.max(1) {
                            out.push(ch);
                        }
                        count = 0;
                    }
                }
            }
            out
        }

        for count in [1u32, 2, 19, 20, 21, 399, 400, 401, 840] {
            let mut out = Vec::new();
            compress_run(&mut out, b'C', count);
            assert_eq!(expand(&out), vec![b'C'; count as usize], "count {count}");
        }
    }

    #[test]
    fn job_header_commands() {
        let options = options();
        let (mut device, written) = MemoryTransport::device();
        codec().start_job(&options, &mut device).unwrap();
        let out = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "^MMT,Y\n~SD15\n");
    }

    #[test]
    fn tear_offset_formats() {
        let options = options();
        let mut driver = Driver::new("zpl_4inch-203dpi-dt").unwrap();

        driver.tear_offset_configured = -20;
        let (mut device, written) = MemoryTransport::device();
        ZplCodec::new(&driver).start_job(&options, &mut device).unwrap();
        let out = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert!(out.contains("~TA-020\n"), "{out}");

        driver.tear_offset_configured = 100;
        let (mut device, written) = MemoryTransport::device();
        ZplCodec::new(&driver).start_job(&options, &mut device).unwrap();
        let out = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert!(out.contains("~TA100\n"), "{out}");
    }

    #[test]
    fn blank_page_compresses_to_commas() {
        // A 4x6 inch page of zeroes at 203 dpi: the download command
        // declares width*height/8 bytes and every line is ','.
        let options = options();
        assert_eq!(options.header.width, 812);
        assert_eq!(options.header.height, 1218);

        let (mut device, written) = MemoryTransport::device();
        let mut codec = codec();
        codec.start_page(&options, &mut device, 0).unwrap();

        let blank = vec![0u8; options.header.bytes_per_line as usize];
        for y in 0..options.header.height {
            codec.write_line(&options, &mut device, y, &blank).unwrap();
        }

        let out = written.lock().unwrap().clone();
        let text = String::from_utf8(out).unwrap();
        let (download, data) = text.split_once('\n').unwrap();
        assert_eq!(download, "~DGR:LPRINT.GRF,123627,102,");
        assert_eq!(data, ",".repeat(1218));
    }

    #[test]
    fn repeated_lines_compress_to_colon() {
        let options = options();
        let (mut device, written) = MemoryTransport::device();
        let mut codec = codec();
        codec.start_page(&options, &mut device, 0).unwrap();

        let mut line = vec![0u8; options.header.bytes_per_line as usize];
        line[0] = 0xff;
        let start = written.lock().unwrap().len();

        codec.write_line(&options, &mut device, 0, &line).unwrap();
        let after_first = written.lock().unwrap().len();

        codec.write_line(&options, &mut device, 1, &line).unwrap();
        let out = written.lock().unwrap().clone();
        assert_eq!(&out[after_first..], b":");
        assert!(after_first > start);
    }

    #[test]
    fn trailing_zeroes_compress_to_comma() {
        let options = options();
        let (mut device, written) = MemoryTransport::device();
        let mut codec = codec();
        codec.start_page(&options, &mut device, 0).unwrap();

        let mut line = vec![0u8; options.header.bytes_per_line as usize];
        line[0] = 0xff;
        codec.write_line(&options, &mut device, 0, &line).unwrap();

        let out = written.lock().unwrap().clone();
        let text = String::from_utf8(out).unwrap();
        let data = text.split_once('\n').unwrap().1;
        // FF then 202 zero hex chars: "FF" collapses to "HF", the
        // trailing zeroes to ",".
        assert_eq!(data, "HF,");
    }

    #[test]
    fn odd_trailing_zero_keeps_one_digit() {
        let options = options();
        let (mut device, written) = MemoryTransport::device();
        let mut codec = codec();
        codec.start_page(&options, &mut device, 0).unwrap();

        let mut line = vec![0u8; options.header.bytes_per_line as usize];
        line[0] = 0xf0;
        codec.write_line(&options, &mut device, 0, &line).unwrap();

        let text = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        let data = text.split_once('\n').unwrap().1;
        // Hex "F0" then 202 zeroes: the run of 203 zeroes is odd, so a
        // single '0' is emitted before the ','.
        assert_eq!(data, "F0,");
    }

    #[test]
    fn page_trailer_renders_and_purges() {
        let options = options();
        let (mut device, written) = MemoryTransport::device();
        codec().end_page(&options, &mut device, 0).unwrap();
        let text = String::from_utf8(written.lock().unwrap().clone()).unwrap();

        assert!(text.starts_with("^XA\n^POI\n^PW812\n^LH0,0\n^LT0\n"));
        assert!(text.contains("^MNM\n"));
        assert!(text.contains("^MTD\n"));
        assert!(text.contains("^PQ1, 0, 0, N\n"));
        assert!(text.contains("^FO0,0^XGR:LPRINT.GRF,1,1^FS\n^XZ\n"));
        assert!(text.ends_with("^XA\n^IDR:LPRINT.GRF^FS\n^XZ\n"));
    }

    #[test]
    fn host_status_parse() {
        let reasons =
            parse_host_status("ERRORS: 0 00 00000001 WARNINGS: 0 00 00000008");
        assert_eq!(reasons, StateReasons::MEDIA_EMPTY | StateReasons::MEDIA_LOW);

        let reasons = parse_host_status("ERRORS: 1 00 00011000 WARNINGS: 0 00 00000000");
        assert!(reasons.contains(StateReasons::MEDIA_JAM));
        assert!(reasons.contains(StateReasons::OFFLINE));

        let reasons = parse_host_status("ERRORS: 0 00 00000000 WARNINGS: 0 00 00000000");
        assert!(reasons.is_empty());
    }

    #[test]
    fn status_query_round_trip() {
        let reply = b"ERRORS: 0 00 00000001 WARNINGS: 0 00 00000008".to_vec();
        let (mut device, written) = MemoryTransport::device_with_replies(vec![reply]);
        let reasons = query_status(&mut device).unwrap();
        assert_eq!(reasons, StateReasons::MEDIA_EMPTY | StateReasons::MEDIA_LOW);
        assert_eq!(written.lock().unwrap().as_slice(), b"~HQES\n");
    }

    #[test]
    fn driver_probe() {
        let reply = b"\x02LP2844-Z,V45.11.7Z,8,8192KB\x03\r\n".to_vec();
        let (mut device, _) = MemoryTransport::device_with_replies(vec![reply]);
        assert_eq!(probe_driver(&mut device).as_deref(), Some("zpl_4inch-203dpi-tt"));

        let reply = b"\x02ZD420d-203dpi,V84.20.18,8,4096KB\x03\r\n".to_vec();
        let (mut device, _) = MemoryTransport::device_with_replies(vec![reply]);
        assert_eq!(probe_driver(&mut device).as_deref(), Some("zpl_4inch-203dpi-dt"));
    }
}
