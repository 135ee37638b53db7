//! Brother QL / PT raster driver
//!
//! The raster protocol opens with a long zero "invalidate" sequence, a
//! status query, and mode/density selection.  Raster lines are buffered
//! in memory because the print-information record that precedes them
//! carries the page's line count; everything is pushed to the wire in
//! `end_page`.  QL label printers compress blank lines to `Z`; PT tape
//! printers use a 16-bit line width.  `0x0C` ejects between pages and
//! `0x1A` (SUB) ejects at the end of the job.

use tracing::debug;

use crate::device::Device;
use crate::error::{DeviceError, JobError};
use crate::options::JobOptions;
use crate::printer::StateReasons;

use super::{line_is_blank, Codec, Driver, DriverMedia, MediaTracking, MediaTrackings};

static BROTHER_QL_MEDIA: &[&str] = &[
    "oe_dk1219-round_0.47x0.47in",
    "oe_dk1204-multi-purpose_0.66x2.1in",
    "oe_dk1203-file-folder_0.66x3.4in",
    "oe_dk1209-small-address_1.1x2.4in",
    "oe_dk1201-address_1.1x3.5in",
    "oe_dk1208-large-address_1.4x3.5in",
    "oe_dk1240-large-multi-purpose_1.9x4in",
    "oe_dk1207-cd-dvd_2.2x2.2in",
    "oe_dk1202-shipping_2.4x3.9in",
    "na_index-4x6_4x6in",
    "roll_dk2113-continuous-film_2.4x600in",
    "roll_dk2205-continuous_2.4x1200in",
    "roll_dk2210-continuous_1.1x1200in",
    "roll_dk2211-continuous-film_1.1x600in",
    "roll_dk2212-continuous-film_2.4x600in",
    "roll_dk2214-continuous_0.47x1200in",
    "roll_dk2243-continuous_4x1200in",
    "roll_dk2246-continuous_4.07x1200in",
    "roll_dk2251-continuous_2.4x600in",
    "roll_dk2606-continuous-film_2.4x600in",
    "roll_dk4205-continuous-removable_2.4x1200in",
    "roll_dk4605-continuous-removable_2.4x1200in",
    "roll_max_2.5x3600in",
    "roll_min_0.25x1in",
];

static BROTHER_PT_MEDIA: &[&str] = &[
    "oe_thin-1in-tape_0.25x1in",
    "oe_thinner-1in-tape_0.375x1in",
    "oe_medium-1in-tape_0.5x1in",
    "oe_wider-1in-tape_0.75x1in",
    "oe_wide-1in-tape_1x1in",
    "oe_thin-2in-tape_0.25x2in",
    "oe_thinner-2in-tape_0.375x2in",
    "oe_medium-2in-tape_0.5x2in",
    "oe_wider-2in-tape_0.75x2in",
    "oe_wide-2in-tape_1x2in",
    "oe_thin-3in-tape_0.25x3in",
    "oe_thinner-3in-tape_0.375x3in",
    "oe_medium-3in-tape_0.5x3in",
    "oe_wider-3in-tape_0.75x3in",
    "oe_wide-3in-tape_1x3in",
    "roll_max_1x3600in",
    "roll_min_0.25x1in",
];

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "application/vnd.brother-cbp";

    if driver.name.starts_with("brother_ql-") {
        driver.resolutions = vec![(300, 300)];
        driver.media = BROTHER_QL_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "roll_dk2205-continuous_2.4x3.9in",
            media_type: "continuous",
            tracking: MediaTracking::Continuous,
        };
        driver.media_types = &["labels", "continuous"];
    } else {
        driver.resolutions = vec![(180, 180)];
        driver.media = BROTHER_PT_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "oe_wide-2in-tape_1x2in",
            media_type: "continuous",
            tracking: MediaTracking::Continuous,
        };
        driver.media_types = &["continuous", "continuous-film", "continuous-removable"];
    }

    driver.left_right = 1;
    driver.bottom_top = 1;
    driver.tracking_supported = MediaTrackings::CONTINUOUS | MediaTrackings::GAP;
    driver.darkness_configured = 50;
    driver.darkness_levels = 5;
}

/// Decode the 32-byte status reply into printer-state-reasons
pub(crate) fn parse_status(status: &[u8; 32]) -> StateReasons {
    let mut reasons = StateReasons::empty();

    // Error info 1
    if status[8] & 0x03 != 0 {
        reasons |= StateReasons::MEDIA_EMPTY;
    }
    if status[8] & 0xfc != 0 {
        reasons |= StateReasons::OTHER;
    }

    // Error info 2
    if status[9] & 0x01 != 0 {
        reasons |= StateReasons::MEDIA_NEEDED;
    }
    if status[9] & 0x10 != 0 {
        reasons |= StateReasons::COVER_OPEN;
    }
    if status[9] & 0x40 != 0 {
        reasons |= StateReasons::MEDIA_JAM;
    }
    if status[9] & 0xae != 0 {
        reasons |= StateReasons::OTHER;
    }

    reasons
}

/// Send `ESC i S` and decode the reply
pub(crate) fn query_status(device: &mut Device) -> Result<StateReasons, DeviceError> {
    device.puts("\x1biS")?;

    let mut buffer = [0u8; 32];
    let n = device.read(&mut buffer)?;
    if n < buffer.len() {
        debug!(bytes = n, "short status reply");
        return Ok(StateReasons::empty());
    }

    debug!(
        media_width_mm = buffer[10],
        media_length_mm = buffer[17],
        errors = format_args!("{:02x} {:02x}", buffer[8], buffer[9]),
        "status reply"
    );

    Ok(parse_status(&buffer))
}

/// Per-job Brother state
pub(crate) struct BrotherCodec {
    is_pt_series: bool,
    is_ql_800: bool,
    /// Buffered page data, flushed in `end_page`
    buffer: Vec<u8>,
}

impl BrotherCodec {
    pub(crate) fn new(driver: &Driver) -> BrotherCodec {
        BrotherCodec {
            is_pt_series: driver.name.starts_with("brother_pt-"),
            is_ql_800: driver.name == "brother_ql-800",
            buffer: Vec::new(),
        }
    }
}

impl Codec for BrotherCodec {
    fn start_job(&mut self, options: &JobOptions, device: &mut Device) -> Result<(), JobError> {
        // Reset: PT tape printers take the short sequence, QL label
        // printers the long one.
        let reset = [0u8; 400];
        if self.is_pt_series {
            device.write_all(&reset[..100])?;
        } else {
            device.write_all(&reset)?;
        }

        // Ask for status; a printer that stays silent still prints.
        if let Err(e) = query_status(device) {
            debug!(error = %e, "status query failed");
        }

        // Initialize and select raster mode...
        device.puts("\x1b@\x1bia\x01")?;

        // print-darkness / printer-darkness-configured
        device.write_all(&[0x1b, b'i', b'D', (4 * options.darkness() / 100 + 1) as u8])?;

        Ok(())
    }

    fn start_page(
        &mut self,
        _options: &JobOptions,
        device: &mut Device,
        page: u32,
    ) -> Result<(), JobError> {
        if page > 0 {
            device.write_all(&[0x0c])?;
        }

        self.buffer.clear();
        Ok(())
    }

    fn write_line(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _y: u32,
        line: &[u8],
    ) -> Result<(), JobError> {
        let _ = device;
        let width = options.header.bytes_per_line as usize;
        let line = &line[..width];

        if !self.is_ql_800 && line_is_blank(line, 0) {
            self.buffer.push(b'Z');
            return Ok(());
        }

        if self.is_pt_series {
            self.buffer.push(b'G');
            self.buffer.push(width as u8);
            self.buffer.push((width >> 8) as u8);
        } else {
            self.buffer.push(b'g');
            self.buffer.push(0x00);
            self.buffer.push(width as u8);
        }
        self.buffer.extend_from_slice(line);

        Ok(())
    }

    fn end_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        page: u32,
    ) -> Result<(), JobError> {
        let continuous = options.media.media_type.starts_with("continuous");

        // Print-information record: media kind, dimensions in mm, line
        // count, and the first-page flag.
        let height = options.header.height;
        let info = [
            0x1b,
            b'i',
            b'z',
            if continuous { 0x04 } else { 0x0c },
            0x00,
            (options.media.size_width / 100) as u8,
            (options.media.size_length / 100) as u8,
            height as u8,
            (height >> 8) as u8,
            (height >> 16) as u8,
            (height >> 24) as u8,
            u8::from(page != 0),
            0x00,
        ];
        device.write_all(&info)?;

        if !self.buffer.is_empty() {
            device.write_all(&self.buffer)?;
        }

        // Eject or cut...
        device.write_all(&[0x1b, b'i', b'M', if continuous { 64 } else { 0 }])?;
        device.flush()?;

        Ok(())
    }

    fn end_job(&mut self, _options: &JobOptions, device: &mut Device) -> Result<(), JobError> {
        // SUB ejects the final page.
        device.write_all(&[0x1a])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::MemoryTransport;
    use crate::options::{AttrTable, AttrValue, JobOptions};

    fn ql_options(width_px: u32, height_px: u32) -> JobOptions {
        let driver = Driver::new("brother_ql-810w").unwrap();
        let mut options = JobOptions::prepare(&AttrTable::new(), &AttrTable::new(), &driver, 1);
        options.header = crate::raster::PageHeader::for_bilevel(width_px, height_px, 300, 300);
        options
    }

    #[test]
    fn job_preamble() {
        let driver = Driver::new("brother_ql-810w").unwrap();
        let options = ql_options(720, 300);
        let (mut device, written) = MemoryTransport::device();
        let mut codec = BrotherCodec::new(&driver);
        codec.start_job(&options, &mut device).unwrap();

        let out = written.lock().unwrap().clone();
        // 400-byte reset, then the status query.
        assert_eq!(&out[..400], &[0u8; 400][..]);
        assert_eq!(&out[400..403], b"\x1biS");
        assert_eq!(&out[403..409], b"\x1b@\x1bia\x01");
        // Darkness 50 maps to level 3.
        assert_eq!(&out[409..], &[0x1b, b'i', b'D', 3]);
    }

    #[test]
    fn pt_uses_short_reset() {
        let driver = Driver::new("brother_pt-p750w").unwrap();
        let options = ql_options(720, 100);
        let (mut device, written) = MemoryTransport::device();
        let mut codec = BrotherCodec::new(&driver);
        codec.start_job(&options, &mut device).unwrap();

        let out = written.lock().unwrap().clone();
        assert_eq!(&out[..100], &[0u8; 100][..]);
        assert_eq!(&out[100..103], b"\x1biS");
    }

    #[test]
    fn blank_line_compression() {
        // 720x300: 100 blank rows then 200 solid rows; blanks become
        // 'Z', data rows 'g' 00 0x5A plus 90 bytes of ink.
        let driver = Driver::new("brother_ql-810w").unwrap();
        let options = ql_options(720, 300);
        let (mut device, written) = MemoryTransport::device();
        let mut codec = BrotherCodec::new(&driver);

        let blank = vec![0u8; 90];
        let ink = vec![0xffu8; 90];
        codec.start_page(&options, &mut device, 0).unwrap();
        for y in 0..100 {
            codec.write_line(&options, &mut device, y, &blank).unwrap();
        }
        for y in 100..300 {
            codec.write_line(&options, &mut device, y, &ink).unwrap();
        }
        codec.end_page(&options, &mut device, 0).unwrap();

        let out = written.lock().unwrap().clone();
        // Print-information record first...
        assert_eq!(&out[..3], &[0x1b, b'i', b'z']);
        assert_eq!(out[3], 0x04); // continuous
        assert_eq!(out[7], (300u32 & 0xff) as u8);
        assert_eq!(out[8], 1); // 300 >> 8
        assert_eq!(out[11], 0); // first page

        // ...then the buffered lines.
        let data = &out[13..];
        assert_eq!(&data[..100], &[b'Z'; 100][..]);
        let mut pos = 100;
        for _ in 0..200 {
            assert_eq!(&data[pos..pos + 3], &[b'g', 0x00, 0x5a]);
            assert_eq!(&data[pos + 3..pos + 93], &ink[..]);
            pos += 93;
        }
        // Auto-cut for continuous media.
        assert_eq!(&data[pos..pos + 4], &[0x1b, b'i', b'M', 64]);
    }

    #[test]
    fn pt_line_header_is_16_bit() {
        let driver = Driver::new("brother_pt-p900w").unwrap();
        let options = ql_options(720, 4);
        let (mut device, _) = MemoryTransport::device();
        let mut codec = BrotherCodec::new(&driver);

        let mut ink = vec![0u8; 90];
        ink[0] = 0x01;
        codec.write_line(&options, &mut device, 0, &ink).unwrap();
        assert_eq!(&codec.buffer[..3], &[b'G', 90, 0]);
    }

    #[test]
    fn ql800_never_compresses_blanks() {
        let driver = Driver::new("brother_ql-800").unwrap();
        let options = ql_options(720, 4);
        let (mut device, _) = MemoryTransport::device();
        let mut codec = BrotherCodec::new(&driver);

        let blank = vec![0u8; 90];
        codec.write_line(&options, &mut device, 0, &blank).unwrap();
        assert_eq!(&codec.buffer[..3], &[b'g', 0x00, 0x5a]);
        assert_eq!(codec.buffer.len(), 93);
    }

    #[test]
    fn eject_between_and_after_pages() {
        let driver = Driver::new("brother_ql-810w").unwrap();
        let options = ql_options(720, 4);
        let (mut device, written) = MemoryTransport::device();
        let mut codec = BrotherCodec::new(&driver);

        codec.start_page(&options, &mut device, 1).unwrap();
        codec.end_job(&options, &mut device).unwrap();

        let out = written.lock().unwrap().clone();
        assert_eq!(out, vec![0x0c, 0x1a]);
    }

    #[test]
    fn status_decoding() {
        let mut status = [0u8; 32];
        status[8] = 0x01;
        status[9] = 0x50;
        let reasons = parse_status(&status);
        assert!(reasons.contains(StateReasons::MEDIA_EMPTY));
        assert!(reasons.contains(StateReasons::COVER_OPEN));
        assert!(reasons.contains(StateReasons::MEDIA_JAM));
        assert!(!reasons.contains(StateReasons::OTHER));

        let reply = vec![0u8; 32];
        let (mut device, written) = MemoryTransport::device_with_replies(vec![reply]);
        assert_eq!(query_status(&mut device).unwrap(), StateReasons::empty());
        assert_eq!(written.lock().unwrap().as_slice(), b"\x1biS");
    }

    #[test]
    fn uses_media_dimensions_from_options() {
        let driver = Driver::new("brother_ql-810w").unwrap();
        let col = AttrTable::new()
            .with(
                "media-size-name",
                AttrValue::Keyword("oe_dk1201-address_1.1x3.5in".into()),
            )
            .with("media-type", AttrValue::Keyword("labels".into()));
        let job = AttrTable::new().with("media-col", AttrValue::Collection(col));
        let options = JobOptions::prepare(&job, &AttrTable::new(), &driver, 1);

        let (mut device, written) = MemoryTransport::device();
        let mut codec = BrotherCodec::new(&driver);
        codec.end_page(&options, &mut device, 0).unwrap();

        let out = written.lock().unwrap().clone();
        assert_eq!(out[3], 0x0c); // die-cut labels
        assert_eq!(out[5], 27); // 1.1 in = 27 mm
        assert_eq!(out[6], 88); // 3.5 in = 88 mm
    }
}
