//! Printer drivers and vendor codecs
//!
//! A [`Driver`] is the immutable record bound to a printer at creation
//! time: vendor family, resolutions, margins, supported media, and the
//! configured darkness/offsets.  The driver name is matched against the
//! registry exactly once — afterwards dispatch goes through the
//! [`VendorFamily`] tag and the per-job [`Codec`] object, never through
//! string comparison.
//!
//! A codec is created per job, holds the vendor-specific scratch state
//! (feed counters, page buffers, compression buffers) for that job, and
//! is dropped when the job ends.

pub(crate) mod brother;
pub(crate) mod cpcl;
pub(crate) mod dymo;
pub(crate) mod epl2;
pub(crate) mod pwg_out;
pub(crate) mod sii;
pub(crate) mod tspl;
pub(crate) mod zijiang;
pub(crate) mod zpl;

use bitflags::bitflags;
use strum::{Display, EnumString};

use crate::device::Device;
use crate::error::{DeviceError, JobError};
use crate::options::JobOptions;
use crate::printer::StateReasons;

/// Vendor command-stream families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VendorFamily {
    /// DYMO LabelWriter / LabelManager
    Dymo,
    /// Zebra ZPL II
    Zpl,
    /// Zebra EPL2 page mode
    Epl2,
    /// TSC TSPL
    Tspl,
    /// Brother QL / PT raster
    Brother,
    /// Seiko Instruments SLP
    Sii,
    /// HPRT / mobile CPCL
    Cpcl,
    /// Zijiang ESC/POS receipt
    Zijiang,
    /// PWG raster passthrough (testing)
    Pwg,
}

/// How the printer handles finished labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum LabelMode {
    /// Applicator port
    Applicator,
    /// Cut after each label
    Cutter,
    /// Cut at end of job
    CutterDelayed,
    /// Kiosk presenter
    Kiosk,
    /// Peel off backing
    PeelOff,
    /// Peel off with pre-peel
    PeelOffPrepeel,
    /// Rewind onto takeup
    Rewind,
    /// RFID encode
    Rfid,
    /// Manual tear-off
    TearOff,
}

bitflags! {
    /// Set of supported label modes
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LabelModes: u16 {
        const APPLICATOR = 1 << 0;
        const CUTTER = 1 << 1;
        const CUTTER_DELAYED = 1 << 2;
        const KIOSK = 1 << 3;
        const PEEL_OFF = 1 << 4;
        const PEEL_OFF_PREPEEL = 1 << 5;
        const REWIND = 1 << 6;
        const RFID = 1 << 7;
        const TEAR_OFF = 1 << 8;
    }
}

/// How the printer finds label boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MediaTracking {
    /// Continuous media, no tracking
    Continuous,
    /// Label gap / web sensing
    Gap,
    /// Black mark sensing
    Mark,
    /// Web sensing
    Web,
}

bitflags! {
    /// Set of supported tracking modes
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MediaTrackings: u8 {
        const CONTINUOUS = 1 << 0;
        const GAP = 1 << 1;
        const MARK = 1 << 2;
        const WEB = 1 << 3;
    }
}

/// Default media loaded in a driver's main source
#[derive(Debug, Clone, Copy)]
pub struct DriverMedia {
    /// Self-describing PWG size name
    pub size_name: &'static str,
    /// media-type keyword
    pub media_type: &'static str,
    /// Boundary tracking for this media
    pub tracking: MediaTracking,
}

/// Immutable per-printer driver record
#[derive(Debug, Clone)]
pub struct Driver {
    /// Driver keyword, e.g. `zpl_4inch-203dpi-dt`
    pub name: String,
    /// Command-stream family
    pub family: VendorFamily,
    /// Human-readable make and model
    pub make_and_model: &'static str,
    /// MIME type accepted for vendor-raw pass-through
    pub format: &'static str,
    /// Supported resolutions, low to high
    pub resolutions: Vec<(u32, u32)>,
    /// Left/right unprintable margin in 1/2540 inch
    pub left_right: i32,
    /// Bottom/top unprintable margin in 1/2540 inch
    pub bottom_top: i32,
    /// Supported media size names (including roll_min/roll_max ranges)
    pub media: &'static [&'static str],
    /// Default ready media
    pub media_default: DriverMedia,
    /// Media sources (rolls)
    pub sources: &'static [&'static str],
    /// Supported media types
    pub media_types: &'static [&'static str],
    /// Configured media-top-offset in 1/2540 inch
    pub top_offset_configured: i32,
    /// media-top-offset range in 1/2540 inch, (0, 0) when unsupported
    pub top_offset_supported: (i32, i32),
    /// Supported tracking modes
    pub tracking_supported: MediaTrackings,
    /// Configured label mode
    pub label_mode_configured: LabelMode,
    /// Supported label modes
    pub label_modes_supported: LabelModes,
    /// Configured tear offset in 1/2540 inch
    pub tear_offset_configured: i32,
    /// Tear offset range, (0, 0) when unsupported
    pub tear_offset_supported: (i32, i32),
    /// Default print speed in 1/2540 inch per second, 0 for none
    pub speed_default: i32,
    /// Print speed range, (0, 0) when unsupported
    pub speed_supported: (i32, i32),
    /// Configured darkness, 0..=100
    pub darkness_configured: i32,
    /// Number of discrete darkness levels the head supports
    pub darkness_levels: i32,
    /// Whether the printer has a cutter this driver should use
    pub cut_labels: bool,
}

impl Driver {
    /// Look up a driver by keyword
    ///
    /// Returns `None` for unknown names.  The family is resolved here,
    /// once; everything downstream dispatches on the tag.
    pub fn new(name: &str) -> Option<Driver> {
        let &(keyword, make_and_model) = KNOWN_DRIVERS
            .iter()
            .find(|(keyword, _)| *keyword == name)?;

        let mut driver = Driver {
            name: keyword.to_string(),
            family: family_for(keyword),
            make_and_model,
            format: "application/octet-stream",
            resolutions: vec![(203, 203)],
            left_right: 1,
            bottom_top: 1,
            media: &[],
            media_default: DriverMedia {
                size_name: "oe_address-label_1.25x3.5in",
                media_type: "labels",
                tracking: MediaTracking::Web,
            },
            sources: &["main-roll"],
            media_types: &["labels"],
            top_offset_configured: 0,
            top_offset_supported: (0, 0),
            tracking_supported: MediaTrackings::empty(),
            label_mode_configured: LabelMode::TearOff,
            label_modes_supported: LabelModes::TEAR_OFF,
            tear_offset_configured: 0,
            tear_offset_supported: (0, 0),
            speed_default: 0,
            speed_supported: (0, 0),
            darkness_configured: 50,
            darkness_levels: 2,
            cut_labels: name.contains("-cutter"),
        };

        match driver.family {
            VendorFamily::Dymo => dymo::init(&mut driver),
            VendorFamily::Zpl => zpl::init(&mut driver),
            VendorFamily::Epl2 => epl2::init(&mut driver),
            VendorFamily::Tspl => tspl::init(&mut driver),
            VendorFamily::Brother => brother::init(&mut driver),
            VendorFamily::Sii => sii::init(&mut driver),
            VendorFamily::Cpcl => cpcl::init(&mut driver),
            VendorFamily::Zijiang => zijiang::init(&mut driver),
            VendorFamily::Pwg => pwg_out::init(&mut driver),
        }

        Some(driver)
    }

    /// All known driver keywords
    pub fn known_drivers() -> impl Iterator<Item = &'static str> {
        KNOWN_DRIVERS.iter().map(|(keyword, _)| *keyword)
    }

    /// Make-and-model string for a driver keyword
    pub fn make_and_model(name: &str) -> Option<&'static str> {
        KNOWN_DRIVERS
            .iter()
            .find(|(keyword, _)| *keyword == name)
            .map(|(_, model)| *model)
    }

    /// Create the per-job codec for this driver
    pub(crate) fn codec(&self) -> Box<dyn Codec> {
        match self.family {
            VendorFamily::Dymo => Box::new(dymo::DymoCodec::new(self)),
            VendorFamily::Zpl => Box::new(zpl::ZplCodec::new(self)),
            VendorFamily::Epl2 => Box::new(epl2::Epl2Codec::new(self)),
            VendorFamily::Tspl => Box::new(tspl::TsplCodec::new()),
            VendorFamily::Brother => Box::new(brother::BrotherCodec::new(self)),
            VendorFamily::Sii => Box::new(sii::SiiCodec::new(self)),
            VendorFamily::Cpcl => Box::new(cpcl::CpclCodec::new(self)),
            VendorFamily::Zijiang => Box::new(zijiang::ZijiangCodec::new(self)),
            VendorFamily::Pwg => Box::new(pwg_out::PwgCodec::new()),
        }
    }

    /// Query the device for printer-state-reasons
    ///
    /// Families without a status protocol return `Ok(None)`.  Must only
    /// be called while no job is streaming to the device.
    pub(crate) fn poll_device_status(
        &self,
        device: &mut Device,
    ) -> Result<Option<StateReasons>, DeviceError> {
        match self.family {
            VendorFamily::Zpl => zpl::query_status(device).map(Some),
            VendorFamily::Brother => brother::query_status(device).map(Some),
            VendorFamily::Zijiang => zijiang::query_status(device).map(Some),
            _ => Ok(None),
        }
    }
}

/// The per-job vendor codec
///
/// State transitions mirror the raster job FSM: `start_job`,
/// `start_page`, `write_line` for each scanline in increasing `y`,
/// `end_page`, and finally `end_job`.  Lines arrive packed 1-bit at the
/// full page width; blank-line handling is each codec's business.
pub(crate) trait Codec: Send {
    fn start_job(&mut self, options: &JobOptions, device: &mut Device) -> Result<(), JobError>;

    fn start_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        page: u32,
    ) -> Result<(), JobError>;

    fn write_line(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        y: u32,
        line: &[u8],
    ) -> Result<(), JobError>;

    fn end_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        page: u32,
    ) -> Result<(), JobError>;

    fn end_job(&mut self, options: &JobOptions, device: &mut Device) -> Result<(), JobError>;

    /// The paper byte of the wire format: 0x00 where a set bit prints,
    /// 0xFF where a set bit leaves paper blank.
    fn blank_byte(&self) -> u8 {
        0x00
    }

    /// Output gamma correction for the dither matrix
    fn out_gamma(&self, x_resolution: u32) -> f64 {
        if x_resolution >= 300 {
            1.2
        } else {
            1.0
        }
    }
}

/// Whether a packed line is entirely paper
pub(crate) fn line_is_blank(line: &[u8], blank_byte: u8) -> bool {
    line.iter().all(|&b| b == blank_byte)
}

/// Probe a device to guess the matching driver keyword
///
/// Zijiang receipt printers identify themselves in the USB device URI;
/// everything else is asked for its ZPL host identification.  Returns
/// `None` when no driver can be inferred.
pub fn autodetect_driver(device: &mut Device, device_uri: &str) -> Option<String> {
    if device_uri.contains("POS58%20Printer") {
        return Some("zj_58mm".to_string());
    }
    if device_uri.contains("POS80%20Printer") {
        return Some("zj_80mm".to_string());
    }

    zpl::probe_driver(device)
}

fn family_for(name: &str) -> VendorFamily {
    if name.starts_with("dymo_") {
        VendorFamily::Dymo
    } else if name.starts_with("zpl_") {
        VendorFamily::Zpl
    } else if name.starts_with("epl2_") {
        VendorFamily::Epl2
    } else if name.starts_with("tspl_") {
        VendorFamily::Tspl
    } else if name.starts_with("brother_") {
        VendorFamily::Brother
    } else if name.starts_with("sii_") {
        VendorFamily::Sii
    } else if name.starts_with("cpcl_") {
        VendorFamily::Cpcl
    } else if name.starts_with("zj_") {
        VendorFamily::Zijiang
    } else {
        VendorFamily::Pwg
    }
}

// Note: keep keywords and models in sync; Driver::new assumes every
// keyword here resolves through family_for.
static KNOWN_DRIVERS: &[(&str, &str)] = &[
    ("dymo_lm-400", "Dymo LabelMANAGER 400"),
    ("dymo_lm-450", "Dymo LabelMANAGER 450"),
    ("dymo_lm-pc", "Dymo LabelMANAGER PC"),
    ("dymo_lm-pc-ii", "Dymo LabelMANAGER PC II"),
    ("dymo_lm-pnp", "Dymo LabelMANAGER PNP"),
    ("dymo_lp-350", "Dymo LabelPOINT 350"),
    ("dymo_lw-300", "Dymo LabelWriter 300"),
    ("dymo_lw-310", "Dymo LabelWriter 310"),
    ("dymo_lw-315", "Dymo LabelWriter 315"),
    ("dymo_lw-320", "Dymo LabelWriter 320"),
    ("dymo_lw-330-turbo", "Dymo LabelWriter 330 Turbo"),
    ("dymo_lw-330", "Dymo LabelWriter 330"),
    ("dymo_lw-400-turbo", "Dymo LabelWriter 400 Turbo"),
    ("dymo_lw-400", "Dymo LabelWriter 400"),
    ("dymo_lw-450-duo-label", "Dymo LabelWriter 450 DUO Label"),
    ("dymo_lw-450-duo-tape", "Dymo LabelWriter 450 DUO Tape"),
    ("dymo_lw-450-turbo", "Dymo LabelWriter 450 Turbo"),
    ("dymo_lw-450-twin-turbo", "Dymo LabelWriter 450 Twin Turbo"),
    ("dymo_lw-450", "Dymo LabelWriter 450"),
    ("dymo_lw-4xl", "Dymo LabelWriter 4XL"),
    ("dymo_lw-se450", "Dymo LabelWriter SE450"),
    ("dymo_lw-wireless", "Dymo LabelWriter Wireless"),
    ("zpl_2inch-203dpi-dt", "Zebra ZPL 2 inch/203dpi/Direct Thermal"),
    ("zpl_2inch-300dpi-dt", "Zebra ZPL 2 inch/300dpi/Direct Thermal"),
    ("zpl_2inch-203dpi-tt", "Zebra ZPL 2 inch/203dpi/Thermal Transfer"),
    ("zpl_2inch-300dpi-tt", "Zebra ZPL 2 inch/300dpi/Thermal Transfer"),
    ("zpl_4inch-203dpi-dt", "Zebra ZPL 4 inch/203dpi/Direct Thermal"),
    ("zpl_4inch-300dpi-dt", "Zebra ZPL 4 inch/300dpi/Direct Thermal"),
    ("zpl_4inch-600dpi-dt", "Zebra ZPL 4 inch/600dpi/Direct Thermal"),
    ("zpl_4inch-203dpi-tt", "Zebra ZPL 4 inch/203dpi/Thermal Transfer"),
    ("zpl_4inch-300dpi-tt", "Zebra ZPL 4 inch/300dpi/Thermal Transfer"),
    ("zpl_4inch-600dpi-tt", "Zebra ZPL 4 inch/600dpi/Thermal Transfer"),
    ("epl2_2inch-203dpi", "Zebra EPL2 2 inch/203dpi"),
    ("epl2_2inch-300dpi", "Zebra EPL2 2 inch/300dpi"),
    ("epl2_4inch-203dpi", "Zebra EPL2 4 inch/203dpi"),
    ("epl2_4inch-300dpi", "Zebra EPL2 4 inch/300dpi"),
    ("tspl_203dpi", "TSC TSPL 203dpi"),
    ("tspl_300dpi", "TSC TSPL 300dpi"),
    ("brother_ql-500", "Brother QL-500"),
    ("brother_ql-550", "Brother QL-550"),
    ("brother_ql-570", "Brother QL-570"),
    ("brother_ql-600", "Brother QL-600"),
    ("brother_ql-700", "Brother QL-700"),
    ("brother_ql-800", "Brother QL-800"),
    ("brother_ql-810w", "Brother QL-810W"),
    ("brother_ql-820nwb", "Brother QL-820NWB"),
    ("brother_ql-1100", "Brother QL-1100"),
    ("brother_pt-e550w", "Brother PT-E550W"),
    ("brother_pt-p750w", "Brother PT-P750W"),
    ("brother_pt-p900w", "Brother PT-P900W"),
    ("brother_pt-p950nw", "Brother PT-P950NW"),
    ("sii_slp100", "SII SLP-100"),
    ("sii_slp200", "SII SLP-200"),
    ("sii_slp240", "SII SLP-240"),
    ("sii_slp410", "SII SLP-410"),
    ("sii_slp420", "SII SLP-420"),
    ("sii_slp430", "SII SLP-430"),
    ("sii_slp440", "SII SLP-440"),
    ("sii_slp450", "SII SLP-450"),
    ("sii_slp620", "SII SLP-620"),
    ("sii_slp650", "SII SLP-650"),
    ("cpcl_2inch-203dpi", "CPCL 2 inch/203dpi"),
    ("cpcl_4inch-203dpi", "CPCL 4 inch/203dpi"),
    ("cpcl_4inch-300dpi", "CPCL 4 inch/300dpi"),
    ("cpcl_hma300e", "HPRT HM-A300E"),
    ("zj_58mm", "Zijiang ZJ-58"),
    ("zj_80mm", "Zijiang ZJ-80"),
    ("pwg_2inch", "PWG Raster 2 inch Test Printer"),
    ("pwg_4inch", "PWG Raster 4 inch Test Printer"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_keyword_resolves() {
        for name in Driver::known_drivers() {
            let driver = Driver::new(name).unwrap();
            assert_eq!(driver.name, name);
            assert!(!driver.resolutions.is_empty(), "{name}");
            assert!(!driver.media.is_empty(), "{name}");
            assert!((0..=100).contains(&driver.darkness_configured), "{name}");
        }
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        assert!(Driver::new("okidata_led").is_none());
    }

    #[test]
    fn family_resolution() {
        assert_eq!(Driver::new("dymo_lw-450").unwrap().family, VendorFamily::Dymo);
        assert_eq!(
            Driver::new("zpl_4inch-203dpi-dt").unwrap().family,
            VendorFamily::Zpl
        );
        assert_eq!(
            Driver::new("brother_pt-p750w").unwrap().family,
            VendorFamily::Brother
        );
        assert_eq!(Driver::new("zj_58mm").unwrap().family, VendorFamily::Zijiang);
    }

    #[test]
    fn autodetect_by_uri_and_probe() {
        use crate::device::testing::MemoryTransport;

        let (mut device, _) = MemoryTransport::device();
        assert_eq!(
            autodetect_driver(&mut device, "usb://Zijiang/POS58%20Printer?serial=1"),
            Some("zj_58mm".to_string())
        );

        let reply = b"\x02ZD420d-300dpi,V84.20.18,12,4096KB\x03\r\n".to_vec();
        let (mut device, _) = MemoryTransport::device_with_replies(vec![reply]);
        assert_eq!(
            autodetect_driver(&mut device, "socket://10.0.0.2:9100"),
            Some("zpl_4inch-300dpi-dt".to_string())
        );
    }

    #[test]
    fn label_mode_keywords() {
        assert_eq!(LabelMode::TearOff.to_string(), "tear-off");
        assert_eq!(
            "peel-off-prepeel".parse::<LabelMode>().unwrap(),
            LabelMode::PeelOffPrepeel
        );
        assert_eq!(MediaTracking::Continuous.to_string(), "continuous");
    }
}
