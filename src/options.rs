//! Job option assembly
//!
//! The IPP front-end hands the core an opaque attribute table per job
//! and per printer.  [`JobOptions::prepare`] resolves each recognized
//! option through the lookup chain — job attribute, then the printer's
//! `xxx-default` attribute, then the driver default — and derives the
//! authoritative page header that codecs and the dither engine consume.

use std::collections::HashMap;

use tracing::debug;

use crate::dither::{DITHER_CLUSTERED, DITHER_DISPERSED};
use crate::drivers::{Driver, MediaTracking};
use crate::media::{MediaSize, HUNDREDTHS_PER_INCH};
use crate::raster::{ImageBox, PageHeader};

/// A single IPP-style attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// integer
    Integer(i32),
    /// keyword / name / text
    Keyword(String),
    /// enum
    Enum(i32),
    /// resolution in dots per inch
    Resolution(u32, u32),
    /// collection (e.g. `media-col`)
    Collection(AttrTable),
}

/// An opaque attribute table
///
/// The core never validates these beyond the options it consumes; the
/// front-end owns conformance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrTable(HashMap<String, AttrValue>);

impl AttrTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> AttrTable {
        AttrTable::default()
    }

    /// Insert an attribute
    pub fn insert(&mut self, name: &str, value: AttrValue) {
        self.0.insert(name.to_string(), value);
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, name: &str, value: AttrValue) -> AttrTable {
        self.insert(name, value);
        self
    }

    /// Raw lookup
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(name)
    }

    /// Integer value, if the attribute is an integer or enum
    pub fn integer(&self, name: &str) -> Option<i32> {
        match self.get(name)? {
            AttrValue::Integer(v) | AttrValue::Enum(v) => Some(*v),
            _ => None,
        }
    }

    /// Keyword value
    pub fn keyword(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            AttrValue::Keyword(v) => Some(v),
            _ => None,
        }
    }

    /// Resolution value
    pub fn resolution(&self, name: &str) -> Option<(u32, u32)> {
        match self.get(name)? {
            AttrValue::Resolution(x, y) => Some((*x, *y)),
            _ => None,
        }
    }

    /// Collection value
    pub fn collection(&self, name: &str) -> Option<&AttrTable> {
        match self.get(name)? {
            AttrValue::Collection(v) => Some(v),
            _ => None,
        }
    }
}

/// orientation-requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Orientation {
    /// 3
    #[default]
    Portrait,
    /// 4
    Landscape,
    /// 5
    ReverseLandscape,
    /// 6
    ReversePortrait,
}

impl Orientation {
    fn from_ipp(v: i32) -> Orientation {
        match v {
            4 => Orientation::Landscape,
            5 => Orientation::ReverseLandscape,
            6 => Orientation::ReversePortrait,
            _ => Orientation::Portrait,
        }
    }
}

/// print-quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Quality {
    /// 3
    Draft,
    /// 4
    #[default]
    Normal,
    /// 5
    High,
}

impl Quality {
    fn from_ipp(v: i32) -> Quality {
        match v {
            3 => Quality::Draft,
            5 => Quality::High,
            _ => Quality::Normal,
        }
    }
}

/// print-color-mode, reduced to what 1-bit output distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorMode {
    /// Hard threshold rendering with the clustered matrix
    #[default]
    BiLevel,
    /// Halftone rendering with the dispersed matrix
    Monochrome,
}

/// Resolved media for one job
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaCol {
    /// Self-describing size name
    pub size_name: String,
    /// Width in 1/2540 inch
    pub size_width: i32,
    /// Length in 1/2540 inch
    pub size_length: i32,
    /// Margins in 1/2540 inch
    pub bottom_margin: i32,
    /// Left margin
    pub left_margin: i32,
    /// Right margin
    pub right_margin: i32,
    /// Top margin
    pub top_margin: i32,
    /// media-source keyword
    pub source: String,
    /// media-top-offset in 1/2540 inch
    pub top_offset: i32,
    /// media-tracking, when declared
    pub tracking: Option<MediaTracking>,
    /// media-type keyword
    pub media_type: String,
}

/// Options resolved for one job
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// The derived 1-bit page header codecs render against
    pub header: PageHeader,
    /// Pages expected in the job
    pub num_pages: u32,
    /// copies
    pub copies: u32,
    /// Resolved media
    pub media: MediaCol,
    /// orientation-requested
    pub orientation: Orientation,
    /// print-color-mode
    pub color_mode: ColorMode,
    /// The dither matrix selected by the color mode
    pub dither: [[u8; 16]; 16],
    /// print-content-optimize keyword
    pub content_optimize: String,
    /// print-darkness, -100..=100, additive to the configured darkness
    pub print_darkness: i32,
    /// printer-darkness-configured from the driver
    pub darkness_configured: i32,
    /// print-quality
    pub print_quality: Quality,
    /// print-speed in 1/2540 inch per second
    pub print_speed: i32,
    /// printer-resolution in dots per inch
    pub resolution: (u32, u32),
    /// Where file-producing codecs put their output (PWG passthrough)
    pub output_path: Option<std::path::PathBuf>,
}

impl JobOptions {
    /// Resolve the job options
    ///
    /// `job_attrs` are the attributes submitted with the job,
    /// `printer_attrs` the printer's `xxx-default` table.
    pub fn prepare(
        job_attrs: &AttrTable,
        printer_attrs: &AttrTable,
        driver: &Driver,
        num_pages: u32,
    ) -> JobOptions {
        // Lookup chain: the job's attribute, else the printer's
        // xxx-default attribute.
        fn find<'a>(
            job: &'a AttrTable,
            printer: &'a AttrTable,
            name: &str,
        ) -> Option<&'a AttrValue> {
            job.get(name)
                .or_else(|| printer.get(&format!("{name}-default")))
        }

        let find = |name: &str| find(job_attrs, printer_attrs, name);
        let find_integer = |name: &str| match find(name) {
            Some(AttrValue::Integer(v) | AttrValue::Enum(v)) => Some(*v),
            _ => None,
        };
        let find_keyword = |name: &str| match find(name) {
            Some(AttrValue::Keyword(v)) => Some(v.as_str()),
            _ => None,
        };

        let copies = find_integer("copies").unwrap_or(1).max(1) as u32;

        // media-col, media, then the driver's ready media.
        let mut media = default_media(driver);
        if let Some(AttrValue::Collection(col)) = find("media-col") {
            if let Some(name) = col.keyword("media-size-name") {
                if let Some(size) = MediaSize::parse(name) {
                    media.size_name = size.name;
                    media.size_width = size.width;
                    media.size_length = size.length;
                }
            } else if let Some(size_col) = col.collection("media-size") {
                if let (Some(x), Some(y)) =
                    (size_col.integer("x-dimension"), size_col.integer("y-dimension"))
                {
                    media.size_name = format!("om_custom_{}x{}mm", x / 100, y / 100);
                    media.size_width = x;
                    media.size_length = y;
                }
            }
            if let Some(source) = col.keyword("media-source") {
                media.source = source.to_string();
            }
            if let Some(offset) = col.integer("media-top-offset") {
                media.top_offset = offset;
            }
            if let Some(tracking) = col.keyword("media-tracking") {
                media.tracking = tracking.parse().ok();
            }
            if let Some(media_type) = col.keyword("media-type") {
                media.media_type = media_type.to_string();
            }
        } else if let Some(name) = find_keyword("media") {
            if let Some(size) = MediaSize::parse(name) {
                media.size_name = size.name;
                media.size_width = size.width;
                media.size_length = size.length;
            }
        }

        let orientation = Orientation::from_ipp(find_integer("orientation-requested").unwrap_or(3));

        let color_mode = match find_keyword("print-color-mode") {
            Some("bi-level") | None => ColorMode::BiLevel,
            Some(_) => ColorMode::Monochrome,
        };
        let dither = match color_mode {
            ColorMode::BiLevel => DITHER_CLUSTERED,
            ColorMode::Monochrome => DITHER_DISPERSED,
        };

        let content_optimize = find_keyword("print-content-optimize")
            .unwrap_or("auto")
            .to_string();

        let print_darkness = find_integer("print-darkness").unwrap_or(0).clamp(-100, 100);

        let print_quality = Quality::from_ipp(find_integer("print-quality").unwrap_or(4));

        let print_speed = find_integer("print-speed").unwrap_or(driver.speed_default);

        let resolution = match find("printer-resolution") {
            Some(AttrValue::Resolution(x, y)) => (*x, *y),
            _ => {
                let index = match print_quality {
                    Quality::Draft => 0,
                    Quality::Normal => driver.resolutions.len() / 2,
                    Quality::High => driver.resolutions.len() - 1,
                };
                driver.resolutions[index]
            }
        };

        let header = derive_header(&media, resolution, copies, num_pages);

        debug!(
            width = header.width,
            height = header.height,
            media = %media.size_name,
            ?resolution,
            "prepared job options"
        );

        JobOptions {
            header,
            num_pages,
            copies,
            media,
            orientation,
            color_mode,
            dither,
            content_optimize,
            print_darkness,
            darkness_configured: driver.darkness_configured,
            print_quality,
            print_speed,
            resolution,
            output_path: None,
        }
    }

    /// Combined darkness, clamped to 0..=100
    pub fn darkness(&self) -> i32 {
        (self.darkness_configured + self.print_darkness).clamp(0, 100)
    }
}

fn default_media(driver: &Driver) -> MediaCol {
    let size = MediaSize::parse(driver.media_default.size_name).unwrap_or(MediaSize {
        name: driver.media_default.size_name.to_string(),
        width: 4 * HUNDREDTHS_PER_INCH,
        length: 6 * HUNDREDTHS_PER_INCH,
    });

    MediaCol {
        size_name: size.name,
        size_width: size.width,
        size_length: size.length,
        bottom_margin: driver.bottom_top,
        left_margin: driver.left_right,
        right_margin: driver.left_right,
        top_margin: driver.bottom_top,
        source: driver.sources.first().copied().unwrap_or("main-roll").to_string(),
        top_offset: driver.top_offset_configured,
        tracking: Some(driver.media_default.tracking),
        media_type: driver.media_default.media_type.to_string(),
    }
}

fn derive_header(media: &MediaCol, resolution: (u32, u32), copies: u32, num_pages: u32) -> PageHeader {
    let (xres, yres) = resolution;
    let width = (media.size_width.max(0) as u32) * xres / HUNDREDTHS_PER_INCH as u32;
    let height = (media.size_length.max(0) as u32) * yres / HUNDREDTHS_PER_INCH as u32;

    let left = (media.left_margin.max(0) as u32) * xres / HUNDREDTHS_PER_INCH as u32;
    let top = (media.top_margin.max(0) as u32) * yres / HUNDREDTHS_PER_INCH as u32;

    let mut header = PageHeader::for_bilevel(width, height, xres, yres);
    header.num_copies = copies;
    header.total_page_count = num_pages;
    header.image_box = ImageBox {
        left,
        top,
        right: width.saturating_sub(left),
        bottom: height.saturating_sub(top),
    };
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zpl_driver() -> Driver {
        Driver::new("zpl_4inch-203dpi-dt").unwrap()
    }

    #[test]
    fn defaults_without_attributes() {
        let options = JobOptions::prepare(&AttrTable::new(), &AttrTable::new(), &zpl_driver(), 1);
        assert_eq!(options.copies, 1);
        assert_eq!(options.color_mode, ColorMode::BiLevel);
        assert_eq!(options.print_quality, Quality::Normal);
        assert_eq!(options.resolution, (203, 203));
        assert_eq!(options.media.size_name, "na_index-4x6_4x6in");
        assert_eq!(options.header.width, 812);
        assert_eq!(options.header.height, 1218);
        assert_eq!(options.header.bits_per_pixel, 1);
        assert_eq!(options.header.bytes_per_line, 102);
    }

    #[test]
    fn job_overrides_printer_defaults() {
        let printer = AttrTable::new().with("copies-default", AttrValue::Integer(4));
        let job = AttrTable::new().with("copies", AttrValue::Integer(2));
        let options = JobOptions::prepare(&job, &printer, &zpl_driver(), 1);
        assert_eq!(options.copies, 2);

        let options = JobOptions::prepare(&AttrTable::new(), &printer, &zpl_driver(), 1);
        assert_eq!(options.copies, 4);
    }

    #[test]
    fn media_col_selects_size() {
        let col = AttrTable::new()
            .with("media-size-name", AttrValue::Keyword("oe_2x1-label_2x1in".into()))
            .with("media-source", AttrValue::Keyword("main-roll".into()))
            .with("media-top-offset", AttrValue::Integer(100))
            .with("media-tracking", AttrValue::Keyword("mark".into()))
            .with("media-type", AttrValue::Keyword("labels".into()));
        let job = AttrTable::new().with("media-col", AttrValue::Collection(col));

        let options = JobOptions::prepare(&job, &AttrTable::new(), &zpl_driver(), 1);
        assert_eq!(options.media.size_width, 2 * 2540);
        assert_eq!(options.media.top_offset, 100);
        assert_eq!(options.media.tracking, Some(MediaTracking::Mark));
        assert_eq!(options.header.width, 406);
    }

    #[test]
    fn media_keyword_shortcut() {
        let job = AttrTable::new().with("media", AttrValue::Keyword("oe_4x2-label_4x2in".into()));
        let options = JobOptions::prepare(&job, &AttrTable::new(), &zpl_driver(), 1);
        assert_eq!(options.media.size_length, 2 * 2540);
    }

    #[test]
    fn darkness_is_additive_and_clamped() {
        let job = AttrTable::new().with("print-darkness", AttrValue::Integer(80));
        let options = JobOptions::prepare(&job, &AttrTable::new(), &zpl_driver(), 1);
        assert_eq!(options.darkness(), 100);

        let job = AttrTable::new().with("print-darkness", AttrValue::Integer(-100));
        let options = JobOptions::prepare(&job, &AttrTable::new(), &zpl_driver(), 1);
        assert_eq!(options.darkness(), 0);
    }

    #[test]
    fn quality_picks_resolution() {
        let mut driver = zpl_driver();
        driver.resolutions = vec![(203, 203), (300, 300), (600, 600)];

        let job = AttrTable::new().with("print-quality", AttrValue::Enum(3));
        assert_eq!(JobOptions::prepare(&job, &AttrTable::new(), &driver, 1).resolution, (203, 203));

        let job = AttrTable::new().with("print-quality", AttrValue::Enum(4));
        assert_eq!(JobOptions::prepare(&job, &AttrTable::new(), &driver, 1).resolution, (300, 300));

        let job = AttrTable::new().with("print-quality", AttrValue::Enum(5));
        assert_eq!(JobOptions::prepare(&job, &AttrTable::new(), &driver, 1).resolution, (600, 600));

        let job = AttrTable::new().with("printer-resolution", AttrValue::Resolution(300, 300));
        assert_eq!(JobOptions::prepare(&job, &AttrTable::new(), &driver, 1).resolution, (300, 300));
    }

    #[test]
    fn color_mode_selects_matrix() {
        let job = AttrTable::new().with("print-color-mode", AttrValue::Keyword("monochrome".into()));
        let options = JobOptions::prepare(&job, &AttrTable::new(), &zpl_driver(), 1);
        assert_eq!(options.color_mode, ColorMode::Monochrome);
        assert_eq!(options.dither, DITHER_DISPERSED);
    }

    #[test]
    fn imageable_box_respects_margins() {
        let driver = Driver::new("dymo_lw-450").unwrap();
        let options = JobOptions::prepare(&AttrTable::new(), &AttrTable::new(), &driver, 1);
        // 100/2540 in left margin at 300 dpi = 11 pixels; 525/2540 in
        // top margin = 62 pixels.
        assert_eq!(options.header.image_box.left, 11);
        assert_eq!(options.header.image_box.top, 62);
        assert_eq!(
            options.header.image_box.right,
            options.header.width - 11
        );
    }

    #[test]
    fn every_driver_default_media_parses() {
        for name in Driver::known_drivers() {
            let driver = Driver::new(name).unwrap();
            assert!(
                MediaSize::parse(driver.media_default.size_name).is_some(),
                "{name}: {}",
                driver.media_default.size_name
            );
        }
    }
}
