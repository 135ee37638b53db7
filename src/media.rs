//! Self-describing PWG media size names
//!
//! Label media is identified by PWG 5101.1 self-describing names such as
//! `oe_address-label_1.25x3.5in` or `om_address-small_24x83mm`.  The last
//! underscore-separated component carries the dimensions; everything in
//! between is a human-oriented size name.  Roll printers additionally
//! advertise `roll_min_…`/`roll_max_…` entries describing the custom size
//! range.
//!
//! All dimensions are expressed in hundredths of millimetres
//! (1/2540 inch), the unit used throughout the service.

/// Hundredths of millimetres per inch
pub const HUNDREDTHS_PER_INCH: i32 = 2540;

/// A parsed media size
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaSize {
    /// The full self-describing PWG name
    pub name: String,
    /// Width in 1/2540 inch (hundredths of millimetres)
    pub width: i32,
    /// Length in 1/2540 inch (hundredths of millimetres)
    pub length: i32,
}

impl MediaSize {
    /// Parse a self-describing PWG media size name
    ///
    /// Returns `None` when the trailing dimension component is missing or
    /// malformed.
    pub fn parse(name: &str) -> Option<MediaSize> {
        let dims = name.rsplit('_').next()?;

        let (dims, unit_scale) = if let Some(d) = dims.strip_suffix("in") {
            (d, f64::from(HUNDREDTHS_PER_INCH))
        } else if let Some(d) = dims.strip_suffix("mm") {
            (d, 100.0)
        } else {
            return None;
        };

        let (w, l) = dims.split_once('x')?;
        let width = parse_dimension(w, unit_scale)?;
        let length = parse_dimension(l, unit_scale)?;

        Some(MediaSize {
            name: name.to_string(),
            width,
            length,
        })
    }

    /// Whether this entry names the minimum custom roll size
    pub fn is_roll_min(name: &str) -> bool {
        name.starts_with("roll_min_")
    }

    /// Whether this entry names the maximum custom roll size
    pub fn is_roll_max(name: &str) -> bool {
        name.starts_with("roll_max_")
    }

    /// Width in whole millimetres, rounded
    pub fn width_mm(&self) -> i32 {
        (self.width + 50) / 100
    }

    /// Length in whole millimetres, rounded
    pub fn length_mm(&self) -> i32 {
        (self.length + 50) / 100
    }
}

fn parse_dimension(s: &str, scale: f64) -> Option<i32> {
    let v: f64 = s.trim().parse().ok()?;
    if !(0.0..=10_000.0).contains(&v) {
        return None;
    }
    Some((v * scale).round() as i32)
}

/// Find the supported size matching the given dimensions, if any
///
/// Used to map auto-detected label lengths (e.g. from the ZPL `~HS`
/// response) back onto a named size.  A zero dimension matches anything.
pub fn match_size<'a>(media: &'a [&'a str], width: i32, length: i32) -> Option<MediaSize> {
    media
        .iter()
        .filter(|name| !MediaSize::is_roll_min(name) && !MediaSize::is_roll_max(name))
        .filter_map(|name| MediaSize::parse(name))
        .find(|size| {
            (width == 0 || (size.width - width).abs() < 100)
                && (length == 0 || (size.length - length).abs() < 100)
        })
}
