/// Time zone resolution for gauge feeds and display.
///
/// Two independent mechanisms live here:
///
/// - A closed table of zone abbreviations ("EST", "AKDT", "HAT", …) mapped to
///   fixed offsets. USGS instantaneous-value rdb files tag every row with one
///   of these, and the offset is taken at face value with no DST logic.
/// - The display-zone menu (UTC, Hawaii, Alaska, Pacific, Arizona, Mountain,
///   Central, Eastern). Each entry maps to an IANA zone, and conversion
///   applies that zone's calendar-dependent DST rules via `chrono-tz`.
///
/// All conversions are pure functions of (instant, zone).

use std::fmt;
use std::str::FromStr;

use chrono::{FixedOffset, LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::SourceError;

// ---------------------------------------------------------------------------
// Fixed-offset abbreviation table
// ---------------------------------------------------------------------------

/// Zone abbreviation → minutes to ADD to local civil time to reach UTC.
///
/// Includes the French-Canadian variants (HNE, HAE, …) and the legacy
/// half-hour Newfoundland entries USGS still emits for some sites.
const ABBREVIATION_TABLE: &[(&str, i32)] = &[
    ("EGST", 0),
    ("GMT", 0),
    ("EGT", 60),
    ("PMDT", 120),
    ("WGST", 120),
    ("NDT", 150),
    ("HAT", 150),
    ("ADT", 180),
    ("HAA", 180),
    ("PMST", 180),
    ("WGT", 180),
    ("AT", 180),
    ("NST", 210),
    ("HNT", 210),
    ("AST", 240),
    ("HNA", 240),
    ("EDT", 240),
    ("HAE", 240),
    ("ET", 240),
    ("CDT", 300),
    ("EST", 300),
    ("CT", 300),
    ("HAC", 300),
    ("HNE", 300),
    ("CST", 360),
    ("MDT", 360),
    ("MT", 360),
    ("HNC", 360),
    ("HAR", 360),
    ("MST", 420),
    ("PDT", 420),
    ("PT", 420),
    ("HNR", 420),
    ("HAP", 420),
    ("AKDT", 480),
    ("PST", 480),
    ("HNP", 480),
    ("AKST", 540),
    ("HADT", 540),
    ("HAST", 600),
];

/// Looks up a zone abbreviation (case-insensitive) in the fixed table.
///
/// Returns the zone's offset from UTC, e.g. `EST` → `-05:00`, `HAT` → `-02:30`.
/// Returns `None` for anything not in the table; callers decide the fallback.
pub fn lookup_abbreviation(abbreviation: &str) -> Option<FixedOffset> {
    let wanted = abbreviation.trim().to_ascii_uppercase();
    ABBREVIATION_TABLE
        .iter()
        .find(|(abbr, _)| *abbr == wanted)
        .and_then(|(_, minutes)| FixedOffset::west_opt(minutes * 60))
}

/// All abbreviations the fixed table recognizes.
pub fn known_abbreviations() -> impl Iterator<Item = &'static str> {
    ABBREVIATION_TABLE.iter().map(|(abbr, _)| *abbr)
}

// ---------------------------------------------------------------------------
// Display zones
// ---------------------------------------------------------------------------

/// Errors from named-zone conversion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimezoneError {
    #[error("unparseable civil time '{0}' (expected YYYY-MM-DD HH:MM:SS)")]
    InvalidCivilTime(String),
    #[error("{local} does not exist in {zone} (DST gap)")]
    Nonexistent { local: NaiveDateTime, zone: &'static str },
    #[error("{local} is ambiguous in {zone} (DST fold)")]
    Ambiguous { local: NaiveDateTime, zone: &'static str },
}

/// Civil-time format the display resolver accepts for UTC strings.
pub const CIVIL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A zone from the display menu. `Utc` means "no conversion".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisplayZone {
    #[default]
    #[serde(rename = "UTC", alias = "Coordinated")]
    Utc,
    Hawaii,
    Alaska,
    Pacific,
    Arizona,
    Mountain,
    Central,
    Eastern,
}

impl DisplayZone {
    /// Menu order.
    pub const ALL: [DisplayZone; 8] = [
        DisplayZone::Utc,
        DisplayZone::Hawaii,
        DisplayZone::Alaska,
        DisplayZone::Pacific,
        DisplayZone::Arizona,
        DisplayZone::Mountain,
        DisplayZone::Central,
        DisplayZone::Eastern,
    ];

    /// Menu key as submitted by the page ("UTC", "Hawaii", …).
    pub fn key(self) -> &'static str {
        match self {
            DisplayZone::Utc => "UTC",
            DisplayZone::Hawaii => "Hawaii",
            DisplayZone::Alaska => "Alaska",
            DisplayZone::Pacific => "Pacific",
            DisplayZone::Arizona => "Arizona",
            DisplayZone::Mountain => "Mountain",
            DisplayZone::Central => "Central",
            DisplayZone::Eastern => "Eastern",
        }
    }

    /// Human-readable menu label.
    pub fn label(self) -> &'static str {
        match self {
            DisplayZone::Utc => "Coordinated Time",
            DisplayZone::Hawaii => "Hawaii Time",
            DisplayZone::Alaska => "Alaska Time",
            DisplayZone::Pacific => "Pacific Time",
            DisplayZone::Arizona => "Arizona Time",
            DisplayZone::Mountain => "Mountain Time",
            DisplayZone::Central => "Central Time",
            DisplayZone::Eastern => "Eastern Time",
        }
    }

    /// IANA identifier, or `None` for UTC.
    pub fn iana_name(self) -> Option<&'static str> {
        self.tz().map(|tz| tz.name())
    }

    fn tz(self) -> Option<Tz> {
        match self {
            DisplayZone::Utc => None,
            DisplayZone::Hawaii => Some(chrono_tz::US::Hawaii),
            DisplayZone::Alaska => Some(chrono_tz::US::Alaska),
            DisplayZone::Pacific => Some(chrono_tz::US::Pacific),
            DisplayZone::Arizona => Some(chrono_tz::US::Arizona),
            DisplayZone::Mountain => Some(chrono_tz::US::Mountain),
            DisplayZone::Central => Some(chrono_tz::US::Central),
            DisplayZone::Eastern => Some(chrono_tz::US::Eastern),
        }
    }

    /// Resolves an optional menu selection; no selection (or a blank one)
    /// means UTC.
    pub fn from_selection(selection: Option<&str>) -> Result<Self, SourceError> {
        match selection.map(str::trim) {
            None | Some("") => Ok(DisplayZone::Utc),
            Some(key) => key.parse(),
        }
    }

    /// Projects a UTC instant into this zone's civil time.
    pub fn to_local(self, utc: NaiveDateTime) -> NaiveDateTime {
        match self.tz() {
            None => utc,
            Some(tz) => tz.from_utc_datetime(&utc).naive_local(),
        }
    }

    /// Inverse of `to_local`. Civil times inside a DST gap or fold have no
    /// single answer and are reported as errors rather than guessed.
    pub fn to_utc(self, local: NaiveDateTime) -> Result<NaiveDateTime, TimezoneError> {
        let Some(tz) = self.tz() else {
            return Ok(local);
        };
        match tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(dt.naive_utc()),
            LocalResult::Ambiguous(_, _) => Err(TimezoneError::Ambiguous {
                local,
                zone: tz.name(),
            }),
            LocalResult::None => Err(TimezoneError::Nonexistent {
                local,
                zone: tz.name(),
            }),
        }
    }
}

impl FromStr for DisplayZone {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        // "Coordinated" is what the pages fall back to when nothing was picked.
        if key.eq_ignore_ascii_case("coordinated") {
            return Ok(DisplayZone::Utc);
        }
        DisplayZone::ALL
            .into_iter()
            .find(|zone| zone.key().eq_ignore_ascii_case(key))
            .ok_or_else(|| SourceError::UnknownZone(key.to_string()))
    }
}

impl fmt::Display for DisplayZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Converts a UTC civil string ("YYYY-MM-DD HH:MM:SS") into local civil
/// time in the given display zone.
pub fn utc_civil_to_local(utc: &str, zone: DisplayZone) -> Result<NaiveDateTime, TimezoneError> {
    let parsed = NaiveDateTime::parse_from_str(utc.trim(), CIVIL_FORMAT)
        .map_err(|_| TimezoneError::InvalidCivilTime(utc.to_string()))?;
    Ok(zone.to_local(parsed))
}

/// Converts a local civil string in the given zone back to a UTC civil string.
pub fn local_civil_to_utc(local: &str, zone: DisplayZone) -> Result<String, TimezoneError> {
    let parsed = NaiveDateTime::parse_from_str(local.trim(), CIVIL_FORMAT)
        .map_err(|_| TimezoneError::InvalidCivilTime(local.to_string()))?;
    Ok(zone.to_utc(parsed)?.format(CIVIL_FORMAT).to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
