/// Projections of a `TimeSeries` for the two consumers.
///
/// - Plotting gets bare `(timestamp, value)` pairs in the caller's display zone.
/// - Export gets `ExportRecord`s carrying local time, offset and UTC time
///   together, whatever zone the page happens to display.

use chrono::NaiveDateTime;
use serde::ser::{SerializeTuple, Serializer};
use serde::Serialize;

use crate::model::{Granularity, Observation, TimeSeries, ValueKind};
use crate::timezone::DisplayZone;

/// Timestamp layout used in export documents and plot payloads.
pub const MINUTE_FORMAT: &str = "%Y-%m-%dT%H:%M";

pub fn format_minute(t: NaiveDateTime) -> String {
    t.format(MINUTE_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// Plot projection
// ---------------------------------------------------------------------------

/// One plotted point. Serializes as `["2020-06-01T00:00", 4340.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotPoint {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl Serialize for PlotPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&format_minute(self.timestamp))?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

/// Points in series order, timestamps in `zone`.
///
/// Daily series are whole days and are never zone-shifted.
pub fn plot_points(series: &TimeSeries, zone: DisplayZone) -> Vec<PlotPoint> {
    series
        .iter()
        .map(|obs| PlotPoint {
            timestamp: match series.granularity {
                Granularity::Daily => obs.timestamp_local(),
                Granularity::Instantaneous => zone.to_local(obs.timestamp_utc()),
            },
            value: obs.value,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Export projection
// ---------------------------------------------------------------------------

/// Fully annotated export row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRecord {
    pub local_time: NaiveDateTime,
    /// Hours from UTC; fractional for half-hour zones.
    pub utc_offset_hours: f64,
    pub utc_time: NaiveDateTime,
    pub agency_code: Option<String>,
    pub site_code: Option<String>,
    /// "observed", "forecast" or "usgs".
    pub kind: &'static str,
    pub value: f64,
    pub value_code: String,
    pub quality_code: Option<u8>,
}

impl From<&Observation> for ExportRecord {
    fn from(obs: &Observation) -> Self {
        let (agency_code, site_code) = match &obs.kind {
            ValueKind::Usgs {
                agency_code,
                site_code,
            } => (Some(agency_code.clone()), Some(site_code.clone())),
            _ => (None, None),
        };
        ExportRecord {
            local_time: obs.timestamp_local(),
            utc_offset_hours: obs.utc_offset_hours(),
            utc_time: obs.timestamp_utc(),
            agency_code,
            site_code,
            kind: obs.kind.label(),
            value: obs.value,
            value_code: obs.value_code.clone(),
            quality_code: obs.quality_code(),
        }
    }
}

pub fn export_records(series: &TimeSeries) -> Vec<ExportRecord> {
    series.iter().map(ExportRecord::from).collect()
}

// ---------------------------------------------------------------------------
// Data-presence flags
// ---------------------------------------------------------------------------

/// USGS pages show a series when it has any point at all.
pub fn has_points(series: &TimeSeries) -> bool {
    !series.is_empty()
}

/// AHPS pages show a series only when its values sum above zero, so an
/// all-zero (never reported) variable is hidden.
pub fn has_positive_total(series: &TimeSeries) -> bool {
    series.value_total() > 0.0
}
