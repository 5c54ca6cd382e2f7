/// Core data types for the gauge time-series pipeline.
///
/// This module defines the shared domain model imported by all other modules:
/// the canonical `Observation`, the ordered `TimeSeries` built from it, the
/// per-request `SeriesMetadata` header, and the `SourceError` taxonomy.
/// It contains no I/O.

use chrono::{Duration, FixedOffset, NaiveDateTime, Offset, Utc};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// USGS parameter code for discharge (streamflow), in cubic feet per second.
pub const PARAM_DISCHARGE: &str = "00060";

/// Sentinel written for USGS daily values reported as "Ice" or left empty.
pub const DV_NO_DATA: f64 = -9999.0;

/// Value substituted for USGS instantaneous values reported as "Ice".
pub const IV_ICE_VALUE: f64 = 0.0;

/// Scale applied to AHPS flows reported in thousands of cfs.
pub const KCFS_TO_CFS: f64 = 1000.0;

/// Unit label for discharge after normalization.
pub const UNITS_CFS: &str = "cfs";

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// What an observation's value represents, and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    /// A USGS NWIS reading, tagged with its agency and site codes.
    Usgs { agency_code: String, site_code: String },
    /// An AHPS observed hydrograph point.
    Observed,
    /// A forecast point (AHPS forecast section or National Water Model).
    Forecast,
}

impl ValueKind {
    /// Label used in export documents ("observed" / "forecast" / "usgs").
    pub fn label(&self) -> &'static str {
        match self {
            ValueKind::Usgs { .. } => "usgs",
            ValueKind::Observed => "observed",
            ValueKind::Forecast => "forecast",
        }
    }

    /// AHPS quality code: 1 = observed, 3 = forecast. USGS series carry none.
    pub fn quality_code(&self) -> Option<u8> {
        match self {
            ValueKind::Usgs { .. } => None,
            ValueKind::Observed => Some(1),
            ValueKind::Forecast => Some(3),
        }
    }
}

/// A single normalized measurement.
///
/// The local timestamp, UTC timestamp, and offset are private so they can
/// only change together: `timestamp_utc == timestamp_local - utc_offset`
/// holds for every value of this type. Re-zoning goes through `rezone`,
/// which keeps the instant and recomputes the local side.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    timestamp_local: NaiveDateTime,
    timestamp_utc: NaiveDateTime,
    utc_offset: FixedOffset,
    pub value: f64,
    pub kind: ValueKind,
    pub units: String,
    /// Upstream qualifier ("A", "P", "A:e", …); empty when the source has none.
    pub value_code: String,
}

impl Observation {
    /// Builds an observation from a civil time reported in a zone with the
    /// given offset (negative west of Greenwich, e.g. -05:00 for EST).
    pub fn from_local(
        local: NaiveDateTime,
        utc_offset: FixedOffset,
        value: f64,
        kind: ValueKind,
        units: impl Into<String>,
    ) -> Self {
        let timestamp_utc = local - offset_duration(utc_offset);
        Observation {
            timestamp_local: local,
            timestamp_utc,
            utc_offset,
            value,
            kind,
            units: units.into(),
            value_code: String::new(),
        }
    }

    /// Builds an observation from a UTC instant, projecting it into the
    /// given offset for the local side.
    pub fn from_utc(
        utc: NaiveDateTime,
        utc_offset: FixedOffset,
        value: f64,
        kind: ValueKind,
        units: impl Into<String>,
    ) -> Self {
        Observation {
            timestamp_local: utc + offset_duration(utc_offset),
            timestamp_utc: utc,
            utc_offset,
            value,
            kind,
            units: units.into(),
            value_code: String::new(),
        }
    }

    pub fn with_value_code(mut self, value_code: impl Into<String>) -> Self {
        self.value_code = value_code.into();
        self
    }

    pub fn timestamp_local(&self) -> NaiveDateTime {
        self.timestamp_local
    }

    pub fn timestamp_utc(&self) -> NaiveDateTime {
        self.timestamp_utc
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Signed offset in hours; fractional for half-hour zones (HAT → -2.5).
    pub fn utc_offset_hours(&self) -> f64 {
        f64::from(self.utc_offset.local_minus_utc()) / 3600.0
    }

    /// Same instant, new local offset. Both timestamps are recomputed together.
    pub fn rezone(&self, utc_offset: FixedOffset) -> Self {
        Observation {
            timestamp_local: self.timestamp_utc + offset_duration(utc_offset),
            utc_offset,
            ..self.clone()
        }
    }

    pub fn quality_code(&self) -> Option<u8> {
        self.kind.quality_code()
    }
}

fn offset_duration(offset: FixedOffset) -> Duration {
    Duration::seconds(i64::from(offset.local_minus_utc()))
}

/// UTC as a `FixedOffset`, for sources that report UTC directly.
pub fn utc_offset_zero() -> FixedOffset {
    Utc.fix()
}

// ---------------------------------------------------------------------------
// Time series
// ---------------------------------------------------------------------------

/// Sampling granularity of a series. Daily values are whole-day dates with
/// no zone; they are never projected into a display zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Instantaneous,
    Daily,
}

/// Which AHPS hydrograph quantity a series carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Flow,
    Stage,
}

impl Variable {
    /// Numeric variable code written into AHPS exports (0 = flow, 1 = stage).
    pub fn code(&self) -> u8 {
        match self {
            Variable::Flow => 0,
            Variable::Stage => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Variable::Flow => "Flow",
            Variable::Stage => "Stage",
        }
    }

    pub fn unit_name(&self) -> &'static str {
        match self {
            Variable::Flow => "Cubic Feet per Second",
            Variable::Stage => "Feet",
        }
    }
}

impl std::str::FromStr for Variable {
    type Err = SourceError;

    /// Accepts the name ("flow", "stage") or the export code ("0", "1").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flow" | "0" => Ok(Variable::Flow),
            "stage" | "1" => Ok(Variable::Stage),
            other => Err(SourceError::InvalidRequest(format!("unknown variable '{}'", other))),
        }
    }
}

/// An ordered sequence of observations (ascending timestamp).
///
/// USGS feeds arrive in order. AHPS documents interleave observed and
/// forecast sections, so their series are sorted after parsing with
/// `sort_chronologically`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub granularity: Granularity,
    observations: Vec<Observation>,
}

impl TimeSeries {
    pub fn new(granularity: Granularity) -> Self {
        TimeSeries {
            granularity,
            observations: Vec::new(),
        }
    }

    pub fn from_observations(granularity: Granularity, observations: Vec<Observation>) -> Self {
        TimeSeries {
            granularity,
            observations,
        }
    }

    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    /// Stable sort by UTC instant; ties keep their arrival order.
    pub fn sort_chronologically(&mut self) {
        self.observations.sort_by_key(|o| o.timestamp_utc());
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    pub fn as_slice(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Every observation re-projected to `utc_offset`; instants unchanged.
    pub fn rezoned(&self, utc_offset: FixedOffset) -> TimeSeries {
        TimeSeries {
            granularity: self.granularity,
            observations: self.observations.iter().map(|o| o.rezone(utc_offset)).collect(),
        }
    }

    /// Sum of all values. AHPS pages treat a positive total as "has data".
    pub fn value_total(&self) -> f64 {
        self.observations.iter().map(|o| o.value).sum()
    }
}

impl<'a> IntoIterator for &'a TimeSeries {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Descriptive header attached to an export document. Built once per fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesMetadata {
    pub gauge_id: String,
    pub site_name: String,
    pub contact: Option<String>,
    /// Retrieval / generation time as reported upstream (not reparsed).
    pub retrieved: Option<String>,
    /// Coordinates as supplied by the caller, passed through verbatim.
    pub latitude: String,
    pub longitude: String,
    pub variable_code: String,
    pub variable_name: String,
    pub unit_name: String,
    pub unit_abbreviation: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching or processing upstream gauge data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Non-2xx HTTP response.
    #[error("HTTP error: {0}")]
    Http(u16),
    /// Connection refused, DNS failure, timeout, unreadable body.
    #[error("Source unreachable: {0}")]
    Unreachable(String),
    /// The document as a whole could not be parsed (e.g. malformed XML).
    #[error("Source data invalid: {0}")]
    InvalidDocument(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Unknown time zone: {0}")]
    UnknownZone(String),
    /// A caller-supplied parameter (span, menu key, variable) was not understood.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SourceError {
    /// Transport-level failures: the upstream could not give us a document.
    /// The forecast overlay degrades to empty on exactly these.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::Http(_) | SourceError::Unreachable(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn usgs() -> ValueKind {
        ValueKind::Usgs {
            agency_code: "USGS".to_string(),
            site_code: "01234567".to_string(),
        }
    }

    #[test]
    fn test_from_local_shifts_utc_by_offset() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let obs = Observation::from_local(at(2020, 6, 1, 12, 0), est, 150.0, usgs(), "cfs");
        assert_eq!(obs.timestamp_utc(), at(2020, 6, 1, 17, 0));
        assert_eq!(obs.utc_offset_hours(), -5.0);
    }

    #[test]
    fn test_from_utc_projects_local_side() {
        let offset = FixedOffset::west_opt(6 * 3600).unwrap();
        let obs = Observation::from_utc(at(2021, 1, 1, 3, 0), offset, 1.0, ValueKind::Observed, "ft");
        assert_eq!(obs.timestamp_local(), at(2020, 12, 31, 21, 0));
    }

    #[test]
    fn test_rezone_keeps_instant_and_recomputes_local() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let obs = Observation::from_local(at(2020, 6, 1, 12, 0), est, 150.0, usgs(), "cfs");
        let rezoned = obs.rezone(utc_offset_zero());
        assert_eq!(rezoned.timestamp_utc(), obs.timestamp_utc());
        assert_eq!(rezoned.timestamp_local(), at(2020, 6, 1, 17, 0));
        assert_eq!(rezoned.utc_offset_hours(), 0.0);
    }

    #[test]
    fn test_half_hour_offset_is_fractional() {
        let hat = FixedOffset::west_opt(9000).unwrap();
        let obs = Observation::from_local(at(2020, 6, 1, 12, 0), hat, 1.0, usgs(), "cfs");
        assert_eq!(obs.utc_offset_hours(), -2.5);
        assert_eq!(obs.timestamp_utc(), at(2020, 6, 1, 14, 30));
    }

    #[test]
    fn test_quality_codes_by_kind() {
        assert_eq!(ValueKind::Observed.quality_code(), Some(1));
        assert_eq!(ValueKind::Forecast.quality_code(), Some(3));
        assert_eq!(usgs().quality_code(), None);
    }

    #[test]
    fn test_sort_is_stable_for_equal_instants() {
        let t = at(2020, 1, 1, 0, 0);
        let zero = utc_offset_zero();
        let mut series = TimeSeries::from_observations(
            Granularity::Instantaneous,
            vec![
                Observation::from_utc(t + Duration::hours(1), zero, 3.0, ValueKind::Forecast, ""),
                Observation::from_utc(t, zero, 1.0, ValueKind::Observed, ""),
                Observation::from_utc(t, zero, 2.0, ValueKind::Forecast, ""),
            ],
        );
        series.sort_chronologically();
        let values: Vec<f64> = series.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_rezoned_series_keeps_order_and_instants() {
        let zero = utc_offset_zero();
        let series = TimeSeries::from_observations(
            Granularity::Instantaneous,
            vec![
                Observation::from_utc(at(2020, 6, 1, 12, 0), zero, 1.0, ValueKind::Observed, "ft"),
                Observation::from_utc(at(2020, 6, 1, 18, 0), zero, 2.0, ValueKind::Forecast, "ft"),
            ],
        );
        let cst = FixedOffset::west_opt(6 * 3600).unwrap();
        let rezoned = series.rezoned(cst);
        assert_eq!(rezoned.len(), 2);
        assert_eq!(rezoned.as_slice()[0].timestamp_local(), at(2020, 6, 1, 6, 0));
        assert_eq!(rezoned.as_slice()[1].timestamp_utc(), at(2020, 6, 1, 18, 0));
    }

    #[test]
    fn test_variable_parsing_and_codes() {
        assert_eq!("Flow".parse::<Variable>().unwrap(), Variable::Flow);
        assert_eq!("1".parse::<Variable>().unwrap(), Variable::Stage);
        assert!("discharge".parse::<Variable>().is_err());
        assert_eq!(Variable::Stage.code(), 1);
        assert_eq!(Variable::Flow.unit_name(), "Cubic Feet per Second");
    }

    #[test]
    fn test_unavailable_errors() {
        assert!(SourceError::Http(503).is_unavailable());
        assert!(SourceError::Unreachable("timeout".into()).is_unavailable());
        assert!(!SourceError::InvalidDocument("bad xml".into()).is_unavailable());
    }

    #[test]
    fn test_error_display_matches_log_classification_keywords() {
        assert_eq!(SourceError::Http(500).to_string(), "HTTP error: 500");
        assert!(SourceError::InvalidDocument("x".into()).to_string().contains("invalid"));
    }
}
