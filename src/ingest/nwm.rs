/// National Water Model forecast client.
///
/// The forecast API returns a WaterML-flavoured document, but the values
/// are read by delimiter scraping rather than XML parsing: the body is split
/// on `dateTimeUTC=`, and each chunk after the first holds one point. Within
/// a chunk, single-space-separated token 0 is the quoted timestamp and
/// token 7 carries the value up to the next `<`.
///
/// Chunks that do not fit that shape are skipped with a warning.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::warn;

use crate::ingest::client::Upstream;
use crate::model::SourceError;

const POINT_MARKER: &str = "dateTimeUTC=";
const VALUE_TOKEN: usize = 7;
/// Trailing characters of the timestamp token that are not part of HH:MM
/// (":SS" on a bare time, or "SSZ"-style suffixes).
const TIMESTAMP_TAIL: usize = 3;

/// Hours subtracted from "now" when picking the initial short-range run.
const INITIAL_RUN_LAG_HOURS: u32 = 7;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// NWM model configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ForecastConfig {
    #[default]
    AnalysisAssim,
    ShortRange,
    MediumRange,
}

impl ForecastConfig {
    pub const ALL: [ForecastConfig; 3] = [
        ForecastConfig::AnalysisAssim,
        ForecastConfig::ShortRange,
        ForecastConfig::MediumRange,
    ];

    /// Query-string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastConfig::AnalysisAssim => "analysis_assim",
            ForecastConfig::ShortRange => "short_range",
            ForecastConfig::MediumRange => "medium_range",
        }
    }

    /// Menu label.
    pub fn label(&self) -> &'static str {
        match self {
            ForecastConfig::AnalysisAssim => "Analysis and Assimilation",
            ForecastConfig::ShortRange => "Short",
            ForecastConfig::MediumRange => "Medium",
        }
    }
}

impl FromStr for ForecastConfig {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ForecastConfig::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SourceError::InvalidRequest(format!("unknown forecast config '{}'", s)))
    }
}

impl fmt::Display for ForecastConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One forecast query against a stream reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForecastRequest {
    pub config: ForecastConfig,
    /// NHDPlus reach identifier.
    pub comid: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Model run hour, 0-23.
    pub hour: u8,
}

impl ForecastRequest {
    /// The request a page opens with: today's short-range run from
    /// seven hours ago, or the 00 run early in the day.
    pub fn initial_at(comid: impl Into<String>, today: NaiveDate, now_hour: u32) -> Self {
        let hour = if now_hour > INITIAL_RUN_LAG_HOURS {
            now_hour - INITIAL_RUN_LAG_HOURS
        } else {
            0
        };
        ForecastRequest {
            config: ForecastConfig::ShortRange,
            comid: comid.into(),
            start_date: today,
            end_date: today,
            hour: u8::try_from(hour.min(23)).unwrap_or(0),
        }
    }

    /// Two-digit run hour for the query string.
    pub fn hour_param(&self) -> String {
        format!("{:02}", self.hour)
    }
}

pub fn build_forecast_url(base: &str, request: &ForecastRequest) -> String {
    format!(
        "{}?config={}&geom=channel_rt&variable=streamflow&COMID={}&lon=&lat=&startDate={}&endDate={}&time={}&lag=",
        base,
        request.config.as_str(),
        request.comid,
        request.start_date,
        request.end_date,
        request.hour_param()
    )
}

pub fn fetch_forecast<U: Upstream + ?Sized>(
    upstream: &U,
    base: &str,
    request: &ForecastRequest,
) -> Result<Vec<ForecastPoint>, SourceError> {
    let body = upstream.get_text(&build_forecast_url(base, request))?;
    Ok(parse_forecast(&body))
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub valid_utc: NaiveDateTime,
    pub value: f64,
}

/// Scrapes forecast points from a response body. Text before the first
/// marker is ignored; an empty or marker-free body gives no points.
pub fn parse_forecast(text: &str) -> Vec<ForecastPoint> {
    let mut points = Vec::new();
    for chunk in text.split(POINT_MARKER).skip(1) {
        match parse_chunk(chunk) {
            Ok(point) => points.push(point),
            Err(reason) => warn!(reason, "skipping unreadable forecast point"),
        }
    }
    points
}

fn parse_chunk(chunk: &str) -> Result<ForecastPoint, &'static str> {
    let tokens: Vec<&str> = chunk.split(' ').collect();

    let stamp = tokens[0].replace('T', " ").replace('"', "");
    let keep = stamp.chars().count().saturating_sub(TIMESTAMP_TAIL);
    let stamp: String = stamp.chars().take(keep).collect();

    let (date, time) = stamp.split_once(' ').ok_or("timestamp has no time part")?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| "bad date")?;

    let mut clock = time.split(':');
    let hour: u32 = clock
        .next()
        .and_then(|h| h.parse().ok())
        .ok_or("bad hour")?;
    let minute: u32 = clock
        .next()
        .and_then(|m| m.parse().ok())
        .ok_or("bad minute")?;
    let valid_utc = date.and_hms_opt(hour, minute, 0).ok_or("time out of range")?;

    let raw = tokens.get(VALUE_TOKEN).ok_or("missing value token")?;
    let value = raw
        .split('<')
        .next()
        .unwrap_or("")
        .replace('>', "")
        .trim()
        .parse::<f64>()
        .map_err(|_| "non-numeric value")?;

    Ok(ForecastPoint { valid_utc, value })
}
