/// NWS AHPS hydrograph client.
///
/// The hydrograph document looks like:
///
/// ```text
/// <site name=".." generationtime=".." timezone="..">
///   <observed>
///     <datum>
///       <valid timezone="UTC">2020-06-01T12:00:00-00:00</valid>
///       <primary name="Stage" units="ft">5.20</primary>
///       <secondary name="Flow" units="kcfs">2.50</secondary>
///     </datum>
///   </observed>
///   <forecast> ...same datum shape... </forecast>
/// </site>
/// ```
///
/// Only `observed` and `forecast` sections are read. Each datum becomes one
/// record. Fields a datum leaves out are filled according to
/// `MissingFieldPolicy`.

use chrono::NaiveDateTime;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use tracing::warn;

use crate::ingest::client::Upstream;
use crate::model::{KCFS_TO_CFS, SourceError, UNITS_CFS, ValueKind};

const UNITS_KCFS: &str = "kcfs";
/// Minute precision; seconds and the trailing offset are dropped.
const VALID_TIME_PREFIX: usize = 16;
const VALID_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

pub fn build_hydrograph_url(base: &str, gauge_id: &str) -> String {
    format!("{}?gage={}&output=xml", base, gauge_id.to_lowercase())
}

pub fn fetch_hydrograph<U: Upstream + ?Sized>(
    upstream: &U,
    base: &str,
    gauge_id: &str,
    policy: MissingFieldPolicy,
) -> Result<Hydrograph, SourceError> {
    let body = upstream.get_text(&build_hydrograph_url(base, gauge_id))?;
    parse_hydrograph(&body, policy)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a datum that omits Stage or Flow is filled in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// Reuse the last value seen anywhere earlier in the document
    /// (0 / "" before any). Downstream pages have always been drawn this way.
    #[default]
    CarryForward,
    /// Start every datum from 0 / "" and no timestamp.
    ResetPerRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Observed,
    Forecast,
}

impl SectionKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"observed" => Some(SectionKind::Observed),
            b"forecast" => Some(SectionKind::Forecast),
            _ => None,
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            SectionKind::Observed => ValueKind::Observed,
            SectionKind::Forecast => ValueKind::Forecast,
        }
    }
}

/// One datum, flow already normalized to cfs where the source used kcfs.
#[derive(Debug, Clone, PartialEq)]
pub struct HydrographRecord {
    pub section: SectionKind,
    pub valid_utc: NaiveDateTime,
    pub stage: f64,
    pub stage_units: String,
    pub flow: f64,
    pub flow_units: String,
}

const MAX_OFFSET_DIGITS: usize = 2;

/// Attributes of the root `site` element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydrographHeader {
    pub name: Option<String>,
    pub generation_time: Option<String>,
    pub timezone: Option<String>,
}

impl HydrographHeader {
    /// Offset in hours declared by the `timezone` attribute: its digits,
    /// negated ("GMT-5" and "EST5" both give -5). No digits gives 0; more
    /// than two digits is not an hour count.
    pub fn declared_offset_hours(&self) -> Result<i32, SourceError> {
        let timezone = self.timezone.as_deref().unwrap_or("");
        let digits: String = timezone.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Ok(0);
        }
        if digits.len() > MAX_OFFSET_DIGITS {
            return Err(SourceError::InvalidDocument(format!(
                "timezone attribute '{}' is not an hour offset",
                timezone
            )));
        }
        digits
            .parse::<i32>()
            .map(|h| -h)
            .map_err(|_| SourceError::InvalidDocument(format!("timezone attribute '{}'", timezone)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hydrograph {
    pub header: HydrographHeader,
    /// Ascending by `valid_utc`; ties keep document order.
    pub records: Vec<HydrographRecord>,
    /// Datums dropped because no timestamp was available.
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a hydrograph document. Malformed XML fails the whole document;
/// unreadable field values are warned about and treated as absent.
pub fn parse_hydrograph(xml: &str, policy: MissingFieldPolicy) -> Result<Hydrograph, SourceError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut state = ParseState::new(policy);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                state.depth += 1;
                state.open(&e)?;
            }
            Ok(Event::Empty(e)) => {
                state.depth += 1;
                state.open(&e)?;
                state.close();
                state.depth -= 1;
            }
            Ok(Event::End(_)) => {
                state.close();
                state.depth = state.depth.saturating_sub(1);
            }
            Ok(Event::Text(t)) => {
                if state.field.is_some() {
                    let text = t
                        .unescape()
                        .map_err(|e| malformed(reader.buffer_position(), e))?;
                    state.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if state.field.is_some() {
                    state.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(reader.buffer_position(), e)),
            _ => {}
        }
        buf.clear();
    }

    state.finish()
}

fn malformed(position: usize, err: impl std::fmt::Display) -> SourceError {
    SourceError::InvalidDocument(format!("hydrograph XML at byte {}: {}", position, err))
}

/// Values in effect for the datum being read.
#[derive(Debug, Default)]
struct LastKnown {
    valid_utc: Option<NaiveDateTime>,
    stage: f64,
    stage_units: String,
    flow: f64,
    flow_units: String,
}

/// Attributes of a datum's child element.
#[derive(Debug, Default)]
struct FieldTag {
    timezone: Option<String>,
    name: Option<String>,
    units: Option<String>,
}

impl FieldTag {
    fn from_element(e: &BytesStart) -> Result<Self, SourceError> {
        let mut tag = FieldTag::default();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| malformed(0, err))?;
            let value = attr
                .unescape_value()
                .map_err(|err| malformed(0, err))?
                .into_owned();
            match attr.key.as_ref() {
                b"timezone" => tag.timezone = Some(value),
                b"name" => tag.name = Some(value),
                b"units" => tag.units = Some(value),
                _ => {}
            }
        }
        Ok(tag)
    }
}

/// Depth 1 is the root, 2 a section, 3 a datum, 4 a field.
struct ParseState {
    policy: MissingFieldPolicy,
    depth: usize,
    header: Option<HydrographHeader>,
    section: Option<SectionKind>,
    in_datum: bool,
    field: Option<FieldTag>,
    text: String,
    last: LastKnown,
    records: Vec<HydrographRecord>,
    skipped: usize,
}

impl ParseState {
    fn new(policy: MissingFieldPolicy) -> Self {
        ParseState {
            policy,
            depth: 0,
            header: None,
            section: None,
            in_datum: false,
            field: None,
            text: String::new(),
            last: LastKnown::default(),
            records: Vec::new(),
            skipped: 0,
        }
    }

    fn open(&mut self, e: &BytesStart) -> Result<(), SourceError> {
        match self.depth {
            1 => self.header = Some(read_header(e)?),
            2 => self.section = SectionKind::from_tag(e.local_name().as_ref()),
            3 if self.section.is_some() => {
                self.in_datum = true;
                if self.policy == MissingFieldPolicy::ResetPerRecord {
                    self.last = LastKnown::default();
                }
            }
            4 if self.in_datum => {
                self.field = Some(FieldTag::from_element(e)?);
                self.text.clear();
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        match self.depth {
            4 => {
                if let Some(tag) = self.field.take() {
                    let text = std::mem::take(&mut self.text);
                    self.apply_field(&tag, text.trim());
                }
            }
            3 if self.in_datum => {
                self.in_datum = false;
                self.emit_record();
            }
            2 => self.section = None,
            _ => {}
        }
    }

    fn apply_field(&mut self, tag: &FieldTag, text: &str) {
        if tag.timezone.as_deref() == Some("UTC") {
            match parse_valid_time(text) {
                Some(t) => self.last.valid_utc = Some(t),
                None => warn!(value = text, "unparseable hydrograph timestamp"),
            }
            return;
        }

        let units = tag.units.clone().unwrap_or_default();
        match tag.name.as_deref() {
            Some("Stage") => match text.parse::<f64>() {
                Ok(v) => {
                    self.last.stage = v;
                    self.last.stage_units = units;
                }
                Err(_) => warn!(value = text, "non-numeric hydrograph stage"),
            },
            Some("Flow") => match text.parse::<f64>() {
                Ok(v) => {
                    let (flow, flow_units) = normalize_flow(v, units);
                    self.last.flow = flow;
                    self.last.flow_units = flow_units;
                }
                Err(_) => warn!(value = text, "non-numeric hydrograph flow"),
            },
            _ => {}
        }
    }

    fn emit_record(&mut self) {
        let Some(section) = self.section else {
            return;
        };
        let Some(valid_utc) = self.last.valid_utc else {
            warn!(section = ?section, "hydrograph datum has no UTC timestamp, skipping");
            self.skipped += 1;
            return;
        };
        self.records.push(HydrographRecord {
            section,
            valid_utc,
            stage: self.last.stage,
            stage_units: self.last.stage_units.clone(),
            flow: self.last.flow,
            flow_units: self.last.flow_units.clone(),
        });
    }

    fn finish(mut self) -> Result<Hydrograph, SourceError> {
        let Some(header) = self.header else {
            return Err(SourceError::InvalidDocument(
                "hydrograph XML has no root element".to_string(),
            ));
        };
        if self.depth != 0 {
            return Err(SourceError::InvalidDocument(
                "hydrograph XML ended inside an open element".to_string(),
            ));
        }
        self.records.sort_by_key(|r| r.valid_utc);
        Ok(Hydrograph {
            header,
            records: self.records,
            skipped: self.skipped,
        })
    }
}

fn read_header(e: &BytesStart) -> Result<HydrographHeader, SourceError> {
    let mut header = HydrographHeader::default();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| malformed(0, err))?;
        let value = attr
            .unescape_value()
            .map_err(|err| malformed(0, err))?
            .into_owned();
        match attr.key.as_ref() {
            b"name" => header.name = Some(value),
            b"generationtime" => header.generation_time = Some(value),
            b"timezone" => header.timezone = Some(value),
            _ => {}
        }
    }
    Ok(header)
}

/// "kcfs" is rescaled to cfs. Everything else passes through unchanged.
fn normalize_flow(value: f64, units: String) -> (f64, String) {
    if units == UNITS_KCFS {
        (value * KCFS_TO_CFS, UNITS_CFS.to_string())
    } else {
        (value, units)
    }
}

fn parse_valid_time(text: &str) -> Option<NaiveDateTime> {
    let prefix = text.get(..VALID_TIME_PREFIX)?;
    NaiveDateTime::parse_from_str(prefix, VALID_TIME_FORMAT).ok()
}
