/// USGS NWIS instantaneous-value (IV) and daily-value (DV) client.
///
/// Both services are queried in rdb format: a block of `#` metadata lines
/// followed by tab-delimited rows. Only rows whose first field starts with
/// `USGS` are data; column-header and column-width rows are ignored.
///
/// IV row:  agency, site, "YYYY-MM-DD HH:MM", zone abbreviation, value, qualifier
/// DV row:  agency, site, "YYYY-MM-DD", value, qualifier
///
/// Parsing is lenient row by row: a row that cannot be read is skipped with
/// a warning and counted, the rest of the document still parses.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, warn};

use crate::ingest::client::Upstream;
use crate::model::{DV_NO_DATA, IV_ICE_VALUE, PARAM_DISCHARGE, SourceError};

const ICE: &str = "Ice";
const CONTACT_KEY: &str = "Contact:";
const RETRIEVED_KEY: &str = "retrieved:";
/// The retrieval stamp is the fixed-width field after `retrieved:`.
const RETRIEVED_WIDTH: usize = 25;
/// Site lines read "USGS 01646500 POTOMAC RIVER ..."; the name starts here.
const SITE_NAME_COLUMN: usize = 14;

const IV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const DV_DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// IV discharge request in rdb format. Dates are `YYYY-MM-DD`.
pub fn build_iv_url(base: &str, gauge_id: &str, start: &str, end: &str) -> String {
    format!(
        "{}?cb_{}=on&format=rdb&site_no={}&period=&begin_date={}&end_date={}",
        base, PARAM_DISCHARGE, gauge_id, start, end
    )
}

/// DV discharge request in rdb format. Same query shape as IV.
pub fn build_dv_url(base: &str, gauge_id: &str, start: &str, end: &str) -> String {
    build_iv_url(base, gauge_id, start, end)
}

/// IV discharge request as WaterML 1.1, used for pass-through export.
pub fn build_waterml_url(base: &str, gauge_id: &str, start: &str, end: &str) -> String {
    format!(
        "{}?format=waterml,1.1&sites={}&startDT={}&endDT={}&parameterCd={}",
        base, gauge_id, start, end, PARAM_DISCHARGE
    )
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Metadata harvested from the `#` comment block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RdbHeader {
    pub contact: Option<String>,
    pub retrieved: Option<String>,
    /// Empty when the document names no site.
    pub site_name: String,
}

/// One instantaneous row, still in the gauge's civil time.
#[derive(Debug, Clone, PartialEq)]
pub struct IvRecord {
    pub agency_code: String,
    pub site_code: String,
    pub local_time: NaiveDateTime,
    /// Reporting zone as written upstream ("EST", "EDT", ...).
    pub zone_abbreviation: String,
    pub value: f64,
    pub value_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DvRecord {
    pub agency_code: String,
    pub site_code: String,
    pub date: NaiveDate,
    /// `DV_NO_DATA` for ice-affected or missing days.
    pub value: f64,
    pub value_code: String,
}

/// A parsed rdb document.
#[derive(Debug, Clone, PartialEq)]
pub struct RdbDocument<R> {
    pub header: RdbHeader,
    pub records: Vec<R>,
    /// Data rows that were dropped.
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

pub fn fetch_iv<U: Upstream + ?Sized>(
    upstream: &U,
    base: &str,
    gauge_id: &str,
    start: &str,
    end: &str,
) -> Result<RdbDocument<IvRecord>, SourceError> {
    let body = upstream.get_text(&build_iv_url(base, gauge_id, start, end))?;
    Ok(parse_iv_rdb(&body))
}

pub fn fetch_dv<U: Upstream + ?Sized>(
    upstream: &U,
    base: &str,
    gauge_id: &str,
    start: &str,
    end: &str,
) -> Result<RdbDocument<DvRecord>, SourceError> {
    let body = upstream.get_text(&build_dv_url(base, gauge_id, start, end))?;
    Ok(parse_dv_rdb(&body))
}

/// Fetches the WaterML 1.1 rendition of an IV request, unmodified.
pub fn fetch_waterml<U: Upstream + ?Sized>(
    upstream: &U,
    base: &str,
    gauge_id: &str,
    start: &str,
    end: &str,
) -> Result<String, SourceError> {
    upstream.get_text(&build_waterml_url(base, gauge_id, start, end))
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses an IV rdb document.
///
/// "Ice" reads as `IV_ICE_VALUE`. Rows with an empty value are dropped
/// (after the ice substitution, so ice rows survive).
pub fn parse_iv_rdb(text: &str) -> RdbDocument<IvRecord> {
    let mut header = RdbHeader::default();
    let mut records = Vec::new();
    let mut skipped = 0;

    for line in text.lines() {
        if let Some(comment) = line.strip_prefix('#') {
            read_header_line(&mut header, comment);
            continue;
        }
        if !line.starts_with("USGS") {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            warn!(line, "IV row has too few fields, skipping");
            skipped += 1;
            continue;
        }

        let local_time = match NaiveDateTime::parse_from_str(fields[2].trim(), IV_TIME_FORMAT) {
            Ok(t) => t,
            Err(e) => {
                warn!(timestamp = fields[2], error = %e, "unparseable IV timestamp, skipping row");
                skipped += 1;
                continue;
            }
        };

        let raw_value = fields[4].trim();
        let value = if raw_value == ICE {
            IV_ICE_VALUE
        } else if raw_value.is_empty() {
            debug!(line, "empty IV value, skipping row");
            skipped += 1;
            continue;
        } else {
            match raw_value.parse::<f64>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(value = raw_value, "non-numeric IV value, skipping row");
                    skipped += 1;
                    continue;
                }
            }
        };

        records.push(IvRecord {
            agency_code: fields[0].to_string(),
            site_code: fields[1].to_string(),
            local_time,
            zone_abbreviation: fields[3].trim().to_string(),
            value,
            value_code: qualifier(&fields, 5),
        });
    }

    RdbDocument {
        header,
        records,
        skipped,
    }
}

/// Parses a DV rdb document.
///
/// "Ice" and empty values read as `DV_NO_DATA` and the row is kept.
/// Any other non-numeric value also reads as `DV_NO_DATA`, with a warning.
pub fn parse_dv_rdb(text: &str) -> RdbDocument<DvRecord> {
    let mut header = RdbHeader::default();
    let mut records = Vec::new();
    let mut skipped = 0;

    for line in text.lines() {
        if let Some(comment) = line.strip_prefix('#') {
            read_header_line(&mut header, comment);
            continue;
        }
        if !line.starts_with("USGS") {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            warn!(line, "DV row has too few fields, skipping");
            skipped += 1;
            continue;
        }

        let date = match NaiveDate::parse_from_str(fields[2].trim(), DV_DATE_FORMAT) {
            Ok(d) => d,
            Err(e) => {
                warn!(date = fields[2], error = %e, "unparseable DV date, skipping row");
                skipped += 1;
                continue;
            }
        };

        let raw_value = fields[3].trim();
        let value = if raw_value == ICE || raw_value.is_empty() {
            DV_NO_DATA
        } else {
            raw_value.parse::<f64>().unwrap_or_else(|_| {
                warn!(value = raw_value, %date, "non-numeric DV value, recording as no-data");
                DV_NO_DATA
            })
        };

        records.push(DvRecord {
            agency_code: fields[0].to_string(),
            site_code: fields[1].to_string(),
            date,
            value,
            value_code: qualifier(&fields, 4),
        });
    }

    RdbDocument {
        header,
        records,
        skipped,
    }
}

fn qualifier(fields: &[&str], index: usize) -> String {
    fields.get(index).map(|q| q.trim().to_string()).unwrap_or_default()
}

/// Reads one comment line (leading `#` already removed). Later matches
/// overwrite earlier ones.
fn read_header_line(header: &mut RdbHeader, comment: &str) {
    let line = comment.trim();

    if let Some(pos) = line.find(CONTACT_KEY) {
        header.contact = Some(line[pos + CONTACT_KEY.len()..].trim().to_string());
        return;
    }

    if let Some(pos) = line.find(RETRIEVED_KEY) {
        let stamp: String = line[pos + RETRIEVED_KEY.len()..]
            .chars()
            .take(RETRIEVED_WIDTH)
            .collect();
        header.retrieved = Some(stamp.trim().to_string());
        return;
    }

    if line.starts_with("USGS ") {
        header.site_name = line.chars().skip(SITE_NAME_COLUMN).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::{USGS_DV_RDB, USGS_IV_RDB};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_iv_url_shape() {
        let url = build_iv_url("http://nwis.example/uv/", "01646500", "2020-06-01", "2020-06-02");
        assert_eq!(
            url,
            "http://nwis.example/uv/?cb_00060=on&format=rdb&site_no=01646500&period=&begin_date=2020-06-01&end_date=2020-06-02"
        );
    }

    #[test]
    fn test_waterml_url_shape() {
        let url = build_waterml_url("http://ws.example/iv/", "01646500", "2020-06-01", "2020-06-02");
        assert!(url.starts_with("http://ws.example/iv/?format=waterml,1.1&sites=01646500"));
        assert!(url.ends_with("&startDT=2020-06-01&endDT=2020-06-02&parameterCd=00060"));
    }

    #[test]
    fn test_iv_fixture_parses_header() {
        let doc = parse_iv_rdb(USGS_IV_RDB);
        assert_eq!(doc.header.contact.as_deref(), Some("gs-w_support_nwisweb@usgs.gov"));
        assert_eq!(doc.header.retrieved.as_deref(), Some("2020-06-02 10:35:07 EDT"));
        assert_eq!(
            doc.header.site_name,
            "POTOMAC RIVER NEAR WASH, DC LITTLE FALLS PUMP STA"
        );
    }

    #[test]
    fn test_iv_fixture_rows() {
        let doc = parse_iv_rdb(USGS_IV_RDB);
        // Five data rows: one with an empty value is dropped, the ice row is kept.
        assert_eq!(doc.records.len(), 4, "records: {:?}", doc.records);
        assert_eq!(doc.skipped, 1);

        let first = &doc.records[0];
        assert_eq!(first.agency_code, "USGS");
        assert_eq!(first.site_code, "01646500");
        assert_eq!(first.zone_abbreviation, "EDT");
        assert_eq!(first.value, 4340.0);
        assert_eq!(first.value_code, "P");
        assert_eq!(first.local_time.to_string(), "2020-06-01 00:00:00");

        let ice = &doc.records[2];
        assert_eq!(ice.local_time.to_string(), "2020-06-01 00:45:00");
        assert_eq!(ice.value, IV_ICE_VALUE, "ice should read as zero flow");
    }

    #[test]
    fn test_iv_missing_qualifier_defaults_empty() {
        let doc = parse_iv_rdb("USGS\t0101\t2020-01-01 00:00\tEST\t12.5\n");
        assert_eq!(doc.records.len(), 1);
        assert_eq!(doc.records[0].value_code, "");
    }

    #[test]
    fn test_iv_bad_rows_are_skipped_not_fatal() {
        let text = "USGS\t0101\t2020-01-01 00:00\tEST\n\
                    USGS\t0101\tnot-a-time\tEST\t5\tP\n\
                    USGS\t0101\t2020-01-01 00:15\tEST\tEqp\tP\n\
                    USGS\t0101\t2020-01-01 00:30\tEST\t7\tP\n";
        let doc = parse_iv_rdb(text);
        assert_eq!(doc.records.len(), 1);
        assert_eq!(doc.skipped, 3);
        assert_eq!(doc.records[0].value, 7.0);
    }

    /// Collects formatted log output for assertions.
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_iv_value_is_logged_at_debug() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || CaptureWriter(Arc::clone(&sink)))
            .finish();

        let doc = tracing::subscriber::with_default(subscriber, || {
            parse_iv_rdb("USGS\t0101\t2020-01-01 00:00\tEST\t\tP\n")
        });
        assert!(doc.records.is_empty());
        assert_eq!(doc.skipped, 1);

        let logged = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("DEBUG"), "log: {}", logged);
        assert!(logged.contains("empty IV value, skipping row"), "log: {}", logged);
    }

    #[test]
    fn test_dv_fixture_rows() {
        let doc = parse_dv_rdb(USGS_DV_RDB);
        let values: Vec<f64> = doc.records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![10200.0, DV_NO_DATA, DV_NO_DATA, 9870.0]);
        assert_eq!(doc.skipped, 0);
        assert_eq!(doc.records[1].value_code, "A:e");
        assert_eq!(doc.records[3].date, NaiveDate::from_ymd_opt(2020, 1, 4).unwrap());
        assert_eq!(
            doc.header.site_name,
            "POTOMAC RIVER NEAR WASH, DC LITTLE FALLS PUMP STA"
        );
        assert_eq!(doc.header.retrieved.as_deref(), Some("2020-06-02 10:36:41 EDT"));
    }

    #[test]
    fn test_dv_non_numeric_becomes_sentinel() {
        let doc = parse_dv_rdb("USGS\t0101\t2020-01-01\t***\tA\n");
        assert_eq!(doc.records.len(), 1);
        assert_eq!(doc.records[0].value, DV_NO_DATA);
    }

    #[test]
    fn test_later_header_lines_override_earlier() {
        let text = "# Contact: first@example.gov\n# Contact: second@example.gov\n";
        let doc = parse_dv_rdb(text);
        assert_eq!(doc.header.contact.as_deref(), Some("second@example.gov"));
        assert!(doc.records.is_empty());
    }

    #[test]
    fn test_short_site_line_does_not_panic() {
        let doc = parse_dv_rdb("#  USGS 0101\n");
        assert_eq!(doc.header.site_name, "");
    }

    #[test]
    fn test_empty_document() {
        let doc = parse_iv_rdb("");
        assert!(doc.records.is_empty());
        assert_eq!(doc.header, RdbHeader::default());
    }
}
