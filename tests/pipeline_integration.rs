/// Integration tests for the ingestion → export pipeline
///
/// These tests verify:
/// 1. USGS IV rows become observations with consistent local/UTC timestamps
/// 2. Ice, empty and sentinel values are handled per source
/// 3. AHPS flow is normalized to cfs and records are time-ordered
/// 4. The forecast overlay degrades to empty + failed when NWM is down
/// 5. Export documents carry the expected schema, filename and content type
///
/// Everything except the `#[ignore]`d live checks runs against canned
/// upstream documents in tests/fixtures.
///
/// Live checks: cargo test --test pipeline_integration -- --ignored

use std::cell::RefCell;

use chrono::{NaiveDate, NaiveDateTime};

use gaugeview_service::config::ServiceConfig;
use gaugeview_service::export::EXPORT_FILENAME;
use gaugeview_service::ingest::ahps::{MissingFieldPolicy, parse_hydrograph};
use gaugeview_service::ingest::client::{HttpUpstream, Upstream};
use gaugeview_service::ingest::nwm::{ForecastRequest, parse_forecast};
use gaugeview_service::ingest::usgs::{parse_dv_rdb, parse_iv_rdb};
use gaugeview_service::model::{DV_NO_DATA, SourceError, Variable};
use gaugeview_service::normalize::{dv_series, hydrograph_series, iv_series};
use gaugeview_service::pipeline::{
    AhpsViewRequest, DateRange, ExportRequest, ExportWindow, Pipeline, UsgsViewRequest,
};
use gaugeview_service::timezone::{DisplayZone, lookup_abbreviation, utc_civil_to_local, local_civil_to_utc};

const IV_RDB: &str = include_str!("fixtures/usgs_iv.rdb");
const DV_RDB: &str = include_str!("fixtures/usgs_dv.rdb");
const HYDROGRAPH_XML: &str = include_str!("fixtures/ahps_hydrograph.xml");
const FORECAST_XML: &str = include_str!("fixtures/nwm_forecast.xml");

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Upstream stand-in: first route whose needle appears in the URL answers.
struct FakeUpstream {
    routes: Vec<(&'static str, Result<String, SourceError>)>,
    requested: RefCell<Vec<String>>,
}

impl FakeUpstream {
    fn new() -> Self {
        FakeUpstream {
            routes: Vec::new(),
            requested: RefCell::new(Vec::new()),
        }
    }

    fn route(mut self, needle: &'static str, answer: Result<&str, SourceError>) -> Self {
        self.routes.push((needle, answer.map(str::to_string)));
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requested.borrow().clone()
    }
}

impl Upstream for FakeUpstream {
    fn get_text(&self, url: &str) -> Result<String, SourceError> {
        self.requested.borrow_mut().push(url.to_string());
        self.routes
            .iter()
            .find(|(needle, _)| url.contains(needle))
            .map(|(_, answer)| answer.clone())
            .unwrap_or(Err(SourceError::Http(404)))
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

fn usgs_request(forecast: Option<ForecastRequest>) -> UsgsViewRequest {
    UsgsViewRequest {
        gauge_id: "01646500".to_string(),
        range: DateRange::new(date(2020, 6, 1), date(2020, 6, 2)).unwrap(),
        zone: DisplayZone::Utc,
        forecast,
    }
}

// ---------------------------------------------------------------------------
// Normalization properties
// ---------------------------------------------------------------------------

#[test]
fn test_est_row_end_to_end() {
    let doc = parse_iv_rdb("USGS\t01234567\t2020-06-01 12:00\tEST\t150.0\tA\n");
    let series = iv_series(&doc.records);

    assert_eq!(series.len(), 1);
    let obs = &series.as_slice()[0];
    assert_eq!(obs.timestamp_local(), at(2020, 6, 1, 12, 0));
    assert_eq!(obs.utc_offset_hours(), -5.0);
    assert_eq!(obs.timestamp_utc(), at(2020, 6, 1, 17, 0));
    assert_eq!(obs.value, 150.0);
    assert_eq!(obs.value_code, "A");
}

#[test]
fn test_utc_equals_local_minus_offset_for_every_abbreviation() {
    for abbr in gaugeview_service::timezone::known_abbreviations() {
        let line = format!("USGS\t0101\t2020-06-01 12:00\t{}\t1\tA\n", abbr);
        let series = iv_series(&parse_iv_rdb(&line).records);
        let obs = &series.as_slice()[0];
        let offset = lookup_abbreviation(abbr).unwrap();
        assert_eq!(
            obs.timestamp_utc(),
            obs.timestamp_local() - chrono::Duration::seconds(i64::from(offset.local_minus_utc())),
            "abbreviation {}",
            abbr
        );
    }
}

#[test]
fn test_hat_is_two_and_a_half_hours() {
    let series = iv_series(&parse_iv_rdb("USGS\t0101\t2020-06-01 12:00\tHAT\t1\tA\n").records);
    let obs = &series.as_slice()[0];
    assert_eq!(obs.utc_offset_hours(), -2.5);
    assert_eq!(obs.timestamp_utc(), at(2020, 6, 1, 14, 30));
}

#[test]
fn test_ice_and_empty_values_per_source() {
    let iv = parse_iv_rdb(
        "USGS\t0101\t2020-01-01 00:00\tEST\tIce\tA\n\
         USGS\t0101\t2020-01-01 00:15\tEST\t\tA\n\
         USGS\t0101\t2020-01-01 00:30\tEST\t3\tA\n",
    );
    let values: Vec<f64> = iv_series(&iv.records).iter().map(|o| o.value).collect();
    assert_eq!(values, vec![0.0, 3.0], "IV ice reads 0, IV empty is dropped");

    let dv = parse_dv_rdb(
        "USGS\t0101\t2020-01-01\tIce\tA\n\
         USGS\t0101\t2020-01-02\t\tA\n",
    );
    let values: Vec<f64> = dv_series(&dv.records).iter().map(|o| o.value).collect();
    assert_eq!(values, vec![DV_NO_DATA, DV_NO_DATA]);
}

#[test]
fn test_ahps_kcfs_carry_forward_and_order() {
    let hydro = parse_hydrograph(HYDROGRAPH_XML, MissingFieldPolicy::CarryForward).unwrap();
    let flow = hydrograph_series(&hydro.records, Variable::Flow);

    let first = &flow.as_slice()[0];
    assert!((first.value - 2500.0).abs() < 1e-9);
    assert_eq!(first.units, "cfs");

    let last = &flow.as_slice()[3];
    assert!((last.value - 2900.0).abs() < 1e-9, "flow-less datum reuses previous flow");

    let stamps: Vec<NaiveDateTime> = flow.iter().map(|o| o.timestamp_utc()).collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);
}

#[test]
fn test_forecast_before_observed_is_reordered() {
    let xml = r#"<site>
        <forecast><datum><valid timezone="UTC">2020-06-01T01:00:00-00:00</valid><primary name="Stage" units="ft">2</primary></datum></forecast>
        <observed><datum><valid timezone="UTC">2020-06-01T00:00:00-00:00</valid><primary name="Stage" units="ft">1</primary></datum></observed>
    </site>"#;
    let hydro = parse_hydrograph(xml, MissingFieldPolicy::CarryForward).unwrap();
    let stage = hydrograph_series(&hydro.records, Variable::Stage);
    let kinds: Vec<&str> = stage.iter().map(|o| o.kind.label()).collect();
    assert_eq!(kinds, vec!["observed", "forecast"]);
}

#[test]
fn test_forecast_scrape_property() {
    let text = r#"<values><value dateTimeUTC="2021-03-01T00:15:00Z" methodCode="1" sourceCode="1" qualityControlLevelCode="1" censorCode="nc" timeOffset="0" unit="cfs" >123.4</value></values>"#;
    let points = parse_forecast(text);
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].valid_utc, at(2021, 3, 1, 0, 15));
    assert_eq!(points[0].value, 123.4);
    assert_eq!(parse_forecast(FORECAST_XML).len(), 3);
}

#[test]
fn test_named_zone_round_trip() {
    let instants = ["2020-01-15 17:00:00", "2020-07-04 03:30:00", "2021-11-07 12:00:00"];
    for zone in DisplayZone::ALL {
        for utc in instants {
            let local = utc_civil_to_local(utc, zone).unwrap();
            let back = local_civil_to_utc(&local.format("%Y-%m-%d %H:%M:%S").to_string(), zone).unwrap();
            assert_eq!(back, utc, "round trip through {}", zone);
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline behaviour
// ---------------------------------------------------------------------------

#[test]
fn test_forecast_outage_leaves_primary_series_intact() {
    let upstream = FakeUpstream::new()
        .route("/uv/", Ok(IV_RDB))
        .route("/dv/", Ok(DV_RDB))
        .route("GetWaterML", Err(SourceError::Unreachable("connection refused".into())));
    let config = ServiceConfig::default();
    let forecast = ForecastRequest::initial_at("4512772", date(2020, 6, 1), 12);

    let view = Pipeline::new(&upstream, &config)
        .usgs_view(&usgs_request(Some(forecast)))
        .unwrap();

    assert!(view.forecast.failed);
    assert!(view.forecast.points.is_empty());
    assert_eq!(view.instantaneous.len(), 4);
    assert_eq!(view.daily.len(), 4);
}

#[test]
fn test_forecast_http_error_also_marks_failed() {
    let upstream = FakeUpstream::new()
        .route("hydrograph_to_xml", Ok(HYDROGRAPH_XML))
        .route("GetWaterML", Err(SourceError::Http(500)));
    let config = ServiceConfig::default();
    let request = AhpsViewRequest {
        gauge_id: "PTTP1".to_string(),
        zone: DisplayZone::Eastern,
        forecast: Some(ForecastRequest::initial_at("4512772", date(2020, 6, 1), 12)),
    };

    let view = Pipeline::new(&upstream, &config).ahps_view(&request).unwrap();
    assert!(view.forecast.failed);
    assert!(view.has_flow && view.has_stage);
    // 12:00 UTC on 1 June is 08:00 EDT.
    assert_eq!(view.stage[0].timestamp, at(2020, 6, 1, 8, 0));
    assert_eq!(view.site_name.as_deref(), Some("Potomac River at Point of Rocks"));
}

#[test]
fn test_malformed_hydrograph_is_fatal() {
    let upstream = FakeUpstream::new().route("hydrograph_to_xml", Ok("<site><observed></site>"));
    let config = ServiceConfig::default();
    let request = AhpsViewRequest {
        gauge_id: "PTTP1".to_string(),
        zone: DisplayZone::Utc,
        forecast: None,
    };
    let err = Pipeline::new(&upstream, &config).ahps_view(&request).unwrap_err();
    assert!(matches!(err, SourceError::InvalidDocument(_)));
}

#[test]
fn test_reset_policy_from_config_hides_flowless_stage_gauge() {
    let xml = r#"<site timezone="GMT-6"><observed>
        <datum><valid timezone="UTC">2020-06-01T00:00:00-00:00</valid><primary name="Stage" units="ft">3.1</primary></datum>
    </observed></site>"#;
    let upstream = FakeUpstream::new().route("hydrograph_to_xml", Ok(xml));
    let mut config = ServiceConfig::default();
    config.ahps.missing_field_policy = MissingFieldPolicy::ResetPerRecord;
    let request = AhpsViewRequest {
        gauge_id: "XYZI2".to_string(),
        zone: DisplayZone::Utc,
        forecast: None,
    };
    let view = Pipeline::new(&upstream, &config).ahps_view(&request).unwrap();
    assert!(view.has_stage);
    assert!(!view.has_flow, "flow never reported sums to zero");
}

// ---------------------------------------------------------------------------
// Exports
// ---------------------------------------------------------------------------

#[test]
fn test_usgs_iv_export_is_waterml_passthrough() {
    let waterml = "<ns1:timeSeriesResponse>upstream bytes</ns1:timeSeriesResponse>";
    let upstream = FakeUpstream::new().route("waterml,1.1", Ok(waterml));
    let config = ServiceConfig::default();
    let request = ExportRequest::UsgsIv {
        gauge_id: "01646500".to_string(),
        window: ExportWindow::Span("7-d".to_string()),
    };

    let doc = Pipeline::new(&upstream, &config)
        .export_at(&request, date(2020, 6, 8))
        .unwrap();

    assert_eq!(doc.body, waterml);
    assert_eq!(doc.content_type, "text/xml");
    assert_eq!(doc.filename, EXPORT_FILENAME);
    let url = &upstream.requested()[0];
    assert!(url.contains("startDT=2020-06-01&endDT=2020-06-08"), "url: {}", url);
}

#[test]
fn test_usgs_dv_export_document() {
    let upstream = FakeUpstream::new().route("/dv/", Ok(DV_RDB));
    let config = ServiceConfig::default();
    let request = ExportRequest::UsgsDv {
        gauge_id: "01646500".to_string(),
        window: ExportWindow::Span("all".to_string()),
        latitude: "38.9497".to_string(),
        longitude: "-77.1275".to_string(),
    };

    let doc = Pipeline::new(&upstream, &config)
        .export_at(&request, date(2020, 6, 8))
        .unwrap();

    assert_eq!(doc.content_type, "application/xml");
    assert!(doc.body.contains("<note title=\"Contact\">gs-w_support_nwisweb@usgs.gov</note>"));
    assert!(doc.body.contains("<longitude>-77.1275</longitude>"));
    assert!(doc.body.contains(
        r#"dateTime="2020-01-02T00:00" timeOffset="0" dateTimeUTC="2020-01-02T00:00" qualifiers="A:e""#
    ));
    assert!(doc.body.contains(">-9999.0</value>"));
    assert!(upstream.requested()[0].contains("begin_date=1900-01-01&end_date=2100-01-01"));
}

#[test]
fn test_ahps_flow_export_document() {
    let upstream = FakeUpstream::new().route("hydrograph_to_xml", Ok(HYDROGRAPH_XML));
    let config = ServiceConfig::default();
    let request = ExportRequest::Ahps {
        gauge_id: "PTTP1".to_string(),
        variable: Variable::Flow,
        latitude: "39.27".to_string(),
        longitude: "-77.54".to_string(),
    };

    let doc = Pipeline::new(&upstream, &config)
        .export_at(&request, date(2020, 6, 2))
        .unwrap();

    assert!(doc.body.contains("<variableCode vocabulary=\"AHPS\">0</variableCode>"));
    assert!(doc.body.contains("<unitName>Cubic Feet per Second</unitName>"));
    assert!(doc.body.contains("<unitAbbreviation>cfs</unitAbbreviation>"));
    assert!(doc.body.contains(
        r#"<value dateTime="2020-06-02T13:00" timeOffset="-5" dateTimeUTC="2020-06-02T18:00" methodCode="forecast" qualityControlLevelCode="3">2900.0</value>"#
    ));
    assert!(doc.body.contains("<creationTime>2020-06-02T14:30:12-00:00</creationTime>"));
}

// ---------------------------------------------------------------------------
// Live upstream checks
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_live_usgs_iv_returns_rows() {
    let config = ServiceConfig::default();
    let upstream = HttpUpstream::new(&config.fetch).unwrap();
    let today = chrono::Local::now().date_naive();
    let request = UsgsViewRequest {
        gauge_id: "01646500".to_string(),
        range: DateRange::new(today - chrono::Duration::days(2), today).unwrap(),
        zone: DisplayZone::Eastern,
        forecast: None,
    };

    match Pipeline::new(&upstream, &config).usgs_view(&request) {
        Ok(view) => {
            println!("✓ USGS returned {} IV points for 01646500", view.instantaneous.len());
            assert!(view.has_instantaneous, "Should receive at least one reading");
        }
        Err(e) => {
            eprintln!("\n⚠ WARNING: USGS request failed: {}", e);
            eprintln!("  This may indicate the NWIS service is down or has moved\n");
        }
    }
}

#[test]
#[ignore]
fn test_live_nwm_forecast_degrades_cleanly() {
    let config = ServiceConfig::default();
    let upstream = HttpUpstream::new(&config.fetch).unwrap();
    let forecast = gaugeview_service::pipeline::initial_forecast("4512772");

    let overlay = Pipeline::new(&upstream, &config)
        .forecast_overlay(Some(&forecast), DisplayZone::Utc)
        .expect("overlay never fails on transport errors");
    println!("NWM overlay: {} points, failed = {}", overlay.points.len(), overlay.failed);
    if overlay.failed {
        assert!(overlay.points.is_empty());
    }
}
