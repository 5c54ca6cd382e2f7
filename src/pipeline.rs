/// Per-request orchestration: fetch → parse → normalize → project → serialize.
///
/// A `Pipeline` holds no state between requests beyond its configuration
/// and upstream handle; every call recomputes from the upstream documents.
///
/// Failure policy:
/// - The forecast overlay is best-effort. An unreachable or non-2xx forecast
///   service yields an empty overlay with `failed = true`.
/// - Failures on the primary series (USGS, AHPS) propagate to the caller.

use chrono::{Duration, FixedOffset, Local, NaiveDate, Timelike};
use serde::Serialize;
use tracing::info;

use crate::config::ServiceConfig;
use crate::export::{ExportDocument, render_ahps, render_usgs_dv};
use crate::ingest::ahps::{self, HydrographHeader};
use crate::ingest::client::Upstream;
use crate::ingest::nwm::{self, ForecastRequest};
use crate::ingest::usgs::{self, RdbHeader};
use crate::logging::{DataSource, log_parse_summary, log_source_failure};
use crate::model::{PARAM_DISCHARGE, SeriesMetadata, SourceError, UNITS_CFS, Variable};
use crate::normalize::{dv_series, forecast_series, hydrograph_series, iv_series};
use crate::series::{PlotPoint, export_records, has_points, has_positive_total, plot_points};
use crate::timezone::DisplayZone;

// ---------------------------------------------------------------------------
// Date windows
// ---------------------------------------------------------------------------

/// Inclusive date window, rendered `YYYY-MM-DD` in upstream queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, SourceError> {
        if start > end {
            return Err(SourceError::InvalidRequest(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(DateRange { start, end })
    }

    fn start_param(&self) -> String {
        self.start.to_string()
    }

    fn end_param(&self) -> String {
        self.end.to_string()
    }
}

/// Export window: a relative span ("all", "3-y", "6-m", "10-d") or an
/// explicit range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportWindow {
    Span(String),
    Range(DateRange),
}

const DAYS_PER_YEAR: i64 = 365;
const DAYS_PER_MONTH: i64 = 31;

impl ExportWindow {
    /// Resolves against `today`. Relative spans end today.
    pub fn resolve_at(&self, today: NaiveDate) -> Result<DateRange, SourceError> {
        match self {
            ExportWindow::Range(range) => Ok(*range),
            ExportWindow::Span(span) => resolve_span(span, today),
        }
    }
}

fn resolve_span(span: &str, today: NaiveDate) -> Result<DateRange, SourceError> {
    let span = span.trim();
    if span.eq_ignore_ascii_case("all") {
        return Ok(DateRange {
            start: ymd(1900, 1, 1)?,
            end: ymd(2100, 1, 1)?,
        });
    }

    let invalid = || SourceError::InvalidRequest(format!("unrecognized span '{}'", span));
    let (count, unit) = span.split_once('-').unwrap_or((span, "d"));
    let count: i64 = count.trim().parse().map_err(|_| invalid())?;
    if count < 0 {
        return Err(invalid());
    }
    let days = match unit.trim() {
        "y" => count.checked_mul(DAYS_PER_YEAR),
        "m" => count.checked_mul(DAYS_PER_MONTH),
        _ => Some(count),
    }
    .ok_or_else(invalid)?;
    let start = Duration::try_days(days)
        .and_then(|span| today.checked_sub_signed(span))
        .ok_or_else(invalid)?;
    Ok(DateRange { start, end: today })
}

fn ymd(y: i32, m: u32, d: u32) -> Result<NaiveDate, SourceError> {
    NaiveDate::from_ymd_opt(y, m, d)
        .ok_or_else(|| SourceError::InvalidTimestamp(format!("{}-{}-{}", y, m, d)))
}

// ---------------------------------------------------------------------------
// Requests and views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct UsgsViewRequest {
    pub gauge_id: String,
    pub range: DateRange,
    pub zone: DisplayZone,
    pub forecast: Option<ForecastRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AhpsViewRequest {
    pub gauge_id: String,
    pub zone: DisplayZone,
    pub forecast: Option<ForecastRequest>,
}

/// NWM points in the display zone. `failed` is set when the forecast
/// service could not be reached; `points` is then empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForecastOverlay {
    pub points: Vec<PlotPoint>,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsgsView {
    pub gauge_id: String,
    pub zone: DisplayZone,
    pub zone_label: &'static str,
    pub header: RdbHeader,
    pub instantaneous: Vec<PlotPoint>,
    pub daily: Vec<PlotPoint>,
    pub forecast: ForecastOverlay,
    pub has_instantaneous: bool,
    pub has_daily: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AhpsView {
    pub gauge_id: String,
    pub zone: DisplayZone,
    pub zone_label: &'static str,
    pub site_name: Option<String>,
    pub generation_time: Option<String>,
    pub flow: Vec<PlotPoint>,
    pub stage: Vec<PlotPoint>,
    pub forecast: ForecastOverlay,
    pub has_flow: bool,
    pub has_stage: bool,
}

/// A download request. Coordinates are caller-supplied and passed through.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportRequest {
    UsgsIv {
        gauge_id: String,
        window: ExportWindow,
    },
    UsgsDv {
        gauge_id: String,
        window: ExportWindow,
        latitude: String,
        longitude: String,
    },
    Ahps {
        gauge_id: String,
        variable: Variable,
        latitude: String,
        longitude: String,
    },
}

/// The forecast a page opens with, using the local clock.
pub fn initial_forecast(comid: &str) -> ForecastRequest {
    let now = Local::now();
    ForecastRequest::initial_at(comid, now.date_naive(), now.hour())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<'a, U: Upstream + ?Sized> {
    upstream: &'a U,
    config: &'a ServiceConfig,
}

impl<'a, U: Upstream + ?Sized> Pipeline<'a, U> {
    pub fn new(upstream: &'a U, config: &'a ServiceConfig) -> Self {
        Pipeline { upstream, config }
    }

    /// IV and DV plot series for one gauge, plus the forecast overlay.
    pub fn usgs_view(&self, request: &UsgsViewRequest) -> Result<UsgsView, SourceError> {
        let endpoints = &self.config.endpoints;
        let gauge = request.gauge_id.as_str();
        let (start, end) = (request.range.start_param(), request.range.end_param());

        let iv = usgs::fetch_iv(self.upstream, &endpoints.usgs_iv, gauge, &start, &end)
            .inspect_err(|e| log_source_failure(DataSource::Usgs, gauge, "IV fetch", e))?;
        log_parse_summary(DataSource::Usgs, gauge, iv.records.len(), iv.skipped);

        let dv = usgs::fetch_dv(self.upstream, &endpoints.usgs_dv, gauge, &start, &end)
            .inspect_err(|e| log_source_failure(DataSource::Usgs, gauge, "DV fetch", e))?;
        log_parse_summary(DataSource::Usgs, gauge, dv.records.len(), dv.skipped);

        let instantaneous = iv_series(&iv.records);
        let daily = dv_series(&dv.records);
        let forecast = self.forecast_overlay(request.forecast.as_ref(), request.zone)?;

        info!(
            site = gauge,
            iv = instantaneous.len(),
            dv = daily.len(),
            forecast = forecast.points.len(),
            "built USGS view"
        );

        Ok(UsgsView {
            gauge_id: request.gauge_id.clone(),
            zone: request.zone,
            zone_label: request.zone.label(),
            header: iv.header,
            has_instantaneous: has_points(&instantaneous),
            has_daily: has_points(&daily),
            instantaneous: plot_points(&instantaneous, request.zone),
            daily: plot_points(&daily, request.zone),
            forecast,
        })
    }

    /// Flow and stage plot series for one AHPS gauge, plus the forecast overlay.
    pub fn ahps_view(&self, request: &AhpsViewRequest) -> Result<AhpsView, SourceError> {
        let gauge = request.gauge_id.as_str();
        let hydrograph = ahps::fetch_hydrograph(
            self.upstream,
            &self.config.endpoints.ahps_hydrograph,
            gauge,
            self.config.ahps.missing_field_policy,
        )
        .inspect_err(|e| log_source_failure(DataSource::Ahps, gauge, "hydrograph fetch", e))?;
        log_parse_summary(DataSource::Ahps, gauge, hydrograph.records.len(), hydrograph.skipped);

        let flow = hydrograph_series(&hydrograph.records, Variable::Flow);
        let stage = hydrograph_series(&hydrograph.records, Variable::Stage);
        let forecast = self.forecast_overlay(request.forecast.as_ref(), request.zone)?;

        info!(site = gauge, records = hydrograph.records.len(), "built AHPS view");

        let HydrographHeader {
            name,
            generation_time,
            ..
        } = hydrograph.header;

        Ok(AhpsView {
            gauge_id: request.gauge_id.clone(),
            zone: request.zone,
            zone_label: request.zone.label(),
            site_name: name,
            generation_time,
            has_flow: has_positive_total(&flow),
            has_stage: has_positive_total(&stage),
            flow: plot_points(&flow, request.zone),
            stage: plot_points(&stage, request.zone),
            forecast,
        })
    }

    /// Fetches the NWM overlay. Transport and HTTP failures degrade to an
    /// empty overlay marked failed; no request means an empty overlay. An
    /// inverted date range is rejected before anything is fetched.
    pub fn forecast_overlay(
        &self,
        request: Option<&ForecastRequest>,
        zone: DisplayZone,
    ) -> Result<ForecastOverlay, SourceError> {
        let Some(request) = request else {
            return Ok(ForecastOverlay::default());
        };
        DateRange::new(request.start_date, request.end_date)?;

        match nwm::fetch_forecast(self.upstream, &self.config.endpoints.nwm_forecast, request) {
            Ok(points) => Ok(ForecastOverlay {
                points: plot_points(&forecast_series(&points), zone),
                failed: false,
            }),
            Err(e) if e.is_unavailable() => {
                log_source_failure(DataSource::Nwm, &request.comid, "forecast fetch", &e);
                Ok(ForecastOverlay {
                    points: Vec::new(),
                    failed: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Builds a download, resolving relative spans against the local date.
    pub fn export(&self, request: &ExportRequest) -> Result<ExportDocument, SourceError> {
        self.export_at(request, Local::now().date_naive())
    }

    pub fn export_at(&self, request: &ExportRequest, today: NaiveDate) -> Result<ExportDocument, SourceError> {
        let endpoints = &self.config.endpoints;
        match request {
            ExportRequest::UsgsIv { gauge_id, window } => {
                let range = window.resolve_at(today)?;
                let body = usgs::fetch_waterml(
                    self.upstream,
                    &endpoints.usgs_waterml,
                    gauge_id,
                    &range.start_param(),
                    &range.end_param(),
                )
                .inspect_err(|e| log_source_failure(DataSource::Usgs, gauge_id, "WaterML fetch", e))?;
                Ok(ExportDocument::waterml(body))
            }
            ExportRequest::UsgsDv {
                gauge_id,
                window,
                latitude,
                longitude,
            } => {
                let range = window.resolve_at(today)?;
                let dv = usgs::fetch_dv(
                    self.upstream,
                    &endpoints.usgs_dv,
                    gauge_id,
                    &range.start_param(),
                    &range.end_param(),
                )
                .inspect_err(|e| log_source_failure(DataSource::Usgs, gauge_id, "DV fetch", e))?;
                log_parse_summary(DataSource::Usgs, gauge_id, dv.records.len(), dv.skipped);

                let metadata = SeriesMetadata {
                    gauge_id: gauge_id.clone(),
                    site_name: dv.header.site_name.clone(),
                    contact: dv.header.contact.clone(),
                    retrieved: dv.header.retrieved.clone(),
                    latitude: latitude.clone(),
                    longitude: longitude.clone(),
                    variable_code: PARAM_DISCHARGE.to_string(),
                    variable_name: "Discharge".to_string(),
                    unit_name: Variable::Flow.unit_name().to_string(),
                    unit_abbreviation: UNITS_CFS.to_string(),
                };
                let records = export_records(&dv_series(&dv.records));
                Ok(ExportDocument::rendered(render_usgs_dv(&metadata, &records)?))
            }
            ExportRequest::Ahps {
                gauge_id,
                variable,
                latitude,
                longitude,
            } => {
                let hydrograph = ahps::fetch_hydrograph(
                    self.upstream,
                    &endpoints.ahps_hydrograph,
                    gauge_id,
                    self.config.ahps.missing_field_policy,
                )
                .inspect_err(|e| log_source_failure(DataSource::Ahps, gauge_id, "hydrograph fetch", e))?;

                let hours = hydrograph.header.declared_offset_hours()?;
                let offset = hours
                    .checked_mul(3600)
                    .and_then(FixedOffset::east_opt)
                    .ok_or_else(|| {
                        SourceError::InvalidDocument(format!("declared timezone offset {}h out of range", hours))
                    })?;
                let series = hydrograph_series(&hydrograph.records, *variable).rezoned(offset);
                let unit_abbreviation = series
                    .as_slice()
                    .last()
                    .map(|o| o.units.clone())
                    .unwrap_or_default();

                let metadata = SeriesMetadata {
                    gauge_id: gauge_id.clone(),
                    site_name: hydrograph.header.name.clone().unwrap_or_default(),
                    contact: None,
                    retrieved: hydrograph.header.generation_time.clone(),
                    latitude: latitude.clone(),
                    longitude: longitude.clone(),
                    variable_code: variable.code().to_string(),
                    variable_name: variable.name().to_string(),
                    unit_name: variable.unit_name().to_string(),
                    unit_abbreviation,
                };
                let records = export_records(&series);
                Ok(ExportDocument::rendered(render_ahps(&metadata, &records)?))
            }
        }
    }
}
