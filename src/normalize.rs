/// Raw parser records → canonical `TimeSeries`.
///
/// Every function here builds observations through `Observation::from_local`
/// or `Observation::from_utc`, so the local/UTC/offset triple is consistent
/// from the start.

use std::collections::HashSet;

use chrono::NaiveTime;
use tracing::warn;

use crate::ingest::ahps::HydrographRecord;
use crate::ingest::nwm::ForecastPoint;
use crate::ingest::usgs::{DvRecord, IvRecord};
use crate::model::{
    Granularity, Observation, TimeSeries, UNITS_CFS, ValueKind, Variable, utc_offset_zero,
};
use crate::timezone::lookup_abbreviation;

/// USGS instantaneous rows, offsets taken from each row's zone abbreviation.
///
/// An abbreviation missing from the table falls back to UTC; each distinct
/// unknown abbreviation is warned about once per call.
pub fn iv_series(records: &[IvRecord]) -> TimeSeries {
    let mut unknown: HashSet<&str> = HashSet::new();
    let mut series = TimeSeries::new(Granularity::Instantaneous);

    for record in records {
        let offset = match lookup_abbreviation(&record.zone_abbreviation) {
            Some(offset) => offset,
            None => {
                if unknown.insert(record.zone_abbreviation.as_str()) {
                    warn!(
                        zone = %record.zone_abbreviation,
                        site = %record.site_code,
                        "unknown zone abbreviation, treating as UTC"
                    );
                }
                utc_offset_zero()
            }
        };

        let kind = ValueKind::Usgs {
            agency_code: record.agency_code.clone(),
            site_code: record.site_code.clone(),
        };
        series.push(
            Observation::from_local(record.local_time, offset, record.value, kind, UNITS_CFS)
                .with_value_code(record.value_code.clone()),
        );
    }

    series
}

/// USGS daily rows. Days carry no zone: midnight, offset zero.
pub fn dv_series(records: &[DvRecord]) -> TimeSeries {
    let observations = records
        .iter()
        .map(|record| {
            let kind = ValueKind::Usgs {
                agency_code: record.agency_code.clone(),
                site_code: record.site_code.clone(),
            };
            Observation::from_local(
                record.date.and_time(NaiveTime::MIN),
                utc_offset_zero(),
                record.value,
                kind,
                UNITS_CFS,
            )
            .with_value_code(record.value_code.clone())
        })
        .collect();

    TimeSeries::from_observations(Granularity::Daily, observations)
}

/// One variable of an AHPS hydrograph, in UTC.
pub fn hydrograph_series(records: &[HydrographRecord], variable: Variable) -> TimeSeries {
    let observations = records
        .iter()
        .map(|record| {
            let (value, units) = match variable {
                Variable::Flow => (record.flow, record.flow_units.as_str()),
                Variable::Stage => (record.stage, record.stage_units.as_str()),
            };
            Observation::from_utc(
                record.valid_utc,
                utc_offset_zero(),
                value,
                record.section.value_kind(),
                units,
            )
        })
        .collect();

    let mut series = TimeSeries::from_observations(Granularity::Instantaneous, observations);
    series.sort_chronologically();
    series
}

/// NWM forecast points, in UTC and cfs.
pub fn forecast_series(points: &[ForecastPoint]) -> TimeSeries {
    let observations = points
        .iter()
        .map(|p| Observation::from_utc(p.valid_utc, utc_offset_zero(), p.value, ValueKind::Forecast, UNITS_CFS))
        .collect();
    TimeSeries::from_observations(Granularity::Instantaneous, observations)
}
