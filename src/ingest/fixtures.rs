/// Canned upstream documents for unit tests.
///
/// The files live under `tests/fixtures/` so the integration tests read the
/// same bytes.

pub const USGS_IV_RDB: &str = include_str!("../../tests/fixtures/usgs_iv.rdb");
pub const USGS_DV_RDB: &str = include_str!("../../tests/fixtures/usgs_dv.rdb");
pub const AHPS_HYDROGRAPH_XML: &str = include_str!("../../tests/fixtures/ahps_hydrograph.xml");
pub const NWM_FORECAST_XML: &str = include_str!("../../tests/fixtures/nwm_forecast.xml");
