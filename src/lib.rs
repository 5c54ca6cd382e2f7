/// gaugeview_service: streamflow and stage time series from USGS, NWS AHPS
/// and the National Water Model, normalized and exported as WaterML.
///
/// # Module structure
///
/// ```text
/// gaugeview_service
/// ├── model       - shared data types (Observation, TimeSeries, SourceError, …)
/// ├── config      - gaugeview.toml loading and environment overrides
/// ├── logging     - tracing setup and per-source failure classification
/// ├── timezone    - fixed abbreviation offsets + display-zone conversion
/// ├── ingest
/// │   ├── client  - Upstream fetch trait, blocking reqwest implementation
/// │   ├── usgs    - NWIS IV / DV rdb: URL construction + parsing
/// │   ├── ahps    - AHPS hydrograph XML: URL construction + parsing
/// │   ├── nwm     - NWM forecast API: request model + scraping
/// │   └── fixtures (test only) - representative upstream payloads
/// ├── normalize   - parser records → TimeSeries
/// ├── series      - plot and export projections, data-presence flags
/// ├── export      - WaterML-style XML documents
/// └── pipeline    - per-request fetch → normalize → project → serialize
/// ```

pub mod config;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod series;
pub mod timezone;
