/// Upstream data sources.
///
/// Each provider gets its own file: URL construction, the fetch call, and
/// the parser for that provider's wire format. Parsers return raw records;
/// `crate::normalize` turns those into `Observation`s.
///
/// - `client` - the `Upstream` fetch seam and its blocking reqwest implementation
/// - `usgs`   - NWIS instantaneous / daily values (tab-delimited rdb)
/// - `ahps`   - NWS AHPS hydrograph XML
/// - `nwm`    - National Water Model forecast API (delimiter-scraped text)

pub mod ahps;
pub mod client;
pub mod nwm;
pub mod usgs;

#[cfg(test)]
pub mod fixtures;
