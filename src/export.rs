/// WaterML-style export documents.
///
/// Two shapes are rendered: the USGS daily-value document and the AHPS
/// hydrograph document. USGS instantaneous exports are not rendered here;
/// the upstream WaterML is handed back untouched (`ExportDocument::waterml`).
///
/// Numbers never use scientific notation and timestamps are minute precision
/// (`YYYY-MM-DDTHH:MM`).

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::model::{DV_NO_DATA, PARAM_DISCHARGE, SeriesMetadata, SourceError};
use crate::series::{ExportRecord, format_minute};

pub const EXPORT_FILENAME: &str = "output-time-series.xml";
pub const CONTENT_TYPE_WATERML: &str = "text/xml";
pub const CONTENT_TYPE_RENDERED: &str = "application/xml";

const WATERML_NS: &str = "http://www.cuahsi.org/waterML/1.1/";

/// A finished download.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDocument {
    pub filename: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl ExportDocument {
    /// Upstream WaterML, returned byte for byte.
    pub fn waterml(body: String) -> Self {
        ExportDocument {
            filename: EXPORT_FILENAME,
            content_type: CONTENT_TYPE_WATERML,
            body,
        }
    }

    pub fn rendered(body: String) -> Self {
        ExportDocument {
            filename: EXPORT_FILENAME,
            content_type: CONTENT_TYPE_RENDERED,
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// Number formatting
// ---------------------------------------------------------------------------

/// Plain decimal: integral values keep one decimal place ("2500.0"),
/// others use the shortest exact form ("5.2").
pub fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Offset hours as written in TimeOffset: "-5", "-2.5", "0".
pub fn format_offset(hours: f64) -> String {
    if hours.fract() == 0.0 {
        format!("{}", hours as i64)
    } else {
        format!("{}", hours)
    }
}

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

/// USGS daily-value export. TimeOffset is always "0" and UTCTime repeats
/// the date.
pub fn render_usgs_dv(metadata: &SeriesMetadata, records: &[ExportRecord]) -> Result<String, SourceError> {
    let mut out = XmlOut::new()?;
    out.open("timeSeriesResponse", &[("xmlns", WATERML_NS)])?;

    out.open("queryInfo", &[])?;
    out.leaf("creationTime", &[], metadata.retrieved.as_deref().unwrap_or(""))?;
    out.leaf("note", &[("title", "Contact")], metadata.contact.as_deref().unwrap_or(""))?;
    out.close("queryInfo")?;

    let series_name = format!("USGS:{}:{}:00003", metadata.gauge_id, PARAM_DISCHARGE);
    out.open("timeSeries", &[("name", series_name.as_str())])?;
    write_source_info(&mut out, metadata, "NWIS", "USGS")?;

    out.open("variable", &[])?;
    out.leaf("variableCode", &[("vocabulary", "NWIS")], &metadata.variable_code)?;
    out.leaf("variableName", &[], &metadata.variable_name)?;
    write_unit(&mut out, metadata)?;
    out.leaf("noDataValue", &[], &format_value(DV_NO_DATA))?;
    out.close("variable")?;

    out.open("values", &[])?;
    for record in records {
        let date = format_minute(record.local_time);
        out.leaf(
            "value",
            &[
                ("dateTime", date.as_str()),
                ("timeOffset", "0"),
                ("dateTimeUTC", date.as_str()),
                ("qualifiers", record.value_code.as_str()),
                ("agencyCode", record.agency_code.as_deref().unwrap_or("")),
                ("siteCode", record.site_code.as_deref().unwrap_or("")),
            ],
            &format_value(record.value),
        )?;
    }
    out.close("values")?;

    out.close("timeSeries")?;
    out.close("timeSeriesResponse")?;
    out.finish()
}

/// AHPS hydrograph export. Records are expected to be zoned to the
/// document's declared offset already.
pub fn render_ahps(metadata: &SeriesMetadata, records: &[ExportRecord]) -> Result<String, SourceError> {
    let mut out = XmlOut::new()?;
    out.open("timeSeriesResponse", &[("xmlns", WATERML_NS)])?;

    out.open("queryInfo", &[])?;
    out.leaf("creationTime", &[], metadata.retrieved.as_deref().unwrap_or(""))?;
    out.close("queryInfo")?;

    let series_name = format!("AHPS:{}:{}", metadata.gauge_id, metadata.variable_code);
    out.open("timeSeries", &[("name", series_name.as_str())])?;
    write_source_info(&mut out, metadata, "AHPS", "NWS")?;

    out.open("variable", &[])?;
    out.leaf("variableCode", &[("vocabulary", "AHPS")], &metadata.variable_code)?;
    out.leaf("variableName", &[], &metadata.variable_name)?;
    write_unit(&mut out, metadata)?;
    out.close("variable")?;

    out.open("values", &[])?;
    for record in records {
        let quality = record.quality_code.map(|q| q.to_string()).unwrap_or_default();
        out.leaf(
            "value",
            &[
                ("dateTime", format_minute(record.local_time).as_str()),
                ("timeOffset", format_offset(record.utc_offset_hours).as_str()),
                ("dateTimeUTC", format_minute(record.utc_time).as_str()),
                ("methodCode", record.kind),
                ("qualityControlLevelCode", quality.as_str()),
            ],
            &format_value(record.value),
        )?;
    }
    out.open("qualityControlLevel", &[("qualityControlLevelID", "1")])?;
    out.leaf("qualityControlLevelCode", &[], "1")?;
    out.leaf("definition", &[], "Observed")?;
    out.close("qualityControlLevel")?;
    out.open("qualityControlLevel", &[("qualityControlLevelID", "3")])?;
    out.leaf("qualityControlLevelCode", &[], "3")?;
    out.leaf("definition", &[], "Forecast")?;
    out.close("qualityControlLevel")?;
    out.close("values")?;

    out.close("timeSeries")?;
    out.close("timeSeriesResponse")?;
    out.finish()
}

fn write_source_info(
    out: &mut XmlOut,
    metadata: &SeriesMetadata,
    network: &str,
    agency: &str,
) -> Result<(), SourceError> {
    out.open("sourceInfo", &[])?;
    out.leaf("siteName", &[], &metadata.site_name)?;
    out.leaf(
        "siteCode",
        &[("network", network), ("agencyCode", agency)],
        &metadata.gauge_id,
    )?;
    out.open("geoLocation", &[])?;
    out.open("geogLocation", &[("srs", "EPSG:4326")])?;
    out.leaf("latitude", &[], &metadata.latitude)?;
    out.leaf("longitude", &[], &metadata.longitude)?;
    out.close("geogLocation")?;
    out.close("geoLocation")?;
    out.close("sourceInfo")
}

fn write_unit(out: &mut XmlOut, metadata: &SeriesMetadata) -> Result<(), SourceError> {
    out.open("unit", &[])?;
    out.leaf("unitName", &[], &metadata.unit_name)?;
    out.leaf("unitAbbreviation", &[], &metadata.unit_abbreviation)?;
    out.close("unit")
}

/// Thin wrapper over the quick-xml writer with our error type.
struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Result<Self, SourceError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_error)?;
        Ok(XmlOut { writer })
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), SourceError> {
        let mut element = BytesStart::new(name);
        for attr in attrs {
            element.push_attribute(*attr);
        }
        self.writer.write_event(Event::Start(element)).map_err(write_error)
    }

    fn close(&mut self, name: &str) -> Result<(), SourceError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(write_error)
    }

    fn leaf(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), SourceError> {
        self.open(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(write_error)?;
        self.close(name)
    }

    fn finish(self) -> Result<String, SourceError> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| SourceError::InvalidDocument(format!("export is not UTF-8: {}", e)))
    }
}

fn write_error(err: impl std::fmt::Display) -> SourceError {
    SourceError::InvalidDocument(format!("failed to write export XML: {}", err))
}
