use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use gaugeview_service::config::{ServiceConfig, apply_overrides, load_config, load_config_from};
use gaugeview_service::export::EXPORT_FILENAME;
use gaugeview_service::ingest::client::HttpUpstream;
use gaugeview_service::ingest::nwm::ForecastRequest;
use gaugeview_service::logging::{DataSource, init_logging};
use gaugeview_service::model::{SourceError, Variable};
use gaugeview_service::pipeline::{
    AhpsViewRequest, DateRange, ExportRequest, ExportWindow, Pipeline, UsgsViewRequest,
    initial_forecast,
};
use gaugeview_service::timezone::DisplayZone;

#[derive(Parser)]
#[command(name = "gaugeview")]
#[command(about = "Fetch, normalize and export river gauge time series", long_about = None)]
struct Cli {
    /// Config file (defaults to gaugeview.toml in the working directory)
    #[arg(long, env = "GAUGEVIEW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a WaterML export document
    Export {
        #[command(subcommand)]
        kind: ExportKind,
    },
    /// Print plot series as JSON
    Plot {
        #[command(subcommand)]
        kind: PlotKind,
    },
}

#[derive(Subcommand)]
enum ExportKind {
    /// USGS daily values, rendered
    Usgsdv {
        gauge_id: String,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        location: LocationArgs,
        #[arg(long, short, default_value = EXPORT_FILENAME)]
        out: PathBuf,
    },
    /// USGS instantaneous values, upstream WaterML as-is
    Usgsiv {
        gauge_id: String,
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long, short, default_value = EXPORT_FILENAME)]
        out: PathBuf,
    },
    /// AHPS hydrograph, one variable
    Ahps {
        gauge_id: String,
        /// "flow" or "stage"
        #[arg(long, default_value = "flow")]
        variable: String,
        #[command(flatten)]
        location: LocationArgs,
        #[arg(long, short, default_value = EXPORT_FILENAME)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum PlotKind {
    /// USGS IV and DV series
    Usgs {
        gauge_id: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// AHPS flow and stage series
    Ahps {
        gauge_id: String,
        #[command(flatten)]
        view: ViewArgs,
    },
}

#[derive(Args)]
struct WindowArgs {
    /// Relative span: "all", "N-y", "N-m" or "N-d"
    #[arg(long, conflicts_with_all = ["start", "end"])]
    span: Option<String>,
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,
}

impl WindowArgs {
    fn window(&self) -> Result<ExportWindow, SourceError> {
        match (&self.span, self.start, self.end) {
            (Some(span), _, _) => Ok(ExportWindow::Span(span.clone())),
            (None, Some(start), Some(end)) => Ok(ExportWindow::Range(DateRange::new(start, end)?)),
            _ => Err(SourceError::InvalidRequest(
                "either --span or both --start and --end are required".to_string(),
            )),
        }
    }
}

#[derive(Args)]
struct LocationArgs {
    #[arg(long = "lat", default_value = "")]
    latitude: String,
    #[arg(long = "long", default_value = "")]
    longitude: String,
}

#[derive(Args)]
struct ViewArgs {
    /// Display zone menu key (UTC, Hawaii, Alaska, Pacific, Arizona, Mountain, Central, Eastern)
    #[arg(long)]
    zone: Option<String>,
    /// NHDPlus COMID; enables the NWM forecast overlay
    #[arg(long)]
    comid: Option<String>,
    /// analysis_assim, short_range or medium_range
    #[arg(long, requires = "comid")]
    forecast_config: Option<String>,
    #[arg(long, requires = "comid")]
    forecast_start: Option<NaiveDate>,
    #[arg(long, requires = "comid")]
    forecast_end: Option<NaiveDate>,
    #[arg(long, requires = "comid")]
    forecast_hour: Option<u8>,
}

impl ViewArgs {
    fn zone(&self, config: &ServiceConfig) -> Result<DisplayZone, SourceError> {
        match &self.zone {
            Some(key) => DisplayZone::from_selection(Some(key.as_str())),
            None => Ok(config.display.default_zone),
        }
    }

    fn forecast(&self) -> Result<Option<ForecastRequest>, SourceError> {
        let Some(comid) = &self.comid else {
            return Ok(None);
        };
        let mut request = initial_forecast(comid);
        if let Some(cfg) = &self.forecast_config {
            request.config = cfg.parse()?;
        }
        let start = self.forecast_start.unwrap_or(request.start_date);
        let end = self.forecast_end.unwrap_or(start);
        let dates = DateRange::new(start, end)?;
        request.start_date = dates.start;
        request.end_date = dates.end;
        if let Some(hour) = self.forecast_hour {
            if hour > 23 {
                return Err(SourceError::InvalidRequest(format!("forecast hour {} out of range", hour)));
            }
            request.hour = hour;
        }
        Ok(Some(request))
    }
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(source = %DataSource::System, "{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => {
            let mut config = load_config_from(path)?;
            apply_overrides(&mut config, |key| std::env::var(key).ok())?;
            config
        }
        None => load_config()?,
    };
    init_logging(&config.logging)?;

    let upstream = HttpUpstream::new(&config.fetch)?;
    let pipeline = Pipeline::new(&upstream, &config);

    match cli.command {
        Command::Export { kind } => {
            let (request, out) = match kind {
                ExportKind::Usgsdv {
                    gauge_id,
                    window,
                    location,
                    out,
                } => (
                    ExportRequest::UsgsDv {
                        gauge_id,
                        window: window.window()?,
                        latitude: location.latitude,
                        longitude: location.longitude,
                    },
                    out,
                ),
                ExportKind::Usgsiv { gauge_id, window, out } => (
                    ExportRequest::UsgsIv {
                        gauge_id,
                        window: window.window()?,
                    },
                    out,
                ),
                ExportKind::Ahps {
                    gauge_id,
                    variable,
                    location,
                    out,
                } => (
                    ExportRequest::Ahps {
                        gauge_id,
                        variable: variable.parse::<Variable>()?,
                        latitude: location.latitude,
                        longitude: location.longitude,
                    },
                    out,
                ),
            };

            let document = pipeline.export(&request)?;
            std::fs::write(&out, &document.body)?;
            info!(path = %out.display(), content_type = document.content_type, "export written");
            println!("Wrote {} ({}, {} bytes)", out.display(), document.content_type, document.body.len());
        }
        Command::Plot { kind } => {
            let json = match kind {
                PlotKind::Usgs {
                    gauge_id,
                    start,
                    end,
                    view,
                } => {
                    let request = UsgsViewRequest {
                        gauge_id,
                        range: DateRange::new(start, end)?,
                        zone: view.zone(&config)?,
                        forecast: view.forecast()?,
                    };
                    serde_json::to_string_pretty(&pipeline.usgs_view(&request)?)?
                }
                PlotKind::Ahps { gauge_id, view } => {
                    let request = AhpsViewRequest {
                        gauge_id,
                        zone: view.zone(&config)?,
                        forecast: view.forecast()?,
                    };
                    serde_json::to_string_pretty(&pipeline.ahps_view(&request)?)?
                }
            };
            println!("{}", json);
        }
    }

    Ok(())
}
