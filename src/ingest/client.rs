/// Upstream fetch seam.
///
/// Every provider module fetches through `Upstream`, so tests can swap the
/// network for canned documents. `HttpUpstream` is the production
/// implementation over a blocking reqwest client.

use reqwest::blocking::Client;
use tracing::debug;

use crate::config::FetchConfig;
use crate::model::SourceError;

/// Retrieves the body of an upstream document as text.
///
/// Non-2xx responses map to `SourceError::Http`; transport failures
/// (DNS, refused connection, timeout, unreadable body) map to
/// `SourceError::Unreachable`.
pub trait Upstream {
    fn get_text(&self, url: &str) -> Result<String, SourceError>;
}

impl<U: Upstream + ?Sized> Upstream for &U {
    fn get_text(&self, url: &str) -> Result<String, SourceError> {
        (**self).get_text(url)
    }
}

/// Blocking HTTP upstream with the configured timeout and user agent.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new(config: &FetchConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SourceError::Unreachable(format!("failed to build HTTP client: {}", e)))?;
        Ok(HttpUpstream { client })
    }
}

impl Upstream for HttpUpstream {
    fn get_text(&self, url: &str) -> Result<String, SourceError> {
        debug!(url, "fetching upstream document");

        let response = self.client.get(url).send().map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http(status.as_u16()));
        }

        response.text().map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Unreachable(format!("request timed out: {}", err))
    } else {
        SourceError::Unreachable(err.to_string())
    }
}
