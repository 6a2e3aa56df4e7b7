// Metadata HTTP client
//
// Wraps `reqwest::Client` with endpoint templating and sentinel
// detection. Callers decide what to do with failures; this module only
// classifies them.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use super::models::{MetadataDocument, MetadataResponse, is_not_found_body};
use crate::error::Error;
use crate::transport::TransportConfig;

/// HTTP client for the device metadata service.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: Url,
    url_template: String,
    timeout: Duration,
}

impl MetadataClient {
    /// Create a client for `base_url` (scheme + host, e.g.
    /// `https://connect.sorel.de`) from a `TransportConfig`.
    pub fn new(
        base_url: Url,
        url_template: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            url_template: url_template.into(),
            timeout: transport.timeout,
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        url_template: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            url_template: url_template.into(),
            timeout,
        }
    }

    /// The service base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build the metadata URL for one organization / device model.
    pub fn metadata_url(
        &self,
        organization_id: &str,
        device_id: &str,
        language: &str,
    ) -> Result<Url, Error> {
        let path = self
            .url_template
            .replace("{organizationId}", organization_id)
            .replace("{deviceEnumId}", device_id)
            .replace("{language}", language);
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Fetch the metadata document for a device model.
    ///
    /// The not-found sentinel is recognized regardless of HTTP status.
    /// Every other non-2xx status, transport failure or unparseable body
    /// comes back as an `Err`.
    pub async fn fetch(
        &self,
        organization_id: &str,
        device_id: &str,
        language: &str,
    ) -> Result<MetadataResponse, Error> {
        let url = self.metadata_url(organization_id, device_id, language)?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_send_error(e))?;
        trace!(status = status.as_u16(), bytes = body.len(), "metadata response");

        let parsed = serde_json::from_str::<Value>(&body);

        if let Ok(ref value) = parsed {
            if is_not_found_body(value) {
                return Ok(MetadataResponse::NotFound { body });
            }
        }

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: preview(&body).to_owned(),
            });
        }

        let value = parsed.map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body: body.clone(),
        })?;

        let document: MetadataDocument =
            serde_json::from_value(value).map_err(|e| Error::Deserialization {
                message: format!("{e} (body preview: {:?})", preview(&body)),
                body: body.clone(),
            })?;

        Ok(MetadataResponse::Found { body, document })
    }

    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }
}

/// First 200 bytes of a body, cut on a char boundary.
fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metadata::DEFAULT_URL_TEMPLATE;

    fn client(base: &str) -> MetadataClient {
        MetadataClient::with_client(
            reqwest::Client::new(),
            Url::parse(base).unwrap(),
            DEFAULT_URL_TEMPLATE,
            Duration::from_secs(15),
        )
    }

    #[test]
    fn url_substitutes_all_placeholders() {
        let url = client("https://connect.sorel.de")
            .metadata_url("0000", "00a6", "en")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://connect.sorel.de/api/public/0000/device/00a6/metadata?language=en"
        );
    }

    #[test]
    fn trailing_slash_on_base_is_ignored() {
        let url = client("http://127.0.0.1:8080/")
            .metadata_url("1", "2", "de")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/api/public/1/device/2/metadata?language=de"
        );
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let body = "ä".repeat(150);
        let cut = preview(&body);
        assert!(cut.len() <= 200);
        assert!(body.starts_with(cut));
    }
}
