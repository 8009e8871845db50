//! Blocking HTTP retrieval with an ordered list of fallback locations.
//!
//! Both the course-file download and the World Bank client go through the
//! [`RemoteSource`] trait so tests can substitute canned responses.

use reqwest::blocking::Client;
use std::time::Duration;
use thiserror::Error;

const HTTP_USER_AGENT: &str = "gradeband-http-client/1.0";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request to '{url}' failed: {message}")]
    Transport { url: String, message: String },
    #[error("Request to '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Response from '{url}' could not be understood: {message}")]
    Malformed { url: String, message: String },
    #[error("No remote location was configured")]
    NoSources,
}

/// Anything that can turn a URL into a response body.
pub trait RemoteSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(HTTP_USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Transport {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl RemoteSource for HttpSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let transport = |e: reqwest::Error| RemoteError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().map_err(transport)?;
        Ok(body.to_vec())
    }
}

/// Tries each URL once, in order, and returns the first successful body with
/// the URL that produced it. Every failure is logged; if all fail the last
/// error is returned.
pub fn fetch_first_available(
    source: &dyn RemoteSource,
    urls: &[String],
) -> Result<(String, Vec<u8>), RemoteError> {
    let mut last_error = RemoteError::NoSources;
    for url in urls {
        match source.fetch(url) {
            Ok(body) => {
                log::debug!("Fetched {} bytes from {url}", body.len());
                return Ok((url.clone(), body));
            }
            Err(e) => {
                log::warn!("{e}");
                last_error = e;
            }
        }
    }
    Err(last_error)
}


#[cfg(test)]
mod tests {
    use super::testing::StubSource;
    use super::*;

    #[test]
    fn falls_back_to_the_next_url_once() {
        let source = StubSource::default().with("https://backup/a.csv", b"a;b\n1;2\n");
        let urls = vec![
            "https://primary/a.csv".to_string(),
            "https://backup/a.csv".to_string(),
        ];
        let (url, body) = fetch_first_available(&source, &urls).unwrap();
        assert_eq!(url, "https://backup/a.csv");
        assert_eq!(body, b"a;b\n1;2\n");
        assert_eq!(source.requested(), urls);
    }

    #[test]
    fn primary_success_skips_the_backup() {
        let source = StubSource::default()
            .with("https://primary/a.csv", b"x")
            .with("https://backup/a.csv", b"y");
        let urls = vec![
            "https://primary/a.csv".to_string(),
            "https://backup/a.csv".to_string(),
        ];
        let (_, body) = fetch_first_available(&source, &urls).unwrap();
        assert_eq!(body, b"x");
        assert_eq!(source.requested().len(), 1);
    }

    #[test]
    fn reports_the_last_failure_or_no_sources() {
        let source = StubSource::default();
        assert!(matches!(
            fetch_first_available(&source, &[]),
            Err(RemoteError::NoSources)
        ));
        let urls = vec!["https://gone/a.csv".to_string()];
        assert!(matches!(
            fetch_first_available(&source, &urls),
            Err(RemoteError::Status { status: 404, .. })
        ));
    }
}
