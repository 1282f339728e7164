use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ScraperConfig;
use crate::error::{ConfigError, FetchError};

/// Anything that can turn a URL into page text
pub trait PageSource {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Wait after failed attempt `attempt` (1-based): linear in the attempt number,
/// or a flat `delay * 2` when the server rate-limited us
pub fn backoff_delay(delay: Duration, attempt: u32, rate_limited: bool) -> Duration {
    if rate_limited {
        delay * 2
    } else {
        delay * attempt
    }
}

enum AttemptFailure {
    Transport(reqwest::Error),
    Status(StatusCode),
}

pub struct Fetcher {
    client: Client,
    max_retries: u32,
    delay: Duration,
}

fn header_map(config: &ScraperConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::Header {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| ConfigError::Header {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

impl Fetcher {
    pub fn new(config: &ScraperConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .default_headers(header_map(config)?)
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            delay: config.delay(),
        })
    }

    fn attempt(&self, url: &str) -> Result<String, AttemptFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(AttemptFailure::Transport)?;

        let status = response.status();
        debug!(url, status = status.as_u16(), headers = ?response.headers(), "response received");
        if !status.is_success() {
            return Err(AttemptFailure::Status(status));
        }
        response.text().map_err(AttemptFailure::Transport)
    }
}

impl PageSource for Fetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut last_failure = None;

        for attempt in 1..=self.max_retries {
            info!(url, attempt, "Fetching URL");

            let failure = match self.attempt(url) {
                Ok(text) => {
                    info!(url, bytes = text.len(), "Successfully fetched");
                    return Ok(text);
                }
                Err(failure) => failure,
            };

            let rate_limited = matches!(
                failure,
                AttemptFailure::Status(status) if status == StatusCode::TOO_MANY_REQUESTS
            );
            match &failure {
                AttemptFailure::Status(status) if rate_limited => {
                    warn!(url, attempt, status = status.as_u16(), "Rate limit hit, waiting before retry");
                }
                AttemptFailure::Status(status) => {
                    error!(url, attempt, status = status.as_u16(), "Failed to fetch");
                }
                AttemptFailure::Transport(e) if e.is_timeout() => {
                    warn!(url, attempt, max = self.max_retries, "Timeout while fetching");
                }
                AttemptFailure::Transport(e) => {
                    error!(url, attempt, error = %e, "Request failed");
                }
            }
            last_failure = Some(failure);

            if attempt < self.max_retries {
                thread::sleep(backoff_delay(self.delay, attempt, rate_limited));
            }
        }

        error!(url, attempts = self.max_retries, "All attempts to fetch failed");
        Err(match last_failure {
            Some(AttemptFailure::Status(status)) => FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                attempts: self.max_retries,
            },
            Some(AttemptFailure::Transport(e)) => FetchError::NoResponse {
                url: url.to_string(),
                attempts: self.max_retries,
                reason: e.to_string(),
            },
            None => FetchError::NoResponse {
                url: url.to_string(),
                attempts: 0,
                reason: "no attempts made".to_string(),
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory pages keyed by URL; unknown URLs fail like a dead host
    #[derive(Default)]
    pub struct StaticPages {
        pages: HashMap<String, String>,
        pub requested: RefCell<Vec<String>>,
    }

    impl StaticPages {
        pub fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }
    }

    impl PageSource for StaticPages {
        fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requested.borrow_mut().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::NoResponse {
                    url: url.to_string(),
                    attempts: 1,
                    reason: "connection refused".to_string(),
                })
        }
    }
}
