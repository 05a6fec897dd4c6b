//! Subscription addressing
//!
//! A job's stream lives at `{ws|wss}://{host}/ws/{job}`, where the scheme
//! mirrors the security of the page origin and the job id is escaped as a
//! single path segment.

use crate::error::ConfigError;
use std::fmt;
use url::Url;

/// Identifier of a training job
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(String);

impl JobId {
    /// Wrap a job id; blank ids are `None`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        (!id.trim().is_empty()).then_some(Self(id))
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Origin the subscription addresses are derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// `ws://host/` or `wss://host/`
    base: Url,
}

impl Origin {
    /// Parse a page origin such as `https://monitor.example:8443`
    ///
    /// `https`/`wss` select `wss`; `http`/`ws` select `ws`.
    ///
    /// # Errors
    /// - `ConfigError::InvalidOrigin` for unparseable URLs, other schemes,
    ///   or a missing host
    pub fn parse(origin: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidOrigin {
            origin: origin.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(origin).map_err(|e| invalid(&e.to_string()))?;
        let secure = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            _ => return Err(invalid("scheme must be http, https, ws or wss")),
        };
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Self::from_host(&host, secure).map_err(|_| invalid("unusable host"))
    }

    /// Origin from a bare `host[:port]`
    ///
    /// # Errors
    /// - `ConfigError::InvalidOrigin` if the host does not form a URL
    pub fn from_host(host: &str, secure: bool) -> Result<Self, ConfigError> {
        let scheme = if secure { "wss" } else { "ws" };
        let base = Url::parse(&format!("{scheme}://{host}/")).map_err(|e| {
            ConfigError::InvalidOrigin {
                origin: host.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { base })
    }

    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.base.scheme() == "wss"
    }

    /// Stream address for one job
    #[must_use]
    pub fn subscription_url(&self, job: &JobId) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("ws").push(job.as_str());
        }
        url
    }
}
