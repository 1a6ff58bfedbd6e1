//! Monitored endpoint definitions.

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Target validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("can't parse URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("only HTTP protocol is supported: {0:?} provided")]
    UnsupportedScheme(String),
    #[error("unknown HTTP method {0:?}. Valid ones: [GET HEAD]")]
    UnknownMethod(String),
    #[error("can't compile regexp {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// HTTP methods a probe may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Method {
    #[default]
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "HEAD")]
    Head,
}

impl Method {
    /// Parse a method name. An empty string selects GET.
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        match raw {
            "" | "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            other => Err(TargetError::UnknownMethod(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable probe specification.
///
/// The id is the hex SHA-1 of `url + method + match_regexp` and is used
/// both as the storage primary key and as the bus partitioning key. The
/// pattern is a byte regex: response bodies are matched as raw bytes,
/// whatever their encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "TargetRecord", try_from = "TargetRecord")]
pub struct Target {
    id: String,
    url: Url,
    raw_url: String,
    method: Method,
    pattern: Option<Regex>,
}

impl Target {
    /// Validate the raw fields and derive the target id.
    ///
    /// An empty `method` means GET and an empty `match_regexp` means no
    /// body matching.
    pub fn new(url: &str, method: &str, match_regexp: &str) -> Result<Self, TargetError> {
        let method = Method::parse(method)?;
        let pattern = (!match_regexp.is_empty()).then_some(match_regexp);
        let id = derive_id(url, method, match_regexp);
        Self::with_id(id, url, method, pattern)
    }

    fn with_id(
        id: String,
        raw_url: &str,
        method: Method,
        pattern: Option<&str>,
    ) -> Result<Self, TargetError> {
        let url = Url::parse(raw_url).map_err(|e| TargetError::InvalidUrl {
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(TargetError::UnsupportedScheme(url.scheme().to_string()));
        }

        let pattern = pattern
            .map(|p| {
                Regex::new(p).map_err(|e| TargetError::InvalidPattern {
                    pattern: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            id,
            url,
            raw_url: raw_url.to_string(),
            method,
            pattern,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The parsed URL used for requests.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The URL exactly as it was configured.
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    pub fn match_regexp(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.raw_url == other.raw_url
            && self.method == other.method
            && self.match_regexp() == other.match_regexp()
    }
}

impl Eq for Target {}

/// Hashes the URL exactly as configured. The parsed [`Url`] may normalise
/// it (trailing slash, escaping), but the id never follows.
fn derive_id(url: &str, method: Method, match_regexp: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    hasher.update(method.as_str().as_bytes());
    hasher.update(match_regexp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Wire and storage shape of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: String,
    pub url: String,
    pub method: Method,
    pub match_regexp: Option<String>,
}

impl From<Target> for TargetRecord {
    fn from(target: Target) -> Self {
        Self {
            match_regexp: target.match_regexp().map(str::to_string),
            id: target.id,
            url: target.raw_url,
            method: target.method,
        }
    }
}

impl TryFrom<TargetRecord> for Target {
    type Error = TargetError;

    /// Re-validates the fields but keeps the id the record was sent with.
    fn try_from(record: TargetRecord) -> Result<Self, Self::Error> {
        Target::with_id(
            record.id,
            &record.url,
            record.method,
            record.match_regexp.as_deref().filter(|p| !p.is_empty()),
        )
    }
}
