use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::domain::TargetName;
use crate::error::SkyError;

pub const SESAME_URL: &str = "https://cds.unistra.fr/cgi-bin/nph-sesame/-o/SNV";

static J2000_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^%J\s+([+-]?\d+(?:\.\d*)?)\s+([+-]?\d+(?:\.\d*)?)").unwrap()
});

/// ICRS position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

pub trait NameResolver: Send + Sync {
    fn resolve(&self, name: &TargetName) -> Result<ResolvedPosition, SkyError>;
}

/// Resolves names through the CDS Sesame service (Simbad, then NED, then VizieR).
#[derive(Clone)]
pub struct SesameResolver {
    client: Client,
    base_url: String,
}

impl SesameResolver {
    pub fn new() -> Result<Self, SkyError> {
        Self::with_url(SESAME_URL)
    }

    pub fn with_url(base_url: &str) -> Result<Self, SkyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("skyfetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SkyError::ResolverHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SkyError::ResolverHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

impl NameResolver for SesameResolver {
    fn resolve(&self, name: &TargetName) -> Result<ResolvedPosition, SkyError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|err| SkyError::ResolverHttp(err.to_string()))?;
        url.set_query(Some(name.as_str()));
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SkyError::ResolverHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SkyError::ResolverHttp(format!(
                "status {}",
                response.status().as_u16()
            )));
        }
        let body = response
            .text()
            .map_err(|err| SkyError::ResolverHttp(err.to_string()))?;
        parse_sesame(&body).ok_or_else(|| SkyError::UnresolvedTarget(name.to_string()))
    }
}

/// Reads the first `%J ra dec` line of a Sesame plain-text answer.
pub fn parse_sesame(body: &str) -> Option<ResolvedPosition> {
    let caps = J2000_LINE.captures(body)?;
    Some(ResolvedPosition {
        ra_deg: caps[1].parse().ok()?,
        dec_deg: caps[2].parse().ok()?,
    })
}
