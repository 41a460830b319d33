//! IP-address geolocation via an ipapi.co compatible endpoint.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;

use super::{IpLocation, IpLocator};

pub const DEFAULT_IP_LOOKUP_URL: &str = "https://ipapi.co/json/";

#[derive(Clone)]
pub struct IpApiLocator {
    http: Client,
    url: String,
}

impl IpApiLocator {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("safety-locator/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .context("build ip lookup client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse an ipapi-style JSON body.
pub(crate) fn parse_ip_location(body: &str) -> Result<IpLocation> {
    let resp: IpApiResponse = serde_json::from_str(body.trim())
        .with_context(|| format!("parse IP lookup JSON failed, body: {}", body.trim()))?;

    if resp.error {
        bail!(
            "IP lookup refused: {}",
            resp.reason.as_deref().unwrap_or("no reason given")
        );
    }

    match (resp.latitude, resp.longitude) {
        (Some(latitude), Some(longitude)) if latitude.is_finite() && longitude.is_finite() => {
            Ok(IpLocation {
                latitude,
                longitude,
            })
        }
        _ => Err(anyhow!("invalid IP location data")),
    }
}

#[async_trait::async_trait]
impl IpLocator for IpApiLocator {
    async fn lookup(&self) -> Result<IpLocation> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("ip lookup request")?
            .error_for_status()
            .context("ip lookup non-2xx")?
            .text()
            .await
            .context("read ip lookup body")?;
        parse_ip_location(&body)
    }

    fn name(&self) -> &'static str {
        "ipapi"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinates() {
        let body = r#"{"ip":"1.2.3.4","city":"Pune","latitude":18.5196,"longitude":73.8553}"#;
        let loc = parse_ip_location(body).unwrap();
        assert_eq!(loc.latitude, 18.5196);
        assert_eq!(loc.longitude, 73.8553);
    }

    #[test]
    fn missing_coordinates_is_an_error() {
        let err = parse_ip_location(r#"{"ip":"1.2.3.4"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid IP location data"));
    }

    #[test]
    fn rate_limit_answer_is_an_error() {
        let body = r#"{"error":true,"reason":"RateLimited"}"#;
        let err = parse_ip_location(body).unwrap_err();
        assert!(err.to_string().contains("RateLimited"));
    }

    #[test]
    fn non_json_is_an_error() {
        assert!(parse_ip_location("<html>").is_err());
    }
}
