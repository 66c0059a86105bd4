//! Reputation/geolocation lookups.
//!
//! The provider is advisory: every call is time-boxed and a failure degrades
//! to a zero-contribution signal, never a blocked login.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(300);

/// What the reputation provider knows about an IP.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IpIntel {
    pub country: Option<String>,
    #[serde(default)]
    pub is_proxy: bool,
    #[serde(default)]
    pub is_vpn: bool,
    #[serde(default)]
    pub is_tor: bool,
    #[serde(default)]
    pub is_hosting: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Advisory IP intelligence source.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Look up an IP. Errors mean "no signal", not "deny".
    async fn lookup(&self, ip: &str) -> Result<IpIntel>;
}

/// HTTP reputation provider with a hard per-call deadline.
pub struct HttpGeoProvider {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGeoProvider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_LOOKUP_TIMEOUT)
            .build()
            .context("failed to build reputation client")?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, ip: &str) -> Result<IpIntel> {
        let url = self
            .base_url
            .join(ip)
            .context("failed to build reputation lookup url")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("reputation lookup failed")?
            .error_for_status()
            .context("reputation lookup returned an error status")?;
        response
            .json::<IpIntel>()
            .await
            .context("failed to decode reputation response")
    }
}

/// Provider used when no reputation source is configured: every IP looks
/// clean.
#[derive(Debug, Default)]
pub struct NullGeoProvider;

#[async_trait]
impl GeoProvider for NullGeoProvider {
    async fn lookup(&self, _ip: &str) -> Result<IpIntel> {
        Ok(IpIntel::default())
    }
}

/// Great-circle distance between two coordinates, in kilometers.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}
