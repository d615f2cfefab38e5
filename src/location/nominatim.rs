use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use moka::future::Cache;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{Coordinates, GeocodeError, ReverseGeocoder};
use crate::config::LocationConfig;

/// Reverse geocoder backed by a Nominatim-compatible `/reverse` endpoint
#[derive(Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    cache: Cache<String, String>,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(config: &LocationConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.geocode_timeout())
            .build()?;

        // The public instance allows one request per second
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(config.geocode_cache_ttl_secs))
            .build();

        Ok(Self {
            client,
            base_url: config.nominatim_url.trim_end_matches('/').to_string(),
            rate_limiter,
            cache,
        })
    }

    // ~1m precision; nearby fixes share a cache entry
    fn cache_key(coordinates: &Coordinates) -> String {
        format!("{:.5},{:.5}", coordinates.latitude, coordinates.longitude)
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, coordinates: &Coordinates) -> Result<String, GeocodeError> {
        let key = Self::cache_key(coordinates);
        if let Some(address) = self.cache.get(&key).await {
            debug!("Geocode cache hit for {}", key);
            return Ok(address);
        }

        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;

        let response = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("format", "json".to_string()),
                ("lat", coordinates.latitude.to_string()),
                ("lon", coordinates.longitude.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }

        let body: ReverseResponse = response.json().await?;
        let address = body
            .display_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(GeocodeError::NoResult)?;

        self.cache.insert(key, address.clone()).await;
        Ok(address)
    }
}
