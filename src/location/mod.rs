//! Geolocation capture
//!
//! A device position is obtained through a [`PositionSource`] and described
//! through a [`ReverseGeocoder`]. Both waits are bounded. Failing to resolve
//! an address is never fatal: the capture degrades to formatted coordinates.

pub mod nominatim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

pub use nominatim::NominatimGeocoder;

/// A WGS84 position as reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Fallback display string when no address could be resolved
pub fn format_coordinates(coordinates: &Coordinates) -> String {
    format!("{:.6}, {:.6}", coordinates.latitude, coordinates.longitude)
}

/// The three ways obtaining a device position can fail
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeolocationError {
    #[error("Location permission denied. Enable location access and try again.")]
    PermissionDenied,
    #[error("Location information is unavailable: {reason}")]
    PositionUnavailable { reason: String },
    #[error("Location request timed out after {after:?}")]
    Timeout { after: Duration },
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Geocoding service returned HTTP {0}")]
    Status(u16),
    #[error("No address found for coordinates")]
    NoResult,
    #[error("Geocoding timed out after {0:?}")]
    Timeout(Duration),
}

/// Device capability that yields the current position
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, GeolocationError>;
}

/// Resolves coordinates to a human-readable address
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, coordinates: &Coordinates) -> Result<String, GeocodeError>;
}

/// Position source for a known, fixed location (operator tooling, kiosks)
#[derive(Debug, Clone)]
pub struct FixedPosition(pub Coordinates);

#[async_trait]
impl PositionSource for FixedPosition {
    async fn current_position(&self) -> Result<Coordinates, GeolocationError> {
        if !self.0.is_valid() {
            return Err(GeolocationError::PositionUnavailable {
                reason: format!("coordinates out of range: {}", format_coordinates(&self.0)),
            });
        }
        Ok(self.0)
    }
}

/// Geocoder used when address resolution is turned off
#[derive(Debug, Clone, Default)]
pub struct DisabledGeocoder;

#[async_trait]
impl ReverseGeocoder for DisabledGeocoder {
    async fn reverse(&self, _coordinates: &Coordinates) -> Result<String, GeocodeError> {
        Err(GeocodeError::NoResult)
    }
}

/// Outcome of a best-effort address lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAddress {
    pub address: String,
    /// False when `address` is the coordinate fallback
    pub resolved: bool,
}

/// Best-effort, time-bounded reverse geocoding
#[derive(Clone)]
pub struct AddressResolver {
    geocoder: Arc<dyn ReverseGeocoder>,
    timeout: Duration,
}

impl AddressResolver {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>, timeout: Duration) -> Self {
        Self { geocoder, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledGeocoder), Duration::from_secs(1))
    }

    /// Never fails: lookup errors and timeouts fall back to formatted coordinates
    pub async fn resolve(&self, coordinates: &Coordinates) -> ResolvedAddress {
        let lookup = timeout(self.timeout, self.geocoder.reverse(coordinates)).await;
        let outcome = match lookup {
            Ok(result) => result,
            Err(_) => Err(GeocodeError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(address) if !address.trim().is_empty() => ResolvedAddress {
                address,
                resolved: true,
            },
            Ok(_) => ResolvedAddress {
                address: format_coordinates(coordinates),
                resolved: false,
            },
            Err(e) => {
                debug!(error = %e, "Reverse geocoding failed, using coordinates");
                ResolvedAddress {
                    address: format_coordinates(coordinates),
                    resolved: false,
                }
            }
        }
    }
}

/// A captured position together with its display address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedLocation {
    pub coordinates: Coordinates,
    pub address: String,
    pub address_resolved: bool,
}

/// Position acquisition followed by best-effort address resolution
pub struct LocationCapture {
    source: Arc<dyn PositionSource>,
    resolver: AddressResolver,
    position_timeout: Duration,
}

impl LocationCapture {
    pub fn new(
        source: Arc<dyn PositionSource>,
        resolver: AddressResolver,
        position_timeout: Duration,
    ) -> Self {
        Self {
            source,
            resolver,
            position_timeout,
        }
    }

    pub async fn capture(&self) -> Result<CapturedLocation, GeolocationError> {
        let coordinates = match timeout(self.position_timeout, self.source.current_position()).await
        {
            Ok(Ok(coordinates)) => coordinates,
            Ok(Err(e)) => {
                warn!(error = %e, "Position capture failed");
                return Err(e);
            }
            Err(_) => {
                warn!(after = ?self.position_timeout, "Position capture timed out");
                return Err(GeolocationError::Timeout {
                    after: self.position_timeout,
                });
            }
        };

        let resolved = self.resolver.resolve(&coordinates).await;
        Ok(CapturedLocation {
            coordinates,
            address: resolved.address,
            address_resolved: resolved.resolved,
        })
    }
}
