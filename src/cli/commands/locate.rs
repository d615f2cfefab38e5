use anyhow::Result;
use std::sync::Arc;

use crate::config::SecureRailsConfig;
use crate::location::{
    AddressResolver, Coordinates, FixedPosition, LocationCapture, NominatimGeocoder,
};

pub struct LocateCommand {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocateCommand {
    pub async fn execute(&self, config: &SecureRailsConfig) -> Result<()> {
        let coordinates = Coordinates::new(self.latitude, self.longitude);
        if !coordinates.is_valid() {
            anyhow::bail!("Coordinates out of range: latitude must be within [-90, 90] and longitude within [-180, 180]");
        }

        let geocoder = NominatimGeocoder::new(&config.location)?;
        let capture = LocationCapture::new(
            Arc::new(FixedPosition(coordinates)),
            AddressResolver::new(Arc::new(geocoder), config.location.geocode_timeout()),
            config.location.position_timeout(),
        );

        let captured = capture.capture().await?;
        println!("{}", captured.address);
        if !captured.address_resolved {
            eprintln!("(address lookup failed, showing coordinates)");
        }
        Ok(())
    }
}
