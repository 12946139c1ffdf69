use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prelude::*;

/// A "part" of a location
pub type LocationComponent = f64;

/// Mean radius of the earth in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, specta::Type)]
/// Some location in the world as gotten from a Geolocation API
pub struct Location {
    /// Latitude
    pub lat: LocationComponent,
    /// Longitude
    pub long: LocationComponent,
}

impl Location {
    pub const fn new(lat: LocationComponent, long: LocationComponent) -> Self {
        Self { lat, long }
    }

    /// Whether this is the `(0, 0)` reading location providers hand out before they have a fix
    pub fn is_degenerate(&self) -> bool {
        self.lat == 0.0 && self.long == 0.0
    }

    /// Whether both components are within their valid ranges
    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.long)
    }

    /// Great-circle distance to `other` in kilometers (haversine)
    pub fn distance_km(&self, other: &Location) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_long = (other.long - self.long).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_long / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, specta::Type)]
/// How hard the provider should try for an accurate fix
pub enum Priority {
    #[default]
    HighAccuracy,
    Balanced,
    LowPower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Parameters for a periodic location request
pub struct LocationRequest {
    pub interval: Duration,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq)]
/// Something reported by an active location request
pub enum LocationEvent {
    /// A new reading
    Fix(Location),
    /// The provider failed to produce a reading
    Error(String),
}

pub type LocationEventSender = mpsc::Sender<LocationEvent>;

/// Handle to an active location request, pass back to [LocationService::remove_updates]
pub type WatchId = u32;

pub trait LocationService: Send + Sync {
    /// Check that we're allowed to read precise location, prompting the user if the platform
    /// requires it. Returns `false` if permission was denied.
    fn ensure_permission(&self) -> bool;
    /// Start delivering periodic readings into `events`.
    fn request_updates(&self, request: LocationRequest, events: LocationEventSender) -> Result<WatchId>;
    /// Stop a request started with [LocationService::request_updates]
    fn remove_updates(&self, id: WatchId);
    /// A single reading of where the device is now, `None` if the platform has no fix yet
    fn current_position(&self) -> Result<Option<Location>>;
}

/// One-shot position for places that don't need a stream, such as pre-filling the registration
/// form or placing the user on the home map. Degenerate readings come back as `None`.
pub fn current_location(location: &impl LocationService) -> Result<Option<Location>> {
    if !location.ensure_permission() {
        anyhow::bail!("Location permission denied");
    }

    let pos = location
        .current_position()
        .context("Failed to get current position")?;

    Ok(pos.filter(|loc| !loc.is_degenerate()))
}
