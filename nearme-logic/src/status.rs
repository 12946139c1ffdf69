use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
/// Text shown alongside the tracking map. Every error the tracker hits ends up as one of these,
/// none of them stop tracking.
pub enum TrackingStatus {
    /// Nothing drawn yet, waiting on one or both positions
    Waiting,
    /// Both positions known, contains the distance between them in kilometers
    Distance(f64),
    /// The user refused location access
    PermissionDenied,
    /// Permission was granted but updates couldn't be started
    LocationUnavailable,
    /// The device reported a `(0, 0)` fix, usually means location is switched off
    InvalidCoordinates,
    /// The remote subscription reported an error
    FetchError,
    /// The tracked user's record doesn't exist
    DataUnavailable,
    /// The tracked user's record exists but has no stored position
    CoordinatesUnavailable,
}

impl TrackingStatus {
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Waiting | Self::Distance(_))
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting for locations"),
            Self::Distance(km) => write!(f, "Distance: {km:.2} km"),
            Self::PermissionDenied => write!(f, "Location permission denied"),
            Self::LocationUnavailable => write!(f, "Error enabling location"),
            Self::InvalidCoordinates => write!(f, "Invalid device coordinates"),
            Self::FetchError => write!(f, "Error fetching data"),
            Self::DataUnavailable => write!(f, "Data unavailable"),
            Self::CoordinatesUnavailable => write!(f, "Coordinates unavailable"),
        }
    }
}
