use serde::{Deserialize, Serialize};

use crate::{location::Location, map::Marker, prelude::*};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
/// A named place shown on the home map
pub struct PointOfInterest {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl PointOfInterest {
    pub fn as_marker(&self) -> Marker {
        Marker {
            position: Location::new(self.latitude, self.longitude),
            title: self.name.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointsFile {
    locations_array: Vec<PointOfInterest>,
}

/// Parse a bundled points of interest file
pub fn parse_points(raw: &str) -> Result<Vec<PointOfInterest>> {
    let file: PointsFile = serde_json::from_str(raw).context("Invalid points of interest file")?;
    Ok(file.locations_array)
}
