use serde::{Deserialize, Serialize};

use crate::{location::Location, settings::TrackerSettings, status::TrackingStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct Marker {
    pub position: Location,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
/// A straight line segment drawn between two points on the map
pub struct Polyline {
    pub from: Location,
    pub to: Location,
    pub width: f32,
    /// Packed ARGB
    pub color: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
/// A rectangular region of the map. If `west > east` the region crosses the antimeridian.
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    /// Smallest region containing every point in `points`, `None` if there are none.
    ///
    /// Longitudes are folded in one at a time, each time extending whichever side of the current
    /// span makes for the narrower result.
    pub fn including(points: &[Location]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bounds = Self::point(*first);
        for point in rest {
            bounds.include(*point);
        }
        Some(bounds)
    }

    /// A zero-sized region at `point`
    pub fn point(point: Location) -> Self {
        Self {
            south: point.lat,
            west: point.long,
            north: point.lat,
            east: point.long,
        }
    }

    fn include(&mut self, point: Location) {
        self.south = self.south.min(point.lat);
        self.north = self.north.max(point.lat);

        if self.contains_long(point.long) {
            return;
        }

        // Degrees we'd grow by extending either edge to reach the point
        let grow_west = (self.west - point.long).rem_euclid(360.0);
        let grow_east = (point.long - self.east).rem_euclid(360.0);

        if grow_west < grow_east {
            self.west = point.long;
        } else {
            self.east = point.long;
        }
    }

    fn contains_long(&self, long: f64) -> bool {
        if self.west <= self.east {
            (self.west..=self.east).contains(&long)
        } else {
            long >= self.west || long <= self.east
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    pub fn contains(&self, point: &Location) -> bool {
        (self.south..=self.north).contains(&point.lat) && self.contains_long(point.long)
    }

    pub fn center(&self) -> Location {
        let lat = (self.south + self.north) / 2.0;
        let long = if self.crosses_antimeridian() {
            let mid = (self.west + self.east + 360.0) / 2.0;
            if mid > 180.0 { mid - 360.0 } else { mid }
        } else {
            (self.west + self.east) / 2.0
        };
        Location::new(lat, long)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
/// Move the camera so `bounds` is in view, leaving `padding` pixels on each side
pub struct CameraUpdate {
    pub bounds: Bounds,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
/// Everything drawn on the map for one pair of positions
pub struct MapFrame {
    pub self_marker: Marker,
    pub remote_marker: Marker,
    pub line: Polyline,
    pub distance_km: f64,
    pub camera: CameraUpdate,
}

impl MapFrame {
    pub fn compute(self_pos: Location, remote_pos: Location, settings: &TrackerSettings) -> Self {
        let mut bounds = Bounds::point(self_pos);
        bounds.include(remote_pos);

        Self {
            self_marker: Marker {
                position: self_pos,
                title: settings.self_title.clone(),
            },
            remote_marker: Marker {
                position: remote_pos,
                title: settings.remote_title.clone(),
            },
            line: Polyline {
                from: self_pos,
                to: remote_pos,
                width: settings.line_width,
                color: settings.line_color,
            },
            distance_km: self_pos.distance_km(&remote_pos),
            camera: CameraUpdate {
                bounds,
                padding: settings.camera_padding,
            },
        }
    }

    /// Distance rounded to two decimal places, as displayed
    pub fn rounded_distance(&self) -> f64 {
        (self.distance_km * 100.0).round() / 100.0
    }

    /// Replace everything on `surface` with this frame
    pub fn draw(&self, surface: &impl MapSurface) {
        surface.clear();
        surface.add_marker(&self.self_marker);
        surface.add_marker(&self.remote_marker);
        surface.add_polyline(&self.line);
        surface.show_status(&TrackingStatus::Distance(self.distance_km));
        surface.move_camera(&self.camera);
    }
}

/// Where the map is actually rendered, nothing is ever read back from it
pub trait MapSurface: Send + Sync {
    /// Remove every marker and line
    fn clear(&self);
    fn add_marker(&self, marker: &Marker);
    fn add_polyline(&self, line: &Polyline);
    fn move_camera(&self, camera: &CameraUpdate);
    /// Show a line of status text next to the map
    fn show_status(&self, status: &TrackingStatus);
}
