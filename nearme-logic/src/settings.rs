use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::location::{LocationRequest, Priority};

#[derive(Debug, Clone, Serialize, Deserialize, specta::Type)]
/// Settings for a tracking session
pub struct TrackerSettings {
    /// Milliseconds between location fixes
    pub update_interval_ms: u32,
    /// Accuracy to ask the location provider for
    pub priority: Priority,
    /// Pixels left around the bounding box when framing both markers
    pub camera_padding: u32,
    /// Width of the line drawn between the two markers
    pub line_width: f32,
    /// Color of the line, packed ARGB
    pub line_color: u32,
    /// Title of the local user's marker
    pub self_title: String,
    /// Title of the tracked user's marker
    pub remote_title: String,
}

impl TrackerSettings {
    pub fn location_request(&self) -> LocationRequest {
        LocationRequest {
            interval: Duration::from_millis(self.update_interval_ms as u64),
            priority: self.priority,
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            update_interval_ms: 5000,
            priority: Priority::HighAccuracy,
            camera_padding: 100,
            line_width: 5.0,
            line_color: 0xFF0099CC,
            self_title: "My location".to_string(),
            remote_title: "Remote user".to_string(),
        }
    }
}
