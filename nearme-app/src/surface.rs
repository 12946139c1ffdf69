use log::error;
use serde::{Deserialize, Serialize};
use tauri::AppHandle;
use tauri_specta::Event;

use nearme_logic::{CameraUpdate, MapSurface, Marker, Polyline, TrackingStatus};

/// One drawing operation the UI should apply to the tracking map, in the order received
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
pub enum MapDraw {
    Clear,
    Marker(Marker),
    Polyline(Polyline),
    Camera(CameraUpdate),
    /// Status text to show, already formatted
    Status { status: TrackingStatus, text: String },
}

/// [MapSurface] that forwards every operation to the webview as a [MapDraw] event
pub struct TauriMapSurface(AppHandle);

impl TauriMapSurface {
    pub fn new(app: &AppHandle) -> Self {
        Self(app.clone())
    }

    fn emit(&self, draw: MapDraw) {
        if let Err(why) = draw.emit(&self.0) {
            error!("Error sending map update to UI: {why:?}");
        }
    }
}

impl MapSurface for TauriMapSurface {
    fn clear(&self) {
        self.emit(MapDraw::Clear);
    }

    fn add_marker(&self, marker: &Marker) {
        self.emit(MapDraw::Marker(marker.clone()));
    }

    fn add_polyline(&self, line: &Polyline) {
        self.emit(MapDraw::Polyline(line.clone()));
    }

    fn move_camera(&self, camera: &CameraUpdate) {
        self.emit(MapDraw::Camera(*camera));
    }

    fn show_status(&self, status: &TrackingStatus) {
        self.emit(MapDraw::Status {
            status: status.clone(),
            text: status.to_string(),
        });
    }
}
