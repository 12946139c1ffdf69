use log::{debug, error, warn};
use tauri::{AppHandle, plugin::PermissionState};
use tauri_plugin_geolocation::{
    GeolocationExt, PermissionStatus, PermissionType, PositionOptions, WatchEvent,
};

use nearme_logic::{
    Location, LocationEvent, LocationEventSender, LocationRequest, LocationService, Priority,
    TrackerSettings, WatchId, prelude::*,
};

pub struct TauriLocation(AppHandle);

impl TauriLocation {
    pub fn new(app: AppHandle) -> Self {
        Self(app)
    }
}

const TIMEOUT_MS: u32 = 10000;

fn options(request: &LocationRequest) -> PositionOptions {
    PositionOptions {
        enable_high_accuracy: request.priority == Priority::HighAccuracy,
        timeout: TIMEOUT_MS,
        // Platforms don't take an interval, a fix older than one is stale though
        maximum_age: u32::try_from(request.interval.as_millis()).unwrap_or(u32::MAX),
    }
}

fn granted(status: &PermissionStatus) -> bool {
    matches!(status.location, PermissionState::Granted)
}

impl LocationService for TauriLocation {
    fn ensure_permission(&self) -> bool {
        let geo = self.0.geolocation();

        match geo.check_permissions() {
            Ok(status) if granted(&status) => return true,
            Ok(_) => debug!("Location permission not granted yet, prompting"),
            Err(why) => warn!("Couldn't check location permission: {why:?}"),
        }

        match geo.request_permissions(Some(vec![PermissionType::Location])) {
            Ok(status) => granted(&status),
            Err(why) => {
                error!("Failed to request location permission: {why:?}");
                false
            }
        }
    }

    fn request_updates(
        &self,
        request: LocationRequest,
        events: LocationEventSender,
    ) -> Result<WatchId> {
        self.0
            .geolocation()
            .watch_position(options(&request), move |event| {
                let event = match event {
                    WatchEvent::Position(pos) => LocationEvent::Fix(Location::new(
                        pos.coords.latitude,
                        pos.coords.longitude,
                    )),
                    WatchEvent::Error(why) => LocationEvent::Error(why),
                };
                if let Err(why) = events.try_send(event) {
                    warn!("Dropped location update: {why}");
                }
            })
            .context("Failed to start watching position")
    }

    fn remove_updates(&self, id: WatchId) {
        if let Err(why) = self.0.geolocation().clear_watch(id) {
            warn!("Failed to clear location watch {id}: {why:?}");
        }
    }

    fn current_position(&self) -> Result<Option<Location>> {
        let request = TrackerSettings::default().location_request();
        let pos = self
            .0
            .geolocation()
            .get_current_position(Some(options(&request)))
            .context("Failed to get current position")?;
        let coords = pos.coords;
        Ok(Some(Location::new(coords.latitude, coords.longitude)))
    }
}
