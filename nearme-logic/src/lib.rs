mod account;
mod directory;
mod location;
mod map;
mod points;
mod settings;
mod status;
mod store;
mod tracker;

pub use account::{
    FormError, IdentityService, LoginForm, Registration, RegistrationForm, is_valid_email, login,
    register, set_availability, sign_out,
};
pub use directory::{AvailableUser, available_users, list_available_users};
pub use location::{
    EARTH_RADIUS_KM, Location, LocationEvent, LocationEventSender, LocationRequest,
    LocationService, Priority, WatchId, current_location,
};
pub use map::{Bounds, CameraUpdate, MapFrame, MapSurface, Marker, Polyline};
pub use points::{PointOfInterest, parse_points};
pub use settings::TrackerSettings;
pub use status::TrackingStatus;
pub use store::{
    DocumentEvent, DocumentEventSender, DocumentStore, SubscriptionId, UserId, UserRecord,
    UserUpdate,
};
pub use tracker::{Tracker, TrackerCommand, TrackerState, TrackerUiState};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
