use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{location::Location, prelude::*};

/// ID of a user, as handed out by the identity service
pub type UserId = String;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A user's document in the `users` collection. Every field is optional since records are
/// written by many versions of the app.
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Older records call this `disponible`
    #[serde(default, alias = "disponible")]
    pub available: bool,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Stored position, only if both coordinates are present
    pub fn location(&self) -> Option<Location> {
        self.latitude
            .zip(self.longitude)
            .map(|(lat, long)| Location::new(lat, long))
    }

    /// "First Last", with missing parts left out
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or_default();
        let last = self.last_name.as_deref().unwrap_or_default();
        format!("{first} {last}").trim().to_string()
    }

    pub fn apply(&mut self, update: &UserUpdate) {
        if let Some(available) = update.available {
            self.available = available;
        }
        if let Some(lat) = update.latitude {
            self.latitude = Some(lat);
        }
        if let Some(long) = update.longitude {
            self.longitude = Some(long);
        }
        if let Some(url) = &update.profile_image_url {
            self.profile_image_url = Some(url.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A partial update to a [UserRecord], `None` fields are left as-is
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

impl UserUpdate {
    pub fn availability(available: bool) -> Self {
        Self {
            available: Some(available),
            ..Default::default()
        }
    }

    pub fn location(location: Location) -> Self {
        Self {
            latitude: Some(location.lat),
            longitude: Some(location.long),
            ..Default::default()
        }
    }
}

/// One notification from a live subscription, `Ok(None)` means the record doesn't exist
pub type DocumentEvent = Result<Option<UserRecord>, String>;

pub type DocumentEventSender = mpsc::Sender<DocumentEvent>;

/// Handle to a live subscription, pass back to [DocumentStore::unsubscribe]
pub type SubscriptionId = u64;

/// The external document store holding every user's record
pub trait DocumentStore: Send + Sync {
    /// Read a single record
    fn get_user(&self, id: &str) -> impl Future<Output = Result<Option<UserRecord>>> + Send;
    /// Read every record in the collection
    fn list_users(&self) -> impl Future<Output = Result<Vec<(UserId, UserRecord)>>> + Send;
    /// Create or fully replace a record
    fn set_user(&self, id: &str, record: UserRecord) -> impl Future<Output = Result> + Send;
    /// Update some fields of an existing record
    fn update_user(&self, id: &str, update: UserUpdate) -> impl Future<Output = Result> + Send;
    /// Open a live subscription to one record. The current state is delivered first, then a
    /// new event every time the record changes.
    fn subscribe_user(&self, id: &str, events: DocumentEventSender) -> SubscriptionId;
    /// Close a subscription, no more events will be sent for it
    fn unsubscribe(&self, id: SubscriptionId);
}
