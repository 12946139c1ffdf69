use serde::{Deserialize, Serialize};

use crate::{
    location::Location,
    prelude::*,
    store::{DocumentStore, UserId, UserRecord},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
/// A user that can currently be tracked
pub struct AvailableUser {
    pub id: UserId,
    pub name: String,
    pub image_url: Option<String>,
    pub location: Option<Location>,
}

impl AvailableUser {
    fn from_record(id: UserId, record: &UserRecord) -> Self {
        Self {
            id,
            name: record.display_name(),
            image_url: record
                .profile_image_url
                .clone()
                .filter(|url| !url.is_empty()),
            location: record.location(),
        }
    }
}

/// Every user marked available, except `current_user`
pub fn available_users(
    records: impl IntoIterator<Item = (UserId, UserRecord)>,
    current_user: Option<&str>,
) -> Vec<AvailableUser> {
    records
        .into_iter()
        .filter(|(id, record)| record.available && Some(id.as_str()) != current_user)
        .map(|(id, record)| AvailableUser::from_record(id, &record))
        .collect()
}

/// Fetch the list of users available to track
pub async fn list_available_users(
    store: &impl DocumentStore,
    current_user: Option<&str>,
) -> Result<Vec<AvailableUser>> {
    let records = store
        .list_users()
        .await
        .context("Failed to list users")?;
    Ok(available_users(records, current_user))
}
