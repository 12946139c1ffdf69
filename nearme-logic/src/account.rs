use std::fmt;

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    location::Location,
    prelude::*,
    store::{DocumentStore, UserId, UserRecord, UserUpdate},
};

/// The external identity service, owns accounts and the signed-in session
pub trait IdentityService: Send + Sync {
    /// ID of the signed-in user, if any
    fn current_user(&self) -> Option<UserId>;
    /// Create an account and sign in as it
    fn sign_up(&self, email: &str, password: &str) -> impl Future<Output = Result<UserId>> + Send;
    fn sign_in(&self, email: &str, password: &str) -> impl Future<Output = Result<UserId>> + Send;
    /// Email the user a link to verify their address
    fn send_verification(&self, user: &str) -> impl Future<Output = Result> + Send;
    fn sign_out(&self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
/// Why a form was rejected before anything was sent
pub enum FormError {
    EmptyFields,
    InvalidEmail,
    PasswordMismatch,
    InvalidLocation,
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::EmptyFields => "Please fill in all fields",
            Self::InvalidEmail => "Please enter a valid email address",
            Self::PasswordMismatch => "Passwords do not match",
            Self::InvalidLocation => "Please enter a valid latitude and longitude",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FormError {}

/// Loose check for `local@domain.tld`
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let allowed = |c: char| c.is_ascii_alphanumeric() || "+._%-".contains(c);

    !local.is_empty()
        && local.len() <= 64
        && local.chars().all(allowed)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, specta::Type)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    /// Returns the trimmed email and password
    pub fn validate(&self) -> Result<(&str, &str), FormError> {
        let email = self.email.trim();
        let password = self.password.trim();
        if email.is_empty() || password.is_empty() {
            return Err(FormError::EmptyFields);
        }
        if !is_valid_email(email) {
            return Err(FormError::InvalidEmail);
        }
        Ok((email, password))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, specta::Type)]
/// Sign up form, exactly as typed in
pub struct RegistrationForm {
    pub first_name: String,
    pub last_name: String,
    pub id_number: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    /// Optional, but if this or `longitude` is filled in both must be valid
    pub latitude: String,
    pub longitude: String,
    /// URL of an already uploaded profile picture
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// A [RegistrationForm] that passed validation, all fields trimmed
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub id_number: String,
    pub email: String,
    pub password: String,
    pub location: Option<Location>,
    pub profile_image_url: Option<String>,
}

impl RegistrationForm {
    pub fn validate(&self) -> Result<Registration, FormError> {
        let required = [
            &self.first_name,
            &self.last_name,
            &self.id_number,
            &self.email,
            &self.password,
            &self.confirm_password,
        ];
        if required.iter().any(|f| f.trim().is_empty()) {
            return Err(FormError::EmptyFields);
        }

        let email = self.email.trim();
        if !is_valid_email(email) {
            return Err(FormError::InvalidEmail);
        }

        if self.password.trim() != self.confirm_password.trim() {
            return Err(FormError::PasswordMismatch);
        }

        let (lat, long) = (self.latitude.trim(), self.longitude.trim());
        let location = if lat.is_empty() && long.is_empty() {
            None
        } else {
            let lat = lat.parse::<f64>().map_err(|_| FormError::InvalidLocation)?;
            let long = long.parse::<f64>().map_err(|_| FormError::InvalidLocation)?;
            let loc = Location::new(lat, long);
            if !loc.in_range() {
                return Err(FormError::InvalidLocation);
            }
            Some(loc)
        };

        Ok(Registration {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            id_number: self.id_number.trim().to_string(),
            email: email.to_string(),
            password: self.password.trim().to_string(),
            location,
            profile_image_url: self.profile_image_url.clone(),
        })
    }
}

impl Registration {
    pub fn to_record(&self) -> UserRecord {
        UserRecord {
            first_name: Some(self.first_name.clone()),
            last_name: Some(self.last_name.clone()),
            id_number: Some(self.id_number.clone()),
            email: Some(self.email.clone()),
            profile_image_url: self.profile_image_url.clone(),
            latitude: self.location.map(|l| l.lat),
            longitude: self.location.map(|l| l.long),
            available: false,
            created_at: Some(Utc::now()),
        }
    }
}

/// Sign in with a validated [LoginForm]
pub async fn login(identity: &impl IdentityService, form: &LoginForm) -> Result<UserId> {
    let (email, password) = form.validate()?;
    let id = identity
        .sign_in(email, password)
        .await
        .context("Failed to sign in")?;
    info!("Signed in as {id}");
    Ok(id)
}

/// Create an account, send the verification email, and store the user's record
pub async fn register(
    identity: &impl IdentityService,
    store: &impl DocumentStore,
    form: &RegistrationForm,
) -> Result<UserId> {
    let registration = form.validate()?;

    let id = identity
        .sign_up(&registration.email, &registration.password)
        .await
        .context("Failed to create account")?;

    identity
        .send_verification(&id)
        .await
        .context("Failed to send verification email")?;

    store
        .set_user(&id, registration.to_record())
        .await
        .context("Failed to save user data")?;

    info!("Registered {id}");
    Ok(id)
}

/// Mark the signed-in user as (un)available to be tracked
pub async fn set_availability(
    identity: &impl IdentityService,
    store: &impl DocumentStore,
    available: bool,
) -> Result {
    let id = identity.current_user().context("Not signed in")?;
    store
        .update_user(&id, UserUpdate::availability(available))
        .await
        .context("Failed to update availability")
}

/// Mark the user unavailable, then sign out. Signing out happens even if the update fails.
pub async fn sign_out(identity: &impl IdentityService, store: &impl DocumentStore) {
    if identity.current_user().is_some()
        && let Err(why) = set_availability(identity, store, false).await
    {
        warn!("Couldn't mark user unavailable before signing out: {why:?}");
    }
    identity.sign_out().await;
}
