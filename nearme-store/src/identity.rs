use std::sync::RwLock;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use nearme_logic::{IdentityService, UserId, prelude::*};

use crate::server::ApiClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A signed-in user and the token the server handed out for them
pub struct Session {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerificationRequest<'a> {
    user_id: &'a str,
}

/// [IdentityService] backed by the REST API
pub struct RestIdentity {
    api: ApiClient,
    session: RwLock<Option<Session>>,
}

impl RestIdentity {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            session: RwLock::default(),
        }
    }

    /// Resume a session saved from a previous run
    pub fn restore(&self, session: Session) {
        info!("Restoring session for {}", session.user_id);
        self.set_session(Some(session));
    }

    /// Current session, for persisting between runs
    pub fn session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn set_session(&self, session: Option<Session>) {
        self.api.set_token(session.as_ref().map(|s| s.token.clone()));
        match self.session.write() {
            Ok(mut lock) => *lock = session,
            Err(why) => warn!("Session lock poisoned: {why}"),
        }
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> Result<UserId> {
        let session = self
            .api
            .post_json::<Session>(path, &Credentials { email, password })
            .await?;
        let id = session.user_id.clone();
        self.set_session(Some(session));
        Ok(id)
    }
}

impl IdentityService for RestIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.session().map(|s| s.user_id)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<UserId> {
        self.authenticate("auth/sign_up", email, password)
            .await
            .context("Sign up rejected")
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserId> {
        self.authenticate("auth/sign_in", email, password)
            .await
            .context("Sign in rejected")
    }

    async fn send_verification(&self, user: &str) -> Result {
        self.api
            .post(
                "auth/send_verification",
                &VerificationRequest { user_id: user },
            )
            .await
    }

    async fn sign_out(&self) {
        if let Some(session) = self.session() {
            info!("Signing out {}", session.user_id);
        }
        self.set_session(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> RestIdentity {
        RestIdentity::new(ApiClient::new("http://localhost").unwrap())
    }

    #[test]
    fn test_session_format() {
        let session: Session =
            serde_json::from_str(r#"{"userId": "u7", "token": "secret"}"#).unwrap();
        assert_eq!(session.user_id, "u7");
        assert_eq!(session.token, "secret");
    }

    #[tokio::test]
    async fn test_restore_and_sign_out() {
        let identity = identity();
        assert_eq!(identity.current_user(), None);

        identity.restore(Session {
            user_id: "u7".to_string(),
            token: "secret".to_string(),
        });
        assert_eq!(identity.current_user().as_deref(), Some("u7"));
        assert_eq!(identity.api.token().as_deref(), Some("secret"));

        identity.sign_out().await;
        assert_eq!(identity.current_user(), None);
        assert_eq!(identity.api.token(), None);
    }

    #[tokio::test]
    async fn test_sign_in_unreachable_keeps_signed_out() {
        let identity = RestIdentity::new(ApiClient::new("http://127.0.0.1:9").unwrap());
        assert!(identity.sign_in("a@b.co", "pw").await.is_err());
        assert_eq!(identity.current_user(), None);
    }
}
