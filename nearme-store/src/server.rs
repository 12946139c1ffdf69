use std::sync::{Arc, RwLock};

use reqwest::{RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use nearme_logic::prelude::*;

const fn server_host() -> &'static str {
    if let Some(host) = option_env!("NEARME_API_HOST") {
        host
    } else {
        "localhost"
    }
}

const fn server_port() -> u16 {
    if let Some(port) = option_env!("NEARME_API_PORT") {
        const_str::parse!(port, u16)
    } else {
        3536
    }
}

const fn server_secure() -> bool {
    if let Some(secure) = option_env!("NEARME_API_SECURE") {
        const_str::eq_ignore_ascii_case!(secure, "true") || const_str::equal!(secure, "1")
    } else {
        false
    }
}

const fn server_http_proto() -> &'static str {
    if server_secure() { "https" } else { "http" }
}

const SERVER_HOST: &str = server_host();
const SERVER_PORT: u16 = server_port();
const SERVER_HTTP_PROTO: &str = server_http_proto();

const SERVER_SOCKET: &str = const_str::concat!(SERVER_HOST, ":", SERVER_PORT);

pub const SERVER_HTTP_URL: &str = const_str::concat!(SERVER_HTTP_PROTO, "://", SERVER_SOCKET);

/// HTTP client for the backend, shared between the identity and document adapters so requests
/// carry the signed-in user's token
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: String,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            token: Arc::default(),
        })
    }

    /// Client for the server this build was configured for
    pub fn from_env() -> Result<Self> {
        Self::new(SERVER_HTTP_URL)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut lock) = self.token.write() {
            *lock = token;
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match self.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// GET a JSON document, `None` on 404
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let resp = self
            .authed(self.client.get(self.url(path)))
            .send()
            .await
            .context("Could not send request")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = resp
            .error_for_status()
            .context("Server returned error")?
            .json::<T>()
            .await
            .context("Invalid response body")?;

        Ok(Some(body))
    }

    pub async fn put_json(&self, path: &str, body: &impl Serialize) -> Result {
        self.authed(self.client.put(self.url(path)))
            .json(body)
            .send()
            .await
            .context("Could not send request")?
            .error_for_status()
            .context("Server returned error")?;
        Ok(())
    }

    pub async fn patch_json(&self, path: &str, body: &impl Serialize) -> Result {
        self.authed(self.client.patch(self.url(path)))
            .json(body)
            .send()
            .await
            .context("Could not send request")?
            .error_for_status()
            .context("Server returned error")?;
        Ok(())
    }

    /// POST without reading a response body
    pub async fn post(&self, path: &str, body: &impl Serialize) -> Result {
        self.authed(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .context("Could not send request")?
            .error_for_status()
            .context("Server returned error")?;
        Ok(())
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        self.authed(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .context("Could not send request")?
            .error_for_status()
            .context("Server returned error")?
            .json::<T>()
            .await
            .context("Invalid response body")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url() {
        assert!(SERVER_HTTP_URL.starts_with("http"));
        assert!(SERVER_HTTP_URL.contains(':'));
    }

    #[test]
    fn test_url_joining() {
        let api = ApiClient::new("http://example.com:3536/").unwrap();
        assert_eq!(api.url("/users/abc"), "http://example.com:3536/users/abc");
        assert_eq!(api.url("auth/sign_in"), "http://example.com:3536/auth/sign_in");
    }

    #[test]
    fn test_token_shared_between_clones() {
        let api = ApiClient::new("http://localhost").unwrap();
        let other = api.clone();
        api.set_token(Some("abc".to_string()));
        assert_eq!(other.token().as_deref(), Some("abc"));
        other.set_token(None);
        assert_eq!(api.token(), None);
    }
}
