mod documents;
mod identity;
mod server;

pub use documents::{ChangeFilter, DEFAULT_POLL_INTERVAL, RestStore};
pub use identity::{RestIdentity, Session};
pub use server::{ApiClient, SERVER_HTTP_URL};
