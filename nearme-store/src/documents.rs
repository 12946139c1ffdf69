use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use log::{debug, warn};
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use nearme_logic::{
    DocumentEvent, DocumentEventSender, DocumentStore, SubscriptionId, UserId, UserRecord,
    UserUpdate, prelude::*,
};

use crate::server::ApiClient;

/// How often a subscribed document is re-fetched
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn user_path(id: &str) -> String {
    format!("users/{id}")
}

#[derive(Deserialize)]
struct ListedUser {
    id: UserId,
    #[serde(flatten)]
    record: UserRecord,
}

/// Only lets through events that differ from the last one let through
#[derive(Default)]
pub struct ChangeFilter {
    last: Option<DocumentEvent>,
}

impl ChangeFilter {
    pub fn changed(&mut self, event: &DocumentEvent) -> bool {
        if self.last.as_ref() == Some(event) {
            false
        } else {
            self.last = Some(event.clone());
            true
        }
    }
}

/// [DocumentStore] backed by the REST API. Subscriptions poll the document and notify when it
/// changes.
pub struct RestStore {
    api: ApiClient,
    poll_interval: Duration,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, CancellationToken>>,
}

impl RestStore {
    pub fn new(api: ApiClient) -> Self {
        Self::with_poll_interval(api, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(api: ApiClient, poll_interval: Duration) -> Self {
        Self {
            api,
            poll_interval,
            next_id: AtomicU64::new(0),
            subscriptions: Mutex::default(),
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().map(|s| s.len()).unwrap_or_default()
    }

    async fn poll_loop<F, Fut>(
        fetch: F,
        label: String,
        interval: Duration,
        events: DocumentEventSender,
        cancel: CancellationToken,
    ) where
        F: Fn() -> Fut + Send,
        Fut: Future<Output = DocumentEvent> + Send,
    {
        let mut filter = ChangeFilter::default();
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = interval.tick() => {
                    let event = fetch().await;

                    if filter.changed(&event) && events.send(event).await.is_err() {
                        // Subscriber went away without unsubscribing
                        break;
                    }
                }
            }
        }

        debug!("Stopped polling {label}");
    }
}

impl DocumentStore for RestStore {
    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        self.api
            .get_json(&user_path(id))
            .await
            .with_context(|| format!("Failed to fetch user {id}"))
    }

    async fn list_users(&self) -> Result<Vec<(UserId, UserRecord)>> {
        let users = self
            .api
            .get_json::<Vec<ListedUser>>("users")
            .await
            .context("Failed to list users")?
            .unwrap_or_default();
        Ok(users.into_iter().map(|u| (u.id, u.record)).collect())
    }

    async fn set_user(&self, id: &str, record: UserRecord) -> Result {
        self.api
            .put_json(&user_path(id), &record)
            .await
            .with_context(|| format!("Failed to save user {id}"))
    }

    async fn update_user(&self, id: &str, update: UserUpdate) -> Result {
        self.api
            .patch_json(&user_path(id), &update)
            .await
            .with_context(|| format!("Failed to update user {id}"))
    }

    fn subscribe_user(&self, id: &str, events: DocumentEventSender) -> SubscriptionId {
        let sub = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        match self.subscriptions.lock() {
            Ok(mut subs) => {
                subs.insert(sub, cancel.clone());
            }
            Err(why) => warn!("Subscription table poisoned: {why}"),
        }

        let api = self.api.clone();
        let path = user_path(id);
        let fetch = move || {
            let api = api.clone();
            let path = path.clone();
            async move {
                api.get_json::<UserRecord>(&path)
                    .await
                    .map_err(|err| format!("{err:#}"))
            }
        };

        tokio::spawn(Self::poll_loop(
            fetch,
            user_path(id),
            self.poll_interval,
            events,
            cancel,
        ));

        sub
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let cancel = self
            .subscriptions
            .lock()
            .ok()
            .and_then(|mut subs| subs.remove(&id));
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }
}

impl Drop for RestStore {
    fn drop(&mut self) {
        if let Ok(subs) = self.subscriptions.get_mut() {
            for (_, cancel) in subs.drain() {
                cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;

    fn record(lat: f64) -> UserRecord {
        UserRecord {
            latitude: Some(lat),
            longitude: Some(1.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_change_filter() {
        let mut filter = ChangeFilter::default();
        assert!(filter.changed(&Ok(Some(record(1.0)))), "First event always passes");
        assert!(!filter.changed(&Ok(Some(record(1.0)))));
        assert!(filter.changed(&Ok(Some(record(2.0)))));
        assert!(filter.changed(&Err("timeout".to_string())));
        assert!(!filter.changed(&Err("timeout".to_string())), "Repeated errors are dropped");
        assert!(filter.changed(&Ok(Some(record(2.0)))), "Recovery passes");
        assert!(filter.changed(&Ok(None)));
    }

    #[test]
    fn test_listed_user_format() {
        let raw = r#"[{"id": "u1", "firstName": "Ana", "available": true, "latitude": 1.0, "longitude": 2.0}]"#;
        let users: Vec<ListedUser> = serde_json::from_str(raw).unwrap();
        assert_eq!(users[0].id, "u1");
        assert!(users[0].record.available);
        assert!(users[0].record.location().is_some());
    }

    /// Fetch that plays back `script`, repeating the last entry once it runs out
    fn scripted(
        script: Vec<DocumentEvent>,
    ) -> (
        impl Fn() -> std::future::Ready<DocumentEvent> + Send,
        Arc<AtomicU64>,
    ) {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let fetch = move || {
            let n = counter.fetch_add(1, Ordering::Relaxed) as usize;
            let event = script
                .get(n)
                .or(script.last())
                .cloned()
                .unwrap_or(Ok(None));
            std::future::ready(event)
        };
        (fetch, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_sends_only_changes() {
        let (fetch, calls) = scripted(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Ok(None),
            Ok(None),
            Ok(Some(record(1.0))),
        ]);
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(RestStore::poll_loop(
            fetch,
            "users/abc".to_string(),
            Duration::from_secs(1),
            tx,
            cancel.clone(),
        ));

        assert_eq!(rx.recv().await, Some(Err("down".to_string())), "First poll is sent");
        assert_eq!(rx.recv().await, Some(Ok(None)));
        assert_eq!(rx.recv().await, Some(Ok(Some(record(1.0)))));

        let quiet = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(quiet.is_err(), "Unchanged document was sent again: {quiet:?}");
        assert!(calls.load(Ordering::Relaxed) > 5, "Kept polling while unchanged");

        cancel.cancel();
        assert_eq!(rx.recv().await, None, "Poll task still holds the sender");
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_stops_when_subscriber_gone() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        // Every poll returns something new
        let fetch = move || {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            std::future::ready(Ok(Some(record(n as f64))))
        };
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        let res = tokio::time::timeout(
            Duration::from_secs(60),
            RestStore::poll_loop(
                fetch,
                "users/abc".to_string(),
                Duration::from_secs(1),
                tx,
                CancellationToken::new(),
            ),
        )
        .await;

        assert!(res.is_ok(), "Poll loop kept running with nobody listening");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_polling() {
        // Nothing listens here, every poll fails fast
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        let store = RestStore::with_poll_interval(api, Duration::from_millis(10));
        let (tx, mut rx) = mpsc::channel(4);

        let sub = store.subscribe_user("abc", tx);
        assert_eq!(store.active_subscriptions(), 1);

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("No event from the first poll");
        assert!(matches!(first, Some(Err(_))), "Expected an error, got {first:?}");

        let repeat = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(repeat.is_err(), "Same error was sent twice: {repeat:?}");

        store.unsubscribe(sub);
        assert_eq!(store.active_subscriptions(), 0);
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Poll task didn't stop");
        assert_eq!(closed, None);

        // Unknown ids are ignored
        store.unsubscribe(sub + 100);
    }
}
