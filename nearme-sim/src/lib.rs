use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{info, warn};
use nearme_logic::{
    CameraUpdate, DocumentEvent, DocumentEventSender, DocumentStore, Location, LocationEvent,
    LocationEventSender, LocationRequest, LocationService, MapSurface, Marker, Polyline,
    SubscriptionId, Tracker, TrackerSettings, TrackerUiState, TrackingStatus, UserId, UserRecord,
    UserUpdate, WatchId,
};
use serde::{Deserialize, Serialize};

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;

/// A single thing that happens during a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// The device reports a reading
    Fix { lat: f64, long: f64 },
    /// The device fails to get a reading
    LocationError { message: String },
    /// A user's record changes, `null` deletes it
    Remote {
        id: UserId,
        record: Option<UserRecord>,
    },
    /// Subscribers of a user get an error
    RemoteError { id: UserId, message: String },
    /// The UI asks to track someone else
    Track { id: UserId },
    Untrack,
    /// Do nothing for a while
    Wait { ms: u64 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// User to track from the start
    pub target: Option<UserId>,
    #[serde(default)]
    pub permission_denied: bool,
    /// Records that exist before the first step
    #[serde(default)]
    pub users: HashMap<UserId, UserRecord>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Invalid scenario")
    }

    /// One device in northern Bogota tracking a user downtown
    pub fn demo() -> Self {
        let remote = UserRecord {
            first_name: Some("Remote".to_string()),
            available: true,
            latitude: Some(4.598),
            longitude: Some(-74.076),
            ..Default::default()
        };
        Self {
            target: Some("remote".to_string()),
            permission_denied: false,
            users: HashMap::from([("remote".to_string(), remote)]),
            steps: vec![Step::Fix {
                lat: 4.710,
                long: -74.072,
            }],
        }
    }
}

#[derive(Default)]
struct LocationInner {
    denied: bool,
    next_watch: WatchId,
    watches: HashMap<WatchId, LocationEventSender>,
    last_fix: Option<Location>,
}

/// [LocationService] that only reports what the scenario tells it to
#[derive(Clone, Default)]
pub struct ScriptedLocation(Arc<Mutex<LocationInner>>);

impl ScriptedLocation {
    pub fn new(denied: bool) -> Self {
        Self(Arc::new(Mutex::new(LocationInner {
            denied,
            ..Default::default()
        })))
    }

    fn senders(&self) -> Vec<LocationEventSender> {
        self.0
            .lock()
            .map(|inner| inner.watches.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn emit(&self, event: LocationEvent) {
        if let LocationEvent::Fix(loc) = event
            && let Ok(mut inner) = self.0.lock()
        {
            inner.last_fix = Some(loc);
        }
        let senders = self.senders();
        if senders.is_empty() {
            warn!("No active location request, dropping {event:?}");
        }
        for tx in senders {
            tx.send(event.clone()).await.ok();
        }
    }
}

impl LocationService for ScriptedLocation {
    fn ensure_permission(&self) -> bool {
        self.0.lock().map(|inner| !inner.denied).unwrap_or(false)
    }

    fn request_updates(
        &self,
        request: LocationRequest,
        events: LocationEventSender,
    ) -> Result<WatchId> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| anyhow!("Location state poisoned"))?;
        let id = inner.next_watch;
        inner.next_watch += 1;
        inner.watches.insert(id, events);
        info!(
            "Location updates requested every {:?} at {:?}",
            request.interval, request.priority
        );
        Ok(id)
    }

    fn remove_updates(&self, id: WatchId) {
        if let Ok(mut inner) = self.0.lock() {
            inner.watches.remove(&id);
        }
    }

    fn current_position(&self) -> Result<Option<Location>> {
        self.0
            .lock()
            .map(|inner| inner.last_fix)
            .map_err(|_| anyhow!("Location state poisoned"))
    }
}

#[derive(Default)]
struct StoreInner {
    users: HashMap<UserId, UserRecord>,
    next_sub: SubscriptionId,
    subscriptions: HashMap<SubscriptionId, (UserId, DocumentEventSender)>,
}

/// In-memory [DocumentStore] the scenario writes into
#[derive(Default)]
pub struct ScriptedStore(Mutex<StoreInner>);

impl ScriptedStore {
    pub fn with_users(users: HashMap<UserId, UserRecord>) -> Self {
        Self(Mutex::new(StoreInner {
            users,
            ..Default::default()
        }))
    }

    fn subscribers(&self, id: &str) -> Vec<DocumentEventSender> {
        self.0
            .lock()
            .map(|inner| {
                inner
                    .subscriptions
                    .values()
                    .filter(|(user, _)| user == id)
                    .map(|(_, tx)| tx.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn notify(&self, id: &str, event: DocumentEvent) {
        for tx in self.subscribers(id) {
            tx.send(event.clone()).await.ok();
        }
    }

    /// Replace (or delete) a record and tell its subscribers
    pub async fn put(&self, id: &str, record: Option<UserRecord>) {
        if let Ok(mut inner) = self.0.lock() {
            match &record {
                Some(record) => inner.users.insert(id.to_string(), record.clone()),
                None => inner.users.remove(id),
            };
        }
        self.notify(id, Ok(record)).await;
    }

    pub fn subscription_count(&self) -> usize {
        self.0.lock().map(|i| i.subscriptions.len()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreInner>> {
        self.0.lock().map_err(|_| anyhow!("Store poisoned"))
    }
}

impl DocumentStore for ScriptedStore {
    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<(UserId, UserRecord)>> {
        Ok(self
            .lock()?
            .users
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect())
    }

    async fn set_user(&self, id: &str, record: UserRecord) -> Result {
        self.put(id, Some(record)).await;
        Ok(())
    }

    async fn update_user(&self, id: &str, update: UserUpdate) -> Result {
        let record = {
            let mut inner = self.lock()?;
            let record = inner.users.get_mut(id).context("No such user")?;
            record.apply(&update);
            record.clone()
        };
        self.notify(id, Ok(Some(record))).await;
        Ok(())
    }

    fn subscribe_user(&self, id: &str, events: DocumentEventSender) -> SubscriptionId {
        let Ok(mut inner) = self.0.lock() else {
            return SubscriptionId::MAX;
        };
        let sub = inner.next_sub;
        inner.next_sub += 1;
        events.try_send(Ok(inner.users.get(id).cloned())).ok();
        inner.subscriptions.insert(sub, (id.to_string(), events));
        info!("Subscribed to {id}");
        sub
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut inner) = self.0.lock()
            && let Some((user, _)) = inner.subscriptions.remove(&id)
        {
            info!("Unsubscribed from {user}");
        }
    }
}

#[derive(Default)]
struct SurfaceLog {
    frames: usize,
    statuses: Vec<TrackingStatus>,
}

/// [MapSurface] that logs everything drawn on it
#[derive(Clone, Default)]
pub struct LogSurface(Arc<Mutex<SurfaceLog>>);

impl LogSurface {
    pub fn frames(&self) -> usize {
        self.0.lock().map(|l| l.frames).unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<TrackingStatus> {
        self.0.lock().map(|l| l.statuses.clone()).unwrap_or_default()
    }
}

impl MapSurface for LogSurface {
    fn clear(&self) {
        info!("[map] clear");
    }

    fn add_marker(&self, marker: &Marker) {
        info!(
            "[map] marker \"{}\" at ({:.5}, {:.5})",
            marker.title, marker.position.lat, marker.position.long
        );
    }

    fn add_polyline(&self, line: &Polyline) {
        info!(
            "[map] line ({:.5}, {:.5}) -> ({:.5}, {:.5}) width {} color #{:08X}",
            line.from.lat, line.from.long, line.to.lat, line.to.long, line.width, line.color
        );
    }

    fn move_camera(&self, camera: &CameraUpdate) {
        let b = &camera.bounds;
        info!(
            "[map] camera S {:.5} W {:.5} N {:.5} E {:.5} padding {}",
            b.south, b.west, b.north, b.east, camera.padding
        );
        if let Ok(mut log) = self.0.lock() {
            log.frames += 1;
        }
    }

    fn show_status(&self, status: &TrackingStatus) {
        info!("[status] {status}");
        if let Ok(mut log) = self.0.lock() {
            log.statuses.push(status.clone());
        }
    }
}

/// What a finished scenario left behind
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub final_state: TrackerUiState,
    pub frames: usize,
    pub statuses: Vec<TrackingStatus>,
}

impl Report {
    pub fn final_distance(&self) -> Option<f64> {
        self.final_state.frame.as_ref().map(|f| f.rounded_distance())
    }
}

/// Run `scenario` against a real [Tracker], waiting `step_delay` between steps
pub async fn run_scenario(
    scenario: Scenario,
    settings: TrackerSettings,
    step_delay: Duration,
) -> Result<Report> {
    let location = ScriptedLocation::new(scenario.permission_denied);
    let store = Arc::new(ScriptedStore::with_users(scenario.users));
    let surface = LogSurface::default();

    let tracker = Arc::new(Tracker::new(
        settings,
        scenario.target,
        location.clone(),
        store.clone(),
        surface.clone(),
    ));

    let handle = tokio::spawn({
        let tracker = tracker.clone();
        async move { tracker.main_loop().await }
    });

    for step in scenario.steps {
        tokio::time::sleep(step_delay).await;
        match step {
            Step::Fix { lat, long } => {
                location
                    .emit(LocationEvent::Fix(Location::new(lat, long)))
                    .await
            }
            Step::LocationError { message } => location.emit(LocationEvent::Error(message)).await,
            Step::Remote { id, record } => store.put(&id, record).await,
            Step::RemoteError { id, message } => store.notify(&id, Err(message)).await,
            Step::Track { id } => tracker.track_user(id).await,
            Step::Untrack => tracker.untrack_user().await,
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
    }
    tokio::time::sleep(step_delay).await;

    let final_state = tracker.get_ui_state().await;
    tracker.quit().await;
    handle.await.context("Tracker task panicked")??;

    if store.subscription_count() != 0 {
        bail!("Tracker left a subscription open");
    }

    Ok(Report {
        final_state,
        frames: surface.frames(),
        statuses: surface.statuses(),
    })
}
