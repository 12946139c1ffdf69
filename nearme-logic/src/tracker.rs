use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    location::{Location, LocationEvent, LocationService, WatchId},
    map::{MapFrame, MapSurface},
    prelude::*,
    settings::TrackerSettings,
    status::TrackingStatus,
    store::{DocumentEvent, DocumentStore, SubscriptionId, UserId},
};

/// Capacity of the queues between the event sources and the tracker loop
const QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Requests sent to a running tracker loop
pub enum TrackerCommand {
    /// Start tracking the given user, replacing whoever is currently tracked
    Track(UserId),
    /// Stop tracking the remote user, location updates keep going
    Untrack,
}

/// The two positions the map is drawn from, plus what was last drawn. Only ever touched by the
/// tracker loop.
pub struct TrackerState {
    target: Option<UserId>,
    self_position: Option<Location>,
    remote_position: Option<Location>,
    /// Whether any notification for the current target has arrived, errors included
    remote_received: bool,
    status: TrackingStatus,
    frame: Option<MapFrame>,
    redraws: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, specta::Type)]
/// Snapshot of the tracker for the UI
pub struct TrackerUiState {
    pub target: Option<UserId>,
    pub self_position: Option<Location>,
    pub remote_position: Option<Location>,
    /// False until the first notification (successful or not) for `target` arrives, lets the UI
    /// tell "never received anything" apart from "had data, then an error"
    pub remote_received: bool,
    pub status: TrackingStatus,
    pub frame: Option<MapFrame>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            target: None,
            self_position: None,
            remote_position: None,
            remote_received: false,
            status: TrackingStatus::Waiting,
            frame: None,
            redraws: 0,
        }
    }
}

impl TrackerState {
    /// Store a new fix for the local device and recompute. Returns the new frame if both
    /// positions are now known.
    pub fn set_self_position(
        &mut self,
        position: Location,
        settings: &TrackerSettings,
    ) -> Option<&MapFrame> {
        self.self_position = Some(position);
        self.recompute(settings)
    }

    /// Store a new position for the tracked user and recompute. Returns the new frame if both
    /// positions are now known.
    pub fn set_remote_position(
        &mut self,
        position: Location,
        settings: &TrackerSettings,
    ) -> Option<&MapFrame> {
        self.remote_position = Some(position);
        self.recompute(settings)
    }

    fn recompute(&mut self, settings: &TrackerSettings) -> Option<&MapFrame> {
        let (self_pos, remote_pos) = self.self_position.zip(self.remote_position)?;
        let frame = MapFrame::compute(self_pos, remote_pos, settings);
        self.status = TrackingStatus::Distance(frame.distance_km);
        self.redraws += 1;
        self.frame = Some(frame);
        self.frame.as_ref()
    }

    /// Switch to a different remote user, their position is unknown until their first
    /// notification
    fn set_target(&mut self, target: Option<UserId>) {
        self.target = target;
        self.remote_position = None;
        self.remote_received = false;
        self.frame = None;
        self.status = TrackingStatus::Waiting;
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn self_position(&self) -> Option<Location> {
        self.self_position
    }

    pub fn remote_position(&self) -> Option<Location> {
        self.remote_position
    }

    pub fn status(&self) -> &TrackingStatus {
        &self.status
    }

    pub fn frame(&self) -> Option<&MapFrame> {
        self.frame.as_ref()
    }

    /// Number of times a frame has been computed
    pub fn redraws(&self) -> u64 {
        self.redraws
    }

    pub fn as_ui_state(&self) -> TrackerUiState {
        TrackerUiState {
            target: self.target.clone(),
            self_position: self.self_position,
            remote_position: self.remote_position,
            remote_received: self.remote_received,
            status: self.status.clone(),
            frame: self.frame.clone(),
        }
    }
}

/// Streams held open by a running loop, released on teardown
#[derive(Default)]
struct Streams {
    watch: Option<WatchId>,
    fixes: Option<mpsc::Receiver<LocationEvent>>,
    subscription: Option<SubscriptionId>,
    remote: Option<mpsc::Receiver<DocumentEvent>>,
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Live distance between the local device and one remote user.
///
/// Location fixes from [LocationService], record changes from a [DocumentStore] subscription and
/// commands from the UI each arrive on their own queue and are handled one at a time by
/// [Tracker::main_loop], which owns both positions and pushes every redraw to a [MapSurface].
pub struct Tracker<L: LocationService, D: DocumentStore, M: MapSurface> {
    settings: TrackerSettings,
    state: RwLock<TrackerState>,
    location: L,
    store: Arc<D>,
    surface: M,
    commands: mpsc::Sender<TrackerCommand>,
    command_rx: Mutex<mpsc::Receiver<TrackerCommand>>,
    cancel: CancellationToken,
}

impl<L: LocationService, D: DocumentStore, M: MapSurface> Tracker<L, D, M> {
    /// Create a new tracker, if `target` is `None` nothing is tracked until
    /// [Tracker::track_user] is called.
    pub fn new(
        settings: TrackerSettings,
        target: Option<UserId>,
        location: L,
        store: Arc<D>,
        surface: M,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(QUEUE_SIZE);

        if let Some(target) = target {
            // Fresh channel, can't be full
            commands.try_send(TrackerCommand::Track(target)).ok();
        }

        Self {
            settings,
            state: RwLock::new(TrackerState::default()),
            location,
            store,
            surface,
            commands,
            command_rx: Mutex::new(command_rx),
            cancel: CancellationToken::new(),
        }
    }

    async fn send_command(&self, command: TrackerCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("Tracker loop has already exited");
        }
    }

    /// Track a different user
    pub async fn track_user(&self, id: impl Into<UserId>) {
        self.send_command(TrackerCommand::Track(id.into())).await;
    }

    /// Stop tracking the remote user
    pub async fn untrack_user(&self) {
        self.send_command(TrackerCommand::Untrack).await;
    }

    /// Tear down the loop, releasing the location request and subscription
    pub async fn quit(&self) {
        self.cancel.cancel();
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub async fn get_ui_state(&self) -> TrackerUiState {
        self.state.read().await.as_ui_state()
    }

    async fn set_status(&self, state: &mut TrackerState, status: TrackingStatus) {
        self.surface.show_status(&status);
        state.status = status;
    }

    /// Start location updates unless they're already running. A denied permission is reported
    /// and not retried until the next [TrackerCommand::Track].
    async fn start_location(&self, streams: &mut Streams) {
        if streams.watch.is_some() {
            return;
        }

        let mut state = self.state.write().await;

        if !self.location.ensure_permission() {
            info!("Location permission denied");
            self.set_status(&mut state, TrackingStatus::PermissionDenied)
                .await;
            return;
        }

        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        match self
            .location
            .request_updates(self.settings.location_request(), tx)
        {
            Ok(watch) => {
                debug!("Started location updates ({watch})");
                streams.watch = Some(watch);
                streams.fixes = Some(rx);
            }
            Err(why) => {
                error!("Failed to start location updates: {why:?}");
                self.set_status(&mut state, TrackingStatus::LocationUnavailable)
                    .await;
            }
        }
    }

    fn close_subscription(&self, streams: &mut Streams) {
        // Dropping the receiver first means nothing already queued for the old user is read
        streams.remote = None;
        if let Some(sub) = streams.subscription.take() {
            debug!("Closing subscription {sub}");
            self.store.unsubscribe(sub);
        }
    }

    async fn open_subscription(&self, streams: &mut Streams, target: &str) {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let sub = self.store.subscribe_user(target, tx);
        debug!("Subscribed to {target} ({sub})");
        streams.subscription = Some(sub);
        streams.remote = Some(rx);
    }

    async fn handle_command(&self, streams: &mut Streams, command: TrackerCommand) {
        match command {
            TrackerCommand::Track(target) => {
                if self.state.read().await.target() == Some(target.as_str())
                    && streams.subscription.is_some()
                {
                    debug!("Already tracking {target}");
                    // Location may have been refused last time, ask again
                    self.start_location(streams).await;
                    return;
                }
                info!("Tracking {target}");
                self.close_subscription(streams);
                self.state.write().await.set_target(Some(target.clone()));
                self.start_location(streams).await;
                self.open_subscription(streams, &target).await;
            }
            TrackerCommand::Untrack => {
                info!("No longer tracking anyone");
                self.close_subscription(streams);
                let mut state = self.state.write().await;
                state.set_target(None);
                self.surface.clear();
                self.set_status(&mut state, TrackingStatus::Waiting).await;
            }
        }
    }

    async fn handle_fix(&self, event: LocationEvent) {
        let mut state = self.state.write().await;
        match event {
            LocationEvent::Fix(loc) if loc.is_degenerate() => {
                debug!("Dropping degenerate fix");
                self.set_status(&mut state, TrackingStatus::InvalidCoordinates)
                    .await;
            }
            LocationEvent::Fix(loc) => {
                if let Some(frame) = state.set_self_position(loc, &self.settings) {
                    frame.draw(&self.surface);
                }
            }
            LocationEvent::Error(why) => {
                warn!("Location provider error: {why}");
                self.set_status(&mut state, TrackingStatus::LocationUnavailable)
                    .await;
            }
        }
    }

    async fn handle_remote(&self, event: DocumentEvent) {
        let mut state = self.state.write().await;
        state.remote_received = true;
        match event {
            Err(why) => {
                error!("Error listening for changes to the tracked user: {why}");
                self.set_status(&mut state, TrackingStatus::FetchError).await;
            }
            Ok(None) => {
                warn!("Tracked user's record doesn't exist");
                self.set_status(&mut state, TrackingStatus::DataUnavailable)
                    .await;
            }
            Ok(Some(record)) => match record.location() {
                Some(loc) => {
                    debug!("Tracked user moved to {loc:?}");
                    if let Some(frame) = state.set_remote_position(loc, &self.settings) {
                        frame.draw(&self.surface);
                    }
                }
                None => {
                    warn!("Tracked user's record has no coordinates");
                    self.set_status(&mut state, TrackingStatus::CoordinatesUnavailable)
                        .await;
                }
            },
        }
    }

    fn teardown(&self, streams: &mut Streams) {
        if let Some(watch) = streams.watch.take() {
            debug!("Removing location updates ({watch})");
            self.location.remove_updates(watch);
        }
        streams.fixes = None;
        self.close_subscription(streams);
    }

    /// Main loop of the tracker, runs until [Tracker::quit] is called. Only one loop may run per
    /// tracker.
    pub async fn main_loop(&self) -> Result {
        let mut commands = self
            .command_rx
            .try_lock()
            .context("Tracker loop is already running")?;

        let mut streams = Streams::default();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break;
                }

                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(&mut streams, command).await,
                        // Can't happen while we hold a sender, but don't spin if it does
                        None => break,
                    }
                }

                event = recv_opt(&mut streams.fixes) => {
                    match event {
                        Some(event) => self.handle_fix(event).await,
                        None => {
                            warn!("Location provider closed the update stream");
                            streams.fixes = None;
                        }
                    }
                }

                event = recv_opt(&mut streams.remote) => {
                    match event {
                        Some(event) => self.handle_remote(event).await,
                        None => {
                            warn!("Document store closed the subscription");
                            streams.remote = None;
                        }
                    }
                }
            }
        }

        self.teardown(&mut streams);
        info!("Tracker stopped");

        Ok(())
    }

    #[cfg(test)]
    pub async fn lock_state(&self) -> tokio::sync::RwLockWriteGuard<'_, TrackerState> {
        self.state.write().await
    }

    #[cfg(test)]
    async fn wait_for_commands(&self) {
        crate::tests::drain(std::iter::once(self.commands.clone())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::UserRecord,
        tests::{MemoryStore, MockLocation, RecordingSurface, StoreOp, SurfaceCall},
    };
    use tokio::{sync::oneshot, task::yield_now, test};

    type TestTracker = Tracker<MockLocation, MemoryStore, RecordingSurface>;

    const SELF_POS: Location = Location::new(4.710, -74.072);
    const REMOTE_POS: Location = Location::new(4.598, -74.076);

    fn located(loc: Location) -> UserRecord {
        UserRecord {
            first_name: Some("Remote".to_string()),
            latitude: Some(loc.lat),
            longitude: Some(loc.long),
            available: true,
            ..Default::default()
        }
    }

    struct Harness {
        tracker: Arc<TestTracker>,
        location: MockLocation,
        store: MemoryStore,
        surface: RecordingSurface,
        done: Option<oneshot::Receiver<Result>>,
    }

    impl Harness {
        fn new(location: MockLocation, store: MemoryStore, target: Option<&str>) -> Self {
            let surface = RecordingSurface::default();
            let tracker = Arc::new(TestTracker::new(
                TrackerSettings::default(),
                target.map(str::to_string),
                location.clone(),
                Arc::new(store.clone()),
                surface.clone(),
            ));
            Self {
                tracker,
                location,
                store,
                surface,
                done: None,
            }
        }

        async fn start(&mut self) {
            let tracker = self.tracker.clone();
            let (send, recv) = oneshot::channel();
            self.done = Some(recv);
            tokio::spawn(async move {
                let res = tracker.main_loop().await;
                send.send(res).ok();
            });
            self.wait().await;
        }

        async fn wait(&self) {
            yield_now().await;
            self.tracker.wait_for_commands().await;
            self.location.wait().await;
            self.store.wait().await;
        }

        async fn track(&self, id: &str) {
            self.tracker.track_user(id).await;
            self.wait().await;
        }

        async fn quit(&mut self) {
            self.tracker.quit().await;
            let res = self
                .done
                .take()
                .expect("Not started")
                .await
                .expect("Failed to recv");
            assert!(res.is_ok(), "Tracker exited with an error: {res:?}");
        }

        async fn ui(&self) -> TrackerUiState {
            self.tracker.get_ui_state().await
        }
    }

    #[test]
    async fn test_scenario_draws_both_markers() {
        let store = MemoryStore::with_users([("remote", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("remote"));
        h.start().await;

        h.location.send_fix(SELF_POS).await;

        let ui = h.ui().await;
        let frame = ui.frame.expect("No frame drawn");
        assert!(
            (frame.distance_km - 12.47).abs() < 0.05,
            "Distance was {}",
            frame.distance_km
        );
        assert_eq!(frame.self_marker.position, SELF_POS);
        assert_eq!(frame.remote_marker.position, REMOTE_POS);
        assert!(frame.camera.bounds.contains(&SELF_POS));
        assert!(frame.camera.bounds.contains(&REMOTE_POS));

        let settings = TrackerSettings::default();
        let calls = h.surface.draw_calls();
        assert_eq!(
            calls,
            vec![
                SurfaceCall::Clear,
                SurfaceCall::Marker(frame.self_marker.clone()),
                SurfaceCall::Marker(frame.remote_marker.clone()),
                SurfaceCall::Polyline(frame.line.clone()),
                SurfaceCall::Camera(frame.camera),
            ]
        );
        assert_eq!(frame.self_marker.title, settings.self_title);
        assert_eq!(frame.remote_marker.title, settings.remote_title);
        assert_eq!(
            h.surface.last_status(),
            Some(TrackingStatus::Distance(frame.distance_km))
        );
        assert_eq!(
            h.surface.last_status().unwrap().to_string(),
            format!("Distance: {:.2} km", frame.distance_km)
        );

        h.quit().await;
    }

    #[test]
    async fn test_location_request_settings() {
        let store = MemoryStore::with_users([("remote", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("remote"));
        h.start().await;

        let requests = h.location.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], TrackerSettings::default().location_request());
        assert_eq!(requests[0].interval.as_millis(), 5000);

        h.quit().await;
    }

    #[test]
    async fn test_self_only_no_redraw() {
        let store = MemoryStore::with_users([("remote", UserRecord::default())]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("remote"));
        h.start().await;

        h.location.send_fix(SELF_POS).await;
        h.location.send_fix(REMOTE_POS).await;

        let ui = h.ui().await;
        assert_eq!(ui.self_position, Some(REMOTE_POS));
        assert!(ui.frame.is_none());
        assert!(
            h.surface.draw_calls().is_empty(),
            "Surface was drawn to with only one position: {:?}",
            h.surface.calls()
        );

        h.quit().await;
    }

    #[test]
    async fn test_remote_first_then_self() {
        let store = MemoryStore::with_users([("remote", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("remote"));
        h.start().await;

        let ui = h.ui().await;
        assert_eq!(ui.remote_position, Some(REMOTE_POS));
        assert!(ui.frame.is_none());
        assert!(h.surface.draw_calls().is_empty());

        h.location.send_fix(SELF_POS).await;
        assert!(h.ui().await.frame.is_some());

        h.quit().await;
    }

    #[test]
    async fn test_degenerate_fix_rejected() {
        let store = MemoryStore::with_users([("remote", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("remote"));
        h.start().await;

        h.location.send_fix(Location::new(0.0, 0.0)).await;

        let ui = h.ui().await;
        assert_eq!(ui.self_position, None);
        assert!(ui.frame.is_none());
        assert_eq!(ui.status, TrackingStatus::InvalidCoordinates);
        assert!(h.surface.draw_calls().is_empty());
        assert_eq!(h.tracker.lock_state().await.redraws(), 0);

        h.location.send_fix(SELF_POS).await;
        assert_eq!(h.tracker.lock_state().await.redraws(), 1);

        // A bad fix after a good one leaves the drawn frame alone
        let before = h.surface.draw_calls();
        h.location.send_fix(Location::new(0.0, 0.0)).await;
        assert_eq!(h.surface.draw_calls(), before);
        assert_eq!(h.ui().await.self_position, Some(SELF_POS));

        h.quit().await;
    }

    #[test]
    async fn test_missing_longitude() {
        let record = UserRecord {
            latitude: Some(4.598),
            ..Default::default()
        };
        let store = MemoryStore::with_users([("remote", record)]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("remote"));
        h.start().await;
        h.location.send_fix(SELF_POS).await;

        let ui = h.ui().await;
        assert_eq!(ui.status, TrackingStatus::CoordinatesUnavailable);
        assert_eq!(ui.remote_position, None);
        assert!(ui.frame.is_none());
        assert!(h.surface.draw_calls().is_empty());

        h.quit().await;
    }

    #[test]
    async fn test_missing_record() {
        let mut h = Harness::new(MockLocation::granted(), MemoryStore::default(), Some("ghost"));
        h.start().await;

        let ui = h.ui().await;
        assert_eq!(ui.status, TrackingStatus::DataUnavailable);
        assert!(ui.remote_received);

        // Record shows up later
        h.store.put("ghost", located(REMOTE_POS)).await;
        h.location.send_fix(SELF_POS).await;
        assert!(h.ui().await.frame.is_some());

        h.quit().await;
    }

    #[test]
    async fn test_fetch_error_keeps_subscription() {
        let store = MemoryStore::with_users([("remote", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("remote"));
        h.start().await;
        h.location.send_fix(SELF_POS).await;
        let redraws = h.tracker.lock_state().await.redraws();

        h.store.fail("remote", "permission-denied").await;

        let ui = h.ui().await;
        assert_eq!(ui.status, TrackingStatus::FetchError);
        assert_eq!(h.store.active_subscriptions(), vec!["remote".to_string()]);
        assert_eq!(h.tracker.lock_state().await.redraws(), redraws);

        let moved = Location::new(4.65, -74.05);
        h.store.put("remote", located(moved)).await;
        let ui = h.ui().await;
        assert_eq!(ui.remote_position, Some(moved));
        assert!(matches!(ui.status, TrackingStatus::Distance(_)));

        h.quit().await;
    }

    #[test]
    async fn test_error_before_any_data() {
        let store = MemoryStore::with_users([("remote", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, None);
        h.start().await;

        let ui = h.ui().await;
        assert!(!ui.remote_received);

        h.track("remote").await;
        assert!(h.ui().await.remote_received);

        h.quit().await;
    }

    #[test]
    async fn test_switch_target() {
        let store = MemoryStore::with_users([
            ("a", located(REMOTE_POS)),
            ("b", located(Location::new(6.25, -75.56))),
        ]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("a"));
        h.start().await;
        h.location.send_fix(SELF_POS).await;
        assert_eq!(h.ui().await.remote_position, Some(REMOTE_POS));

        h.track("b").await;

        assert_eq!(
            h.store.ops(),
            vec![
                StoreOp::Subscribe("a".to_string()),
                StoreOp::Unsubscribe("a".to_string()),
                StoreOp::Subscribe("b".to_string()),
            ]
        );
        assert_eq!(h.store.active_subscriptions(), vec!["b".to_string()]);

        let ui = h.ui().await;
        assert_eq!(ui.target.as_deref(), Some("b"));
        assert_eq!(ui.remote_position, Some(Location::new(6.25, -75.56)));

        // a's changes are no longer seen
        h.store.put("a", located(Location::new(1.0, 1.0))).await;
        assert_eq!(
            h.ui().await.remote_position,
            Some(Location::new(6.25, -75.56))
        );

        // Still only one location request
        assert_eq!(h.location.active_watches(), 1);

        h.quit().await;
    }

    #[test]
    async fn test_switch_discards_queued_notifications() {
        let store = MemoryStore::with_users([
            ("a", located(REMOTE_POS)),
            ("b", UserRecord::default()),
        ]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("a"));
        h.start().await;

        // Queue a change for a and the switch back to back, with no chance for the loop to run
        // in between
        {
            let _state = h.tracker.lock_state().await;
            h.store
                .update_user(
                    "a",
                    crate::UserUpdate::location(Location::new(10.0, 10.0)),
                )
                .await
                .unwrap();
            h.tracker.track_user("b").await;
        }
        h.wait().await;

        let ui = h.ui().await;
        assert_eq!(ui.target.as_deref(), Some("b"));
        assert_eq!(ui.remote_position, None);
        assert_eq!(ui.status, TrackingStatus::CoordinatesUnavailable);

        h.quit().await;
    }

    #[test]
    async fn test_same_target_not_resubscribed() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("a"));
        h.start().await;
        h.track("a").await;
        assert_eq!(h.store.ops(), vec![StoreOp::Subscribe("a".to_string())]);
        h.quit().await;
    }

    #[test]
    async fn test_same_target_asks_permission_again() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::denied(), store, Some("a"));
        h.start().await;
        assert_eq!(h.location.permission_prompts(), 1);

        h.track("a").await;

        assert_eq!(h.location.permission_prompts(), 2);
        assert_eq!(h.store.ops(), vec![StoreOp::Subscribe("a".to_string())]);
        let ui = h.ui().await;
        assert_eq!(ui.status, TrackingStatus::PermissionDenied);
        assert_eq!(ui.remote_position, Some(REMOTE_POS), "Remote side was reset");

        h.quit().await;
    }

    #[test]
    async fn test_untrack() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("a"));
        h.start().await;
        h.location.send_fix(SELF_POS).await;

        h.tracker.untrack_user().await;
        h.wait().await;

        let ui = h.ui().await;
        assert_eq!(ui.target, None);
        assert!(ui.frame.is_none());
        assert_eq!(ui.self_position, Some(SELF_POS));
        assert!(h.store.active_subscriptions().is_empty());
        assert_eq!(h.surface.draw_calls().last(), Some(&SurfaceCall::Clear));
        assert_eq!(h.location.active_watches(), 1);

        h.quit().await;
    }

    #[test]
    async fn test_teardown_releases_everything() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("a"));
        h.start().await;
        h.location.send_fix(SELF_POS).await;

        assert_eq!(h.location.active_watches(), 1);
        assert_eq!(h.store.active_subscriptions().len(), 1);

        h.quit().await;

        assert_eq!(h.location.active_watches(), 0);
        assert!(h.store.active_subscriptions().is_empty());
    }

    #[test]
    async fn test_no_target_no_tracking() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, None);
        h.start().await;

        assert_eq!(h.location.active_watches(), 0);
        assert_eq!(h.location.permission_prompts(), 0);
        assert!(h.store.active_subscriptions().is_empty());
        assert!(h.surface.calls().is_empty());

        h.quit().await;
    }

    #[test]
    async fn test_permission_denied() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::denied(), store.clone(), Some("a"));
        h.start().await;

        assert_eq!(h.location.active_watches(), 0);
        assert_eq!(
            h.surface.calls().first(),
            Some(&SurfaceCall::Status(TrackingStatus::PermissionDenied))
        );
        // The remote side still comes in
        assert_eq!(h.ui().await.remote_position, Some(REMOTE_POS));
        assert!(h.surface.draw_calls().is_empty());
        assert_eq!(h.location.permission_prompts(), 1);

        // Asked again only when tracking is requested again
        h.store.put("b", located(SELF_POS)).await;
        h.track("b").await;
        assert_eq!(h.location.permission_prompts(), 2);

        h.quit().await;
    }

    #[test]
    async fn test_location_unavailable() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::broken(), store, Some("a"));
        h.start().await;

        assert_eq!(h.location.active_watches(), 0);
        assert_eq!(
            h.surface.calls().first(),
            Some(&SurfaceCall::Status(TrackingStatus::LocationUnavailable))
        );

        h.quit().await;
    }

    #[test]
    async fn test_provider_error_keeps_frame() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("a"));
        h.start().await;
        h.location.send_fix(SELF_POS).await;

        h.location.send_error("GPS lost").await;

        let ui = h.ui().await;
        assert_eq!(ui.status, TrackingStatus::LocationUnavailable);
        assert!(ui.frame.is_some());

        h.quit().await;
    }

    #[test]
    async fn test_redraw_is_deterministic() {
        let store = MemoryStore::with_users([("a", located(REMOTE_POS))]);
        let mut h = Harness::new(MockLocation::granted(), store, Some("a"));
        h.start().await;

        h.location.send_fix(SELF_POS).await;
        let first = h.surface.draw_calls();
        h.location.send_fix(SELF_POS).await;
        let both = h.surface.draw_calls();

        assert_eq!(both.len(), first.len() * 2);
        assert_eq!(&both[first.len()..], first.as_slice());

        h.quit().await;
    }

    #[test]
    async fn test_second_loop_rejected() {
        let mut h = Harness::new(MockLocation::granted(), MemoryStore::default(), None);
        h.start().await;

        let res = h.tracker.main_loop().await;
        assert!(res.is_err(), "Second loop was allowed to start");

        h.quit().await;
    }

    #[test]
    async fn test_state_setters() {
        let settings = TrackerSettings::default();
        let mut state = TrackerState::default();

        assert!(state.set_self_position(SELF_POS, &settings).is_none());
        assert_eq!(state.redraws(), 0);

        let frame = state
            .set_remote_position(REMOTE_POS, &settings)
            .cloned()
            .expect("No frame with both positions");
        assert_eq!(state.redraws(), 1);
        assert_eq!(state.status(), &TrackingStatus::Distance(frame.distance_km));

        state.set_target(Some("other".to_string()));
        assert!(state.frame().is_none());
        assert_eq!(state.remote_position(), None);
        assert_eq!(state.self_position(), Some(SELF_POS));
    }
}
