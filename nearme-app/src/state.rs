use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Manager};
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};
use tauri_specta::Event;
use tokio::sync::RwLock;

use nearme_logic::{
    IdentityService, LoginForm, RegistrationForm, Tracker as BaseTracker, TrackerSettings, UserId,
    login, register, sign_out,
};
use nearme_store::{ApiClient, RestIdentity, RestStore};

use crate::{
    Result,
    location::TauriLocation,
    session::{read_session_from_store, write_session_to_store},
    surface::TauriMapSurface,
};

pub type Tracker = BaseTracker<TauriLocation, RestStore, TauriMapSurface>;

/// Connections to the identity and document services, shared by every screen
pub struct Services {
    pub identity: RestIdentity,
    pub store: Arc<RestStore>,
}

impl Services {
    pub fn from_env() -> anyhow::Result<Self> {
        let api = ApiClient::from_env()?;
        Ok(Self {
            identity: RestIdentity::new(api.clone()),
            store: Arc::new(RestStore::new(api)),
        })
    }
}

pub enum AppState {
    SignedOut,
    Home(UserId),
    Tracking(UserId, Arc<Tracker>),
}

#[derive(Serialize, Deserialize, specta::Type, Debug, Clone, Eq, PartialEq)]
pub enum AppScreen {
    Login,
    Home,
    Tracking,
}

pub type AppStateHandle = RwLock<AppState>;

/// The app is changing screens, contains the screen it's switching to
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
pub struct ChangeScreen(AppScreen);

fn error_dialog(app: &AppHandle, msg: &str) {
    app.dialog()
        .message(msg)
        .kind(MessageDialogKind::Error)
        .show(|_| {});
}

fn save_session(app: &AppHandle, services: &Services) {
    if let Err(why) = write_session_to_store(app, services.identity.session()) {
        warn!("Failed to persist session: {why:?}");
    }
}

impl AppState {
    pub fn screen(&self) -> AppScreen {
        match self {
            AppState::SignedOut => AppScreen::Login,
            AppState::Home(_) => AppScreen::Home,
            AppState::Tracking(_, _) => AppScreen::Tracking,
        }
    }

    fn emit_screen_change(app: &AppHandle, screen: AppScreen) {
        if let Err(why) = ChangeScreen(screen).emit(app) {
            warn!("Error emitting screen change: {why:?}");
        }
    }

    /// Pick up a session saved by a previous run
    pub fn restore(&mut self, app: &AppHandle, services: &Services) {
        if let Some(session) = read_session_from_store(app) {
            let id = session.user_id.clone();
            services.identity.restore(session);
            *self = AppState::Home(id);
            Self::emit_screen_change(app, AppScreen::Home);
        }
    }

    pub fn current_user(&self) -> Result<&str> {
        match self {
            AppState::Home(id) | AppState::Tracking(id, _) => Ok(id),
            AppState::SignedOut => Err("Not signed in".to_string()),
        }
    }

    pub fn get_tracker(&self) -> Result<Arc<Tracker>> {
        if let AppState::Tracking(_, tracker) = self {
            Ok(tracker.clone())
        } else {
            Err("Not on tracking screen".to_string())
        }
    }

    fn signed_in(&mut self, app: &AppHandle, services: &Services, id: UserId) {
        save_session(app, services);
        *self = AppState::Home(id);
        Self::emit_screen_change(app, AppScreen::Home);
    }

    pub async fn login(&mut self, app: &AppHandle, services: &Services, form: LoginForm) -> Result {
        if !matches!(self, AppState::SignedOut) {
            return Err("Already signed in".to_string());
        }
        let id = login(&services.identity, &form)
            .await
            .map_err(|e| format!("{e:#}"))?;
        self.signed_in(app, services, id);
        Ok(())
    }

    pub async fn register(
        &mut self,
        app: &AppHandle,
        services: &Services,
        form: RegistrationForm,
    ) -> Result {
        if !matches!(self, AppState::SignedOut) {
            return Err("Already signed in".to_string());
        }
        let res = register(&services.identity, services.store.as_ref(), &form).await;
        match res {
            Ok(id) => {
                self.signed_in(app, services, id);
                Ok(())
            }
            Err(why) => {
                // Account may exist even though saving the record failed
                if services.identity.current_user().is_some() {
                    services.identity.sign_out().await;
                }
                Err(format!("{why:#}"))
            }
        }
    }

    pub async fn sign_out(&mut self, app: &AppHandle, services: &Services) {
        if let AppState::Tracking(_, tracker) = self {
            tracker.quit().await;
        }
        sign_out(&services.identity, services.store.as_ref()).await;
        save_session(app, services);
        *self = AppState::SignedOut;
        Self::emit_screen_change(app, AppScreen::Login);
    }

    fn tracking_loop(app: AppHandle, tracker: Arc<Tracker>) {
        tokio::spawn(async move {
            let res = tracker.main_loop().await;
            if let Err(why) = res {
                error!("Tracking Error: {why:?}");
                error_dialog(&app, &format!("Tracking stopped: {why}"));
                let state_handle = app.state::<AppStateHandle>();
                let mut state = state_handle.write().await;
                let current = matches!(
                    &*state,
                    AppState::Tracking(_, other) if Arc::ptr_eq(other, &tracker)
                );
                if current {
                    state.stop_tracking(&app).await;
                }
            } else {
                info!("Tracking loop exited");
            }
        });
    }

    /// Start tracking `target`, or switch to it if already tracking someone else
    pub async fn start_tracking(
        &mut self,
        app: &AppHandle,
        services: &Services,
        target: UserId,
    ) -> Result {
        match self {
            AppState::SignedOut => Err("Not signed in".to_string()),
            AppState::Tracking(_, tracker) => {
                tracker.track_user(target).await;
                Ok(())
            }
            AppState::Home(id) => {
                let tracker = Arc::new(Tracker::new(
                    TrackerSettings::default(),
                    Some(target),
                    TauriLocation::new(app.clone()),
                    services.store.clone(),
                    TauriMapSurface::new(app),
                ));
                *self = AppState::Tracking(id.clone(), tracker.clone());
                Self::tracking_loop(app.clone(), tracker);
                Self::emit_screen_change(app, AppScreen::Tracking);
                Ok(())
            }
        }
    }

    pub async fn stop_tracking(&mut self, app: &AppHandle) {
        if let AppState::Tracking(id, tracker) = self {
            tracker.quit().await;
            *self = AppState::Home(id.clone());
            Self::emit_screen_change(app, AppScreen::Home);
        } else {
            warn!("Not tracking anyone");
        }
    }
}
