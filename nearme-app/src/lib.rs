mod location;
mod session;
mod state;
mod surface;

use log::LevelFilter;
use nearme_logic::{
    AvailableUser, Location, LoginForm, PointOfInterest, RegistrationForm, TrackerUiState, UserId,
    current_location, list_available_users, parse_points, set_availability,
};
use tauri::{AppHandle, Manager, State};
use tauri_specta::{ErrorHandlingMode, collect_commands, collect_events};
use tokio::sync::RwLock;

use std::result::Result as StdResult;

use crate::{
    location::TauriLocation,
    state::{AppScreen, AppState, AppStateHandle, ChangeScreen, Services},
    surface::MapDraw,
};

type Result<T = (), E = String> = StdResult<T, E>;

const POINTS_OF_INTEREST: &str = include_str!("../assets/locations.json");

// == GENERAL / FLOW COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Get the screen the app should currently be on, returns [AppScreen]
async fn get_current_screen(state: State<'_, AppStateHandle>) -> Result<AppScreen> {
    Ok(state.read().await.screen())
}

#[tauri::command]
#[specta::specta]
/// (Screen: Register, Home) Get where this device is right now, asking for permission if needed.
/// Used to pre-fill the registration form and to place yourself on the home map. Returns `null`
/// if the device doesn't have a usable fix yet.
async fn get_current_location(app: AppHandle) -> Result<Option<Location>> {
    current_location(&TauriLocation::new(app)).map_err(|e| format!("{e:#}"))
}

// == AppState::SignedOut COMMANDS ==

#[tauri::command]
#[specta::specta]
/// (Screen: Login) Sign in and go to the home screen
async fn login(
    form: LoginForm,
    app: AppHandle,
    services: State<'_, Services>,
    state: State<'_, AppStateHandle>,
) -> Result {
    state.write().await.login(&app, &services, form).await
}

#[tauri::command]
#[specta::specta]
/// (Screen: Login) Create an account, sends a verification email and goes to the home screen
async fn register(
    form: RegistrationForm,
    app: AppHandle,
    services: State<'_, Services>,
    state: State<'_, AppStateHandle>,
) -> Result {
    state.write().await.register(&app, &services, form).await
}

// == AppState::Home COMMANDS ==

#[tauri::command]
#[specta::specta]
/// (Screen: Home) Mark yourself as unavailable and sign out
async fn sign_out(
    app: AppHandle,
    services: State<'_, Services>,
    state: State<'_, AppStateHandle>,
) -> Result {
    state.write().await.sign_out(&app, &services).await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// (Screen: Home) Set whether other users can track you
async fn set_available(
    available: bool,
    services: State<'_, Services>,
    state: State<'_, AppStateHandle>,
) -> Result {
    state.read().await.current_user()?;
    set_availability(&services.identity, services.store.as_ref(), available)
        .await
        .map_err(|e| format!("{e:#}"))
}

#[tauri::command]
#[specta::specta]
/// (Screen: Home) Get every other user that's currently available to track
async fn list_users(
    services: State<'_, Services>,
    state: State<'_, AppStateHandle>,
) -> Result<Vec<AvailableUser>> {
    let me = state.read().await.current_user()?.to_string();
    list_available_users(services.store.as_ref(), Some(&me))
        .await
        .map_err(|e| format!("{e:#}"))
}

#[tauri::command]
#[specta::specta]
/// (Screen: Home) Get the points of interest to show on the home map
fn get_points_of_interest() -> Result<Vec<PointOfInterest>> {
    parse_points(POINTS_OF_INTEREST).map_err(|e| format!("{e:#}"))
}

#[tauri::command]
#[specta::specta]
/// (Screen: Home, Tracking) Start tracking a user, switching to the tracking screen. If already
/// tracking someone this switches to the new user instead.
async fn track_user(
    id: UserId,
    app: AppHandle,
    services: State<'_, Services>,
    state: State<'_, AppStateHandle>,
) -> Result {
    state
        .write()
        .await
        .start_tracking(&app, &services, id)
        .await
}

// == AppState::Tracking COMMANDS ==

#[tauri::command]
#[specta::specta]
/// (Screen: Tracking) Get what's currently shown on the tracking map. [MapDraw] events are
/// sent as it changes, use this to catch up.
async fn get_tracking_state(state: State<'_, AppStateHandle>) -> Result<TrackerUiState> {
    let tracker = state.read().await.get_tracker()?;
    Ok(tracker.get_ui_state().await)
}

#[tauri::command]
#[specta::specta]
/// (Screen: Tracking) Stop tracking and go back to the home screen
async fn stop_tracking(app: AppHandle, state: State<'_, AppStateHandle>) -> Result {
    state.write().await.stop_tracking(&app).await;
    Ok(())
}

pub fn mk_specta() -> tauri_specta::Builder {
    tauri_specta::Builder::<tauri::Wry>::new()
        .error_handling(ErrorHandlingMode::Throw)
        .commands(collect_commands![
            get_current_screen,
            get_current_location,
            login,
            register,
            sign_out,
            set_available,
            list_users,
            get_points_of_interest,
            track_user,
            get_tracking_state,
            stop_tracking,
        ])
        .events(collect_events![ChangeScreen, MapDraw])
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let state = RwLock::new(AppState::SignedOut);
    let services = Services::from_env().expect("Failed to set up API client");

    let builder = mk_specta();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(LevelFilter::Debug)
                .build(),
        )
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_geolocation::init())
        .plugin(tauri_plugin_store::Builder::default().build())
        .invoke_handler(builder.invoke_handler())
        .manage(state)
        .manage(services)
        .setup(move |app| {
            builder.mount_events(app);

            let handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                let services = handle.state::<Services>();
                let state_handle = handle.state::<AppStateHandle>();
                let mut state = state_handle.write().await;
                state.restore(&handle, &services);
            });
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
