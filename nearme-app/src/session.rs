use log::warn;
use nearme_store::Session;
use tauri::AppHandle;
use tauri_plugin_store::StoreExt;

use nearme_logic::prelude::*;

const STORE_NAME: &str = "session";
const SESSION_KEY: &str = "session";

pub fn read_session_from_store(app: &AppHandle) -> Option<Session> {
    let store = match app.store(STORE_NAME) {
        Ok(store) => store,
        Err(why) => {
            warn!("Couldn't open session store: {why:?}");
            return None;
        }
    };

    let session = store
        .get(SESSION_KEY)
        .and_then(|v| serde_json::from_value::<Session>(v).ok());

    store.close_resource();

    session
}

pub fn write_session_to_store(app: &AppHandle, session: Option<Session>) -> Result {
    let store = app.store(STORE_NAME).context("Couldn't open session store")?;

    match session {
        Some(session) => {
            let value = serde_json::to_value(session).context("Failed to serialize session")?;
            store.set(SESSION_KEY, value);
        }
        None => {
            store.delete(SESSION_KEY);
        }
    }

    store.save().context("Failed to save session store")
}
