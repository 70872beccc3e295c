use std::path::PathBuf;

use serde::Deserialize;

use crate::cache::CacheDb;
use crate::media::MediaGateway;
use crate::model::CanonicalState;
use crate::remote::SyncGateway;
use crate::scope::Scope;
use crate::session::Session;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything the daemon owns, constructed once at startup and passed by
/// reference to every handler. Gateways live here rather than in module
/// globals so embedders and tests can install their own backends.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub cache: Option<CacheDb>,
    pub session: Option<Session>,
    pub sync: SyncGateway,
    pub media: MediaGateway,
    /// The currently open partition and its canonical in-memory state.
    pub scope: Option<Scope>,
    pub state: Option<CanonicalState>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            cache: None,
            session: None,
            sync: SyncGateway::new(),
            media: MediaGateway::new(),
            scope: None,
            state: None,
        }
    }
}
