//! Group-level login: one shared credential per group, resolved against an
//! accounts record in the remote store. The first successful login of an
//! account without a group uid provisions one and writes it back, so every
//! later path (documents, object keys) has a stable opaque group id to hang
//! off. The logged-in identity is cached locally and restored on restart.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::cache::{CacheDb, SESSION_KEY};
use crate::remote::{RemoteError, RemoteStore, ROOT_PATH};

/// Characters the hosted store forbids in path segments.
const INVALID_KEY_CHARS: [char; 6] = ['.', '#', '$', '/', '[', ']'];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub login_id: String,
    pub group_uid: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginError {
    NotConfigured,
    InvalidInput(String),
    UnknownAccount,
    WrongPassword,
    Remote(RemoteError),
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginError::NotConfigured => write!(f, "remote backend is not configured"),
            LoginError::InvalidInput(msg) => write!(f, "{}", msg),
            LoginError::UnknownAccount => write!(f, "no such account"),
            LoginError::WrongPassword => write!(f, "password does not match"),
            LoginError::Remote(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for LoginError {}

fn account_paths(login_id: &str) -> [String; 2] {
    // Older deployments stored accounts at the bare top-level path.
    [
        format!("{}/accounts/{}", ROOT_PATH, login_id),
        format!("accounts/{}", login_id),
    ]
}

pub fn login(
    store: &mut dyn RemoteStore,
    cache: Option<&CacheDb>,
    login_id: &str,
    password: &str,
) -> Result<Session, LoginError> {
    let login_id = login_id.trim();
    if login_id.is_empty() || password.is_empty() {
        return Err(LoginError::InvalidInput(
            "login id and password are required".to_string(),
        ));
    }
    if login_id.contains(&INVALID_KEY_CHARS[..]) {
        return Err(LoginError::InvalidInput(
            "login id contains characters not allowed in a path".to_string(),
        ));
    }

    let (path, mut account) = read_account(store, login_id)?.ok_or(LoginError::UnknownAccount)?;

    let saved = ["password", "pass", "pw"]
        .iter()
        .find_map(|k| scalar_string(account.get(*k)))
        .unwrap_or_default();
    if saved != password {
        return Err(LoginError::WrongPassword);
    }

    let group_uid = ["groupUid", "group_id", "groupId", "group"]
        .iter()
        .find_map(|k| scalar_string(account.get(*k)))
        .filter(|s| !s.is_empty());
    let group_uid = match group_uid {
        Some(uid) => uid,
        None => {
            // First login of a fresh account: mint a stable opaque group id
            // and persist it into the credentials record.
            let uid = Uuid::new_v4().to_string();
            account.insert("groupUid".to_string(), Value::String(uid.clone()));
            store
                .write(&path, &Value::Object(account.clone()))
                .map_err(LoginError::Remote)?;
            uid
        }
    };

    let display_name = scalar_string(account.get("name"))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| login_id.to_string());

    let session = Session {
        login_id: login_id.to_string(),
        group_uid,
        display_name,
    };
    if let Some(cache) = cache {
        if let Ok(raw) = serde_json::to_string(&session) {
            let _ = cache.set_raw(SESSION_KEY, &raw);
        }
    }
    Ok(session)
}

/// Absent or corrupt cache rows mean "logged out", never an error.
pub fn load_session(cache: &CacheDb) -> Option<Session> {
    let raw = cache.get_raw(SESSION_KEY).ok()??;
    let session: Session = serde_json::from_str(&raw).ok()?;
    if session.login_id.trim().is_empty() || session.group_uid.trim().is_empty() {
        return None;
    }
    Some(session)
}

pub fn clear_session(cache: &CacheDb) {
    let _ = cache.delete(SESSION_KEY);
}

type Account = serde_json::Map<String, Value>;

fn read_account(
    store: &dyn RemoteStore,
    login_id: &str,
) -> Result<Option<(String, Account)>, LoginError> {
    for path in account_paths(login_id) {
        match store.read(&path).map_err(LoginError::Remote)? {
            Some(Value::Object(map)) => return Ok(Some((path, map))),
            _ => continue,
        }
    }
    Ok(None)
}

fn scalar_string(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
