//! Member photo storage: uploads into a key-addressed blob store and hands
//! back the object key plus a stable access URL. The gateway never cleans up
//! a replaced photo itself; the caller deletes the old key so that a failed
//! delete (already-gone object, flaky network) stays non-fatal and
//! independently retryable.

use std::collections::HashMap;
use std::fmt;

use crate::remote::RemoteError;

const IMAGE_EXTENSIONS: [(&str, &str); 5] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum MediaError {
    NotConfigured,
    /// Rejected before any store call.
    NotAnImage(String),
    Store(RemoteError),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::NotConfigured => write!(f, "object storage is not configured"),
            MediaError::NotAnImage(ext) => write!(f, "not an image file: .{}", ext),
            MediaError::Store(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for MediaError {}

pub trait ObjectStore {
    /// Stores the blob and returns its stable access URL.
    fn put(&mut self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, RemoteError>;
    fn delete(&mut self, key: &str) -> Result<(), RemoteError>;
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: HashMap<String, (Vec<u8>, String)>,
}

impl MemoryObjectStore {
    pub fn new() -> MemoryObjectStore {
        MemoryObjectStore::default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&mut self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, RemoteError> {
        self.objects
            .insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(format!("memory://{}", key))
    }

    fn delete(&mut self, key: &str) -> Result<(), RemoteError> {
        // Deleting an already-removed object is not an error worth failing.
        self.objects.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedPhoto {
    pub path: String,
    pub url: String,
}

pub struct MediaGateway {
    store: Option<Box<dyn ObjectStore>>,
}

impl MediaGateway {
    pub fn new() -> MediaGateway {
        MediaGateway { store: None }
    }

    pub fn configure(&mut self, store: Box<dyn ObjectStore>) {
        self.store = Some(store);
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub fn upload(
        &mut self,
        member_id: &str,
        file_name: &str,
        bytes: &[u8],
        group_id: &str,
    ) -> Result<UploadedPhoto, MediaError> {
        // Validate before touching the store or the network.
        let ext = extension_of(file_name);
        let content_type = IMAGE_EXTENSIONS
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, ct)| *ct)
            .ok_or_else(|| MediaError::NotAnImage(ext.clone()))?;

        let store = self.store.as_deref_mut().ok_or(MediaError::NotConfigured)?;
        let path = format!("groups/{}/students/{}.{}", group_id, member_id, ext);
        let url = store
            .put(&path, bytes, content_type)
            .map_err(MediaError::Store)?;
        Ok(UploadedPhoto { path, url })
    }

    /// Missing or empty paths complete without error and without any store
    /// call.
    pub fn delete_by_path(&mut self, path: Option<&str>) -> Result<(), MediaError> {
        let Some(path) = path.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(());
        };
        let store = self.store.as_deref_mut().ok_or(MediaError::NotConfigured)?;
        store.delete(path).map_err(MediaError::Store)
    }
}

impl Default for MediaGateway {
    fn default() -> Self {
        MediaGateway::new()
    }
}

// Files without an extension upload as jpeg, matching what camera rolls
// produce; files with a non-image extension are rejected.
fn extension_of(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => "jpg".to_string(),
    }
}
