/*!
Storage backends for artifact persistence.

This module defines the storage abstraction (port) and its adapters. The
coordinator only ever talks to [`StorageBackend`]; which adapter handles a
write is decided at runtime from the `{stage}_SAVE_DATA_SERVICE` setting via
the [`BackendRegistry`].
*/

pub mod local;
pub mod object_store;
#[cfg(feature = "s3")]
pub mod s3;

#[cfg(test)]
mod object_store_tests;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Stage;
use crate::metadata::NormalizedMetadata;
use crate::observability::SaveEventSink;
use crate::payload::RawPayload;
use crate::Result;

pub use local::LocalFileStorage;
pub use object_store::{ObjectStoreBackend, ObjectStoreClient, PutObjectRequest, PutObjectResponse};
#[cfg(feature = "s3")]
pub use s3::S3ObjectClient;

/// Where an artifact landed
///
/// Serializes as `{"location": "local", "path": ...}` or
/// `{"location": "s3", "bucket": ..., "key": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "lowercase")]
pub enum SaveResult {
    Local { path: String },
    S3 { bucket: String, key: String },
}

impl fmt::Display for SaveResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveResult::Local { path } => write!(f, "{path}"),
            SaveResult::S3 { bucket, key } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

/// Everything a backend needs for one write
pub struct WriteRequest<'a> {
    pub stage: Stage,
    pub config: &'a Config,
    pub filename: &'a str,
    pub payload: &'a RawPayload,
    pub content_type: &'a str,
    pub metadata: &'a NormalizedMetadata,
    pub sink: &'a dyn SaveEventSink,
}

/// A durable destination for artifacts
///
/// Each call commits the whole payload in a single write or put and reports
/// where it landed.
pub trait StorageBackend: Send + Sync {
    fn write(&self, request: &WriteRequest<'_>) -> Result<SaveResult>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn write(&self, request: &WriteRequest<'_>) -> Result<SaveResult> {
        (**self).write(request)
    }
}

/// Service name to backend lookup
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `local` mapped to a plain [`LocalFileStorage`]
    pub fn with_local() -> Self {
        let mut registry = Self::new();
        registry.register("local", LocalFileStorage::new());
        registry
    }

    /// Register (or replace) the backend for a service name
    pub fn register<B>(&mut self, service: impl Into<String>, backend: B) -> &mut Self
    where
        B: StorageBackend + 'static,
    {
        self.backends.insert(service.into(), Arc::new(backend));
        self
    }

    pub fn get(&self, service: &str) -> Option<&Arc<dyn StorageBackend>> {
        self.backends.get(service)
    }

    /// Registered service names, sorted
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("services", &self.services())
            .finish()
    }
}

/// Memory-based backend for testing
///
/// Stores bodies in a HashMap keyed by filename and reports them as local
/// saves.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    data: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, filename: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(filename).cloned()
    }
}

#[cfg(test)]
impl StorageBackend for MemoryStorage {
    fn write(&self, request: &WriteRequest<'_>) -> Result<SaveResult> {
        let body = request.payload.encode();
        self.data
            .lock()
            .unwrap()
            .insert(request.filename.to_string(), body.bytes.into_owned());
        Ok(SaveResult::Local {
            path: request.filename.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_result_serialization() {
        let local = SaveResult::Local {
            path: "out/a.html".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&local).unwrap(),
            json!({"location": "local", "path": "out/a.html"})
        );

        let s3 = SaveResult::S3 {
            bucket: "pages".to_string(),
            key: "a.html".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&s3).unwrap(),
            json!({"location": "s3", "bucket": "pages", "key": "a.html"})
        );
        assert_eq!(s3.to_string(), "s3://pages/a.html");
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = BackendRegistry::with_local();
        registry.register("memory", MemoryStorage::new());

        assert!(registry.get("local").is_some());
        assert!(registry.get("memory").is_some());
        assert!(registry.get("s3").is_none());
        assert_eq!(registry.services(), vec!["local", "memory"]);
    }
}
