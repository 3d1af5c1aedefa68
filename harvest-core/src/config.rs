//! Configuration lookup for the persistence layer
//!
//! Settings are plain string keys scoped by a stage prefix, for example
//! `downloader_FILE_TEMPLATE` or `extractor_SAVE_DATA_SERVICE`. A config can be
//! loaded from JSON (flat or nested per stage) and overridden from the
//! environment.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::context::Stage;
use crate::metadata::stringify;
use crate::template::Template;
use crate::{PersistError, Result};

/// Suffix of the filename template key
pub const FILE_TEMPLATE: &str = "FILE_TEMPLATE";
/// Suffix of the storage service key
pub const SAVE_DATA_SERVICE: &str = "SAVE_DATA_SERVICE";
/// Suffix of the object-store bucket key
pub const SAVE_DATA_BUCKET_NAME: &str = "SAVE_DATA_BUCKET_NAME";
/// Environment variables with this prefix override config keys
pub const ENV_PREFIX: &str = "HARVEST_";
/// Prefixed variables that configure the CLI itself rather than a stage
pub const RESERVED_ENV_VARS: &[&str] = &["HARVEST_CONFIG", "HARVEST_S3_ENDPOINT"];

/// Read-only key/value settings shared by the pipeline stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a raw key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Iterate over all keys in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a JSON document into a configuration
    ///
    /// Accepts a flat object (`{"downloader_FILE_TEMPLATE": "..."}`) or one
    /// nested per stage (`{"downloader": {"FILE_TEMPLATE": "..."}}`). Both
    /// shapes may be mixed. Non-string values are stringified.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(json)?;
        let Value::Object(entries) = document else {
            return Err(PersistError::validation(
                "Configuration document must be a JSON object",
            ));
        };

        let mut config = Config::new();
        for (key, value) in entries {
            match (key.parse::<Stage>(), value) {
                (Ok(stage), Value::Object(stage_entries)) => {
                    for (suffix, value) in stage_entries {
                        config.set(stage.key(&suffix), stringify(&value));
                    }
                }
                (_, value) => config.set(key, stringify(&value)),
            }
        }
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Apply `HARVEST_<KEY>` overrides from the given variables
    pub fn apply_env<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            if RESERVED_ENV_VARS.contains(&name.as_ref()) {
                continue;
            }
            if let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) {
                if !key.is_empty() {
                    self.set(key, value);
                }
            }
        }
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env(std::env::vars());
        self
    }

    /// The filename template configured for a stage
    pub fn file_template(&self, stage: Stage) -> Result<&str> {
        let key = stage.key(FILE_TEMPLATE);
        self.get(&key).ok_or(PersistError::MissingConfig(key))
    }

    /// The storage service configured for a stage, if any
    pub fn save_service(&self, stage: Stage) -> Option<&str> {
        self.get(&stage.key(SAVE_DATA_SERVICE))
    }

    /// The destination bucket for a stage's object-store writes
    pub fn bucket_name(&self, stage: Stage) -> Result<&str> {
        let key = stage.key(SAVE_DATA_BUCKET_NAME);
        match self.get(&key) {
            Some(bucket) if !bucket.is_empty() => Ok(bucket),
            _ => Err(PersistError::MissingConfig(key)),
        }
    }

    /// Point a stage at a destination
    ///
    /// `s3://bucket` selects the `s3` service with that bucket; any other value
    /// is taken as a service name (`local`, or a custom registered backend).
    pub fn set_destination(&mut self, stage: Stage, uri: &str) -> Result<()> {
        if let Some(s3_part) = uri.strip_prefix("s3://") {
            let bucket = s3_part.split('/').next().unwrap_or_default();
            if bucket.is_empty() {
                return Err(PersistError::validation(
                    "Invalid S3 URI: missing bucket name",
                ));
            }
            self.set(stage.key(SAVE_DATA_SERVICE), "s3");
            self.set(stage.key(SAVE_DATA_BUCKET_NAME), bucket);
        } else if uri.is_empty() {
            return Err(PersistError::validation("Destination cannot be empty"));
        } else {
            self.set(stage.key(SAVE_DATA_SERVICE), uri);
        }
        Ok(())
    }

    /// Validate the settings a stage needs in order to save
    pub fn validate(&self, stage: Stage) -> Result<()> {
        Template::parse(self.file_template(stage)?)?;

        match self.save_service(stage) {
            None => return Err(PersistError::MissingConfig(stage.key(SAVE_DATA_SERVICE))),
            Some("s3") => {
                self.bucket_name(stage)?;
            }
            Some(_) => {}
        }
        Ok(())
    }
}
