/*!
Persistence coordinator that turns a stage payload into a stored artifact.

The coordinator resolves the destination filename, selects the backend
configured for the stage, normalizes metadata and hands the payload to the
backend. It holds no per-call state, so one instance can serve every worker
of a pipeline concurrently.
*/

use std::sync::Arc;

use crate::context::Context;
use crate::metadata::{normalize, Metadata};
use crate::observability::{SaveEventSink, TracingSink};
use crate::payload::RawPayload;
use crate::storage::{BackendRegistry, SaveResult, WriteRequest};
use crate::template::{resolve_filename, TemplateValues};
use crate::{PersistError, Result};

/// Content type used when the caller has nothing better
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Per-call options for [`PersistenceCoordinator::save`]
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Ad-hoc template variables, overriding task fields and timestamps
    pub template_values: TemplateValues,
    /// Explicit filename; skips template resolution when set and non-empty
    pub filename: Option<String>,
    /// Object metadata, normalized to strings before the write
    pub metadata: Option<Metadata>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template_value(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.template_values.insert(name.into(), value.into());
        self
    }

    pub fn template_values(mut self, values: TemplateValues) -> Self {
        self.template_values.extend(values);
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn explicit_filename(&self) -> Option<&str> {
        self.filename.as_deref().filter(|name| !name.is_empty())
    }
}

/// How soft failures are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SavePolicy {
    /// Fail with `UnrecognizedStorageService` instead of returning `Ok(None)`
    /// when the configured service has no backend
    pub strict_service_selection: bool,
}

impl SavePolicy {
    pub fn strict() -> Self {
        Self {
            strict_service_selection: true,
        }
    }
}

/// Orchestrates filename resolution, backend selection and the write
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use harvest_core::{BackendRegistry, Config, Context, PersistenceCoordinator, RawPayload, SaveOptions};
///
/// let dir = std::env::temp_dir().join("harvest-doc");
/// let config = Config::new()
///     .with("downloader_SAVE_DATA_SERVICE", "local")
///     .with("downloader_FILE_TEMPLATE", format!("{}/{{id}}.html", dir.display()));
/// let task = serde_json::json!({"id": 7}).as_object().cloned().unwrap();
/// let ctx = Context::download(task, Arc::new(config));
///
/// let coordinator = PersistenceCoordinator::new(BackendRegistry::with_local());
/// let saved = coordinator.save(&RawPayload::text("<html/>"), "text/html", &ctx, &SaveOptions::new())?;
/// assert!(saved.is_some());
/// # Ok::<(), harvest_core::PersistError>(())
/// ```
#[derive(Clone)]
pub struct PersistenceCoordinator {
    registry: BackendRegistry,
    sink: Arc<dyn SaveEventSink>,
    policy: SavePolicy,
}

impl PersistenceCoordinator {
    /// Create a coordinator that logs through `tracing`
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            sink: Arc::new(TracingSink),
            policy: SavePolicy::default(),
        }
    }

    /// Replace the event sink
    pub fn with_sink(mut self, sink: Arc<dyn SaveEventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_policy(mut self, policy: SavePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn policy(&self) -> SavePolicy {
        self.policy
    }

    /// Persist one payload for the stage described by `ctx`
    ///
    /// This method:
    /// 1. Resolves the filename from `{stage}_FILE_TEMPLATE` unless one is given
    /// 2. Selects the backend named by `{stage}_SAVE_DATA_SERVICE`
    /// 3. Normalizes metadata to string values
    /// 4. Writes the payload in a single call to the backend
    /// 5. Reports the outcome to the event sink
    ///
    /// # Returns
    /// Where the artifact landed, or `None` when the configured service has no
    /// registered backend (and the policy is not strict)
    ///
    /// # Errors
    /// * `PersistError::MissingTemplateVariable` - A placeholder could not be filled
    /// * `PersistError::MissingConfig` - The template or bucket setting is absent
    /// * `PersistError::Persistence` - The local write failed
    /// * `PersistError::UnrecognizedStorageService` - Unknown service under a strict policy
    pub fn save(
        &self,
        payload: &RawPayload,
        content_type: &str,
        ctx: &Context,
        options: &SaveOptions,
    ) -> Result<Option<SaveResult>> {
        let stage = ctx.stage();
        let outcome = self.write(payload, content_type, ctx, options);

        match &outcome {
            Ok(result) => self.sink.saved(stage, ctx.task(), result.as_ref()),
            Err(error) => self.sink.failed(stage, ctx.task(), error),
        }
        outcome
    }

    fn write(
        &self,
        payload: &RawPayload,
        content_type: &str,
        ctx: &Context,
        options: &SaveOptions,
    ) -> Result<Option<SaveResult>> {
        let stage = ctx.stage();
        let config = ctx.config();

        let filename = match options.explicit_filename() {
            Some(name) => name.to_string(),
            None => resolve_filename(ctx, &options.template_values)?,
        };

        let service = config.save_service(stage);
        let backend = match service.and_then(|name| self.registry.get(name)) {
            Some(backend) => backend,
            None => {
                self.sink.unrecognized_service(stage, service);
                if self.policy.strict_service_selection {
                    return Err(PersistError::UnrecognizedStorageService(
                        service.unwrap_or_default().to_string(),
                    ));
                }
                return Ok(None);
            }
        };

        let metadata = normalize(options.metadata.as_ref());
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };

        let result = backend.write(&WriteRequest {
            stage,
            config,
            filename: &filename,
            payload,
            content_type,
            metadata: &metadata,
            sink: self.sink.as_ref(),
        })?;

        #[cfg(feature = "metrics")]
        crate::observability::HarvestMetrics::global().record_payload_size(payload.len());

        Ok(Some(result))
    }
}

impl std::fmt::Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
