/*!
Observability for the persistence layer.

- [`SaveEventSink`]: the event capability injected into the coordinator
- [`TracingSink`]: default sink emitting structured `tracing` events
- [`RecordingSink`]: in-memory sink for tests and embedding callers
- Subscriber setup for process entry points
- Prometheus counters behind the `metrics` feature
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, Histogram, IntCounter, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::context::{Stage, Task};
use crate::storage::SaveResult;
use crate::{PersistError, Result};

/// Receives the outcome of every persistence call
pub trait SaveEventSink: Send + Sync {
    /// A save call finished without a hard error; `result` is `None` when
    /// nothing was written
    fn saved(&self, stage: Stage, task: &Task, result: Option<&SaveResult>);

    /// A save call failed with a caller-visible error
    fn failed(&self, stage: Stage, task: &Task, error: &PersistError);

    /// The configured service has no registered backend
    fn unrecognized_service(&self, stage: Stage, service: Option<&str>);

    /// An object store answered a put
    fn object_store_response(&self, bucket: &str, key: &str, status: u16);
}

/// Sink that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl SaveEventSink for TracingSink {
    fn saved(&self, stage: Stage, task: &Task, result: Option<&SaveResult>) {
        #[cfg(feature = "metrics")]
        if result.is_some() {
            HarvestMetrics::global().saves_total.inc();
        }

        let task = serde_json::Value::Object(task.clone());
        match result {
            Some(file) => info!(%stage, %task, file = %file, "Saved file"),
            None => info!(%stage, %task, file = "none", "Saved file"),
        }
    }

    fn failed(&self, stage: Stage, task: &Task, error: &PersistError) {
        let task = serde_json::Value::Object(task.clone());
        warn!(%stage, %task, error = %error, "Failed to save file");
        #[cfg(feature = "metrics")]
        HarvestMetrics::global().save_failures_total.inc();
    }

    fn unrecognized_service(&self, stage: Stage, service: Option<&str>) {
        error!(
            %stage,
            service = service.unwrap_or("<unset>"),
            "Not configured to save to {}",
            service.unwrap_or("<unset>")
        );
        #[cfg(feature = "metrics")]
        HarvestMetrics::global().unrecognized_service_total.inc();
    }

    fn object_store_response(&self, bucket: &str, key: &str, status: u16) {
        if (200..300).contains(&status) {
            debug!(bucket, key, status, "Object store upload response");
        } else {
            info!(bucket, key, status, "Object store upload response");
            #[cfg(feature = "metrics")]
            HarvestMetrics::global().object_store_non_success_total.inc();
        }
    }
}

/// One recorded sink event
#[derive(Debug, Clone, PartialEq)]
pub enum SaveEvent {
    Saved {
        stage: Stage,
        task: Task,
        result: Option<SaveResult>,
    },
    Failed {
        stage: Stage,
        task: Task,
        error: String,
    },
    UnrecognizedService {
        stage: Stage,
        service: Option<String>,
    },
    ObjectStoreResponse {
        bucket: String,
        key: String,
        status: u16,
    },
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SaveEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<SaveEvent> {
        self.lock().clone()
    }

    /// Status codes of object-store responses outside 2xx
    pub fn non_success_statuses(&self) -> Vec<u16> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SaveEvent::ObjectStoreResponse { status, .. } if !(200..300).contains(status) => {
                    Some(*status)
                }
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SaveEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SaveEvent>> {
        // a panicking recorder thread must not hide the events of the others
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SaveEventSink for RecordingSink {
    fn saved(&self, stage: Stage, task: &Task, result: Option<&SaveResult>) {
        self.push(SaveEvent::Saved {
            stage,
            task: task.clone(),
            result: result.cloned(),
        });
    }

    fn failed(&self, stage: Stage, task: &Task, error: &PersistError) {
        self.push(SaveEvent::Failed {
            stage,
            task: task.clone(),
            error: error.to_string(),
        });
    }

    fn unrecognized_service(&self, stage: Stage, service: Option<&str>) {
        self.push(SaveEvent::UnrecognizedService {
            stage,
            service: service.map(str::to_string),
        });
    }

    fn object_store_response(&self, bucket: &str, key: &str, status: u16) {
        self.push(SaveEvent::ObjectStoreResponse {
            bucket: bucket.to_string(),
            key: key.to_string(),
            status,
        });
    }
}

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<HarvestMetrics> = OnceLock::new();

/// Metrics collected for persistence calls
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct HarvestMetrics {
    pub saves_total: IntCounter,
    pub save_failures_total: IntCounter,
    pub unrecognized_service_total: IntCounter,
    pub object_store_non_success_total: IntCounter,
    pub payload_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl HarvestMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(|e| {
                PersistError::storage(format!("Failed to create {name} metric: {e}"))
            })?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| PersistError::storage(format!("Failed to register {name}: {e}")))?;
            Ok(counter)
        };

        let saves_total = counter("harvest_saves_total", "Artifacts written by harvest")?;
        let save_failures_total =
            counter("harvest_save_failures_total", "Save calls that failed")?;
        let unrecognized_service_total = counter(
            "harvest_unrecognized_service_total",
            "Save calls skipped because the service had no backend",
        )?;
        let object_store_non_success_total = counter(
            "harvest_object_store_non_success_total",
            "Object store puts answered with a non-2xx status",
        )?;

        let payload_size_bytes = Histogram::with_opts(prometheus::HistogramOpts::new(
            "harvest_payload_size_bytes",
            "Size of saved payloads in bytes",
        ))
        .map_err(|e| {
            PersistError::storage(format!("Failed to create payload_size_bytes metric: {e}"))
        })?;
        registry
            .register(Box::new(payload_size_bytes.clone()))
            .map_err(|e| {
                PersistError::storage(format!("Failed to register payload_size_bytes: {e}"))
            })?;

        Ok(Self {
            saves_total,
            save_failures_total,
            unrecognized_service_total,
            object_store_non_success_total,
            payload_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> &'static HarvestMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize harvest metrics"))
    }

    pub fn record_payload_size(&self, size_bytes: usize) {
        self.payload_size_bytes.observe(size_bytes as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| PersistError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| PersistError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Install the global tracing subscriber
///
/// Honors `RUST_LOG`, falling back to `default_directive` (for example
/// `info` or `harvest_core=debug`). With `json` set, events are written as
/// one JSON object per line. Call once from the process entry point.
pub fn init_observability(default_directive: &str, json: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| {
        PersistError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    #[cfg(feature = "metrics")]
    HarvestMetrics::global();

    Ok(())
}
