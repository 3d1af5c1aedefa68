/*!
# Harvest Core

Artifact persistence for download and extraction stages of scraping
pipelines.

Every artifact a stage produces (a fetched page, a file of extracted records)
is written through one call that:

- Resolves the destination filename from the stage's `{stage}_FILE_TEMPLATE`
- Picks the backend named by `{stage}_SAVE_DATA_SERVICE` (local disk or S3)
- Normalizes object metadata to strings
- Reports where the artifact landed

## Architecture

Backends are adapters behind the [`StorageBackend`] port, looked up by
service name in a [`BackendRegistry`]. The [`PersistenceCoordinator`] holds
no per-call state and reports every outcome to an injected
[`SaveEventSink`].

## Usage

```rust
use std::sync::Arc;
use harvest_core::{BackendRegistry, Config, Context, PersistenceCoordinator, RawPayload, SaveOptions};

let dir = std::env::temp_dir().join("harvest-lib-doc");
let config = Config::new()
    .with("downloader_SAVE_DATA_SERVICE", "local")
    .with("downloader_FILE_TEMPLATE", format!("{}/{{site}}/{{id}}.html", dir.display()));

let task = serde_json::json!({"site": "shop", "id": 1}).as_object().cloned().unwrap();
let ctx = Context::download(task, Arc::new(config));

let coordinator = PersistenceCoordinator::new(BackendRegistry::with_local());
let saved = coordinator.save(&RawPayload::text("<html/>"), "text/html", &ctx, &SaveOptions::new())?;
println!("{}", saved.unwrap());
# Ok::<(), harvest_core::PersistError>(())
```
*/

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod metadata;
pub mod observability;
pub mod payload;
pub mod pipeline;
pub mod storage;
pub mod template;

#[cfg(test)]
mod metadata_tests;

pub use config::Config;
pub use context::{Context, DownloadContext, DownloadManifest, ExtractionContext, Stage, Task};
pub use coordinator::{PersistenceCoordinator, SaveOptions, SavePolicy, DEFAULT_CONTENT_TYPE};
pub use error::{PersistError, Result};
pub use metadata::{normalize, Metadata, NormalizedMetadata};
pub use observability::{init_observability, RecordingSink, SaveEvent, SaveEventSink, TracingSink};
pub use payload::RawPayload;
pub use pipeline::{Dispatch, Download, Downloaded, Extract, ExtractorOutput, Pipeline, RunSummary, SaveAs};
pub use storage::{BackendRegistry, LocalFileStorage, ObjectStoreBackend, ObjectStoreClient, SaveResult, StorageBackend};
pub use template::{resolve_filename, Template, TemplateValues, TemplateVariables};

#[cfg(feature = "s3")]
pub use storage::S3ObjectClient;
#[cfg(feature = "metrics")]
pub use observability::HarvestMetrics;
