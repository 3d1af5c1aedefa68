/*!
Dispatch, download and extract stage runner.

The runner owns none of the scraping logic. Callers plug in a [`Dispatch`]
that produces tasks, a [`Download`] that fetches sources for a task and an
optional [`Extract`] that turns each source into records. Every artifact a
stage produces goes through the [`PersistenceCoordinator`], so filenames and
destinations are driven entirely by configuration.
*/

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::context::{Context, DownloadManifest, Task};
use crate::coordinator::{PersistenceCoordinator, SaveOptions};
use crate::payload::RawPayload;
use crate::storage::SaveResult;
use crate::template::TemplateValues;
use crate::{PersistError, Result};

/// Content type of serialized extractor output
pub const EXTRACTED_CONTENT_TYPE: &str = "application/json";

/// Produces the tasks of one run
pub trait Dispatch: Send + Sync {
    fn create_tasks(&self) -> Result<Vec<Task>>;
}

/// Fetches the sources for one task
pub trait Download: Send + Sync {
    fn download(&self, ctx: &Context) -> Result<Vec<Downloaded>>;
}

/// Turns one downloaded source into extractor outputs
pub trait Extract: Send + Sync {
    fn extract(
        &self,
        ctx: &Context,
        source: &RawPayload,
        source_idx: usize,
    ) -> Result<Vec<ExtractorOutput>>;
}

/// A fetched source ready to be saved
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub payload: RawPayload,
    pub content_type: String,
    /// Extra template variables for this source's filename
    pub template_values: TemplateValues,
}

impl Downloaded {
    pub fn new(payload: impl Into<RawPayload>, content_type: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            content_type: content_type.into(),
            template_values: TemplateValues::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template_values.insert(name.into(), value.into());
        self
    }
}

/// Serialization of extracted records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveAs {
    /// One JSON array
    #[default]
    Json,
    /// One JSON document per line
    JsonLines,
}

/// Records produced by a named extractor
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorOutput {
    /// Exposed to templates as `extractor_name`
    pub name: String,
    pub records: Vec<Value>,
    pub save_as: SaveAs,
    /// Extra template variables for this output's filename
    pub file_name_vars: TemplateValues,
}

impl ExtractorOutput {
    pub fn new(name: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            records,
            save_as: SaveAs::default(),
            file_name_vars: TemplateValues::new(),
        }
    }

    pub fn save_as(mut self, save_as: SaveAs) -> Self {
        self.save_as = save_as;
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.file_name_vars.insert(name.into(), value.into());
        self
    }

    /// Serialize the records as a text payload
    pub fn to_payload(&self) -> Result<RawPayload> {
        let body = match self.save_as {
            SaveAs::Json => serde_json::to_string(&self.records)?,
            SaveAs::JsonLines => {
                let mut body = String::new();
                for record in &self.records {
                    body.push_str(&serde_json::to_string(record)?);
                    body.push('\n');
                }
                body
            }
        };
        Ok(RawPayload::Text(body))
    }

    fn template_values(&self, source_idx: usize) -> TemplateValues {
        let mut values = self.file_name_vars.clone();
        values.insert("extractor_name".to_string(), Value::from(self.name.as_str()));
        values.insert("source_idx".to_string(), Value::from(source_idx));
        values
    }
}

/// Outcome of one successful task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub task: Task,
    pub manifest: DownloadManifest,
    pub extracted: Vec<SaveResult>,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reports: Vec<TaskReport>,
    /// Tasks that ended in an error
    pub failed: usize,
}

/// Runs dispatch, then download and extraction for each task in parallel
pub struct Pipeline {
    config: Arc<Config>,
    coordinator: PersistenceCoordinator,
    dispatcher: Box<dyn Dispatch>,
    downloader: Box<dyn Download>,
    extractor: Option<Box<dyn Extract>>,
}

impl Pipeline {
    pub fn new<D, L>(
        config: Arc<Config>,
        coordinator: PersistenceCoordinator,
        dispatcher: D,
        downloader: L,
    ) -> Self
    where
        D: Dispatch + 'static,
        L: Download + 'static,
    {
        Self {
            config,
            coordinator,
            dispatcher: Box::new(dispatcher),
            downloader: Box::new(downloader),
            extractor: None,
        }
    }

    pub fn with_extractor<E: Extract + 'static>(mut self, extractor: E) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// Run every dispatched task
    ///
    /// A failing task is logged and counted; the other tasks keep running.
    /// Only a dispatch failure aborts the run.
    pub fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let tasks = self
            .dispatcher
            .create_tasks()
            .map_err(|e| PersistError::stage(format!("Dispatch failed: {e}")))?;
        info!(%run_id, tasks = tasks.len(), "Dispatched tasks");

        let outcomes: Vec<Result<TaskReport>> = tasks
            .into_par_iter()
            .map(|task| self.run_task(task))
            .collect();

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(%run_id, error = %e, "Task failed");
                    failed += 1;
                }
            }
        }

        info!(%run_id, succeeded = reports.len(), failed, "Run finished");
        Ok(RunSummary {
            run_id,
            reports,
            failed,
        })
    }

    /// Download, save, extract and save for a single task
    pub fn run_task(&self, task: Task) -> Result<TaskReport> {
        let download_ctx = Context::download(task.clone(), self.config.clone());
        let sources = self.downloader.download(&download_ctx)?;

        let mut source_files = Vec::with_capacity(sources.len());
        for source in &sources {
            let options = SaveOptions::new().template_values(source.template_values.clone());
            let saved = self.coordinator.save(
                &source.payload,
                &source.content_type,
                &download_ctx,
                &options,
            )?;
            source_files.extend(saved);
        }
        let manifest = DownloadManifest::for_context(&download_ctx, source_files);

        let mut extracted = Vec::new();
        if let Some(extractor) = &self.extractor {
            let extract_ctx = Context::extraction(&manifest, self.config.clone());
            for (source_idx, source) in sources.iter().enumerate() {
                for output in extractor.extract(&extract_ctx, &source.payload, source_idx)? {
                    let options =
                        SaveOptions::new().template_values(output.template_values(source_idx));
                    let saved = self.coordinator.save(
                        &output.to_payload()?,
                        EXTRACTED_CONTENT_TYPE,
                        &extract_ctx,
                        &options,
                    )?;
                    extracted.extend(saved);
                }
            }
        }

        Ok(TaskReport {
            task,
            manifest,
            extracted,
        })
    }
}
