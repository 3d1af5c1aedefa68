/*!
Stage contexts handed to the persistence layer.

A context bundles the dispatched task, the shared configuration and the
timestamps captured when the stage started. The download and extraction
stages expose different timestamp variables to filename templates, so the
context is an explicit tagged union rather than a bag of optional fields.
*/

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::storage::SaveResult;
use crate::{PersistError, Result};

/// Task parameters produced by the dispatch stage and passed through unchanged
pub type Task = serde_json::Map<String, Value>;

/// Pipeline stage that owns a persistence call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Downloader,
    Extractor,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Downloader => "downloader",
            Stage::Extractor => "extractor",
        }
    }

    /// Build the stage-scoped configuration key `{stage}_{suffix}`
    pub fn key(self, suffix: &str) -> String {
        format!("{}_{}", self.as_str(), suffix)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "downloader" => Ok(Stage::Downloader),
            "extractor" => Ok(Stage::Extractor),
            other => Err(PersistError::validation(format!("Unknown stage: {other}"))),
        }
    }
}

/// Render a stage timestamp the way filename templates see it
pub fn render_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Render the calendar date of a stage timestamp
pub fn render_date(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d").to_string()
}

/// Context of a download stage invocation
#[derive(Debug, Clone)]
pub struct DownloadContext {
    task: Task,
    config: Arc<Config>,
    time_downloaded: DateTime<Utc>,
}

impl DownloadContext {
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn time_downloaded(&self) -> DateTime<Utc> {
        self.time_downloaded
    }

    pub fn date_downloaded(&self) -> NaiveDate {
        self.time_downloaded.date_naive()
    }
}

/// Context of an extraction stage invocation
///
/// Carries the download timestamp of the source it extracts from, so that
/// extracted artifacts can be filed next to their raw source.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    task: Task,
    config: Arc<Config>,
    time_extracted: DateTime<Utc>,
    time_downloaded: DateTime<Utc>,
}

impl ExtractionContext {
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn time_extracted(&self) -> DateTime<Utc> {
        self.time_extracted
    }

    pub fn date_extracted(&self) -> NaiveDate {
        self.time_extracted.date_naive()
    }

    pub fn time_downloaded(&self) -> DateTime<Utc> {
        self.time_downloaded
    }

    pub fn date_downloaded(&self) -> NaiveDate {
        self.time_downloaded.date_naive()
    }
}

/// Stage-specific bundle of task, configuration and timestamps
#[derive(Debug, Clone)]
pub enum Context {
    Download(DownloadContext),
    Extraction(ExtractionContext),
}

impl Context {
    /// Start a download stage now
    pub fn download(task: Task, config: Arc<Config>) -> Self {
        Self::download_at(task, config, Utc::now())
    }

    /// Start a download stage at a known instant
    pub fn download_at(task: Task, config: Arc<Config>, time_downloaded: DateTime<Utc>) -> Self {
        Context::Download(DownloadContext {
            task,
            config,
            time_downloaded,
        })
    }

    /// Start an extraction stage now for a finished download
    pub fn extraction(manifest: &DownloadManifest, config: Arc<Config>) -> Self {
        Self::extraction_at(manifest, config, Utc::now())
    }

    /// Start an extraction stage at a known instant
    pub fn extraction_at(
        manifest: &DownloadManifest,
        config: Arc<Config>,
        time_extracted: DateTime<Utc>,
    ) -> Self {
        Context::Extraction(ExtractionContext {
            task: manifest.task.clone(),
            config,
            time_extracted,
            time_downloaded: manifest.time_downloaded,
        })
    }

    pub fn stage(&self) -> Stage {
        match self {
            Context::Download(_) => Stage::Downloader,
            Context::Extraction(_) => Stage::Extractor,
        }
    }

    pub fn task(&self) -> &Task {
        match self {
            Context::Download(ctx) => ctx.task(),
            Context::Extraction(ctx) => ctx.task(),
        }
    }

    pub fn config(&self) -> &Config {
        match self {
            Context::Download(ctx) => ctx.config(),
            Context::Extraction(ctx) => ctx.config(),
        }
    }

    /// When the download this context belongs to started
    pub fn time_downloaded(&self) -> DateTime<Utc> {
        match self {
            Context::Download(ctx) => ctx.time_downloaded,
            Context::Extraction(ctx) => ctx.time_downloaded,
        }
    }

    /// Timestamp variables this stage contributes to filename templates
    pub fn timestamp_variables(&self) -> Vec<(&'static str, String)> {
        match self {
            Context::Download(ctx) => vec![
                ("time_downloaded", render_time(&ctx.time_downloaded)),
                ("date_downloaded", render_date(&ctx.time_downloaded)),
            ],
            Context::Extraction(ctx) => vec![
                ("time_extracted", render_time(&ctx.time_extracted)),
                ("date_extracted", render_date(&ctx.time_extracted)),
                ("time_downloaded", render_time(&ctx.time_downloaded)),
                ("date_downloaded", render_date(&ctx.time_downloaded)),
            ],
        }
    }
}

impl From<DownloadContext> for Context {
    fn from(ctx: DownloadContext) -> Self {
        Context::Download(ctx)
    }
}

impl From<ExtractionContext> for Context {
    fn from(ctx: ExtractionContext) -> Self {
        Context::Extraction(ctx)
    }
}

/// What a download stage hands over to extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadManifest {
    pub task: Task,
    pub time_downloaded: DateTime<Utc>,
    pub source_files: Vec<SaveResult>,
}

impl DownloadManifest {
    pub fn new(ctx: &DownloadContext, source_files: Vec<SaveResult>) -> Self {
        Self {
            task: ctx.task.clone(),
            time_downloaded: ctx.time_downloaded,
            source_files,
        }
    }

    /// Build the manifest from any stage context of the same task
    pub fn for_context(ctx: &Context, source_files: Vec<SaveResult>) -> Self {
        Self {
            task: ctx.task().clone(),
            time_downloaded: ctx.time_downloaded(),
            source_files,
        }
    }

    pub fn date_downloaded(&self) -> NaiveDate {
        self.time_downloaded.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn task() -> Task {
        json!({"id": 7, "url": "http://example.com"})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 30, 0).unwrap()
    }

    #[test]
    fn test_stage_keys_and_parsing() {
        assert_eq!(Stage::Downloader.key("FILE_TEMPLATE"), "downloader_FILE_TEMPLATE");
        assert_eq!(Stage::Extractor.to_string(), "extractor");
        assert_eq!("extractor".parse::<Stage>().unwrap(), Stage::Extractor);
        assert!("Downloader".parse::<Stage>().is_err());
    }

    #[test]
    fn test_download_context_variables() {
        let ctx = Context::download_at(task(), Arc::new(Config::new()), at(12));

        assert_eq!(ctx.stage(), Stage::Downloader);
        assert_eq!(ctx.task()["id"], json!(7));
        assert_eq!(
            ctx.timestamp_variables(),
            vec![
                ("time_downloaded", "2024-03-01T12:30:00.000000Z".to_string()),
                ("date_downloaded", "2024-03-01".to_string()),
            ]
        );
    }

    #[test]
    fn test_extraction_context_carries_download_time() {
        let download = match Context::download_at(task(), Arc::new(Config::new()), at(8)) {
            Context::Download(ctx) => ctx,
            Context::Extraction(_) => unreachable!(),
        };
        let manifest = DownloadManifest::new(&download, Vec::new());
        let ctx = Context::extraction_at(&manifest, Arc::new(Config::new()), at(9));

        assert_eq!(ctx.stage(), Stage::Extractor);
        let vars: Vec<&str> = ctx.timestamp_variables().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            vars,
            vec!["time_extracted", "date_extracted", "time_downloaded", "date_downloaded"]
        );

        if let Context::Extraction(inner) = &ctx {
            assert_eq!(inner.time_downloaded(), at(8));
            assert_eq!(inner.time_extracted(), at(9));
            assert_eq!(inner.date_extracted(), manifest.date_downloaded());
        } else {
            panic!("Expected extraction context");
        }
    }
}
