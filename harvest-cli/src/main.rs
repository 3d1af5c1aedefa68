/*!
Harvest CLI - command-line interface for harvest artifact persistence.

Resolves filenames, saves files through the configured backend and inspects
the effective configuration of a stage.
*/

use anyhow::{anyhow, bail, Context as _};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use harvest_core::{
    init_observability, BackendRegistry, Config, Context, DownloadManifest, HarvestMetrics,
    Metadata, PersistenceCoordinator, RawPayload, SaveOptions, SavePolicy, Stage, Task,
    TemplateValues, DEFAULT_CONTENT_TYPE,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::info;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Save scraped artifacts where the pipeline configuration says")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// JSON configuration file (flat or nested per stage)
    #[arg(short, long, global = true, env = "HARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Custom S3-compatible endpoint
    #[arg(long, global = true, env = "HARVEST_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the filename a stage would save to
    Render {
        #[command(flatten)]
        target: Target,
    },
    /// Save a file through the configured backend
    Save {
        /// File to save
        file: PathBuf,

        #[command(flatten)]
        target: Target,

        /// Content type sent to object stores
        #[arg(long, default_value = DEFAULT_CONTENT_TYPE)]
        content_type: String,

        /// Treat the file as binary instead of UTF-8 text
        #[arg(long)]
        binary: bool,

        /// Explicit destination filename, skipping the template
        #[arg(long)]
        filename: Option<String>,

        /// Object metadata as key=value (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,

        /// Destination override: a service name or s3://bucket
        #[arg(long)]
        dest: Option<String>,

        /// Fail on unknown services and non-success object-store statuses
        #[arg(long)]
        strict: bool,
    },
    /// Show the effective configuration and validate a stage
    Config {
        /// Stage to validate
        #[arg(long)]
        stage: Option<Stage>,
    },
}

#[derive(clap::Args)]
struct Target {
    /// Stage whose settings apply (downloader or extractor)
    #[arg(long, default_value = "downloader")]
    stage: Stage,

    /// Task parameters as a JSON object
    #[arg(long, default_value = "{}")]
    task: String,

    /// Extra template variables as key=value (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    values: Vec<String>,

    /// Download time for extractor contexts (RFC 3339, defaults to now)
    #[arg(long)]
    downloaded_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "debug" } else { "info" };
    init_observability(directive, cli.json_logs)?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Render { ref target } => render(&config, target)?,
        Commands::Save {
            ref file,
            ref target,
            ref content_type,
            binary,
            ref filename,
            ref metadata,
            ref dest,
            strict,
        } => {
            let mut config = config;
            if let Some(dest) = dest {
                config.set_destination(target.stage, dest)?;
            }
            let request = SaveRequest {
                file,
                target,
                content_type,
                binary,
                filename: filename.as_deref(),
                metadata,
                strict,
            };
            save(config, &request, cli.s3_endpoint.clone())?
        }
        Commands::Config { stage } => show_config(&config, stage)?,
    }

    if cli.metrics {
        print!("{}", HarvestMetrics::global().gather_metrics()?);
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, anyhow::Error> {
    let config = match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::new(),
    };
    Ok(config.with_env_overrides())
}

fn render(config: &Config, target: &Target) -> Result<(), anyhow::Error> {
    let ctx = build_context(config.clone(), target)?;
    let values = parse_assignments(&target.values)?;
    let filename = harvest_core::resolve_filename(&ctx, &values)?;
    println!("{filename}");
    Ok(())
}

struct SaveRequest<'a> {
    file: &'a PathBuf,
    target: &'a Target,
    content_type: &'a str,
    binary: bool,
    filename: Option<&'a str>,
    metadata: &'a [String],
    strict: bool,
}

fn save(
    config: Config,
    request: &SaveRequest<'_>,
    s3_endpoint: Option<String>,
) -> Result<(), anyhow::Error> {
    let stage = request.target.stage;
    let registry = build_registry(&config, stage, s3_endpoint, request.strict)?;
    let policy = SavePolicy {
        strict_service_selection: request.strict,
    };
    let coordinator = PersistenceCoordinator::new(registry).with_policy(policy);

    let payload = read_payload(request.file, request.binary)?;
    let ctx = build_context(config, request.target)?;

    let mut options = SaveOptions::new().template_values(parse_assignments(&request.target.values)?);
    if let Some(filename) = request.filename {
        options = options.filename(filename);
    }
    if !request.metadata.is_empty() {
        let metadata: Metadata = parse_assignments(request.metadata)?.into_iter().collect();
        options = options.metadata(metadata);
    }

    match coordinator.save(&payload, request.content_type, &ctx, &options)? {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        None => println!(
            "Nothing saved: no backend for service {:?}",
            ctx.config().save_service(stage).unwrap_or("<unset>")
        ),
    }
    Ok(())
}

fn show_config(config: &Config, stage: Option<Stage>) -> Result<(), anyhow::Error> {
    let rows: Vec<ConfigRow> = config
        .iter()
        .filter(|(key, _)| stage.map_or(true, |s| key.starts_with(&format!("{s}_"))))
        .map(|(key, value)| ConfigRow {
            key: key.to_string(),
            value: value.to_string(),
        })
        .collect();

    if rows.is_empty() {
        println!("No configuration keys set");
    } else {
        println!("{}", Table::new(rows));
    }

    if let Some(stage) = stage {
        config.validate(stage)?;
        println!("✓ {stage} configuration is valid");
    }
    Ok(())
}

fn build_registry(
    config: &Config,
    stage: Stage,
    s3_endpoint: Option<String>,
    strict: bool,
) -> Result<BackendRegistry, anyhow::Error> {
    #[cfg_attr(not(feature = "s3"), allow(unused_mut))]
    let mut registry = BackendRegistry::with_local();

    if config.save_service(stage) == Some("s3") {
        #[cfg(feature = "s3")]
        {
            use harvest_core::{ObjectStoreBackend, S3ObjectClient};
            use tracing::debug;
            let client = S3ObjectClient::with_endpoint(s3_endpoint)?;
            registry.register("s3", ObjectStoreBackend::new(client).strict_status(strict));
            debug!("Registered s3 backend");
        }
        #[cfg(not(feature = "s3"))]
        {
            let _ = (s3_endpoint, strict);
            bail!("S3 support not enabled");
        }
    }

    Ok(registry)
}

fn build_context(config: Config, target: &Target) -> Result<Context, anyhow::Error> {
    let task = parse_task(&target.task)?;
    let config = Arc::new(config);

    let ctx = match target.stage {
        Stage::Downloader => match target.downloaded_at {
            Some(at) => Context::download_at(task, config, at),
            None => Context::download(task, config),
        },
        Stage::Extractor => {
            let manifest = DownloadManifest {
                task,
                time_downloaded: target.downloaded_at.unwrap_or_else(Utc::now),
                source_files: Vec::new(),
            };
            Context::extraction(&manifest, config)
        }
    };
    info!(stage = %ctx.stage(), "Built stage context");
    Ok(ctx)
}

fn read_payload(path: &PathBuf, binary: bool) -> Result<RawPayload, anyhow::Error> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if binary {
        return Ok(RawPayload::binary(bytes));
    }
    let text = String::from_utf8(bytes)
        .map_err(|_| anyhow!("{} is not UTF-8 text; pass --binary", path.display()))?;
    Ok(RawPayload::text(text))
}

fn parse_task(json: &str) -> Result<Task, anyhow::Error> {
    match serde_json::from_str::<Value>(json).context("--task must be valid JSON")? {
        Value::Object(task) => Ok(task),
        other => bail!("--task must be a JSON object, got {other}"),
    }
}

/// Parse `key=value` pairs; values that are valid JSON keep their type
fn parse_assignments(pairs: &[String]) -> Result<TemplateValues, anyhow::Error> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected KEY=VALUE, got {pair:?}"))?;
            if key.is_empty() {
                bail!("Empty key in {pair:?}");
            }
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignments_keeps_json_types() {
        let values = parse_assignments(&[
            "page=3".to_string(),
            "name=shoes".to_string(),
            "flag=true".to_string(),
            "expr=a=b".to_string(),
        ])
        .unwrap();

        assert_eq!(values["page"], json!(3));
        assert_eq!(values["name"], json!("shoes"));
        assert_eq!(values["flag"], json!(true));
        assert_eq!(values["expr"], json!("a=b"));
    }

    #[test]
    fn test_parse_assignments_rejects_malformed() {
        assert!(parse_assignments(&["novalue".to_string()]).is_err());
        assert!(parse_assignments(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_parse_task_requires_object() {
        assert_eq!(parse_task(r#"{"id": 1}"#).unwrap()["id"], json!(1));
        assert!(parse_task("[1, 2]").is_err());
        assert!(parse_task("nope").is_err());
    }

    #[test]
    fn test_render_context_for_extractor() {
        let target = Target {
            stage: Stage::Extractor,
            task: r#"{"id": 5}"#.to_string(),
            values: Vec::new(),
            downloaded_at: Some("2024-04-01T10:00:00Z".parse().unwrap()),
        };
        let config = Config::new().with(
            "extractor_FILE_TEMPLATE",
            "{date_downloaded}/{id}-{name}.json",
        );
        let ctx = build_context(config, &target).unwrap();
        let mut values = TemplateValues::new();
        values.insert("name".to_string(), json!("titles"));

        assert_eq!(
            harvest_core::resolve_filename(&ctx, &values).unwrap(),
            "2024-04-01/5-titles.json"
        );
    }

    #[test]
    fn test_read_payload_text_and_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let text_path = dir.path().join("page.html");
        let bin_path = dir.path().join("image.bin");
        std::fs::write(&text_path, "<p>hi</p>").unwrap();
        std::fs::write(&bin_path, [0xffu8, 0xfe, 0x00]).unwrap();

        assert_eq!(
            read_payload(&text_path, false).unwrap(),
            RawPayload::text("<p>hi</p>")
        );
        assert!(read_payload(&bin_path, false).is_err());
        assert_eq!(
            read_payload(&bin_path, true).unwrap(),
            RawPayload::binary(vec![0xffu8, 0xfe, 0x00])
        );
    }

    #[test]
    fn test_cli_parses_save_command() {
        let cli = Cli::try_parse_from([
            "harvest",
            "save",
            "page.html",
            "--stage",
            "extractor",
            "--set",
            "page=2",
            "--meta",
            "n=5",
            "--dest",
            "s3://bucket",
        ])
        .unwrap();

        match cli.command {
            Commands::Save {
                target, metadata, dest, ..
            } => {
                assert_eq!(target.stage, Stage::Extractor);
                assert_eq!(target.values, vec!["page=2".to_string()]);
                assert_eq!(metadata, vec!["n=5".to_string()]);
                assert_eq!(dest.as_deref(), Some("s3://bucket"));
            }
            _ => panic!("Expected save command"),
        }
    }
}
