/*!
Benchmarks for filename resolution and local saves.
*/

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use harvest_core::{
    resolve_filename, BackendRegistry, Config, Context, PersistenceCoordinator, RawPayload,
    SaveOptions, Template, TemplateValues,
};
use rayon::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn task(fields: usize) -> harvest_core::Task {
    (0..fields)
        .map(|i| (format!("field_{i}"), serde_json::json!(format!("value-{i}"))))
        .collect()
}

fn template_with(placeholders: usize) -> String {
    (0..placeholders)
        .map(|i| format!("{{field_{i}}}"))
        .collect::<Vec<_>>()
        .join("/")
        + "_{date_downloaded}.html"
}

fn context(template: &str, fields: usize) -> Context {
    let config = Config::new()
        .with("downloader_FILE_TEMPLATE", template)
        .with("downloader_SAVE_DATA_SERVICE", "local");
    Context::download_at(
        task(fields),
        Arc::new(config),
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    )
}

fn bench_template_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_parse");

    for placeholders in [1, 8, 32] {
        let source = template_with(placeholders);
        group.bench_with_input(
            BenchmarkId::from_parameter(placeholders),
            &source,
            |b, source| b.iter(|| Template::parse(black_box(source)).unwrap()),
        );
    }

    group.finish();
}

fn bench_resolve_filename(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_filename");

    for fields in [4, 16, 64] {
        let ctx = context(&template_with(4), fields);
        let overrides = TemplateValues::new();
        group.bench_with_input(BenchmarkId::from_parameter(fields), &ctx, |b, ctx| {
            b.iter(|| resolve_filename(black_box(ctx), &overrides).unwrap())
        });
    }

    group.finish();
}

fn bench_local_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_save");
    let temp_dir = TempDir::new().unwrap();
    let template = format!("{}/{{field_0}}/{{page}}.html", temp_dir.path().display());
    let ctx = context(&template, 1);
    let coordinator = PersistenceCoordinator::new(BackendRegistry::with_local());

    for size_kb in [1usize, 64, 1024] {
        let payload = RawPayload::text("x".repeat(size_kb * 1024));
        group.throughput(Throughput::Bytes((size_kb * 1024) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size_kb), &payload, |b, payload| {
            b.iter(|| {
                let options = SaveOptions::new().template_value("page", size_kb);
                coordinator
                    .save(black_box(payload), "text/html", &ctx, &options)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_parallel_saves(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let template = format!("{}/{{field_0}}/{{page}}.html", temp_dir.path().display());
    let ctx = context(&template, 1);
    let coordinator = PersistenceCoordinator::new(BackendRegistry::with_local());
    let payload = RawPayload::text("<html>".repeat(512));

    c.bench_function("parallel_saves_64", |b| {
        b.iter(|| {
            (0..64).into_par_iter().for_each(|page| {
                let options = SaveOptions::new().template_value("page", page);
                coordinator.save(&payload, "text/html", &ctx, &options).unwrap();
            })
        })
    });
}

criterion_group!(
    benches,
    bench_template_parse,
    bench_resolve_filename,
    bench_local_save,
    bench_parallel_saves
);
criterion_main!(benches);
