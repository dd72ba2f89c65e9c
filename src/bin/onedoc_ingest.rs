use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use std::time::Instant;

use onedoc_rs::config::{ConfigOverrides, IngestConfig, PipelineOverrides, StoreOverrides};
use onedoc_rs::persistence::{PersistentOpenOptions, RocksStore};
use onedoc_rs::{DocumentStore, IngestContext, IngestPipeline, LegacyRecord, MemoryStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    println!(
        r#"onedoc_ingest - ingest legacy telemetry records as one document per monitor point per day

USAGE:
    onedoc_ingest [OPTIONS]

OPTIONS:
    -c, --config <FILE>      Path to TOML config file
    -d, --data-dir <DIR>     RocksDB data directory
    -w, --workers <N>        Number of worker threads
    -i, --input <FILE>       JSON-lines input (default: stdin)
        --memory             Keep documents in memory (dry run)
        --no-preallocate     Skip skeleton preallocation
    -h, --help               Print help

ENVIRONMENT:
    ONEDOC_CONFIG                 Config file path
    ONEDOC_STORE__DATA_DIR        Data directory
    ONEDOC_PIPELINE__WORKERS      Number of worker threads
    RUST_LOG                      Log filter (default: info)
"#
    );
}

fn open_store(config: &IngestConfig, in_memory: bool) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.store.data_dir.as_ref() {
        Some(dir) if !in_memory => {
            info!(data_dir = %dir.display(), "opening document store");
            let options = PersistentOpenOptions::from(&config.store);
            Ok(Arc::new(RocksStore::open_with_options(dir, options)?))
        }
        _ => {
            info!("using in-memory document store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    if let Some(dir) = parse_arg("--data-dir").or_else(|| parse_arg("-d")) {
        overrides.store = Some(StoreOverrides {
            data_dir: Some(dir.into()),
            ..StoreOverrides::default()
        });
    }
    let mut pipeline_overrides = PipelineOverrides::default();
    if let Some(workers) = parse_arg("--workers").or_else(|| parse_arg("-w")) {
        pipeline_overrides.workers = Some(workers.parse()?);
    }
    if has_flag("--no-preallocate") {
        pipeline_overrides.preallocate = Some(false);
    }
    if pipeline_overrides.workers.is_some() || pipeline_overrides.preallocate.is_some() {
        overrides.pipeline = Some(pipeline_overrides);
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("ONEDOC_CONFIG").ok());
    let config = IngestConfig::load(config_path.as_deref(), overrides)?;

    let store = open_store(&config, has_flag("--memory"))?;
    let context = Arc::new(IngestContext::from_config(store, &config.pipeline));
    let pipeline = IngestPipeline::from_config(Arc::clone(&context), &config.pipeline)?;

    let input: Box<dyn BufRead> = match parse_arg("--input").or_else(|| parse_arg("-i")) {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin().lock())),
    };

    let started = Instant::now();
    let mut submitted = 0u64;
    let mut malformed = 0u64;
    for (line_no, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LegacyRecord>(&line) {
            Ok(record) => {
                pipeline.submit(record)?;
                submitted += 1;
            }
            Err(err) => {
                malformed += 1;
                warn!(line = line_no + 1, error = %err, "unparsable input line");
            }
        }
    }

    let summary = pipeline.finish();
    let elapsed = started.elapsed();
    println!("records submitted:   {submitted}");
    println!("malformed lines:     {malformed}");
    println!("leaf updates:        {}", summary.stats.updates);
    println!("preallocations:      {}", summary.stats.preallocations);
    println!("errors:              {}", summary.stats.errors);
    println!("partitions:          {}", context.router().partition_count());
    println!("elapsed:             {:.2}s", elapsed.as_secs_f64());
    Ok(())
}
