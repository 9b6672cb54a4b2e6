//! JSON ETL Pipeline
//!
//! Pulls users and posts from a REST API, normalizes them into Parquet
//! snapshots, loads them into SQLite and writes analytics reports.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use json_etl_pipeline::snapshot::ensure_dir;
use json_etl_pipeline::{logging, Pipeline, PipelineConfig, PipelineRun, StageReport};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "json-etl-pipeline")]
#[command(about = "Extract, transform, load and analyze JSON data from a REST API", long_about = None)]
struct Args {
    /// Stage to run: extract, transform, load, analytics or full
    #[arg(short, long, default_value = "full")]
    stage: String,

    /// Path to the configuration YAML file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base URL of the upstream API
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Path to the SQLite database
    #[arg(long, value_name = "FILE")]
    db_path: Option<PathBuf>,

    /// Root directory of the raw and processed snapshots
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Directory for analytics reports
    #[arg(long, value_name = "DIR")]
    reports_dir: Option<PathBuf>,

    /// Partition date (format: YYYY-MM-DD), defaults to today
    #[arg(short, long, value_name = "DATE")]
    date: Option<String>,

    /// Log filter, e.g. "debug" or "json_etl_pipeline=trace"
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Create the directory structure and exit
    #[arg(long)]
    setup: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Execution error: {:#}", e);
            std::process::exit(1);
        }
    };

    let guard = match logging::init(&config.logging, args.log_level.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Execution error: {:#}", e);
            std::process::exit(1);
        }
    };

    let code = match run(&args, config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Execution error: {:#}", e);
            eprintln!("Execution error: {:#}", e);
            1
        }
    };

    // Flush the log file before exiting
    drop(guard);
    std::process::exit(code);
}

/// Config file (if any) with CLI overrides applied
fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path).context("Failed to load configuration")?,
        None => PipelineConfig::default(),
    };

    if let Some(api_url) = &args.api_url {
        config.api.base_url = api_url.clone();
    }
    if let Some(db_path) = &args.db_path {
        config.storage.db_path = db_path.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(reports_dir) = &args.reports_dir {
        config.storage.reports_dir = reports_dir.clone();
    }

    Ok(config)
}

async fn run(args: &Args, config: PipelineConfig) -> Result<()> {
    if args.setup {
        return setup(&config);
    }

    let mut pipeline = Pipeline::new(config).context("Failed to create pipeline")?;
    if let Some(date) = &args.date {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .context(format!("Failed to parse date: {}", date))?;
        pipeline = pipeline.with_date(date);
    }
    info!("Processing date: {}", pipeline.date());

    if args.stage == "full" {
        match pipeline.run_full().await {
            Ok(run) => print_run(&run),
            Err(failure) => {
                for report in &failure.run.stages {
                    print_stage(report);
                }
                if let Some(stage) = failure.run.failed_stage {
                    eprintln!(
                        "Pipeline failed at {} stage after {:.2} seconds",
                        stage, failure.run.duration_seconds
                    );
                }
                return Err(failure.into());
            }
        }
    } else {
        let report = pipeline.run_stage_named(&args.stage).await?;
        println!("Stage '{}' completed successfully!", report.stage());
        print_stage(&report);
    }

    Ok(())
}

fn setup(config: &PipelineConfig) -> Result<()> {
    for dir in config.skeleton_dirs() {
        ensure_dir(&dir)?;
        println!("Created directory: {}", dir.display());
    }
    println!("Project structure ready");
    Ok(())
}

fn print_run(run: &PipelineRun) {
    println!("Pipeline completed successfully!");
    println!("Duration: {:.2} seconds", run.duration_seconds);
    for report in &run.stages {
        print_stage(report);
    }
}

fn print_stage(report: &StageReport) {
    match report {
        StageReport::Extract(summary) => {
            for entity in &summary.entities {
                println!("  extract   {:<6} {} records", entity.kind, entity.count);
            }
        }
        StageReport::Transform(summary) => {
            for entity in &summary.entities {
                println!(
                    "  transform {:<6} {} records, {} columns",
                    entity.kind,
                    entity.count,
                    entity.columns.len()
                );
            }
        }
        StageReport::Load(load) => {
            for table in &load.tables {
                match &table.error {
                    Some(error) => println!("  load      {:<6} skipped: {}", table.table, error),
                    None => println!("  load      {:<6} {} rows", table.table, table.count),
                }
            }
            println!("  load      total  {} rows", load.total_records());
        }
        StageReport::Analytics(manifest) => {
            println!("  analytics queries: {}", manifest.queries_executed.join(", "));
            println!("  analytics JSON report: {}", manifest.json_report.display());
            for csv in &manifest.csv_files {
                println!("  analytics CSV: {}", csv.display());
            }
        }
    }
}
