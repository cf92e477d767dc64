// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::PathBuf;

use tree_matching_lib::config::NeighbourConfig;
use tree_matching_lib::io::{read_jsonl, read_suburb_adjacency, write_json, write_jsonl};
use tree_matching_lib::models::TreeRecord;
use tree_matching_lib::pipeline::{run_pipeline, PipelineOptions};
use tree_matching_lib::utils::env::load_env;
use tree_matching_lib::utils::get_memory_usage;
use tree_matching_lib::utils::progress_bars::logging::log_pipeline_completion;
use tree_matching_lib::utils::progress_bars::progress_config::ProgressConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Merged tree records, one JSON object per line
    #[arg(long)]
    records: PathBuf,

    /// Suburb adjacency as a JSON object of suburb id → adjacent suburb ids
    #[arg(long)]
    adjacency: PathBuf,

    /// Directory receiving the result files
    #[arg(long, default_value = "out")]
    output_dir: PathBuf,

    /// Search comparison windows one at a time
    #[arg(long)]
    sequential: bool,

    /// Neighbour search radius in meters (overrides RADIUS)
    #[arg(long)]
    radius: Option<f64>,

    /// Duplicate threshold in meters (overrides MIN_TREE_DISTANCE)
    #[arg(long)]
    min_tree_distance: Option<f64>,

    /// Free-text description stored in the run summary
    #[arg(long)]
    description: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting tree neighbour pipeline");
    load_env();

    let mut config = NeighbourConfig::from_env();
    if let Some(radius) = args.radius {
        config.radius_meters = radius;
    }
    if let Some(min_tree_distance) = args.min_tree_distance {
        config.min_tree_distance_meters = min_tree_distance;
    }
    config.log_config();

    let progress_config = ProgressConfig::from_env();
    info!(
        "Progress tracking: enabled={}, detailed={}, memory={}",
        progress_config.enabled, progress_config.detailed, progress_config.show_memory
    );
    let multi_progress = progress_config.create_multi_progress();

    let records: Vec<TreeRecord> = read_jsonl(&args.records)
        .with_context(|| format!("Failed to load tree records from {}", args.records.display()))?;
    let adjacency = read_suburb_adjacency(&args.adjacency)?;
    if progress_config.should_show_memory() {
        info!("Memory usage after loading input: {} MB", get_memory_usage());
    }

    let options = PipelineOptions {
        sequential: args.sequential,
        description: args.description,
        detailed_progress: progress_config.should_show_detailed(),
        refresh_interval: progress_config
            .enabled
            .then(|| progress_config.refresh_interval()),
    };
    let output = run_pipeline(records, &adjacency, &config, &options, multi_progress.as_ref())
        .await
        .context("Tree neighbour pipeline failed")?;

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("Failed to create output directory {}", args.output_dir.display())
    })?;
    let out = |name: &str| args.output_dir.join(name);
    write_jsonl(&out("deduplicated_records.jsonl"), &output.records)?;
    write_jsonl(&out("close_pairs.jsonl"), &output.close_pairs)?;
    write_jsonl(&out("neighbour_pairs.jsonl"), &output.neighbour_pairs)?;
    write_jsonl(&out("predictions.jsonl"), &output.tree_predictions())?;
    write_json(&out("run_summary.json"), &output.stats)?;

    log_pipeline_completion(&output.stats);
    if progress_config.should_show_memory() {
        info!("Final memory usage: {} MB", get_memory_usage());
    }
    info!("Pipeline completed successfully!");
    Ok(())
}
