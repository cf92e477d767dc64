// src/pipeline.rs - Pairs → dedupe → neighbour graph → predictions
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::MultiProgress;
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::clustering::consensus::{predict_from_neighbours, ConsensusParams};
use crate::clustering::neighbour_graph::NeighbourGraph;
use crate::config::NeighbourConfig;
use crate::duplicates::{collapse_repeated_ids, resolve_close_pairs};
use crate::matching::pairs::{
    find_all_pairs, find_all_pairs_concurrently, PairSearchParams, PairSearchResult,
};
use crate::matching::suburbs::build_comparison_windows;
use crate::models::{
    PairEdge, PipelineStage, PipelineStats, Predictions, SuburbAdjacency, TreePrediction, TreeRecord,
};
use crate::utils::progress_bars::logging::{log_pipeline_start, StageLogger};
use crate::utils::progress_bars::progress_config::add_bar;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Search comparison windows one after another even if
    /// `max_parallel_windows` allows more.
    pub sequential: bool,
    pub description: Option<String>,
    /// Per-phase sub-progress bars below the main bar.
    pub detailed_progress: bool,
    /// Steady tick of the main bar's spinner.
    pub refresh_interval: Option<Duration>,
}

pub struct PipelineOutput {
    /// Deduplicated records, in input order.
    pub records: Vec<TreeRecord>,
    pub close_pairs: Vec<PairEdge>,
    pub neighbour_pairs: Vec<PairEdge>,
    pub graph: NeighbourGraph,
    pub predictions: Predictions,
    pub stats: PipelineStats,
}

impl PipelineOutput {
    /// Predictions in the line format of the predictions export.
    pub fn tree_predictions(&self) -> Vec<TreePrediction> {
        self.predictions
            .iter()
            .map(|(tree_id, attributes)| TreePrediction {
                tree_id: tree_id.clone(),
                by_radius_prediction: attributes.clone(),
            })
            .collect()
    }
}

pub async fn run_pipeline(
    records: Vec<TreeRecord>,
    adjacency: &SuburbAdjacency,
    config: &NeighbourConfig,
    options: &PipelineOptions,
    multi_progress: Option<&MultiProgress>,
) -> Result<PipelineOutput> {
    config.validate().context("Invalid neighbour configuration")?;
    let pipeline_start = Instant::now();

    let run_id = Uuid::new_v4().to_string();
    let mut stats = PipelineStats::new(
        run_id.clone(),
        Utc::now().naive_utc(),
        options.description.clone(),
    );
    stats.total_records = records.len();

    let (mut records, repeated_ids) = collapse_repeated_ids(records);

    let reference_year = i32::from(config.latest_survey_year);
    let derived = records
        .iter_mut()
        .map(|record| record.derive_age_group(reference_year))
        .filter(|changed| *changed)
        .count();
    if derived > 0 {
        info!("Derived the age group of {} trees from their sprout year", derived);
    }

    let concurrency_limit = if options.sequential {
        1
    } else {
        config.max_parallel_windows
    };
    log_pipeline_start(&run_id, records.len(), adjacency.len(), concurrency_limit);

    let main_pb = add_bar(multi_progress, 4, "");
    if let Some(pb) = &main_pb {
        if let Some(interval) = options.refresh_interval {
            pb.enable_steady_tick(interval);
        }
        pb.set_message("Phase 1: Pair finding");
    }
    let sub_progress = multi_progress.filter(|_| options.detailed_progress);

    // Phase 1: pair finding
    let phase_start = Instant::now();
    let logger = StageLogger::new(PipelineStage::PairFinding);
    logger.log_start(&format!("{} records", records.len()));

    logger.log_data_quality_issue("repeated tree ids", repeated_ids);
    stats.invalid_positions = records.iter().filter(|r| r.position().is_none()).count();
    logger.log_data_quality_issue("missing or invalid positions", stats.invalid_positions);

    let windows = build_comparison_windows(&records, adjacency);
    stats.total_comparison_windows = windows.len();
    logger.log_phase(
        "Comparison windows built",
        Some(format!("{} windows", windows.len()).as_str()),
    );

    let params = PairSearchParams::from_config(config)?;
    let windows_pb = add_bar(sub_progress, windows.len() as u64, "  ");
    let (records, pairs): (Vec<TreeRecord>, PairSearchResult) = if concurrency_limit > 1 {
        let records = Arc::new(records);
        let pairs = find_all_pairs_concurrently(
            Arc::clone(&records),
            Arc::new(windows),
            params,
            concurrency_limit,
            windows_pb.clone(),
        )
        .await
        .context("Concurrent pair search failed")?;
        let records = Arc::try_unwrap(records).unwrap_or_else(|shared| (*shared).clone());
        (records, pairs)
    } else {
        let pairs = find_all_pairs(&records, &windows, &params, windows_pb.as_ref());
        (records, pairs)
    };
    if let Some(pb) = &windows_pb {
        pb.finish_and_clear();
    }
    logger.log_data_quality_issue("anchors without a bounding box", pairs.skipped_anchors);
    logger.log_data_quality_issue("same-id candidate pairs", pairs.same_id_pairs);
    stats.total_close_pairs = pairs.close_pairs.len();
    stats.total_neighbour_pairs = pairs.neighbour_pairs.len();
    stats.pair_finding_time = phase_start.elapsed().as_secs_f64();
    logger.log_completion(&format!(
        "{} windows → {} close pairs, {} neighbour pairs",
        pairs.windows_searched, stats.total_close_pairs, stats.total_neighbour_pairs
    ));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message("Phase 2: Duplicate resolution");
    }

    // Phase 2: duplicate resolution, always single-threaded
    let phase_start = Instant::now();
    let logger = StageLogger::new(PipelineStage::DuplicateResolution);
    logger.log_start(&format!("{} close pairs", pairs.close_pairs.len()));
    let outcome = resolve_close_pairs(records, &pairs.close_pairs, config.latest_survey_year)
        .context("Duplicate resolution failed")?;
    stats.total_records_kept = outcome.records.len();
    stats.total_records_skipped = outcome.skipped_ids.len();
    stats.conflicting_duplicate_decisions = outcome.conflicting_decisions;
    stats.duplicate_resolution_time = phase_start.elapsed().as_secs_f64();
    logger.log_completion(&format!(
        "{} kept, {} skipped",
        stats.total_records_kept, stats.total_records_skipped
    ));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message("Phase 3: Neighbour graph");
    }

    // Phase 3: neighbour graph over every neighbour pair
    let phase_start = Instant::now();
    let logger = StageLogger::new(PipelineStage::NeighbourGraph);
    logger.log_start(&format!("{} neighbour pairs", pairs.neighbour_pairs.len()));
    let graph = NeighbourGraph::from_pairs(&pairs.neighbour_pairs);
    stats.neighbour_graph_time = phase_start.elapsed().as_secs_f64();
    logger.log_completion(&format!(
        "{} trees, {} edges",
        graph.tree_count(),
        graph.edge_count()
    ));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message("Phase 4: Predictions");
    }

    // Phase 4: consensus predictions for incomplete records
    let phase_start = Instant::now();
    let logger = StageLogger::new(PipelineStage::Prediction);
    logger.log_start(&format!("{} deduplicated records", outcome.records.len()));
    let predictions_pb = add_bar(sub_progress, 0, "  ");
    let (predictions, consensus_stats) = predict_from_neighbours(
        &outcome.records,
        &graph,
        ConsensusParams::from_config(config),
        predictions_pb.as_ref(),
    )
    .context("Consensus prediction failed")?;
    if let Some(pb) = &predictions_pb {
        pb.finish_and_clear();
    }
    stats.total_predicted_records = consensus_stats.predicted_trees;
    stats.genus_predictions = consensus_stats.genus_predictions;
    stats.age_group_predictions = consensus_stats.age_group_predictions;
    stats.year_sprout_predictions = consensus_stats.year_sprout_predictions;
    stats.prediction_time = phase_start.elapsed().as_secs_f64();
    logger.log_completion(&format!(
        "{} of {} candidates predicted",
        consensus_stats.predicted_trees, consensus_stats.candidates
    ));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.finish_with_message("Pipeline complete");
    }

    stats.total_processing_time = pipeline_start.elapsed().as_secs_f64();
    info!(
        "Pipeline run {} finished in {:.2}s",
        stats.run_id, stats.total_processing_time
    );

    Ok(PipelineOutput {
        records: outcome.records,
        close_pairs: pairs.close_pairs,
        neighbour_pairs: pairs.neighbour_pairs,
        graph,
        predictions,
        stats,
    })
}
