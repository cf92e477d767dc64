// src/utils/progress_bars/logging.rs - Logging helpers for pipeline stages
use crate::models::{PipelineStage, PipelineStats};
use log::{info, warn};
use std::time::Instant;

#[derive(Clone)]
pub struct StageLogger {
    stage_name: &'static str,
    stage_emoji: &'static str,
    start_time: Instant,
}

impl StageLogger {
    pub fn new(stage: PipelineStage) -> Self {
        let (stage_name, stage_emoji) = stage_label(stage);
        Self {
            stage_name,
            stage_emoji,
            start_time: Instant::now(),
        }
    }

    pub fn log_start(&self, details: &str) {
        info!(
            "[{}] {} 🚀 Starting {} ({})",
            self.stage_name,
            self.stage_emoji,
            self.stage_name.to_lowercase(),
            details
        );
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        let msg = if let Some(details) = details {
            format!(
                "[{}] {} 🔄 Phase: {} - {} [+{:.1}s]",
                self.stage_name, self.stage_emoji, phase, details, elapsed.as_secs_f32()
            )
        } else {
            format!(
                "[{}] {} 🔄 Phase: {} [+{:.1}s]",
                self.stage_name, self.stage_emoji, phase, elapsed.as_secs_f32()
            )
        };
        info!("{}", msg);
    }

    pub fn log_data_quality_issue(&self, issue_type: &str, count: usize) {
        if count > 0 {
            warn!(
                "[{}] {} ⚠️  Data quality: {} instances of {}",
                self.stage_name, self.stage_emoji, count, issue_type
            );
        }
    }

    pub fn log_completion(&self, summary: &str) {
        info!(
            "[{}] {} ✅ Completed in {:.2?}: {}",
            self.stage_name,
            self.stage_emoji,
            self.start_time.elapsed(),
            summary
        );
    }
}

fn stage_label(stage: PipelineStage) -> (&'static str, &'static str) {
    match stage {
        PipelineStage::PairFinding => ("PAIRS", "📍"),
        PipelineStage::DuplicateResolution => ("DEDUPE", "🧹"),
        PipelineStage::NeighbourGraph => ("GRAPH", "🕸️"),
        PipelineStage::Prediction => ("PREDICT", "🌳"),
    }
}

pub fn log_pipeline_start(run_id: &str, records: usize, suburbs: usize, concurrency_limit: usize) {
    info!("🚀 ===== TREE NEIGHBOUR PIPELINE STARTING =====");
    info!("📅 Pipeline Run ID: {}", run_id);
    info!("⚙️  Configuration:");
    info!("   • {} tree records, {} suburbs with adjacency", records, suburbs);
    if concurrency_limit > 1 {
        info!("   • Pair finding: up to {} windows in parallel", concurrency_limit);
    } else {
        info!("   • Pair finding: sequential");
    }
    info!("================================================");
}

pub fn log_pipeline_completion(stats: &PipelineStats) {
    info!("🎉 ===== TREE NEIGHBOUR PIPELINE COMPLETED =====");
    info!("📅 Pipeline Run ID: {}", stats.run_id);
    info!("⏱️  Total Duration: {:.2}s", stats.total_processing_time);
    info!("🌳 Records: {} in → {} after dedupe", stats.total_records, stats.total_records_kept);
    info!(
        "📍 Pairs: {} neighbour, {} close ({} trees skipped as duplicates)",
        stats.total_neighbour_pairs, stats.total_close_pairs, stats.total_records_skipped
    );
    info!(
        "🔮 Predictions: {} trees (genus: {}, age group: {}, year sprout: {})",
        stats.total_predicted_records,
        stats.genus_predictions,
        stats.age_group_predictions,
        stats.year_sprout_predictions
    );
    info!("===============================================");
}
