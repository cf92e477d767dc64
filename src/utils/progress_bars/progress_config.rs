// src/utils/progress_bars/progress_config.rs
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::utils::env::env_or;

/// Progress bar behaviour of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressConfig {
    pub enabled: bool,
    /// Sub-bars below the main bar.
    pub detailed: bool,
    pub refresh_rate_ms: u64,
    pub show_memory: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed: true,
            refresh_rate_ms: 100,
            show_memory: true,
        }
    }
}

impl ProgressConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("PROGRESS_ENABLED", defaults.enabled),
            detailed: env_or("PROGRESS_DETAILED", defaults.detailed),
            refresh_rate_ms: env_or("PROGRESS_REFRESH_RATE_MS", defaults.refresh_rate_ms),
            show_memory: env_or("PROGRESS_SHOW_MEMORY", defaults.show_memory),
        }
    }

    /// `None` when bars are disabled, so callers can thread it through as is.
    pub fn create_multi_progress(&self) -> Option<MultiProgress> {
        self.enabled.then(MultiProgress::new)
    }

    pub fn should_show_detailed(&self) -> bool {
        self.enabled && self.detailed
    }

    pub fn should_show_memory(&self) -> bool {
        self.enabled && self.show_memory
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_rate_ms.max(1))
    }
}

/// Adds a bar with the pipeline's standard style to `multi_progress`, if any.
pub fn add_bar(multi_progress: Option<&MultiProgress>, len: u64, indent: &str) -> Option<ProgressBar> {
    multi_progress.map(|mp| {
        let pb = mp.add(ProgressBar::new(len));
        let template = format!(
            "{}{{spinner:.green}} [{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {{msg}}",
            indent
        );
        let style = ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ");
        pb.set_style(style);
        pb
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_progress_env_overrides_defaults() {
        env::set_var("PROGRESS_DETAILED", "false");
        env::set_var("PROGRESS_REFRESH_RATE_MS", "250");
        env::set_var("PROGRESS_SHOW_MEMORY", "maybe");

        let config = ProgressConfig::from_env();
        assert!(config.enabled);
        assert!(!config.detailed);
        assert_eq!(config.refresh_interval(), Duration::from_millis(250));
        // Unparsable flag falls back to the default
        assert!(config.show_memory);

        env::remove_var("PROGRESS_DETAILED");
        env::remove_var("PROGRESS_REFRESH_RATE_MS");
        env::remove_var("PROGRESS_SHOW_MEMORY");
    }

    #[test]
    fn test_disabled_progress_hides_everything() {
        let config = ProgressConfig {
            enabled: false,
            ..ProgressConfig::default()
        };
        assert!(config.create_multi_progress().is_none());
        assert!(!config.should_show_detailed());
        assert!(!config.should_show_memory());
        assert!(add_bar(config.create_multi_progress().as_ref(), 10, "").is_none());
    }

    #[test]
    fn test_bars_are_added_when_enabled() {
        let config = ProgressConfig {
            refresh_rate_ms: 0,
            ..ProgressConfig::default()
        };
        let multi_progress = config.create_multi_progress();
        let pb = add_bar(multi_progress.as_ref(), 3, "  ").unwrap();
        assert_eq!(pb.length(), Some(3));
        assert_eq!(config.refresh_interval(), Duration::from_millis(1));
    }
}
