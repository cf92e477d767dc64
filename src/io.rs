// src/io.rs - JSON-lines readers and writers for records, pairs and predictions
use anyhow::{Context, Result};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::models::{SuburbAdjacency, SuburbId};

/// Reads one JSON value per line. Blank lines are ignored and malformed lines
/// are skipped with a warning; an unreadable file is an error.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut items = Vec::new();
    let mut malformed = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {} of {}", line_no + 1, path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(item) => items.push(item),
            Err(e) => {
                malformed += 1;
                warn!("Skipping malformed line {} of {}: {}", line_no + 1, path.display(), e);
            }
        }
    }

    info!(
        "Read {} items from {} ({} malformed lines skipped)",
        items.len(),
        path.display(),
        malformed
    );
    Ok(items)
}

pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)
            .with_context(|| format!("Failed to serialize item for {}", path.display()))?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    info!("Wrote {} items to {}", items.len(), path.display());
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

/// Reads `{"suburb": ["adjacent", ...], ...}`.
pub fn read_suburb_adjacency(path: &Path) -> Result<SuburbAdjacency> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let raw: HashMap<SuburbId, Vec<SuburbId>> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse suburb adjacency from {}", path.display()))?;

    let adjacency: SuburbAdjacency = raw
        .into_iter()
        .map(|(suburb, neighbours)| (suburb, neighbours.into_iter().collect()))
        .collect();
    info!("Loaded adjacency for {} suburbs", adjacency.len());
    Ok(adjacency)
}
