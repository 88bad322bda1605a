//! Shutdown artifact persistence.
//!
//! On clean shutdown the engine writes a single JSON document with the
//! run counters and the risk ledger's performance summary, for offline
//! analysis of a session.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::risk::PerformanceStats;
use crate::types::RunStats;

#[derive(Debug, Serialize)]
struct FinalStats<'a> {
    runtime_stats: &'a RunStats,
    performance_stats: &'a PerformanceStats,
    end_time: String,
}

/// Serialize the session summary to `path`, creating parent
/// directories as needed.
pub fn write_final_stats(
    path: impl AsRef<Path>,
    runtime: &RunStats,
    performance: &PerformanceStats,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let doc = FinalStats {
        runtime_stats: runtime,
        performance_stats: performance,
        end_time: Utc::now().to_rfc3339(),
    };

    let json = serde_json::to_string_pretty(&doc).context("Failed to serialize final stats")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write final stats to {}", path.display()))?;

    info!(path = %path.display(), "Final stats written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
