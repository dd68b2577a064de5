//! Glimmer Tools
//!
//! CLI tools for inspecting compiled Glimmer program bundles.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::Context;
use glimmer_program::{HeapConfig, InstructionHeap, ProgramArtifacts, TableSlotState};
use tracing_subscriber::{fmt as subscriber_fmt, EnvFilter};

/// Initialize logging with a default filter.
///
/// Use `RUST_LOG` environment variable to override the default filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,glimmer_tools=debug,glimmer_program=debug"));

    subscriber_fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Read a program bundle.
pub fn load_program(path: &Path) -> anyhow::Result<ProgramArtifacts> {
    ProgramArtifacts::read_from(path)
        .with_context(|| format!("load program bundle {}", path.display()))
}

/// Load a heap configuration from a JSON file, or the default without one.
pub fn load_heap_config(path: Option<&Path>) -> anyhow::Result<HeapConfig> {
    let Some(path) = path else {
        return Ok(HeapConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("read heap config {}", path.display()))?;
    let config: HeapConfig = serde_json::from_str(&text)
        .with_context(|| format!("parse heap config {}", path.display()))?;
    config.validate().context("validate heap config")?;
    Ok(config)
}

/// Allocation table summary of a heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub words: usize,
    pub allocated: usize,
    pub freed: usize,
    pub purged: usize,
    pub pointers: usize,
    /// Words the next compaction would reclaim.
    pub reclaimable: usize,
}

impl HeapStats {
    pub fn collect(heap: &InstructionHeap) -> Self {
        let mut stats = Self {
            words: heap.size(),
            ..Self::default()
        };
        for entry in heap.entries() {
            match entry.state {
                TableSlotState::Allocated => stats.allocated += 1,
                TableSlotState::Freed => {
                    stats.freed += 1;
                    stats.reclaimable += entry.size;
                }
                TableSlotState::Purged => stats.purged += 1,
                TableSlotState::Pointer => stats.pointers += 1,
            }
        }
        stats
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "words:       {}", self.words)?;
        writeln!(f, "allocated:   {}", self.allocated)?;
        writeln!(f, "freed:       {}", self.freed)?;
        writeln!(f, "purged:      {}", self.purged)?;
        writeln!(f, "pointers:    {}", self.pointers)?;
        write!(f, "reclaimable: {}", self.reclaimable)
    }
}
