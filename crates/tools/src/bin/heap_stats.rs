//! Report allocation table statistics for a program bundle, optionally
//! compacting it.
//!
//! Usage: `heap-stats <bundle> [--config FILE] [--compact] [--output FILE]`

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use glimmer_program::{InstructionHeap, ProgramArtifacts};
use glimmer_tools::HeapStats;

#[derive(Parser, Debug)]
#[command(name = "heap-stats")]
#[command(about = "Summarize (and optionally compact) the heap of a program bundle")]
struct Args {
    /// Path to the program bundle
    bundle: PathBuf,

    /// Heap configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reclaim freed blocks and write the compacted bundle
    #[arg(long)]
    compact: bool,

    /// Where to write the compacted bundle (defaults to the input)
    #[arg(long, requires = "compact")]
    output: Option<PathBuf>,
}

fn main() {
    glimmer_tools::init_logging();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        error!("{err:#}");
        process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = glimmer_tools::load_heap_config(args.config.as_deref())?;
    let artifacts = glimmer_tools::load_program(&args.bundle)?;
    let mut heap = InstructionHeap::hydrate_with_config(&artifacts.heap, config)
        .with_context(|| format!("hydrate {}", args.bundle.display()))?;

    let before = HeapStats::collect(&heap);
    println!("{before}");

    if !args.compact {
        return Ok(());
    }

    heap.compact();
    let after = HeapStats::collect(&heap);
    info!(
        reclaimed = before.words - after.words,
        words = after.words,
        "heap compacted"
    );

    let output = args.output.as_ref().unwrap_or(&args.bundle);
    ProgramArtifacts::new(heap.capture(), artifacts.constants)
        .write_to(output)
        .with_context(|| format!("write {}", output.display()))?;
    println!("{after}");
    Ok(())
}
