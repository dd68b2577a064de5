//! Disassemble a Glimmer program bundle.
//!
//! Usage: `disasm <bundle> [--handle N] [--constants]`

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};

use glimmer_program::{disassemble, Handle, RuntimeProgram, TableSlotState};

#[derive(Parser, Debug)]
#[command(name = "disasm")]
#[command(about = "Print the instructions of every block in a program bundle")]
struct Args {
    /// Path to the program bundle
    bundle: PathBuf,

    /// Only print the block behind this raw handle
    #[arg(long)]
    handle: Option<u32>,

    /// Also dump the constant pool
    #[arg(long)]
    constants: bool,
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
    let artifacts = glimmer_tools::load_program(&args.bundle)?;
    let program = RuntimeProgram::hydrate(artifacts)
        .with_context(|| format!("hydrate {}", args.bundle.display()))?;
    let heap = program.heap();
    info!(words = heap.size(), "program loaded");

    let mut printed = 0;
    for entry in heap.entries() {
        if entry.state != TableSlotState::Allocated {
            continue;
        }
        if args.handle.is_some_and(|raw| Handle::from_raw(raw) != entry.handle) {
            continue;
        }
        println!(
            "block {} @ {:04} ({} words, scope {})",
            entry.handle, entry.offset, entry.size, entry.scope_size
        );
        for instruction in disassemble(heap, entry.handle) {
            println!("  {instruction}");
        }
        printed += 1;
    }

    if let Some(raw) = args.handle {
        if printed == 0 {
            bail!("no allocated block with handle #{raw}");
        }
    }

    if args.constants {
        let pool = program.constants().pool();
        for (index, string) in pool.strings.iter().enumerate() {
            println!("string[{index}] = {string:?}");
        }
        for (index, number) in pool.numbers.iter().enumerate() {
            println!("number[{index}] = {number}");
        }
        for (index, array) in pool.arrays.iter().enumerate() {
            println!("array[{index}] = {array:?}");
        }
        for (index, handle) in pool.handles.iter().enumerate() {
            println!("handle[{index}] = {handle}");
        }
    }
    Ok(())
}
