//! # gkos-scope - Replay Entry Point
//!
//! Runs the same engine a debugger host would, against a recorded memory
//! dump (`--image dump.json`) or a built-in synthetic target (`--demo gkv4`),
//! and prints the thread table a host would have shown.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use gkos_scope::cli::Args;
use gkos_scope::export::SnapshotExporter;
use gkos_scope::session::Session;
use gkos_scope::snapshot::RecordingSink;
use gkos_scope::target::elf_symbols::load_elf_symbols;
use gkos_scope::target::synthetic;
use gkos_scope::target::MemoryImage;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    let args = Args::parse();
    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.to_string().to_lowercase().contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn load_image(args: &Args) -> Result<MemoryImage> {
    let mut image = match (&args.image, args.demo) {
        (Some(path), _) => MemoryImage::from_path(path)
            .with_context(|| format!("Failed to load memory dump {}", path.display()))?,
        (None, Some(generation)) => {
            info!("Using synthetic {generation} target");
            synthetic::demo(generation)
        }
        (None, None) => anyhow::bail!("Missing required argument: --image or --demo"),
    };

    if let Some(elf) = &args.elf {
        let symbols =
            load_elf_symbols(elf).with_context(|| format!("Failed to read {}", elf.display()))?;
        let added = image.merge_symbols(symbols);
        info!("Merged ELF symbols, {added} new");
    }
    Ok(image)
}

fn run(args: &Args) -> Result<()> {
    let image = load_image(args)?;
    let generation = match (args.generation, image.generation()) {
        (Some(flag), Some(recorded)) if flag != recorded => {
            warn!("Dump was recorded as {recorded}, decoding as {flag}");
            flag
        }
        (Some(generation), _) | (None, Some(generation)) => generation,
        (None, None) => {
            anyhow::bail!("Missing required argument: --generation (the dump does not record one)")
        }
    };

    let config = args.session_config(generation);
    let mut sink = RecordingSink::new();
    let mut session = Session::init(image, &config, &mut sink).context("Failed to start session")?;

    let entry_points = session.context_switch_entry_points();
    if entry_points.is_empty() {
        warn!("No context-switch routine found, host unwinding will stop at thread boundaries");
    }
    info!(
        "{} ({generation}), context switch at [{}]",
        session.os_name(),
        entry_points.iter().map(|addr| format!("0x{addr:x}")).collect::<Vec<_>>().join(", ")
    );

    let mut exporter = SnapshotExporter::new();
    for update in 1..=args.updates {
        let snapshot = session.update(&mut sink);
        if !args.quiet {
            if args.updates > 1 {
                println!("-- update {update} --");
            }
            print!("{}", sink.render_table());
        }

        let stats = snapshot.stats;
        let problems = stats.malformed_queues
            + stats.skipped_slots
            + stats.degraded_rows
            + stats.reset_failures;
        if problems > 0 {
            warn!(
                "Degraded snapshot: {} malformed queue(s), {} skipped slot(s), \
                 {} degraded row(s), {} failed reset(s)",
                stats.malformed_queues,
                stats.skipped_slots,
                stats.degraded_rows,
                stats.reset_failures
            );
        }
        exporter.add(snapshot);
    }

    if let Some(path) = &args.export {
        exporter
            .export_to_path(path)
            .with_context(|| format!("Failed to export to {}", path.display()))?;
        if !args.quiet {
            println!("Exported {} snapshot(s) to {}", exporter.snapshot_count(), path.display());
        }
    }
    Ok(())
}
