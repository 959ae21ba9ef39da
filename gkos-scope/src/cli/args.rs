//! CLI argument definitions

use clap::Parser;
use gkos_scope_common::{KernelGeneration, DEFAULT_CHAIN_BUDGET};
use std::path::PathBuf;

use crate::introspection::{ElapsedSource, RuntimeMode};
use crate::session::SessionConfig;

#[derive(Parser, Debug)]
#[command(
    name = "gkos-scope",
    about = "Decode the thread table of a halted gkos target",
    after_help = "\
EXAMPLES:
    gkos-scope --image dump.json                       Generation taken from the dump
    gkos-scope --image dump.json --elf fw.elf          Add symbols from the firmware
    gkos-scope --demo gkv3 --export rows.json          Synthetic target, JSON export
    gkos-scope --image dump.json --reset-runtime       Busy time since the last update"
)]
pub struct Args {
    /// Memory dump with symbols and struct layouts (JSON)
    #[arg(long, value_name = "FILE", required_unless_present = "demo", conflicts_with = "demo")]
    pub image: Option<PathBuf>,

    /// Use a built-in synthetic target of the given generation
    #[arg(long, value_name = "GENERATION")]
    pub demo: Option<KernelGeneration>,

    /// Firmware ELF whose symbol table is merged into the image
    #[arg(long, value_name = "FILE")]
    pub elf: Option<PathBuf>,

    /// Kernel generation (gk, gkv3, gkv4); overrides the dump header
    #[arg(short, long)]
    pub generation: Option<KernelGeneration>,

    /// Zero each thread's busy counter after reading it
    #[arg(long)]
    pub reset_runtime: bool,

    /// Number of consecutive updates to run
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub updates: u32,

    /// Character budget for the BlockingOn column
    #[arg(long, default_value_t = DEFAULT_CHAIN_BUDGET)]
    pub chain_budget: usize,

    /// Global holding elapsed time, instead of the generation's own counter
    #[arg(long, value_name = "SYMBOL", conflicts_with = "elapsed_addr")]
    pub elapsed_symbol: Option<String>,

    /// Address of a hardware elapsed-time counter (hex with 0x, or decimal)
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    pub elapsed_addr: Option<u64>,

    /// Width in bytes of the counter at --elapsed-addr
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u64).range(1..=8))]
    pub elapsed_width: u64,

    /// Factor bringing the elapsed counter to busy-time units
    #[arg(long, default_value = "1")]
    pub elapsed_scale: u64,

    /// Export the snapshots to a JSON file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Don't print the table
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Elapsed-time override requested on the command line
    #[must_use]
    pub fn elapsed_source(&self) -> Option<ElapsedSource> {
        if let Some(name) = &self.elapsed_symbol {
            return Some(ElapsedSource::Symbol { name: name.clone(), scale: self.elapsed_scale });
        }
        self.elapsed_addr.map(|address| ElapsedSource::Address {
            address,
            width: self.elapsed_width,
            scale: self.elapsed_scale,
        })
    }

    /// Session options for `generation`
    #[must_use]
    pub fn session_config(&self, generation: KernelGeneration) -> SessionConfig {
        SessionConfig {
            generation,
            runtime_mode: if self.reset_runtime {
                RuntimeMode::ResetOnRead
            } else {
                RuntimeMode::Cumulative
            },
            chain_budget: self.chain_budget,
            elapsed: self.elapsed_source(),
            id_base: None,
        }
    }
}

fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_or_demo_required() {
        assert!(Args::try_parse_from(["gkos-scope"]).is_err());
        assert!(Args::try_parse_from(["gkos-scope", "--demo", "gk", "--image", "x.json"]).is_err());
        let args = Args::try_parse_from(["gkos-scope", "--demo", "gkv3"]).unwrap();
        assert_eq!(args.demo, Some(KernelGeneration::GkV3));
        assert_eq!(args.chain_budget, DEFAULT_CHAIN_BUDGET);
    }

    #[test]
    fn test_session_config_mapping() {
        let args = Args::try_parse_from([
            "gkos-scope",
            "--image",
            "dump.json",
            "--reset-runtime",
            "--elapsed-addr",
            "0x58004500",
            "--elapsed-scale",
            "1000",
        ])
        .unwrap();
        let config = args.session_config(KernelGeneration::GkV4);
        assert_eq!(config.runtime_mode, RuntimeMode::ResetOnRead);
        assert_eq!(
            config.elapsed,
            Some(ElapsedSource::Address { address: 0x5800_4500, width: 4, scale: 1000 })
        );
    }

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(parse_address("0x10"), Ok(16));
        assert_eq!(parse_address("16"), Ok(16));
        assert!(parse_address("0xzz").is_err());
    }
}
