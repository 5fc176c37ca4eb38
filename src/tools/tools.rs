mod dump_bytes;
use dump_bytes::dump_bytes;
mod dump_listing;
use dump_listing::dump_listing;
mod dump_segments;
use dump_segments::dump_segments;
mod dump_symbols;
use dump_symbols::dump_symbols;
mod find_strings;
use find_strings::find_strings;

use rdasm_core::config::Config;
use rdasm_core::context::Context;
use rdasm_core::loader::{BinaryLoader, Loader};
use rdasm_core::logging;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

/// Load a raw binary and inspect its memory and listing
#[derive(Clone, Debug, Parser)]
struct Args {
    /// input filename to load
    #[arg(short, long)]
    input: PathBuf,
    /// address the first byte of the file is loaded at
    #[arg(short, long, default_value = "0", value_parser = parse_address)]
    base: u64,
    /// JSON configuration file, missing fields keep their default
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// shortest string reported, overrides the configuration
    #[arg(long)]
    min_string: Option<usize>,
    /// bytes per hex dump row, overrides the configuration
    #[arg(long)]
    hex_row: Option<usize>,
    /// log one JSON object per event
    #[arg(long)]
    json_log: bool,
    // operation to execute
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Dump all the segments
    DumpSegments,
    /// Dump the flags of a range of bytes
    DumpBytes(DumpBytesArgs),
    /// Dump the listing items
    DumpListing,
    /// Dump the symbols, imports and exports of the listing
    DumpSymbols,
    /// Print the strings found in the segments
    FindStrings,
}

#[derive(Clone, Debug, Parser)]
struct DumpBytesArgs {
    /// first address, defaults to the base
    #[arg(short, long, value_parser = parse_address)]
    start: Option<u64>,
    /// number of bytes
    #[arg(short, long, default_value_t = 64)]
    len: u64,
}

/// Decimal or `0x` prefixed hexadecimal address.
fn parse_address(value: &str) -> Result<u64> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("invalid address `{value}`"))
}

fn load_context(args: &Args) -> Result<Context> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(min_string) = args.min_string {
        config.min_string = min_string;
    }
    if let Some(hex_row) = args.hex_row {
        config.hex_row = hex_row;
    }
    config.validate()?;
    let file = std::fs::read(&args.input).with_context(|| {
        format!("unable to read {}", args.input.display())
    })?;
    let mut ctx = Context::new(file, config);
    BinaryLoader::new(args.base).load(&mut ctx)?;
    info!(input = %args.input.display(), "context ready");
    Ok(ctx)
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.json_log {
        logging::init_tracing_json();
    } else {
        logging::init_tracing();
    }

    match &args.operation {
        Operation::DumpSegments => dump_segments(&args),
        Operation::DumpBytes(bytes_args) => dump_bytes(&args, bytes_args),
        Operation::DumpListing => dump_listing(&args),
        Operation::DumpSymbols => dump_symbols(&args),
        Operation::FindStrings => find_strings(&args),
    }
}
