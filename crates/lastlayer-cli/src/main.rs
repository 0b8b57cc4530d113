//! `lastlayer`: diagnostics for LastLayer device models.
//!
//! ```text
//! USAGE:
//!   lastlayer plan <hex-bytes>        Print the memory transactions for a buffer
//!   lastlayer roundtrip               Write/read a pattern on the software device
//!   lastlayer relu                    Run the streaming relu flow on the software device
//!   lastlayer smoke [--lib <path>]    Alloc, reset, run, read, release on a compiled model
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand};
use lastlayer_chip::abi::{symbols, AbiGeneration, LANE_BITS, LIBRARY_ENV};
use lastlayer_chip::layout::DeviceLayout;
use lastlayer_chip::regs::stream_layout;
use lastlayer_driver::marshal::plan_write;
use lastlayer_driver::{
    select_backend, BackendSelection, BurstRegion, DeviceAbi, DriverConfig, LastLayer, ReluKernel,
    SoftwareDevice, StreamAccelerator, WordSpec,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lastlayer", about = "LastLayer device model diagnostics", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the (address, lane, word) transactions a memory write issues.
    Plan {
        /// Buffer as hex, e.g. 0102030405060708.
        data: String,
        /// First word address.
        #[arg(long, default_value_t = 0)]
        start: i32,
        /// Words per address.
        #[arg(long, default_value_t = 1)]
        burst: u32,
        /// Bytes packed per word (1..=4).
        #[arg(long, default_value_t = 4)]
        word_bytes: usize,
    },
    /// Write a byte pattern to the software device and read it back.
    Roundtrip {
        /// Buffer length in bytes.
        #[arg(long, default_value_t = 64)]
        len: usize,
        /// First word address.
        #[arg(long, default_value_t = 0)]
        start: i32,
        /// Words per address.
        #[arg(long, default_value_t = 1)]
        burst: u32,
        /// Use the byte-lane ABI generation instead of word-lane.
        #[arg(long)]
        byte_lanes: bool,
    },
    /// Run relu over random-looking int8 data on the software streaming accelerator.
    Relu {
        /// Number of int8 elements.
        #[arg(long, default_value_t = 1024)]
        len: usize,
        /// Lanes per memory address.
        #[arg(long, default_value_t = 1)]
        vector_words: u32,
        /// Cycle budget.
        #[arg(long, default_value_t = 1_000_000)]
        max_cycles: i64,
    },
    /// Smoke-test a compiled model library.
    Smoke {
        /// Model library; defaults to $LASTLAYER_LIB.
        #[arg(long)]
        lib: Option<PathBuf>,
        /// Reset cycles.
        #[arg(long, default_value_t = 10)]
        reset: i64,
        /// Run cycles.
        #[arg(long, default_value_t = 20)]
        cycles: i64,
        /// Register to read back after running.
        #[arg(long, default_value_t = 0)]
        hid: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Plan {
            data,
            start,
            burst,
            word_bytes,
        } => cmd_plan(&data, start, burst, word_bytes)?,
        Cmd::Roundtrip {
            len,
            start,
            burst,
            byte_lanes,
        } => cmd_roundtrip(len, start, burst, byte_lanes)?,
        Cmd::Relu {
            len,
            vector_words,
            max_cycles,
        } => cmd_relu(len, vector_words, max_cycles)?,
        Cmd::Smoke {
            lib,
            reset,
            cycles,
            hid,
        } => cmd_smoke(lib, reset, cycles, hid)?,
    }

    Ok(())
}

fn parse_hex(data: &str) -> Result<Vec<u8>> {
    let data = data.trim_start_matches("0x");
    ensure!(data.len() % 2 == 0, "hex input must have an even number of digits");
    (0..data.len())
        .step_by(2)
        .map(|i| {
            let pair = data.get(i..i + 2).context("hex input must be ASCII")?;
            u8::from_str_radix(pair, 16).with_context(|| format!("bad hex byte {pair:?}"))
        })
        .collect()
}

/// Deterministic filler so repeated runs are comparable.
#[allow(clippy::cast_possible_truncation)]
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(37) ^ 0x5A) as u8).collect()
}

fn cmd_plan(data: &str, start: i32, burst: u32, word_bytes: usize) -> Result<()> {
    let buf = parse_hex(data)?;
    let region = BurstRegion::new(start, burst)?;
    let word = WordSpec::new(word_bytes)?;
    let plan = plan_write(region, word, &buf)?;

    println!(
        "{} bytes → {} transactions (word_bytes={word_bytes}, burst={burst}, start={start})",
        buf.len(),
        plan.len()
    );
    for (i, tx) in plan.iter().enumerate() {
        println!("  w{i:<4} {tx}");
    }
    Ok(())
}

/// Bits of one software memory word holding `burst` lanes.
fn memory_width(burst: u32) -> Result<u32> {
    burst
        .checked_mul(LANE_BITS)
        .with_context(|| format!("burst {burst} is too wide for one memory word"))
}

fn cmd_roundtrip(len: usize, start: i32, burst: u32, byte_lanes: bool) -> Result<()> {
    let generation = if byte_lanes {
        AbiGeneration::ByteLane
    } else {
        AbiGeneration::WordLane
    };
    let config = DriverConfig::for_generation(generation);
    let region = BurstRegion::new(start, burst)?;
    ensure!(start >= 0, "start must be non-negative on the software device");

    let words = config
        .word
        .words_in(len)
        .with_context(|| format!("length {len} is not a multiple of {} bytes", config.word.word_bytes()))?;
    let depth = u32::try_from(words / burst as usize + 1)?
        .checked_add(start.unsigned_abs())
        .context("region too large")?;
    let layout = DeviceLayout::new().add_memory(0, memory_width(burst)?, depth)?;

    let mut ll = LastLayer::with_config(SoftwareDevice::new(layout), config);
    let dev = ll.alloc()?;
    let buf = pattern(len);
    let issued = ll.write_mem(&dev, 0, region, &buf)?;
    let back = ll.read_mem(&dev, 0, region, len)?;
    ll.dealloc(dev)?;

    if back != buf {
        let at = back.iter().zip(&buf).position(|(a, b)| a != b).unwrap_or(0);
        bail!("round-trip mismatch at byte {at}");
    }
    println!(
        "{generation}, {}-bit registers: {len} bytes, {issued} words, burst {burst} from {start}: OK",
        generation.register_bits()
    );
    Ok(())
}

fn cmd_relu(len: usize, vector_words: u32, max_cycles: i64) -> Result<()> {
    ensure!(vector_words > 0, "vector_words must be at least 1");
    let lane_bytes = WordSpec::WORD.word_bytes() * vector_words as usize;
    ensure!(
        len > 0 && len % lane_bytes == 0,
        "len must be a non-zero multiple of {lane_bytes}"
    );
    let addresses = len / lane_bytes;
    let depth = u32::try_from(addresses)?;

    let dev = SoftwareDevice::new(stream_layout(depth, vector_words)?)
        .with_kernel(Arc::new(ReluKernel::new(vector_words)));
    let mut acc = StreamAccelerator::open(LastLayer::new(dev), vector_words)?;

    let input = pattern(len);
    acc.reset(3)?;
    acc.set_raddr(0)?;
    acc.set_waddr(0)?;
    acc.set_length(i64::try_from(addresses)?)?;
    acc.write_input(0, &input)?;
    acc.launch()?;
    let spent = acc.run_until_finished(max_cycles, 64)?;
    let output = acc.read_output(0, len)?;
    let cycles = acc.clock_cycles()?;
    acc.close()?;

    let expected: Vec<u8> = input.iter().map(|&b| if b >= 0x80 { 0 } else { b }).collect();
    ensure!(output == expected, "relu output mismatch");
    println!("relu: {len} elements, {vector_words} lanes, {cycles} device cycles ({spent} run)");
    Ok(())
}

fn cmd_smoke(lib: Option<PathBuf>, reset: i64, cycles: i64, hid: u32) -> Result<()> {
    let selection = match lib {
        Some(path) => BackendSelection::Library(path),
        None => match std::env::var_os(LIBRARY_ENV) {
            Some(path) => BackendSelection::Library(path.into()),
            None => bail!("no model library: pass --lib or set {LIBRARY_ENV}"),
        },
    };
    tracing::info!("Smoke test against {selection:?}");
    let backend = select_backend(selection).context("loading model library")?;
    println!("Backend: {} ({} entry points)", backend.backend_type(), symbols::ALL.len());

    let mut ll = LastLayer::new(backend);
    let dev = ll.alloc()?;
    println!("Allocated {dev}");
    ll.reset(&dev, reset)?;
    ll.run(&dev, cycles)?;
    let value = ll.read_reg(&dev, hid, 0)?;
    println!("reset {reset}, run {cycles}: reg[{hid}] = {value} ({value:#x})");
    ll.dealloc(dev)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_width_checks_overflow() {
        assert_eq!(memory_width(2).unwrap(), 64);
        assert!(memory_width(u32::MAX).is_err());
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("0x0102ff").unwrap(), vec![1, 2, 0xFF]);
        assert!(parse_hex("abc").is_err());
    }
}
