// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! AXI DMA loopback exerciser
//!
//! Moves a 4 KiB pattern from a locked source buffer through the DMA
//! engine (MM2S -> PL loopback -> S2MM) into a locked destination buffer and
//! checks it word by word through uncached windows. Must run as root.
//!
//! Exit status: 0 on success, otherwise the failure class as given by
//! [`axi_dma::Error::exit_code`].

use std::process;
use std::time::Duration;

use anyhow::Context;
use env_logger::Env;
use log::{error, info};

use axi_dma::selftest::{self, Report};
use axi_dma::{Config, DmaSr, Error, PollBudget};

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!(
        "=== AXI DMA test v{} (64-bit high DDR support) ===",
        env!("CARGO_PKG_VERSION")
    );

    match run() {
        Ok(report) => {
            println!(
                "SUCCESS: {} bytes {:#x} -> {:#x} verified ({} status polls)",
                report.bytes, report.src_phys, report.dst_phys, report.polls
            );
        }
        Err(err) => {
            let code = err.downcast_ref::<Error>().map_or(1, Error::exit_code);
            print_failure(&err);
            process::exit(code);
        }
    }
}

fn run() -> anyhow::Result<Report> {
    let config = parse_config(|name| std::env::var(name).ok())
        .context("failed to read configuration from environment")?;
    info!("Configuration: {:?}", config);

    let report = selftest::run(&config)?;
    Ok(report)
}

fn print_failure(err: &anyhow::Error) {
    match err.downcast_ref::<Error>() {
        Some(Error::Hardware { tx, rx }) => {
            println!("HARDWARE ERROR DETECTED");
            println!("Status TX: {}", DmaSr::from_bits_retain(*tx).describe());
            println!("Status RX: {}", DmaSr::from_bits_retain(*rx).describe());
        }
        Some(Error::Timeout { polls }) => {
            println!("TIMEOUT: DMA did not respond after {} polls", polls);
        }
        Some(Error::Verification(report)) => {
            for mismatch in &report.first {
                println!(
                    "Error [{}]: expected 0x{:08X}, read 0x{:08X}",
                    mismatch.index, mismatch.expected, mismatch.actual
                );
            }
            if report.mismatches > report.first.len() {
                println!("... {} more", report.mismatches - report.first.len());
            }
        }
        _ => {}
    }
    error!("{:#}", err);
    println!("FAILURE");
}

/// Builds the run configuration from `AXI_DMA_*` variables, falling back to
/// the defaults for unset ones.
fn parse_config<F>(lookup: F) -> Result<Config, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::default();

    if let Some(val) = lookup("AXI_DMA_BASE") {
        config.dma_base = parse_u64("AXI_DMA_BASE", &val)?;
    }

    if let Some(val) = lookup("AXI_DMA_TEST_SIZE") {
        config.test_size = parse_u64("AXI_DMA_TEST_SIZE", &val)?
            .try_into()
            .map_err(|_| Error::Config(format!("AXI_DMA_TEST_SIZE={} out of range", val)))?;
    }

    if let Some(val) = lookup("AXI_DMA_LENGTH_WIDTH") {
        config.length_width = parse_u64("AXI_DMA_LENGTH_WIDTH", &val)?
            .try_into()
            .map_err(|_| Error::Config(format!("AXI_DMA_LENGTH_WIDTH={} out of range", val)))?;
    }

    let iterations = lookup("AXI_DMA_POLL_ITERATIONS");
    let timeout_us = lookup("AXI_DMA_POLL_TIMEOUT_US");
    if iterations.is_some() && timeout_us.is_some() {
        return Err(Error::Config(
            "AXI_DMA_POLL_ITERATIONS and AXI_DMA_POLL_TIMEOUT_US are mutually exclusive"
                .to_string(),
        ));
    }

    if let Some(val) = iterations {
        let n = parse_u64("AXI_DMA_POLL_ITERATIONS", &val)?;
        config.poll = PollBudget::Iterations(n.try_into().map_err(|_| {
            Error::Config(format!("AXI_DMA_POLL_ITERATIONS={} out of range", val))
        })?);
    }

    if let Some(val) = timeout_us {
        let us = parse_u64("AXI_DMA_POLL_TIMEOUT_US", &val)?;
        config.poll = PollBudget::Deadline(Duration::from_micros(us));
    }

    config.validate()?;
    Ok(config)
}

/// Accepts decimal or `0x`-prefixed hex, with `_` separators.
fn parse_u64(name: &str, val: &str) -> Result<u64, Error> {
    let cleaned = val.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|err| Error::Config(format!("{}={:?}: {}", name, val, err)))
}
