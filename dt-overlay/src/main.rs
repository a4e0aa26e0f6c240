// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Device-tree overlay generator for the AXI DMA bitstream
//!
//! Takes the `pl.dtsi` emitted by the hardware tool flow, lifts the DMA node
//! out of it and wraps it in an overlay that loads the bitstream into
//! `/fpga-region` and publishes the node under `/axi`.
//!
//! Usage: `dt-overlay <input.dtsi> <firmware.bin> <output.dts>`

mod overlay;

use std::{env, fs, process};

use anyhow::Context;
use env_logger::Env;
use log::{error, info};

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <input.dtsi> <firmware.bin> <output.dts>", program);
    eprintln!("Example: {} pl.dtsi dma_test.bit.bin dma_overlay.dts", program);
    process::exit(1);
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("dt-overlay");
    if args.len() != 4 {
        usage(program);
    }

    if let Err(err) = generate(&args[1], &args[2], &args[3]) {
        error!("{:#}", err);
        process::exit(1);
    }
}

fn generate(input: &str, firmware: &str, output: &str) -> anyhow::Result<()> {
    let src = fs::read_to_string(input).with_context(|| format!("failed to read {}", input))?;

    let node = overlay::extract_dma_node(&src)
        .with_context(|| format!("failed to extract DMA node from {}", input))?;
    println!("DMA node: {} @ {:#x}", node.label, node.unit_address);

    let dts = overlay::render(firmware, &node);
    fs::write(output, dts).with_context(|| format!("failed to write {}", output))?;
    info!("Overlay written to {} (firmware {})", output, firmware);

    Ok(())
}
