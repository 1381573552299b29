// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! urpc-server - key-value store served over UDP
//!
//! Every request is executed at most once; duplicates are answered from
//! the dedup table.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use urpc::config::DEFAULT_SERVER_ADDR;
use urpc::{KvStore, RequestProcessor, RpcConfig, UdpTransport};

/// urpc key-value server
#[derive(Parser, Debug)]
#[command(name = "urpc-server")]
#[command(version = "0.3.0")]
#[command(about = "Serve a key-value store over urpc")]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = DEFAULT_SERVER_ADDR)]
    listen: SocketAddr,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads (overrides config and URPC_WORKERS)
    #[arg(long)]
    workers: Option<usize>,
}

fn main() {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RpcConfig::load_from_file(path)?,
        None => RpcConfig::default(),
    };
    config.apply_env()?;
    if let Some(workers) = args.workers {
        config.processor.workers = workers;
    }
    config.validate()?;

    let transport = Arc::new(UdpTransport::bind(args.listen)?);
    let store = Arc::new(KvStore::new());
    let processor = RequestProcessor::new(transport, Arc::new(store.service()), config.processor)?;

    let stopper = processor.shutdown_handle();
    ctrlc::set_handler(move || {
        stopper.shutdown();
    })?;

    println!("urpc-server listening on {}", processor.local_addr());
    processor.run()?;

    let stats = processor.stats();
    log::info!(
        "served {} datagrams: {} invocations, {} replays, {} malformed, {} receive errors; {} keys stored",
        stats.received,
        stats.invocations,
        stats.replays,
        stats.malformed,
        stats.receive_errors,
        store.len()
    );
    Ok(())
}
