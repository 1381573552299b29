// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! urpc-client - line-oriented key-value client
//!
//! Reads one command per line from stdin:
//!
//! ```text
//! put <key> <value> <True|False>
//! get <key>
//! append <key> <suffix>
//! remove <key>
//! ```
//!
//! and prints `RESULT <value>` or `ERROR <description>` for each.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use urpc::config::DEFAULT_SERVER_ADDR;
use urpc::store::OP_PUT;
use urpc::{store_catalog, CallDispatcher, RpcConfig, UdpTransport, Value};

/// urpc key-value client
#[derive(Parser, Debug)]
#[command(name = "urpc-client")]
#[command(version = "0.3.0")]
#[command(about = "Send key-value commands from stdin to a urpc server")]
struct Args {
    /// Server address (host:port)
    #[arg(short, long, default_value = DEFAULT_SERVER_ADDR)]
    server: SocketAddr,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "warn" };
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

    let transport = Arc::new(UdpTransport::bind_for_peer(args.server)?);
    let client = CallDispatcher::new(transport, args.server, store_catalog(), config.dispatcher)?;

    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        let Some((operation, call_args)) = parse_command(&line) else {
            continue;
        };
        match client.call(operation, call_args) {
            Ok(value) => writeln!(out, "RESULT {}", value)?,
            Err(e) => writeln!(out, "ERROR {}", e)?,
        }
        out.flush()?;
    }

    let stats = client.stats();
    log::debug!(
        "{} calls, {} retransmissions, {} timeouts",
        stats.calls,
        stats.retransmissions,
        stats.timeouts
    );
    Ok(())
}

/// Position of the `overwrite` flag in a `put` command.
const PUT_FLAG_INDEX: usize = 2;

/// Split a command line into operation name and arguments.
///
/// Only the `put` overwrite flag is parsed as a bool; keys and values are
/// always strings, even when spelled `True` or `False`.
fn parse_command(line: &str) -> Option<(&str, Vec<Value>)> {
    let mut words = line.split_whitespace();
    let operation = words.next()?;
    let args = words
        .enumerate()
        .map(|(index, word)| {
            if operation == OP_PUT && index == PUT_FLAG_INDEX {
                parse_flag(word)
            } else {
                Value::from(word)
            }
        })
        .collect();
    Some((operation, args))
}

fn parse_flag(word: &str) -> Value {
    match word {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        other => Value::from(other),
    }
}
