// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! dtp-probe - DTP echo latency probe
//!
//! Measures round-trip latency of echo transactions against a DTP peer.
//! Run `serve` on one end and `ping` on the other.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use dtp::{EchoLith, Node};

/// DTP echo latency probe
#[derive(Parser, Debug)]
#[command(name = "dtp-probe")]
#[command(version)]
#[command(about = "Measure DTP echo round-trip latency")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Accept connections and echo pings back (run on the remote end)
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7733")]
        bind: SocketAddr,
    },
    /// Send echo transactions and report RTT statistics
    Ping {
        /// Peer address
        #[arg(short, long, default_value = "127.0.0.1:7733")]
        addr: SocketAddr,

        /// Payload size in bytes
        #[arg(short = 's', long, default_value = "64")]
        size: usize,

        /// Number of measured iterations
        #[arg(short = 'n', long, default_value = "1000")]
        count: u64,

        /// Warmup iterations before measurement
        #[arg(short, long, default_value = "10")]
        warmup: u64,
    },
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.mode {
        Mode::Serve { bind } => serve(bind),
        Mode::Ping {
            addr,
            size,
            count,
            warmup,
        } => ping(addr, size, count, warmup),
    }
}

fn serve(bind: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let node = Node::builder()
        .accept_tcp(bind)?
        .on_session(|session| {
            println!("session {} up from {}", session.session_id(), session.peer());
        })
        .build()?;
    println!(
        "serving echo on {} (ctrl-c to stop)",
        node.listen_addr().expect("listen address")
    );

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    node.shutdown();
    Ok(())
}

fn ping(
    addr: SocketAddr,
    size: usize,
    count: u64,
    warmup: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let node = Node::builder().build()?;
    let session = node.connect_tcp(addr)?;
    println!("connected to {} ({} byte payload)", addr, size);

    let payload: Vec<u8> = (0..size).map(|i| i as u8).collect();
    let mut rtts = Vec::with_capacity(count as usize);

    for i in 0..warmup + count {
        let id = session.take_transaction_id()?;
        let echo = Arc::new(EchoLith::new(id, payload.clone()));
        let start = Instant::now();
        session.register_and_initialize(echo.clone())?;
        session.await_completion(&*echo, Some(Duration::from_secs(10)))?;
        let rtt = start.elapsed();

        if !echo.matched() {
            return Err("echo payload mismatch".into());
        }
        if i >= warmup {
            rtts.push(rtt);
        }
    }

    node.shutdown();
    report(&mut rtts);
    Ok(())
}

fn report(rtts: &mut [Duration]) {
    rtts.sort_unstable();
    let len = rtts.len();
    if len == 0 {
        println!("no samples");
        return;
    }
    let total: Duration = rtts.iter().sum();
    let at = |p: f64| rtts[((len as f64 * p) as usize).min(len - 1)];
    println!("samples: {}", len);
    println!("min:     {:?}", rtts[0]);
    println!("avg:     {:?}", total / len as u32);
    println!("p50:     {:?}", at(0.50));
    println!("p99:     {:?}", at(0.99));
    println!("max:     {:?}", rtts[len - 1]);
}
