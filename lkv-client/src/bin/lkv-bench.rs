//! Load generator for a running LineKV server.
//!
//! Each connection sends `--iterations` requests: 99% `$get` and 1% `$set`
//! with a random 1..=15 character value, keys drawn from a fixed word list.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use lkv_client::Client;

const KEYS: &[&str] = &[
    "accent", "accident", "account", "action", "admiration", "advice", "age", "agony",
    "agreement", "amount", "anger", "animal", "answer", "attitude", "battery", "belief",
    "blood", "bread", "burst", "cause", "chance", "color", "comfort", "copy", "crime",
    "damage", "debt", "desire", "doubt", "dust", "effect", "error", "event", "fact",
    "field", "fire", "force", "glass", "growth", "harbor", "heat", "hope", "humor",
];

/// Percent of requests that are writes.
const SET_PERCENT: u32 = 1;

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate load against a LineKV server")]
struct Args {
    /// Server host name or address.
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port.
    #[arg(short, long)]
    port: u16,

    /// Requests per connection.
    #[arg(short, long, default_value_t = 10_000)]
    iterations: usize,

    /// Concurrent connections.
    #[arg(short, long, default_value_t = 1)]
    connections: usize,

    /// Milliseconds to wait for a `$get` reply.
    #[arg(long, default_value_t = 100)]
    reply_timeout_ms: u64,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct Summary {
    gets: u64,
    sets: u64,
    hits: u64,
    misses: u64,
    elapsed_ms: u64,
}

impl Summary {
    fn merge(&mut self, other: Summary) {
        self.gets += other.gets;
        self.sets += other.sets;
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

fn random_value(rng: &mut StdRng) -> String {
    let len = rng.gen_range(1..=15);
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

async fn run_connection(addr: String, iterations: usize, reply_timeout: Duration) -> Result<Summary> {
    let mut client = Client::connect(addr.as_str())
        .await
        .with_context(|| format!("failed to connect to {addr}"))?
        .with_reply_timeout(reply_timeout);
    let mut rng = StdRng::from_entropy();
    let mut summary = Summary::default();

    for _ in 0..iterations {
        let key = KEYS[rng.gen_range(0..KEYS.len())];
        if rng.gen_range(0..100) < SET_PERCENT {
            let value = random_value(&mut rng);
            debug!(key, value = %value, "set");
            client.set(key, &value).await?;
            summary.sets += 1;
        } else {
            summary.gets += 1;
            match client.get(key).await? {
                Some(value) => {
                    debug!(key, value = %value, "get");
                    summary.hits += 1;
                }
                None => summary.misses += 1,
            }
        }
    }

    client.shutdown().await?;
    Ok(summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.server, args.port);
    let reply_timeout = Duration::from_millis(args.reply_timeout_ms);
    info!(%addr, connections = args.connections, iterations = args.iterations, "starting load");

    let started = Instant::now();
    let tasks: Vec<_> = (0..args.connections.max(1))
        .map(|_| tokio::spawn(run_connection(addr.clone(), args.iterations, reply_timeout)))
        .collect();

    let mut summary = Summary::default();
    for task in tasks {
        summary.merge(task.await.context("load task panicked")??);
    }
    summary.elapsed_ms = started.elapsed().as_millis() as u64;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "gets: {} (hits {}, misses {}), sets: {}, elapsed: {} ms",
            summary.gets, summary.hits, summary.misses, summary.sets, summary.elapsed_ms
        );
    }
    Ok(())
}
