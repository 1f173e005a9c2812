//! Simulation binary for the iterative lookup.
//!
//! Builds an in-memory network of peers, each knowing a handful of random
//! others, adds the local node to it and runs one `FIND_NODE` lookup. The
//! closest contacts are printed to stdout as JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=sdht_lookup=debug cargo run -- --nodes 500 --fanout 8 --seed 7
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sdht_lookup::identity::{generate_node_id, parse_node_id, DEFAULT_IDENTITY_FILE};
use sdht_lookup::{
    derive_node_id, distance, spawn_memory_node, Contact, IdentityStore, LookupConfig,
    NetworkRegistry, NodeId,
};

#[derive(Parser, Debug)]
#[command(name = "sdht-lookup")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with lookup parameters.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// File holding the local node id; created on first run.
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_IDENTITY_FILE)]
    identity: PathBuf,

    /// Number of simulated peers.
    #[arg(short, long, default_value = "200")]
    nodes: usize,

    /// Contacts each simulated peer starts with.
    #[arg(short, long, default_value = "8")]
    fanout: usize,

    /// Seed for the simulated network layout.
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Lookup target as 40 hex characters; random when omitted.
    #[arg(short, long, value_name = "HEX")]
    target: Option<String>,

    #[arg(short)]
    k: Option<usize>,

    #[arg(long)]
    alpha: Option<usize>,

    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct Row {
    id: String,
    addr: String,
    distance: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let local_id = IdentityStore::new(&args.identity).local_node_id();
    let target: NodeId = match &args.target {
        Some(hex) => parse_node_id(hex).context("invalid --target")?,
        None => generate_node_id(),
    };

    info!(
        node_id = %hex::encode(local_id),
        k = config.k,
        alpha = config.alpha,
        timeout_ms = config.request_timeout_ms,
        "local node ready"
    );

    let registry = Arc::new(NetworkRegistry::default());
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut contacts = Vec::with_capacity(args.nodes);
    for index in 0..args.nodes {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        contacts.push(Contact {
            id: derive_node_id(&seed),
            addr: format!("sim-{index}"),
        });
    }

    let mut peers = Vec::with_capacity(contacts.len());
    for contact in &contacts {
        peers.push(spawn_memory_node(&registry, contact.clone(), config.clone()).await);
    }
    for peer in &peers {
        for known in contacts.choose_multiple(&mut rng, args.fanout) {
            if known.id != peer.node_id() {
                peer.observe_contact(known.clone()).await;
            }
        }
    }

    let local_contact = Contact {
        id: local_id,
        addr: "sim-local".to_string(),
    };
    let local = spawn_memory_node(&registry, local_contact, config.clone()).await;
    for known in contacts.choose_multiple(&mut rng, args.fanout) {
        local.observe_contact(known.clone()).await;
    }

    info!(
        peers = registry.len().await,
        fanout = args.fanout,
        target_id = %hex::encode(target),
        "simulated network built; starting lookup"
    );

    let closest = local.iterative_find_node(target).await;
    info!(found = closest.len(), "lookup complete");

    let rows: Vec<Row> = closest
        .iter()
        .map(|contact| Row {
            id: hex::encode(contact.id),
            addr: contact.addr.clone(),
            distance: distance(&contact.id, &target),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<LookupConfig> {
    let mut config = match &args.config {
        Some(path) => LookupConfig::from_json_file(path)?,
        None => LookupConfig::default(),
    };
    if let Some(k) = args.k {
        config.k = k;
    }
    if let Some(alpha) = args.alpha {
        config.alpha = alpha;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.request_timeout_ms = timeout_ms;
    }
    config.validate()?;
    Ok(config)
}
