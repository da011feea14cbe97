//! mesh: a gossip mesh node.
//!
//! Joins the mesh through a bootstrap contact (or starts one), logs view
//! changes and deliveries, and broadcasts every line typed on stdin.

use anyhow::Result;
use clap::Parser;
use std::io::BufRead;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mesh_core::{MeshConfig, MeshEvent, PeerAddr};
use mesh_daemon::{Broadcaster, Mesh};

#[derive(Parser, Debug)]
#[command(name = "mesh")]
#[command(about = "P2P gossip mesh node")]
struct Args {
    /// Address to listen on; with the bound port, our identity in the mesh
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    listen: PeerAddr,

    /// Bootstrap contact to join through (omit to start a new mesh)
    #[arg(short, long)]
    contact: Option<PeerAddr>,

    /// Milliseconds between shuffle rounds
    #[arg(long, default_value_t = 2000)]
    shuffle_interval_ms: u64,

    /// Maximum number of peers carried in a shuffle sample
    #[arg(long, default_value_t = 3)]
    sample_size: usize,

    /// Number of peers each gossip message is relayed to
    #[arg(long, default_value_t = 2)]
    gossip_fanout: usize,

    /// Print every mesh event as a JSON line on stdout
    #[arg(long)]
    json_events: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Blocking console reader: one line, one broadcast. `quit` exits.
fn read_stdin(broadcaster: Broadcaster) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line == "quit" {
            std::process::exit(0);
        }
        if !line.is_empty() {
            broadcaster.broadcast(line.into_bytes());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mesh_daemon=debug"
    } else {
        "info,mesh_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = MeshConfig {
        contact: args.contact,
        shuffle_interval: Duration::from_millis(args.shuffle_interval_ms),
        sample_size: args.sample_size,
        gossip_fanout: args.gossip_fanout,
    };

    let mesh = Mesh::start(args.listen, config).await?;
    info!("Mesh node running on {}. Press Ctrl+C to stop.", mesh.local_addr());
    if let Some(contact) = args.contact {
        info!("Joining through contact {}", contact);
    }

    // Keep the subscription alive for the lifetime of the process
    let json_events = args.json_events;
    let _subscription = mesh.subscribe(move |event| {
        if json_events {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("failed to serialize event: {e}"),
            }
        } else if let MeshEvent::Delivered { payload, from, hops } = event {
            info!(
                "Received via {} - {} ({} hops)",
                from,
                String::from_utf8_lossy(&payload),
                hops
            );
        }
    });

    // Console input is the one blocking piece; it talks to the node only
    // through the broadcast entry point
    let broadcaster = mesh.broadcaster();
    std::thread::spawn(move || read_stdin(broadcaster));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    mesh.shutdown();
    Ok(())
}
