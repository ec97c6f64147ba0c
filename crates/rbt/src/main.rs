//! Thin CLI: parses flags, wires `TorrentMeta` -> `PieceStore` ->
//! `TrackerClient` -> `Swarm`, prints progress, returns the process exit
//! code spec.md §6 requires (0 on clean shutdown after completion, 1 on
//! any startup/fatal error).
//!
//! Grounded on `crates/rqbit/src/main.rs`'s `clap` derive style and
//! `#[tokio::main]` wiring, trimmed down from that binary's full
//! session/HTTP-API/DHT surface to exactly spec.md §6's flag set.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use rbt_core::{generate_peer_id, TorrentMeta};
use rbt_engine::{PieceStore, Swarm, SwarmConfig};
use rbt_tracker::TrackerClient;

/// A minimal BitTorrent client: downloads a single torrent, verifying
/// every piece against its SHA-1, and exits (or keeps seeding with `-s`).
#[derive(Parser, Debug)]
#[command(version, author, about)]
struct Opts {
    /// Path to the .torrent metainfo file.
    #[arg(short = 'f', long = "file")]
    torrent_file: PathBuf,

    /// Local TCP port to listen for incoming peer connections on.
    #[arg(short = 'p', long = "port")]
    port: u16,

    /// Write debug-level logs to ./debug.log in addition to the console.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Restrict to a single peer: its IP address. Must be given together
    /// with `-P`. When set, the tracker is never queried.
    #[arg(short = 'A', long = "peer-addr", requires = "restrict_port")]
    restrict_addr: Option<IpAddr>,

    /// Restrict to a single peer: its TCP port. Must be given together
    /// with `-A`.
    #[arg(short = 'P', long = "peer-port", requires = "restrict_addr")]
    restrict_port: Option<u16>,

    /// Keep serving already-verified pieces after the download completes.
    #[arg(short = 's', long = "seed")]
    seed: bool,
}

fn init_logging(debug: bool) -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_filter(console_filter);

    if debug {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("debug.log")
            .context("opening debug.log")?;
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_filter(EnvFilter::new("debug"));
        tracing_subscriber::registry().with(console_layer).with(file_layer).init();
    } else {
        tracing_subscriber::registry().with(console_layer).init();
    }
    Ok(())
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let torrent_bytes = std::fs::read(&opts.torrent_file)
        .with_context(|| format!("reading torrent file {:?}", opts.torrent_file))?;
    let torrent = Arc::new(TorrentMeta::from_bytes(&torrent_bytes).context("parsing torrent metainfo")?);

    let output_name = torrent.name.clone().unwrap_or_else(|| "output.bin".to_string());
    let output_path = PathBuf::from(&output_name);
    let store = Arc::new(PieceStore::create(&output_path, &torrent).context("creating output file")?);

    tracing::info!(
        name = %output_name,
        pieces = store.total_pieces(),
        total_length = torrent.total_length,
        "torrent loaded"
    );

    let our_peer_id = generate_peer_id();
    let listen_addr: SocketAddr = ([0, 0, 0, 0], opts.port).into();

    let restrict_to = match (opts.restrict_addr, opts.restrict_port) {
        (Some(ip), Some(port)) => Some(SocketAddr::new(ip, port)),
        (None, None) => None,
        _ => bail!("-A and -P must be given together"),
    };

    let config = SwarmConfig {
        listen_addr,
        max_peers: 65_535,
        seed_after_complete: opts.seed,
        restrict_to,
    };
    let mut swarm = Swarm::bind(torrent.clone(), store.clone(), our_peer_id, config)
        .await
        .context("binding listen socket")?;

    let tracker = if let Some(addr) = restrict_to {
        swarm.add_peers([addr]);
        None
    } else {
        let announce_url = torrent
            .iter_announce()
            .next()
            .context("torrent has no announce URL")?
            .to_string();
        let client = TrackerClient::new();
        let interval = swarm
            .initial_announce(&client, &announce_url)
            .await
            .context("initial tracker announce")?;
        Some((client, announce_url, interval))
    };

    spawn_progress_printer(store.clone());

    match swarm.run(tracker).await {
        Ok(()) => {
            if store.is_complete() {
                println!("download complete: {output_name}");
            }
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e)),
    }
}

/// Prints a monotonically-advancing progress line every second until the
/// download completes. No bytes are counted until a piece actually
/// verifies, so this line never regresses (spec.md §7's user-visible
/// failure behavior).
fn spawn_progress_printer(store: Arc<PieceStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            let total = store.total_length();
            let done = store.bytes_downloaded();
            let pct = if total == 0 { 100.0 } else { done as f64 / total as f64 * 100.0 };
            print!("\r{pct:6.2}%  {done}/{total} bytes");
            use std::io::Write;
            let _ = std::io::stdout().flush();
            if store.is_complete() {
                println!();
                return;
            }
        }
    });
}

fn main() -> std::process::ExitCode {
    let opts = Opts::parse();
    if let Err(e) = init_logging(opts.debug) {
        eprintln!("error: {e:#}");
        return std::process::ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    match runtime.block_on(run(opts)) {
        Ok(()) => std::process::ExitCode::from(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::ExitCode::from(1)
        }
    }
}
