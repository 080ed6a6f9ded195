use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use storagelink_node::ffi::LibStorage;
use storagelink_node::{
    CancelSignal, DownloadStreamOptions, NodeConfig, StorageNode, TransferProgress, UploadOptions,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "storagelink", about = "Run a Logos Storage node and move content through it")]
struct Cli {
    /// JSON node configuration; environment overrides still apply.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Print version, identity and store usage.
    Info,
    /// Store a file and print its content identifier.
    Upload {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Fetch content into a local file.
    Download {
        cid: String,
        #[arg(value_name = "DEST")]
        dest: PathBuf,
    },
    /// Dial a peer, through discovery when no address is given.
    Connect {
        peer_id: String,
        #[arg(value_name = "ADDR")]
        addresses: Vec<String>,
    },
}

fn log_progress(p: TransferProgress) {
    match p.percent {
        Some(percent) => info!(bytes = p.total, "{percent:.1}%"),
        None => info!(bytes = p.total, "transferred"),
    }
}

async fn run(node: &StorageNode, command: Command, cancel: &CancelSignal) -> anyhow::Result<()> {
    match command {
        Command::Info => {
            let version = node.version().await?;
            let revision = node.revision().await?;
            let info = node.debug().await?;
            let space = node.space().await?;
            println!("version:  {version} ({revision})");
            println!("peer id:  {}", info.id);
            println!("spr:      {}", info.spr);
            println!("repo:     {}", node.repo().await?);
            println!(
                "space:    {} / {} bytes in {} blocks",
                space.quota_used_bytes, space.quota_max_bytes, space.total_blocks
            );
            for addr in &info.addrs {
                println!("listen:   {addr}");
            }
        }
        Command::Upload { path } => {
            let cid = node
                .upload_file(cancel, &UploadOptions::new(&path), log_progress)
                .await
                .with_context(|| format!("upload of {} failed", path.display()))?;
            println!("{cid}");
        }
        Command::Download { cid, dest } => {
            let options = DownloadStreamOptions {
                filepath: Some(dest.clone()),
                dataset_size_auto: true,
                ..Default::default()
            };
            node.download_stream(&cid, &options, None, cancel, log_progress)
                .await
                .with_context(|| format!("download of {cid} failed"))?;
            println!("{}", dest.display());
        }
        Command::Connect { peer_id, addresses } => {
            node.connect(&peer_id, &addresses).await?;
            println!("connected to {peer_id}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,storagelink=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match cli.config {
        Some(path) => NodeConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => NodeConfig::default(),
    };
    config.apply_env();

    let mut node = StorageNode::create(Arc::new(LibStorage::new()), &config).await?;
    if let Err(e) = node.start().await {
        if let Err(teardown) = node.destroy().await {
            warn!(error = %teardown, "node teardown failed");
        }
        return Err(e.into());
    }

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let result = run(&node, cli.command, &cancel).await;
    if let Err(e) = node.destroy().await {
        warn!(error = %e, "node teardown failed");
    }
    result
}
