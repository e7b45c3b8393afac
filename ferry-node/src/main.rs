// ferry-node: block file transfer daemon with an interactive prompt.

use std::path::PathBuf;
use std::sync::Arc;

use ferry_core::{PeerId, PeerIdentity};
use ferry_node::{config, storage::StorageArea, Node};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("ferry-node {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                config_path = args.next().map(PathBuf::from);
            }
            other => {
                eprintln!("unknown argument: {other}");
                eprintln!("usage: ferry-node [--config <path>] [--version]");
                std::process::exit(2);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cfg = config::load(config_path.as_deref());
    let id = cfg
        .node_id
        .clone()
        .map(PeerId::new)
        .unwrap_or_else(PeerId::generate);
    let (host, port) = match cfg.listen_addr.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse::<u16>().unwrap_or(0)),
        None => (cfg.listen_addr.clone(), 0),
    };
    let identity = PeerIdentity::new(id, host, port);
    let storage = StorageArea::open(&cfg.storage_dir)?;
    let node = Node::new(identity, storage)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let bound = node.listen(&cfg.listen_addr).await?;
        info!(id = %node.identity().id, %bound, storage = %cfg.storage_dir.display(), "node up");

        for peer in &cfg.peers {
            if let Err(e) = node.connect(peer).await {
                warn!(%peer, error = %e, "could not reach bootstrap peer");
            }
        }

        tokio::select! {
            _ = shutdown_signal() => {}
            _ = command_loop(node.clone()) => {}
        }
        Ok::<_, anyhow::Error>(())
    })?;
    Ok(())
}

/// Line-oriented command surface on stdin.
async fn command_loop(node: Arc<Node>) {
    println!("commands: get <file> | ls | peers | quit");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("get"), Some(file_name)) => {
                if node.local_files().await.iter().any(|f| f == file_name) {
                    println!("already have {file_name}");
                    continue;
                }
                match node.request_file(file_name).await {
                    Ok(0) => println!("no peers connected; {file_name} not requested"),
                    Ok(n) => println!("requested {file_name} from {n} peer(s)"),
                    Err(e) => println!("request failed: {e}"),
                }
            }
            (Some("ls"), None) => {
                for f in node.local_files().await {
                    println!("{f}");
                }
            }
            (Some("peers"), None) => {
                println!("{} connection(s)", node.connection_count().await);
            }
            (Some("quit"), None) | (Some("exit"), None) => return,
            (None, _) => {}
            _ => println!("commands: get <file> | ls | peers | quit"),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
