//! Flotilla node binary
//!
//! Runs one overlay node with an interactive shell on stdin.
//!
//! Usage:
//!   flotilla-node [LISTEN_ADDR] [PEER_ADDR...]
//!
//! Configuration comes from `FLOTILLA_*` environment variables (see
//! `NodeConfig::from_env`); positional arguments override the listen address
//! and add bootstrap peers.

mod shell;

use flotilla_node::{Error, Node, NodeConfig, NodeEvent};
use shell::ShellCommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_usage() {
    eprintln!("flotilla-node - peer-to-peer overlay node");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  flotilla-node [LISTEN_ADDR] [PEER_ADDR...]");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  FLOTILLA_LISTEN_ADDR      Listen address (default: 0.0.0.0:0)");
    eprintln!("  FLOTILLA_BOOTSTRAP_PEERS  Comma separated host:port list");
    eprintln!("  FLOTILLA_PEER_LIST        Peer list file (default: ./Data/peerlist.json)");
    eprintln!("  FLOTILLA_DEFAULT_TTL      Hop budget for sent packets (default: 255)");
    eprintln!("  RUST_LOG                  Log filter (default: flotilla=info)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flotilla=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        return Ok(());
    }

    let mut config = NodeConfig::from_env()?;
    if let Some(listen) = args.first() {
        config.listen_addr = listen.parse()?;
    }
    config.bootstrap_peers.extend(args.iter().skip(1).cloned());

    let node = Node::spawn(config)?;
    let addr = node.listen_configured().await?;
    println!("Node {} listening on {}", node.id(), addr);

    // Print every event as it happens
    let mut events = node.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                NodeEvent::Connected { node_id } => println!("+ {node_id} connected"),
                NodeEvent::Disconnected { node_id } => println!("- {node_id} disconnected"),
                NodeEvent::Broadcast { message, origin } => println!("[broadcast] {origin}: {message}"),
                NodeEvent::Direct { message, origin } => println!("[direct] {origin}: {message}"),
                NodeEvent::ConnectionError { node_id, addr, error } => {
                    let who = node_id
                        .map(|id| id.to_string())
                        .or_else(|| addr.map(|a| a.to_string()))
                        .unwrap_or_else(|| "?".into());
                    println!("! connection error ({who}): {error}");
                }
                NodeEvent::Message { .. } => {}
            }
        }
    });

    // Keep the disconnect handles alive for the life of the process
    let mut links = node.bootstrap().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match shell::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match command {
            ShellCommand::Broadcast(message) => match node.broadcast(message).await {
                Ok(id) => println!("sent broadcast {id}"),
                Err(e) => eprintln!("broadcast failed: {e}"),
            },
            ShellCommand::Direct(target, message) => match node.direct(target, message).await {
                Ok(id) => println!("sent direct {id}"),
                Err(e) => eprintln!("direct failed: {e}"),
            },
            ShellCommand::Connect(target) => {
                match tokio::net::lookup_host(target.as_str()).await.map(|mut a| a.next()) {
                    Ok(Some(addr)) => match node.connect(addr).await {
                        Ok(link) => links.push(link),
                        Err(Error::PeerListNotSaved { link, source }) => {
                            eprintln!("connected, but the peer list was not saved: {source}");
                            links.push(link);
                        }
                        Err(e) => eprintln!("connect failed: {e}"),
                    },
                    Ok(None) => eprintln!("no address for {target}"),
                    Err(e) => eprintln!("cannot resolve {target}: {e}"),
                }
            }
            ShellCommand::Neighbors => {
                for id in node.neighbors().await? {
                    println!("{id}");
                }
            }
            ShellCommand::Peers => {
                for peer in node.peers().await? {
                    println!("{} {}:{}", peer.id, peer.ip, peer.port);
                }
            }
            ShellCommand::Id => println!("{}", node.id()),
            ShellCommand::Help => println!("{}", shell::HELP),
            ShellCommand::Quit => break,
        }
    }

    node.close().await?;
    tracing::info!("Node closed");
    Ok(())
}
