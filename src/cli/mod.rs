use crate::config::BitswapConfig;
use crate::error::Result;
use crate::node::{Node, NodeConfig};
use cid::Cid;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Parser)]
#[command(name = "bitswap-rs")]
#[command(about = "Exchange content-addressed blocks over Bitswap 1.2.0", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node serving the local blockstore until Ctrl-C
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:4001")]
        listen: SocketAddr,

        #[command(flatten)]
        node: NodeArgs,
    },

    /// Store a file as a raw block and print its CID
    Put {
        /// File to add
        file: PathBuf,

        /// Blockstore directory
        #[arg(short, long, default_value = "./blocks")]
        store: PathBuf,
    },

    /// Fetch a block from peers
    Get {
        /// CID of the block
        cid: String,

        /// Write the block here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds to wait for the block
        #[arg(short, long, default_value = "30")]
        timeout: u64,

        #[command(flatten)]
        node: NodeArgs,
    },
}

#[derive(Args)]
struct NodeArgs {
    /// Peer to connect to (repeatable)
    #[arg(short, long = "peer")]
    peers: Vec<SocketAddr>,

    /// Blockstore directory
    #[arg(short, long, default_value = "./blocks")]
    store: PathBuf,

    /// Ask peers to answer with DONT_HAVE when they lack a block
    #[arg(long)]
    send_dont_have: bool,
}

impl NodeArgs {
    fn config(&self, listen_addr: Option<SocketAddr>) -> NodeConfig {
        NodeConfig {
            listen_addr,
            peers: self.peers.clone(),
            store_dir: self.store.clone(),
            bitswap: BitswapConfig {
                send_dont_have: self.send_dont_have,
                ..BitswapConfig::default()
            },
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Serve { listen, node } => {
                let node = Node::start(node.config(Some(*listen))).await?;
                println!("Peer ID: {}", node.peer_id());

                tokio::signal::ctrl_c().await?;
                info!("Shutting down");
                node.shutdown();
                print!("{}", node.metrics_text()?);
            }

            Commands::Put { file, store } => {
                let node = Node::start(NodeConfig {
                    store_dir: store.clone(),
                    ..NodeConfig::default()
                })
                .await?;

                let cid = node.put_file(file).await?;
                println!("{}", cid);
            }

            Commands::Get {
                cid,
                output,
                timeout,
                node,
            } => {
                let cid: Cid = cid.parse()?;
                let node = Node::start(node.config(None)).await?;

                let data = node.fetch(&cid, Duration::from_secs(*timeout)).await?;
                node.shutdown();

                match output {
                    Some(path) => {
                        tokio::fs::write(path, &data).await?;
                        info!("Wrote {} bytes to {}", data.len(), path.display());
                    }
                    None => {
                        let mut stdout = tokio::io::stdout();
                        stdout.write_all(&data).await?;
                        stdout.flush().await?;
                    }
                }
            }
        }

        Ok(())
    }
}
