//! The wire layer: length-prefixed framed messages over TCP.
//!
//! Each frame is a `u32` big-endian length followed by a bincode-encoded
//! [`Message`].  Connections open with a `Status` handshake (10 s
//! deadline, chain ids must agree) and then exchange one logical message
//! per frame; sync and block transfers run under a 30 s deadline, pings
//! under 10 s.  Inbound blocks and transactions route into the gossip
//! engine; outbound, [`Hub`] implements the core's `Relay` contract and
//! fans announcements out to every connected peer.
//!
//! Peer discovery is out of scope: peers are the configured seeds
//! (`SEED_NODES`) plus whoever dials in.

pub mod message;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use cerera_core::gossip::Relay;
use cerera_core::{Block, Chain, Gossip, Transaction};

pub use message::{Message, WireBlock};

/// Handshake and ping deadline.
pub const SHORT_DEADLINE: Duration = Duration::from_secs(10);

/// Sync and block-transfer deadline.
pub const LONG_DEADLINE: Duration = Duration::from_secs(30);

/// Upper bound on a single frame.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Environment variable naming comma-separated seed addresses.
pub const SEED_NODES_ENV: &str = "SEED_NODES";

/// Node connectivity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Listen only.
    Server,
    /// Dial seeds only.
    Client,
    /// Listen and dial.
    P2p,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Mode, String> {
        match s {
            "server" => Ok(Mode::Server),
            "client" => Ok(Mode::Client),
            "p2p" => Ok(Mode::P2p),
            other => Err(format!("unknown mode {other:?} (server|client|p2p)")),
        }
    }
}

/// Seed addresses from [`SEED_NODES_ENV`].
pub fn seed_nodes_from_env() -> Vec<String> {
    std::env::var(SEED_NODES_ENV)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn io_err(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> std::io::Result<()> {
    let payload = bincode::serialize(msg).map_err(|e| io_err(format!("encode: {e}")))?;
    if payload.len() > MAX_FRAME {
        return Err(io_err(format!("frame of {} bytes exceeds cap", payload.len())));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Message> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME {
        return Err(io_err(format!("frame of {len} bytes exceeds cap")));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| io_err(format!("decode: {e}")))
}

type PeerMap = Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Message>>>>;

/// Outbound half of the wire layer; the core's broadcast contract.
pub struct Hub {
    peers: PeerMap,
    runtime: tokio::runtime::Handle,
}

impl Hub {
    fn fan_out(&self, msg: Message) {
        let peers = self.peers.clone();
        // Relay is called from synchronous core paths — the miner thread
        // included — so hop onto the runtime to reach the peer queues.
        self.runtime.spawn(async move {
            let mut peers = peers.lock().await;
            peers.retain(|addr, tx| {
                let alive = tx.send(msg.clone()).is_ok();
                if !alive {
                    log::debug!("net: dropping dead peer {addr}");
                }
                alive
            });
        });
    }
}

impl Relay for Hub {
    fn broadcast_block(&self, block: &Block) {
        self.fan_out(Message::NewBlock {
            block: WireBlock::from_block(block),
        });
    }

    fn broadcast_tx(&self, tx: &Transaction) {
        self.fan_out(Message::NewTx { tx: tx.encode() });
    }
}

/// A running wire layer.
pub struct Network {
    hub: Arc<Hub>,
    tasks: Vec<JoinHandle<()>>,
}

impl Network {
    /// Starts listening and/or dialing according to `mode`.
    pub async fn start(
        mode: Mode,
        port: u16,
        seeds: Vec<String>,
        chain: Arc<Chain>,
        gossip: Arc<Gossip>,
    ) -> std::io::Result<Network> {
        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let hub = Arc::new(Hub {
            peers: Arc::clone(&peers),
            runtime: tokio::runtime::Handle::current(),
        });
        let mut tasks = Vec::new();

        if matches!(mode, Mode::Server | Mode::P2p) {
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            log::info!("net: listening on port {port}");
            let peers = Arc::clone(&peers);
            let chain = Arc::clone(&chain);
            let gossip = Arc::clone(&gossip);
            tasks.push(tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, addr)) => {
                            spawn_session(stream, addr, Arc::clone(&peers), Arc::clone(&chain), Arc::clone(&gossip));
                        }
                        Err(e) => {
                            log::warn!("net: accept failed: {e}");
                        }
                    }
                }
            }));
        }

        if matches!(mode, Mode::Client | Mode::P2p) {
            for seed in seeds {
                let peers = Arc::clone(&peers);
                let chain = Arc::clone(&chain);
                let gossip = Arc::clone(&gossip);
                tasks.push(tokio::spawn(async move {
                    match TcpStream::connect(&seed).await {
                        Ok(stream) => {
                            let addr = stream.peer_addr().unwrap_or_else(|_| {
                                SocketAddr::from(([0, 0, 0, 0], 0))
                            });
                            log::info!("net: connected to seed {seed}");
                            spawn_session(stream, addr, peers, chain, gossip);
                        }
                        Err(e) => log::warn!("net: dialing seed {seed} failed: {e}"),
                    }
                }));
            }
        }

        Ok(Network { hub, tasks })
    }

    /// The broadcast contract to hand the gossip engine.
    pub fn relay(&self) -> Arc<dyn Relay> {
        Arc::clone(&self.hub) as Arc<dyn Relay>
    }

    /// Tears the wire layer down; peer sessions die with their streams.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        log::info!("net: shut down");
    }
}

fn spawn_session(
    stream: TcpStream,
    addr: SocketAddr,
    peers: PeerMap,
    chain: Arc<Chain>,
    gossip: Arc<Gossip>,
) {
    tokio::spawn(async move {
        if let Err(e) = run_session(stream, addr, Arc::clone(&peers), chain, gossip).await {
            log::debug!("net: session with {addr} ended: {e}");
        }
        peers.lock().await.remove(&addr);
    });
}

async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    peers: PeerMap,
    chain: Arc<Chain>,
    gossip: Arc<Gossip>,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Status handshake, both directions, under the short deadline.
    let tip = chain.latest();
    let hello = Message::Status {
        chain_id: chain.chain_id(),
        height: tip.header.height,
        latest: tip.hash(),
    };
    timeout(SHORT_DEADLINE, write_frame(&mut writer, &hello))
        .await
        .map_err(|_| io_err("handshake write timed out".into()))??;
    let status = timeout(SHORT_DEADLINE, read_frame(&mut reader))
        .await
        .map_err(|_| io_err("handshake read timed out".into()))??;
    let peer_height = match status {
        Message::Status {
            chain_id, height, ..
        } => {
            if chain_id != chain.chain_id() {
                return Err(io_err(format!(
                    "peer {addr} is on chain {chain_id}, expected {}",
                    chain.chain_id()
                )));
            }
            height
        }
        other => {
            return Err(io_err(format!("peer {addr} opened with {other:?}")));
        }
    };
    log::info!("net: peer {addr} at height {peer_height}");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    peers.lock().await.insert(addr, out_tx.clone());

    // Catch up from a taller peer right after the handshake.
    if peer_height > chain.height() {
        let _ = out_tx.send(Message::SyncRequest {
            from_height: chain.height(),
        });
    }

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let deadline = match msg {
                Message::Ping { .. } | Message::Pong { .. } | Message::Status { .. } => {
                    SHORT_DEADLINE
                }
                _ => LONG_DEADLINE,
            };
            match timeout(deadline, write_frame(&mut writer, &msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::debug!("net: write failed: {e}");
                    break;
                }
                Err(_) => {
                    log::debug!("net: write timed out");
                    break;
                }
            }
        }
    });

    let peer = addr.to_string();
    loop {
        let msg = match read_frame(&mut reader).await {
            Ok(msg) => msg,
            Err(e) => {
                writer_task.abort();
                return Err(e);
            }
        };
        match msg {
            Message::Ping { nonce } => {
                let _ = out_tx.send(Message::Pong { nonce });
            }
            Message::Pong { nonce } => {
                log::trace!("net: pong {nonce} from {peer}");
            }
            Message::Status { height, .. } => {
                log::debug!("net: peer {peer} now at height {height}");
            }
            Message::NewTx { tx } => match Transaction::decode(&tx) {
                Ok(tx) => gossip.deliver_tx(tx, &peer),
                Err(e) => log::warn!("net: undecodable tx from {peer}: {e}"),
            },
            Message::NewBlock { block } => match block.into_block() {
                Ok(block) => gossip.deliver_block(block, &peer),
                Err(e) => log::warn!("net: undecodable block from {peer}: {e}"),
            },
            Message::SyncRequest { from_height } => {
                let mut blocks = Vec::new();
                let mut height = from_height.max(0) + 1;
                while let Some(block) = chain.by_height(height) {
                    blocks.push(WireBlock::from_block(&block));
                    height += 1;
                }
                let _ = out_tx.send(Message::SyncResponse { blocks });
            }
            Message::SyncResponse { blocks } | Message::Blocks { blocks } => {
                for wire in blocks {
                    match wire.into_block() {
                        Ok(block) => gossip.deliver_block(block, &peer),
                        Err(e) => log::warn!("net: undecodable block from {peer}: {e}"),
                    }
                }
            }
            Message::GetBlocks { hashes } => {
                let blocks = hashes
                    .iter()
                    .filter_map(|h| chain.by_hash(h))
                    .map(|b| WireBlock::from_block(&b))
                    .collect();
                let _ = out_tx.send(Message::Blocks { blocks });
            }
            Message::Vote { height, hash } => {
                log::debug!("net: vote for {hash} at height {height} from {peer}");
            }
        }
    }
}
