//! Rendezvous coordinators
//!
//! Every device in a multinode group runs its own dispatcher. The only
//! point where they meet is a barrier keyed by `(group, message id)`: a
//! call returns once `group_size` distinct clients have arrived.
//!
//! - [`InProcessCoordinator`] - all clients live in one process (tests,
//!   several jobs dispatched from one host)
//! - [`TcpCoordinator`] - JSON lines over TCP to a remote coordinator

use crate::error::{ProtocolError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, trace};

/// One client's arrival at a barrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierRequest {
    pub request: String,
    pub group_name: String,
    pub client_name: String,
    pub message_id: String,
    pub group_size: usize,
}

impl BarrierRequest {
    pub fn sync(
        group_name: impl Into<String>,
        client_name: impl Into<String>,
        message_id: impl Into<String>,
        group_size: usize,
    ) -> Self {
        Self {
            request: "lava_sync".to_string(),
            group_name: group_name.into(),
            client_name: client_name.into(),
            message_id: message_id.into(),
            group_size,
        }
    }
}

/// Coordinator reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    /// Everyone arrived
    Ack,
    /// Not everyone arrived yet, ask again later
    Wait,
    /// Request refused
    Nack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Reply {
    response: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Barrier service shared by the peers of one group
#[async_trait]
pub trait Coordinator: Send + Sync + std::fmt::Debug {
    /// Arrive at the barrier and wait for the rest of the group.
    ///
    /// Has no timeout of its own; the calling protocol bounds it.
    async fn barrier(&self, request: &BarrierRequest) -> Result<()>;
}

struct Barrier {
    arrived: BTreeSet<String>,
    count: watch::Sender<usize>,
}

/// Barrier for clients living in the same process
#[derive(Default)]
pub struct InProcessCoordinator {
    barriers: Mutex<HashMap<(String, String), Barrier>>,
}

impl InProcessCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clients that reached a barrier so far
    pub fn arrived(&self, group_name: &str, message_id: &str) -> Vec<String> {
        let barriers = self
            .barriers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        barriers
            .get(&(group_name.to_string(), message_id.to_string()))
            .map(|b| b.arrived.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for InProcessCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .barriers
            .lock()
            .map(|b| b.len())
            .unwrap_or_default();
        f.debug_struct("InProcessCoordinator")
            .field("barriers", &count)
            .finish()
    }
}

#[async_trait]
impl Coordinator for InProcessCoordinator {
    async fn barrier(&self, request: &BarrierRequest) -> Result<()> {
        let mut count = {
            let mut barriers = self
                .barriers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let barrier = barriers
                .entry((request.group_name.clone(), request.message_id.clone()))
                .or_insert_with(|| Barrier {
                    arrived: BTreeSet::new(),
                    count: watch::channel(0).0,
                });
            barrier.arrived.insert(request.client_name.clone());
            barrier.count.send_replace(barrier.arrived.len());
            barrier.count.subscribe()
        };

        debug!(
            group = %request.group_name,
            client = %request.client_name,
            message_id = %request.message_id,
            arrived = *count.borrow(),
            expected = request.group_size,
            "arrived at barrier"
        );

        count
            .wait_for(|arrived| *arrived >= request.group_size)
            .await
            .map_err(|_| ProtocolError::Transport("barrier dropped".to_string()))?;
        Ok(())
    }
}

/// JSON-lines client for a remote coordinator
///
/// Each attempt opens a connection, writes one request line and reads one
/// reply line. `wait` replies are retried after `poll_delay`.
#[derive(Debug, Clone)]
pub struct TcpCoordinator {
    address: String,
    poll_delay: Duration,
}

impl TcpCoordinator {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            poll_delay: Duration::from_secs(1),
        }
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn exchange(&self, request: &BarrierRequest) -> Result<Reply> {
        let stream = TcpStream::connect(&self.address).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        let read = reader.read_line(&mut reply).await?;
        if read == 0 {
            return Err(ProtocolError::Transport(format!(
                "{} closed the connection without replying",
                self.address
            )));
        }
        Ok(serde_json::from_str(reply.trim_end())?)
    }
}

#[async_trait]
impl Coordinator for TcpCoordinator {
    async fn barrier(&self, request: &BarrierRequest) -> Result<()> {
        loop {
            let reply = self.exchange(request).await?;
            match reply.response {
                Response::Ack => return Ok(()),
                Response::Wait => {
                    trace!(message_id = %request.message_id, "coordinator asked to wait");
                    tokio::time::sleep(self.poll_delay).await;
                }
                Response::Nack => {
                    return Err(ProtocolError::Rejected {
                        message_id: request.message_id.clone(),
                        reason: reply.message.unwrap_or_else(|| "nack".to_string()),
                    })
                }
            }
        }
    }
}
