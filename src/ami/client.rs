//! Administrative session seam.
//!
//! Decoding the manager protocol is not this crate's job. An [`AmiClient`]
//! owns the connection and pushes each decoded event into the
//! [`EventSink`] it was connected with. [`ChannelAmiClient`] is an
//! in-process client fed through a channel, for tests and for embedders
//! that decode AMI elsewhere.

use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::event::AmiEvent;
use super::sink::EventSink;
use crate::error::{Error, Result};

/// Where an instance's manager interface listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmiEndpoint {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for AmiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A connection to the manager interface of one instance.
#[async_trait]
pub trait AmiClient: Send + Sync {
    /// Establish the session and start delivering events into `sink`.
    async fn connect(&mut self, endpoint: AmiEndpoint, sink: EventSink) -> Result<()>;

    /// Tear the session down. Events already received must be delivered
    /// before this returns. Idempotent.
    async fn disconnect(&mut self);
}

/// Client that forwards events sent on an unbounded channel.
pub struct ChannelAmiClient {
    rx: Option<mpsc::UnboundedReceiver<AmiEvent>>,
    task: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
    endpoint: Option<AmiEndpoint>,
}

impl fmt::Debug for ChannelAmiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAmiClient")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.task.is_some())
            .finish()
    }
}

impl ChannelAmiClient {
    /// Create a client and the sender that feeds it.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedSender<AmiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Some(rx),
                task: None,
                endpoint: None,
            },
            tx,
        )
    }

    /// The endpoint passed to the last `connect`.
    #[must_use]
    pub fn endpoint(&self) -> Option<AmiEndpoint> {
        self.endpoint
    }
}

#[async_trait]
impl AmiClient for ChannelAmiClient {
    async fn connect(&mut self, endpoint: AmiEndpoint, sink: EventSink) -> Result<()> {
        let mut rx = self
            .rx
            .take()
            .ok_or_else(|| Error::ami("channel client already connected"))?;
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => {
                            sink.dispatch(&event);
                        },
                        None => break,
                    },
                    _ = &mut stop_rx => {
                        while let Ok(event) = rx.try_recv() {
                            sink.dispatch(&event);
                        }
                        break;
                    },
                }
            }
        });

        debug!(%endpoint, "AMI channel client connected");
        self.endpoint = Some(endpoint);
        self.task = Some((stop_tx, handle));
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some((stop_tx, handle)) = self.task.take() {
            let _ = stop_tx.send(());
            let _ = handle.await;
            debug!("AMI channel client disconnected");
        }
    }
}
