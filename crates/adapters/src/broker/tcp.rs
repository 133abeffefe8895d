// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP broker client.
//!
//! One [`TcpSession`] per broker address. A background task owns the read
//! half and feeds an mpsc channel, which keeps [`BrokerSession::next_job`]
//! cancel safe: a frame that arrives while nobody is waiting stays buffered.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use super::frame::{Frame, FrameCodec};
use super::{Broker, BrokerError, BrokerSession, Delivery};

/// Inbound channel depth. Small on purpose: the broker assigns one job per
/// grab, so anything beyond a few frames means we are not keeping up.
const INBOUND_BUFFER: usize = 16;

/// Production broker connector.
#[derive(Clone, Default)]
pub struct TcpBroker;

impl TcpBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for TcpBroker {
    type Session = TcpSession;

    async fn connect(&self, address: &str) -> Result<TcpSession, BrokerError> {
        let stream =
            TcpStream::connect(address)
                .await
                .map_err(|e| BrokerError::ConnectFailed {
                    address: address.to_string(),
                    message: e.to_string(),
                })?;
        tracing::debug!(address, "broker connection established");

        let (sink, stream) = Framed::new(stream, FrameCodec).split();
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let reader = tokio::spawn(read_loop(stream, tx));

        Ok(TcpSession {
            address: address.to_string(),
            sink,
            rx,
            reader,
            pending: VecDeque::new(),
        })
    }
}

/// Forward every inbound frame (or the terminal error) into the channel.
async fn read_loop(
    mut stream: SplitStream<Framed<TcpStream, FrameCodec>>,
    tx: mpsc::Sender<Result<Frame, String>>,
) {
    while let Some(item) = stream.next().await {
        let forwarded = match item {
            Ok(frame) => tx.send(Ok(frame)).await,
            Err(e) => {
                let _ = tx.send(Err(e.to_string())).await;
                break;
            }
        };
        if forwarded.is_err() {
            // Session dropped, nobody is listening anymore.
            break;
        }
    }
}

/// One live connection to one broker address.
#[derive(Debug)]
pub struct TcpSession {
    address: String,
    sink: SplitSink<Framed<TcpStream, FrameCodec>, Frame>,
    rx: mpsc::Receiver<Result<Frame, String>>,
    reader: JoinHandle<()>,
    /// Assignments that arrived while another call was in flight.
    pending: VecDeque<Delivery>,
}

impl TcpSession {
    async fn send(&mut self, frame: Frame) -> Result<(), BrokerError> {
        self.sink
            .send(frame)
            .await
            .map_err(|e| BrokerError::Disconnected {
                address: self.address.clone(),
                message: e.to_string(),
            })
    }

    async fn recv(&mut self) -> Result<Frame, BrokerError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(message)) => Err(BrokerError::Disconnected {
                address: self.address.clone(),
                message,
            }),
            None => Err(BrokerError::Disconnected {
                address: self.address.clone(),
                message: "connection closed".to_string(),
            }),
        }
    }

    /// Pull frames that are already buffered, stashing assignments.
    fn drain_buffered(&mut self) -> Result<(), BrokerError> {
        loop {
            match self.rx.try_recv() {
                Ok(Ok(Frame::Assign {
                    handle,
                    queue,
                    payload,
                })) => self.pending.push_back(Delivery {
                    handle,
                    queue,
                    payload,
                }),
                Ok(Ok(_)) => {}
                Ok(Err(message)) => {
                    return Err(BrokerError::Disconnected {
                        address: self.address.clone(),
                        message,
                    })
                }
                Err(mpsc::error::TryRecvError::Empty) => return Ok(()),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(BrokerError::Disconnected {
                        address: self.address.clone(),
                        message: "connection closed".to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl BrokerSession for TcpSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn subscribe(&mut self, queues: &[String]) -> Result<(), BrokerError> {
        self.send(Frame::Subscribe {
            queues: queues.to_vec(),
        })
        .await
    }

    async fn next_job(&mut self) -> Result<Delivery, BrokerError> {
        self.drain_buffered()?;
        if let Some(delivery) = self.pending.pop_front() {
            return Ok(delivery);
        }

        self.send(Frame::Grab).await?;
        loop {
            match self.recv().await? {
                Frame::Assign {
                    handle,
                    queue,
                    payload,
                } => {
                    return Ok(Delivery {
                        handle,
                        queue,
                        payload,
                    })
                }
                // Nothing queued; the broker wakes us when work arrives.
                Frame::NoJob => {}
                Frame::Wake => self.send(Frame::Grab).await?,
                other => {
                    tracing::debug!(address = %self.address, frame = ?other, "ignoring frame");
                }
            }
        }
    }

    async fn respond(&mut self, handle: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.send(Frame::Respond {
            handle: handle.to_string(),
            payload: payload.to_vec(),
        })
        .await
    }

    async fn submit(&mut self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.send(Frame::Submit {
            queue: queue.to_string(),
            payload: payload.to_vec(),
        })
        .await
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.send(Frame::Shutdown).await {
            tracing::debug!(address = %self.address, error = %e, "shutdown frame not delivered");
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
        self.reader.abort();
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
#[path = "tcp_tests.rs"]
mod tests;
