//! Client side of a Rock connection: one TCP stream, a reader task that
//! demultiplexes responses by sn, and a writer task draining a bounded
//! queue.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    parking_lot::Mutex,
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
    },
    tokio_util::codec::Framed,
    tracing::{debug, warn},
};

use crate::{
    codec::RockCodec,
    error::RockError,
    message::{RockMessage, RockNotify, RockRequest, RockResponse},
};

/// Callback invoked for notify frames arriving on a client connection.
pub type NotifyFn = Arc<dyn Fn(RockNotify) + Send + Sync>;

/// Bound on queued outbound frames; enqueues past this fail fast with
/// [`RockError::QueueFull`] instead of blocking.
const WRITE_QUEUE_FRAMES: usize = 256;

type PendingTable = Arc<Mutex<HashMap<u32, oneshot::Sender<RockResponse>>>>;

pub struct RockConnection {
    peer: String,
    tx: mpsc::Sender<RockMessage>,
    pending: PendingTable,
    next_sn: AtomicU32,
    connected: Arc<AtomicBool>,
}

impl RockConnection {
    /// Connect to `addr` (`ip:port`). Reconnect is never attempted here;
    /// the pool opens a fresh connection on the next request instead.
    pub async fn connect(addr: &str) -> Result<Arc<Self>, RockError> {
        Self::connect_with(addr, None).await
    }

    /// Connect with a notify hook, for peers (like the registry) that push
    /// unsolicited updates.
    pub async fn connect_with(addr: &str, on_notify: Option<NotifyFn>) -> Result<Arc<Self>, RockError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RockError::ConnectFailed {
                addr: addr.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let (mut sink, mut frames) = Framed::new(stream, RockCodec::default()).split();
        let (tx, mut rx) = mpsc::channel::<RockMessage>(WRITE_QUEUE_FRAMES);
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let conn = Arc::new(Self {
            peer: addr.to_string(),
            tx,
            pending: Arc::clone(&pending),
            next_sn: AtomicU32::new(1),
            connected: Arc::clone(&connected),
        });

        // Writer: drain the queue until the socket dies or the connection
        // is dropped (sender closed).
        let writer_connected = Arc::clone(&connected);
        let writer_peer = conn.peer.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(peer = %writer_peer, error = %e, "rock write failed");
                    writer_connected.store(false, Ordering::Release);
                    break;
                }
            }
        });

        // Reader: demultiplex responses by sn; completes every outstanding
        // request on teardown.
        let reader_peer = conn.peer.clone();
        tokio::spawn(async move {
            loop {
                match frames.next().await {
                    Some(Ok(RockMessage::Response(rsp))) => {
                        let waiter = pending.lock().remove(&rsp.sn);
                        match waiter {
                            // A dropped receiver means the request timed
                            // out or was cancelled; the late response is
                            // discarded.
                            Some(tx) => {
                                let _ = tx.send(rsp);
                            },
                            None => {
                                warn!(peer = %reader_peer, sn = rsp.sn, "response for unknown sn, dropping");
                            },
                        }
                    },
                    Some(Ok(RockMessage::Notify(nty))) => {
                        if let Some(hook) = &on_notify {
                            hook(nty);
                        } else {
                            debug!(peer = %reader_peer, cmd = nty.cmd, "unsolicited notify ignored");
                        }
                    },
                    Some(Ok(RockMessage::Request(req))) => {
                        warn!(peer = %reader_peer, cmd = req.cmd, "request frame on client connection, dropping");
                    },
                    Some(Err(e)) => {
                        warn!(peer = %reader_peer, error = %e, "rock read failed");
                        break;
                    },
                    None => {
                        debug!(peer = %reader_peer, "rock peer closed");
                        break;
                    },
                }
            }
            connected.store(false, Ordering::Release);
            // Complete all outstanding requests with NOT_CONNECT by
            // dropping their completion handles.
            pending.lock().clear();
        });

        Ok(conn)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Send a request and await its response.
    ///
    /// Exactly one of three things completes the in-flight entry: the
    /// matching response, the deadline (entry removed, late response
    /// dropped), or connection teardown (surfaces as `NotConnected`).
    /// Dropping the returned future cancels the request; the frame, if
    /// already on the wire, produces a response that is dropped.
    pub async fn request(
        &self,
        cmd: u32,
        body: bytes::Bytes,
        timeout: Duration,
    ) -> Result<RockResponse, RockError> {
        if !self.is_connected() {
            return Err(RockError::NotConnected);
        }

        let sn = self.next_sn.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        self.pending.lock().insert(sn, done_tx);
        // Removes the entry on every exit path; a no-op when the reader
        // already completed it.
        let _slot = PendingSlot {
            pending: Arc::clone(&self.pending),
            sn,
        };

        let frame = RockMessage::Request(RockRequest { sn, cmd, body });
        match self.tx.try_send(frame) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(_)) => return Err(RockError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(RockError::NotConnected),
        }

        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(rsp)) => Ok(rsp),
            Ok(Err(_)) => Err(RockError::NotConnected),
            Err(_) => Err(RockError::Timeout(timeout)),
        }
    }

    /// Serialize `body` as JSON and send a request.
    pub async fn request_json<B: serde::Serialize>(
        &self,
        cmd: u32,
        body: &B,
        timeout: Duration,
    ) -> Result<RockResponse, RockError> {
        let body = bytes::Bytes::from(serde_json::to_vec(body)?);
        self.request(cmd, body, timeout).await
    }

    /// Fire-and-forget notify.
    pub fn notify(&self, nty: RockNotify) -> Result<(), RockError> {
        if !self.is_connected() {
            return Err(RockError::NotConnected);
        }
        match self.tx.try_send(RockMessage::Notify(nty)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(RockError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RockError::NotConnected),
        }
    }
}

struct PendingSlot {
    pending: PendingTable,
    sn: u32,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.sn);
    }
}
