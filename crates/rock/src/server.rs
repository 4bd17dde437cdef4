//! Server side: accept loop plus tagged cmd dispatch.
//!
//! Handlers are registered per cmd and run concurrently; responses go out
//! in completion order, which is why the wire offers no cross-request
//! ordering.

use std::{collections::HashMap, future::Future, net::SocketAddr, pin::Pin, sync::Arc};

use {
    futures::{SinkExt, StreamExt},
    tokio::{net::TcpListener, sync::mpsc},
    tokio_util::codec::Framed,
    tracing::{debug, warn},
};

use crate::{
    codec::RockCodec,
    message::{RockMessage, RockNotify, RockRequest, RockResponse},
};

const WRITE_QUEUE_FRAMES: usize = 256;

/// Result code for a cmd no handler claims.
const RESULT_UNKNOWN_CMD: i32 = 404;

// ── Peer handle ──────────────────────────────────────────────────────────────

/// Handle to a connected client session, usable from handlers to push
/// notify frames (e.g. registry change broadcasts).
#[derive(Clone)]
pub struct RockPeer {
    id: u64,
    addr: SocketAddr,
    tx: mpsc::Sender<RockMessage>,
}

impl RockPeer {
    /// Process-local session id, stable for the life of the connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Push a notify to this peer. Returns false when the session is gone
    /// or its write queue is full.
    pub fn notify(&self, nty: RockNotify) -> bool {
        self.tx.try_send(RockMessage::Notify(nty)).is_ok()
    }
}

// ── Server ───────────────────────────────────────────────────────────────────

pub type HandlerFuture = Pin<Box<dyn Future<Output = RockResponse> + Send>>;
type Handler = Box<dyn Fn(RockRequest, RockPeer) -> HandlerFuture + Send + Sync>;
type NotifyHandler = Box<dyn Fn(RockNotify, RockPeer) + Send + Sync>;
type DisconnectHandler = Box<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
pub struct RockServer {
    handlers: HashMap<u32, Handler>,
    on_notify: Option<NotifyHandler>,
    on_disconnect: Option<DisconnectHandler>,
}

impl RockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `cmd`. Later registrations replace earlier
    /// ones.
    pub fn handle<F, Fut>(mut self, cmd: u32, f: F) -> Self
    where
        F: Fn(RockRequest, RockPeer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RockResponse> + Send + 'static,
    {
        self.handlers.insert(cmd, Box::new(move |req, peer| Box::pin(f(req, peer))));
        self
    }

    pub fn on_notify(mut self, f: impl Fn(RockNotify, RockPeer) + Send + Sync + 'static) -> Self {
        self.on_notify = Some(Box::new(f));
        self
    }

    /// Called with the peer id after a session ends, whatever the cause.
    pub fn on_disconnect(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    async fn dispatch(&self, req: RockRequest, peer: RockPeer) -> RockResponse {
        match self.handlers.get(&req.cmd) {
            Some(handler) => handler(req, peer).await,
            None => {
                debug!(cmd = req.cmd, "no handler for cmd");
                RockResponse::error(req.sn, RESULT_UNKNOWN_CMD, "unknown cmd")
            },
        }
    }
}

// ── Listener ─────────────────────────────────────────────────────────────────

/// A bound TCP listener, separate from the server so callers can learn the
/// local address (ephemeral ports in tests, advertised addrs in prod)
/// before wiring handlers.
pub struct RockListener {
    listener: TcpListener,
}

impl RockListener {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop forever; one task per session.
    pub async fn serve(self, server: RockServer) -> std::io::Result<()> {
        let server = Arc::new(server);
        let mut peer_seq: u64 = 0;
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let _ = stream.set_nodelay(true);
            peer_seq += 1;
            let peer_id = peer_seq;
            debug!(peer = %addr, id = peer_id, "rock session accepted");
            tokio::spawn(serve_session(stream, addr, peer_id, Arc::clone(&server)));
        }
    }
}

async fn serve_session(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    peer_id: u64,
    server: Arc<RockServer>,
) {
    let (mut sink, mut frames) = Framed::new(stream, RockCodec::default()).split();
    let (tx, mut rx) = mpsc::channel::<RockMessage>(WRITE_QUEUE_FRAMES);
    let peer = RockPeer {
        id: peer_id,
        addr,
        tx,
    };

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(item) = frames.next().await {
        match item {
            Ok(RockMessage::Request(req)) => {
                let server = Arc::clone(&server);
                let peer = peer.clone();
                tokio::spawn(async move {
                    let rsp = server.dispatch(req, peer.clone()).await;
                    let _ = peer.tx.send(RockMessage::Response(rsp)).await;
                });
            },
            Ok(RockMessage::Notify(nty)) => match &server.on_notify {
                Some(handler) => handler(nty, peer.clone()),
                None => debug!(peer = %addr, cmd = nty.cmd, "notify ignored"),
            },
            Ok(RockMessage::Response(rsp)) => {
                warn!(peer = %addr, sn = rsp.sn, "response frame from client, dropping");
            },
            Err(e) => {
                warn!(peer = %addr, error = %e, "rock session read failed");
                break;
            },
        }
    }

    writer.abort();
    if let Some(hook) = &server.on_disconnect {
        hook(peer_id);
    }
    debug!(peer = %addr, id = peer_id, "rock session closed");
}
