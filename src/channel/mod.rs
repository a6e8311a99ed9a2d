//! Device Channel - Persistent Ordered Message Stream
//!
//! One long-lived WebSocket connection between the development host and a
//! device. Either side may hold a `DeviceChannel`:
//! - Device: [`DeviceChannel::connect`] dials the host endpoint
//! - Host: [`server::HostListener`] accepts and attaches the stream
//!
//! # Architecture
//!
//! ```text
//!            send() ──lock──┐
//!                           ▼
//! peer ◄──── WebSocket<TcpStream> (non-blocking after handshake)
//!                           │
//!            reader thread ─┘──► decode ──► callback (in arrival order)
//! ```
//!
//! Undecodable frames are logged and skipped; the connection stays up. A
//! stream error marks the channel closed and the owner must reconnect.
//!
//! Every attached socket gets a new generation. A reader only touches the
//! socket while its generation is current, so a reader left over from a
//! previous connection exits instead of racing the new one.

pub mod message;
pub mod server;

use std::{
    io::ErrorKind,
    net::TcpStream,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;
use tungstenite::{WebSocket, protocol::Message};

pub use message::{
    DecodeError, EvalOutcome, EvalRequest, EvalResult, MessageKind, WireMessage,
};

/// Idle poll interval of the reader thread.
const READ_POLL: Duration = Duration::from_millis(5);

/// Receives every decoded inbound message.
pub type MessageCallback = Arc<dyn Fn(WireMessage) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with {addr} failed: {message}")]
    Handshake { addr: String, message: String },

    #[error("channel is closed")]
    Closed,

    #[error("failed to encode message")]
    Encode(#[from] serde_json::Error),

    #[error("stream error")]
    Stream(#[from] tungstenite::Error),
}

/// Cheaply cloneable handle to one connection.
#[derive(Clone)]
pub struct DeviceChannel {
    shared: Arc<Shared>,
}

struct Shared {
    socket: Mutex<Option<WebSocket<TcpStream>>>,
    /// Bumped under the socket lock on every attach and close.
    generation: AtomicU64,
    open: AtomicBool,
    callback: MessageCallback,
    /// Serializes connect attempts.
    connecting: Mutex<()>,
}

impl DeviceChannel {
    /// Create an unconnected channel delivering inbound messages to `callback`.
    pub fn new(callback: impl Fn(WireMessage) + Send + Sync + 'static) -> Self {
        Self::with_callback(Arc::new(callback))
    }

    pub(crate) fn with_callback(callback: MessageCallback) -> Self {
        Self {
            shared: Arc::new(Shared {
                socket: Mutex::new(None),
                generation: AtomicU64::new(0),
                open: AtomicBool::new(false),
                callback,
                connecting: Mutex::new(()),
            }),
        }
    }

    /// Dial the host. A second call while connected is a no-op.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), ChannelError> {
        let _guard = self.shared.connecting.lock();
        if self.is_open() {
            return Ok(());
        }

        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr).map_err(|source| ChannelError::Connect {
            addr: addr.clone(),
            source,
        })?;
        let _ = stream.set_nodelay(true);

        // Keep blocking mode during handshake, switch to non-blocking after
        let (ws, _response) = tungstenite::client(format!("ws://{addr}/"), stream).map_err(|e| {
            ChannelError::Handshake {
                addr: addr.clone(),
                message: e.to_string(),
            }
        })?;

        crate::debug!("channel"; "connected to {}", addr);
        self.attach(ws)
    }

    /// Take ownership of an established WebSocket and start reading.
    pub(crate) fn attach(&self, ws: WebSocket<TcpStream>) -> Result<(), ChannelError> {
        ws.get_ref()
            .set_nonblocking(true)
            .map_err(|e| ChannelError::Stream(tungstenite::Error::Io(e)))?;

        let generation = {
            let mut socket = self.shared.socket.lock();
            *socket = Some(ws);
            self.shared.open.store(true, Ordering::SeqCst);
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("channel-reader".into())
            .spawn(move || reader_loop(&shared, generation))
            .map_err(|e| ChannelError::Stream(tungstenite::Error::Io(e)))?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Serialize and write one message.
    pub fn send(&self, message: &WireMessage) -> Result<(), ChannelError> {
        self.send_text(message.to_json()?)
    }

    fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let mut socket = self.shared.socket.lock();
        let ws = socket.as_mut().ok_or(ChannelError::Closed)?;

        let mut result = ws.send(Message::Text(text.into()));
        // A would-block write stays buffered inside the socket; keep flushing
        while let Err(tungstenite::Error::Io(ref e)) = result
            && e.kind() == ErrorKind::WouldBlock
        {
            std::thread::sleep(Duration::from_millis(1));
            result = ws.flush();
        }

        result.map_err(|e| {
            self.shared.open.store(false, Ordering::SeqCst);
            ChannelError::from(e)
        })
    }

    /// Close the connection; the reader thread stops on its next poll.
    pub fn close(&self) {
        let mut socket = self.shared.socket.lock();
        if !self.shared.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut ws) = socket.take() {
            let _ = ws.close(None);
            let _ = ws.flush();
        }
    }
}

fn reader_loop(shared: &Shared, generation: u64) {
    loop {
        let frame = {
            let mut socket = shared.socket.lock();
            if shared.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            let Some(ws) = socket.as_mut() else {
                break;
            };
            ws.read()
        };

        match frame {
            Ok(Message::Text(text)) => deliver(shared, text.as_str()),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => deliver(shared, text),
                Err(e) => crate::log!("channel"; "dropping binary frame: {}", e),
            },
            Ok(Message::Close(_)) => {
                crate::debug!("channel"; "peer closed the connection");
                mark_closed(shared, generation);
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(READ_POLL);
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                mark_closed(shared, generation);
            }
            Err(e) => {
                crate::log!("channel"; "connection lost: {}", e);
                mark_closed(shared, generation);
            }
        }
    }
}

fn deliver(shared: &Shared, text: &str) {
    match WireMessage::from_json(text) {
        Ok(message) => (shared.callback)(message),
        Err(e) => crate::log!("channel"; "dropping frame: {}", e),
    }
}

/// Close the connection of `generation` unless a newer one replaced it.
fn mark_closed(shared: &Shared, generation: u64) {
    let mut socket = shared.socket.lock();
    if shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    shared.generation.fetch_add(1, Ordering::SeqCst);
    shared.open.store(false, Ordering::SeqCst);
    socket.take();
}
