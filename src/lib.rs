//! _vncws_ is a server-side RFC 6455 WebSocket transport adapter for
//! byte-stream payloads (originally the websockets.c/ws_decode.c layer of a
//! VNC/RFB server).
//!
//! It terminates the WebSocket opening handshake — including the legacy
//! Flash cross-domain-policy probe and an optional TLS-wrapped connection —
//! and exposes the result as a plain byte stream: [`Session::recv`] /
//! [`Session::send`] move application payload in and out without the caller
//! ever seeing frame headers, masking, or fragmentation.
//!
//! ```no_run
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:5900").await?;
//! let cfg = vncws::Config::default();
//!
//! loop {
//!     let (socket, _) = listener.accept().await?;
//!     let cfg = cfg.clone();
//!     tokio::spawn(async move {
//!         #[cfg(not(feature = "tls"))]
//!         let result = vncws::handshake::accept(socket, &cfg).await;
//!         #[cfg(feature = "tls")]
//!         let result = vncws::handshake::accept(socket, &cfg, None).await;
//!
//!         let mut session = match result {
//!             Ok(session) => session,
//!             Err(_) => return,
//!         };
//!
//!         let mut buf = [0u8; 4096];
//!         loop {
//!             match session.recv(&mut buf).await {
//!                 Ok(0) | Err(_) => break,
//!                 Ok(n) => {
//!                     if session.send(&buf[..n]).await.is_err() {
//!                         break;
//!                     }
//!                 }
//!             }
//!         }
//!     });
//! }
//! # }
//! ```

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod session;

pub use config::Config;
pub use error::{HandshakeError, ProtocolViolation, RecvError, SendError};
pub use session::Session;
