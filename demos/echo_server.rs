//! Minimal plain-TCP echo server built on `vncws`.
//!
//! ```text
//! cargo run --example echo_server
//! ```

use tokio::net::TcpListener;
use vncws::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();

  let listener = TcpListener::bind("127.0.0.1:5900").await?;
  tracing::info!(addr = %listener.local_addr()?, "listening");

  let cfg = Config::default();

  loop {
    let (socket, peer) = listener.accept().await?;
    let cfg = cfg.clone();
    tokio::spawn(async move {
      if let Err(e) = handle(socket, &cfg).await {
        tracing::warn!(%peer, error = %e, "connection ended");
      }
    });
  }
}

async fn handle(socket: tokio::net::TcpStream, cfg: &Config) -> anyhow::Result<()> {
  #[cfg(not(feature = "tls"))]
  let mut session = vncws::handshake::accept(socket, cfg).await?;
  #[cfg(feature = "tls")]
  let mut session = vncws::handshake::accept(socket, cfg, None).await?;

  tracing::info!(path = %session.path(), "session established");

  let mut buf = vec![0u8; 16 * 1024];
  loop {
    match session.recv(&mut buf).await {
      Ok(0) => break,
      Ok(n) => session.send(&buf[..n]).await?,
      Err(vncws::RecvError::ConnectionReset { code, reason }) => {
        tracing::info!(?code, %reason, "peer closed");
        break;
      }
      Err(e) => return Err(e.into()),
    }
  }

  Ok(())
}
