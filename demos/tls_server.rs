//! TLS-terminating echo server, exercising the `0x16`/`0x80` ClientHello
//! dispatch path in `vncws::handshake::accept`.
//!
//! ```text
//! cargo run --example tls_server --features tls -- cert.pem key.pem
//! ```

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::{Certificate, PrivateKey, ServerConfig};

use vncws::Config;

fn load_certs(path: &str) -> anyhow::Result<Vec<Certificate>> {
  let mut reader = BufReader::new(File::open(path)?);
  Ok(
    rustls_pemfile::certs(&mut reader)?
      .into_iter()
      .map(Certificate)
      .collect(),
  )
}

fn load_key(path: &str) -> anyhow::Result<PrivateKey> {
  let mut reader = BufReader::new(File::open(path)?);
  let keys = rustls_pemfile::pkcs8_private_keys(&mut reader)?;
  let key = keys
    .into_iter()
    .next()
    .ok_or_else(|| anyhow::anyhow!("no private key found in {path}"))?;
  Ok(PrivateKey(key))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();

  let mut args = std::env::args().skip(1);
  let cert_path = args.next().ok_or_else(|| anyhow::anyhow!("usage: tls_server <cert.pem> <key.pem>"))?;
  let key_path = args.next().ok_or_else(|| anyhow::anyhow!("usage: tls_server <cert.pem> <key.pem>"))?;

  let certs = load_certs(&cert_path)?;
  let key = load_key(&key_path)?;

  let tls_config = ServerConfig::builder()
    .with_safe_defaults()
    .with_no_client_auth()
    .with_single_cert(certs, key)?;
  let acceptor = TlsAcceptor::from(Arc::new(tls_config));

  let listener = TcpListener::bind("127.0.0.1:5901").await?;
  tracing::info!(addr = %listener.local_addr()?, "listening (wss)");

  let cfg = Config::default();

  loop {
    let (socket, peer) = listener.accept().await?;
    let cfg = cfg.clone();
    let acceptor = acceptor.clone();
    tokio::spawn(async move {
      if let Err(e) = handle(socket, &cfg, &acceptor).await {
        tracing::warn!(%peer, error = %e, "connection ended");
      }
    });
  }
}

async fn handle(
  socket: tokio::net::TcpStream,
  cfg: &Config,
  acceptor: &TlsAcceptor,
) -> anyhow::Result<()> {
  let mut session = vncws::handshake::accept(socket, cfg, Some(acceptor)).await?;

  tracing::info!(path = %session.path(), "session established");

  let mut buf = vec![0u8; 16 * 1024];
  loop {
    match session.recv(&mut buf).await {
      Ok(0) => break,
      Ok(n) => session.send(&buf[..n]).await?,
      Err(vncws::RecvError::ConnectionReset { .. }) => break,
      Err(e) => return Err(e.into()),
    }
  }

  Ok(())
}
