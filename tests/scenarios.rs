//! Full handshake-then-frames scenarios, exercising `Session` end to end.

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

use vncws::Config;

fn upgrade_request(protocol: Option<&str>) -> String {
  let mut req = "GET /websockify HTTP/1.1\r\n\
     Host: example.com\r\n\
     Origin: http://example.com\r\n\
     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
     Sec-WebSocket-Version: 13\r\n"
    .to_string();
  if let Some(p) = protocol {
    req.push_str(&format!("Sec-WebSocket-Protocol: {p}\r\n"));
  }
  req.push_str("\r\n");
  req
}

fn mask_payload(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
  let mut out = payload.to_vec();
  for (i, b) in out.iter_mut().enumerate() {
    *b ^= mask[i % 4];
  }
  out
}

fn masked_frame(fin: bool, opcode: u8, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
  let mut out = Vec::new();
  out.push((if fin { 0x80 } else { 0 }) | opcode);
  let len = payload.len();
  if len < 126 {
    out.push(0x80 | len as u8);
  } else {
    out.push(0x80 | 126);
    out.extend_from_slice(&(len as u16).to_be_bytes());
  }
  out.extend_from_slice(&mask);
  out.extend_from_slice(&mask_payload(payload, mask));
  out
}

#[tokio::test]
async fn frame_bytes_trailing_the_handshake_request_are_not_lost() {
  let (mut client, server) = duplex(8192);
  let cfg = Config::default();

  let driver = tokio::spawn(async move {
    let mut session = vncws::handshake::accept(server, &cfg).await.unwrap();
    let mut buf = [0u8; 64];
    let n = session.recv(&mut buf).await.unwrap();
    buf[..n].to_vec()
  });

  // The client writes the handshake request and the first frame in one
  // burst, as a real TCP sender legitimately could; the handshake's header
  // read must not swallow the frame bytes that follow the blank line.
  let mut burst = upgrade_request(Some("binary")).into_bytes();
  burst.extend_from_slice(&masked_frame(true, 0x2, b"Hello", [0x37, 0xFA, 0x21, 0x3D]));
  client.write_all(&burst).await.unwrap();

  let mut resp = vec![0u8; 256];
  let _ = client.read(&mut resp).await.unwrap();

  let received = driver.await.unwrap();
  assert_eq!(received, b"Hello");
}

#[tokio::test]
async fn echo_roundtrip_binary() {
  let (mut client, server) = duplex(8192);
  let cfg = Config::default();

  let driver = tokio::spawn(async move {
    let mut session = vncws::handshake::accept(server, &cfg).await.unwrap();
    let mut buf = [0u8; 64];
    let n = session.recv(&mut buf).await.unwrap();
    session.send(&buf[..n]).await.unwrap();
  });

  client
    .write_all(upgrade_request(Some("binary")).as_bytes())
    .await
    .unwrap();
  let mut resp = vec![0u8; 256];
  let _ = client.read(&mut resp).await.unwrap();

  client
    .write_all(&masked_frame(true, 0x2, b"ping-pong", [1, 2, 3, 4]))
    .await
    .unwrap();

  let mut frame = vec![0u8; 64];
  let n = client.read(&mut frame).await.unwrap();
  assert_eq!(frame[0], 0x82);
  assert_eq!(&frame[2..2 + 9], b"ping-pong");

  driver.await.unwrap();
}

#[tokio::test]
async fn ping_is_answered_with_pong_and_does_not_surface_as_data() {
  let (mut client, server) = duplex(8192);
  let cfg = Config::default();

  let driver = tokio::spawn(async move {
    let mut session = vncws::handshake::accept(server, &cfg).await.unwrap();
    let mut buf = [0u8; 64];
    let n = session.recv(&mut buf).await.unwrap();
    buf[..n].to_vec()
  });

  client
    .write_all(upgrade_request(Some("binary")).as_bytes())
    .await
    .unwrap();
  let mut resp = vec![0u8; 256];
  let _ = client.read(&mut resp).await.unwrap();

  let mut burst = masked_frame(true, 0x9, b"keepalive", [9, 9, 9, 9]);
  burst.extend_from_slice(&masked_frame(true, 0x2, b"real data", [1, 1, 1, 1]));
  client.write_all(&burst).await.unwrap();

  let mut pong_frame = vec![0u8; 64];
  let n = client.read(&mut pong_frame).await.unwrap();
  assert_eq!(pong_frame[0], 0x8A); // fin + pong
  assert_eq!(&pong_frame[2..2 + 9], b"keepalive");

  let received = driver.await.unwrap();
  assert_eq!(received, b"real data");
}

#[tokio::test]
async fn close_frame_surfaces_as_connection_reset() {
  let (mut client, server) = duplex(8192);
  let cfg = Config::default();

  let driver = tokio::spawn(async move {
    let mut session = vncws::handshake::accept(server, &cfg).await.unwrap();
    let mut buf = [0u8; 64];
    session.recv(&mut buf).await
  });

  client
    .write_all(upgrade_request(Some("binary")).as_bytes())
    .await
    .unwrap();
  let mut resp = vec![0u8; 256];
  let _ = client.read(&mut resp).await.unwrap();

  let mut payload = vec![0x03, 0xE9]; // 1001, going away
  payload.extend_from_slice(b"done");
  client
    .write_all(&masked_frame(true, 0x8, &payload, [5, 5, 5, 5]))
    .await
    .unwrap();

  let result = driver.await.unwrap();
  match result {
    Err(vncws::RecvError::ConnectionReset { code, reason }) => {
      assert_eq!(code, Some(1001));
      assert_eq!(reason, "done");
    }
    other => panic!("expected ConnectionReset, got {other:?}"),
  }
}

#[tokio::test]
async fn legacy_base64_subprotocol_roundtrip() {
  let (mut client, server) = duplex(8192);
  let cfg = Config::default();

  let driver = tokio::spawn(async move {
    let mut session = vncws::handshake::accept(server, &cfg).await.unwrap();
    let mut buf = [0u8; 64];
    let n = session.recv(&mut buf).await.unwrap();
    session.send(&buf[..n]).await.unwrap();
  });

  client
    .write_all(upgrade_request(Some("base64")).as_bytes())
    .await
    .unwrap();
  let mut resp = vec![0u8; 256];
  let _ = client.read(&mut resp).await.unwrap();

  use base64::Engine;
  let encoded = base64::engine::general_purpose::STANDARD.encode(b"raw bytes");
  client
    .write_all(&masked_frame(true, 0x1, encoded.as_bytes(), [2, 4, 6, 8]))
    .await
    .unwrap();

  let mut frame = vec![0u8; 128];
  let n = client.read(&mut frame).await.unwrap();
  assert_eq!(frame[0], 0x81); // fin + text
  let len = frame[1] as usize;
  let decoded = base64::engine::general_purpose::STANDARD
    .decode(&frame[2..2 + len])
    .unwrap();
  assert_eq!(decoded, b"raw bytes");

  driver.await.unwrap();
}
