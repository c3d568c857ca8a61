use crate::protocol::{decode_command, encode_event};
use crate::types::{Command, EngineEvent, SnapshotReply};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};
use sha1_smol::Sha1;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// WebSocket transport for browser synth clients.
///
/// - WebSocket upgrade → client receives every engine event as a JSON text
///   frame and may send commands back on the same socket
/// - plain HTTP → 426, this port only speaks WebSocket
///
/// Each client gets a reader thread that decodes its frames into
/// [`Command`]s; writes happen from the broadcast loop.
pub struct WsServer {
    event_rx: Receiver<EngineEvent>,
    command_tx: Sender<Command>,
    addr: String,
}

struct WsClient {
    id: u64,
    stream: TcpStream,
    alive: bool,
}

impl WsClient {
    fn new(id: u64, stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let _ = stream.set_write_timeout(Some(Duration::from_millis(50)));
        Self {
            id,
            stream,
            alive: true,
        }
    }

    fn send_frame(&mut self, frame: &[u8]) -> bool {
        match self.stream.write_all(frame) {
            Ok(()) => true,
            Err(_) => {
                self.alive = false;
                false
            }
        }
    }
}

type ClientList = Arc<Mutex<Vec<WsClient>>>;

/// Write a frame to one client. All socket writes go through the list lock
/// so replies never interleave with a broadcast.
fn send_to(clients: &ClientList, id: u64, frame: &[u8]) -> bool {
    let Ok(mut list) = clients.lock() else {
        return false;
    };
    match list.iter_mut().find(|c| c.id == id) {
        Some(client) => client.send_frame(frame),
        None => false,
    }
}

fn remove_client(clients: &ClientList, id: u64) {
    if let Ok(mut list) = clients.lock() {
        list.retain(|c| c.id != id);
    }
}

/// Parsed HTTP request, enough to decide WS vs HTTP.
struct HttpRequest {
    path: String,
    is_upgrade: bool,
    ws_key: Option<String>,
}

fn parse_request(stream: &mut TcpStream) -> Result<HttpRequest, String> {
    let mut reader = BufReader::new(stream.try_clone().map_err(|e| e.to_string())?);
    let mut path = String::from("/");
    let mut is_upgrade = false;
    let mut ws_key = None;
    let mut first = true;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(|e| e.to_string())?;
        let trimmed = line.trim().to_string();
        if n == 0 || trimmed.is_empty() {
            break;
        }
        if first {
            // "GET /path HTTP/1.1"
            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            if parts.len() >= 2 {
                path = parts[1].to_string();
            }
            first = false;
        }
        let lower = trimmed.to_lowercase();
        if lower.starts_with("upgrade:") && lower.contains("websocket") {
            is_upgrade = true;
        }
        if lower.starts_with("sec-websocket-key:") {
            ws_key = Some(trimmed[18..].trim().to_string());
        }
    }
    Ok(HttpRequest {
        path,
        is_upgrade,
        ws_key,
    })
}

/// `Sec-WebSocket-Accept` value for a client key (RFC 6455 §4.2.2).
pub fn accept_key(key: &str) -> String {
    let magic = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut hasher = Sha1::new();
    hasher.update(format!("{}{}", key, magic).as_bytes());
    base64_encode(&hasher.digest().bytes())
}

fn ws_handshake(stream: &mut TcpStream, key: &str) -> Result<(), String> {
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    );
    stream
        .write_all(response.as_bytes())
        .map_err(|e| e.to_string())
}

fn serve_upgrade_required(stream: &mut TcpStream) {
    let body = b"WebSocket endpoint: connect with a WebSocket client";
    let header = format!(
        "HTTP/1.1 426 Upgrade Required\r\n\
         Upgrade: websocket\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
}

fn base64_encode(data: &[u8]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::new();
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;
        result.push(CHARS[((triple >> 18) & 0x3F) as usize] as char);
        result.push(CHARS[((triple >> 12) & 0x3F) as usize] as char);
        if chunk.len() > 1 {
            result.push(CHARS[((triple >> 6) & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
        if chunk.len() > 2 {
            result.push(CHARS[(triple & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
    }
    result
}

// ─── Framing ────────────────────────────────────────────────────────────────

const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// Control frame payloads are capped by RFC 6455 §5.5.
const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Server → client text frame (unmasked, single fragment).
pub fn encode_text_frame(text: &str) -> Vec<u8> {
    encode_frame(OP_TEXT, text.as_bytes())
}

/// Server → client frame with FIN set.
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(10 + len);
    frame.push(0x80 | opcode);
    if len < 126 {
        frame.push(len as u8);
    } else if len < 65536 {
        frame.push(126);
        frame.push((len >> 8) as u8);
        frame.push((len & 0xFF) as u8);
    } else {
        frame.push(127);
        for i in (0..8).rev() {
            frame.push(((len >> (i * 8)) & 0xFF) as u8);
        }
    }
    frame.extend_from_slice(payload);
    frame
}

/// A frame received from a client.
#[derive(Debug, PartialEq)]
pub enum ClientFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Payload to echo back in the pong.
    Ping(Vec<u8>),
    Pong,
    Close,
}

/// Commands are tiny; anything bigger is a misbehaving client.
const MAX_CLIENT_PAYLOAD: u64 = 1 << 20;

/// Read one frame from a client stream, unmasking the payload.
/// Continuation frames are not reassembled; browsers don't fragment
/// small text messages.
pub fn read_client_frame<R: Read>(r: &mut R) -> Result<ClientFrame, String> {
    let mut head = [0u8; 2];
    r.read_exact(&mut head).map_err(|e| e.to_string())?;
    let opcode = head[0] & 0x0F;
    let masked = head[1] & 0x80 != 0;
    let mut len = (head[1] & 0x7F) as u64;
    if len == 126 {
        let mut ext = [0u8; 2];
        r.read_exact(&mut ext).map_err(|e| e.to_string())?;
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        r.read_exact(&mut ext).map_err(|e| e.to_string())?;
        len = u64::from_be_bytes(ext);
    }
    if len > MAX_CLIENT_PAYLOAD {
        return Err(format!("frame too large: {} bytes", len));
    }
    if opcode & 0x8 != 0 && len > MAX_CONTROL_PAYLOAD {
        return Err(format!("control frame too large: {} bytes", len));
    }

    let mut mask = [0u8; 4];
    if masked {
        r.read_exact(&mut mask).map_err(|e| e.to_string())?;
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).map_err(|e| e.to_string())?;
    if masked {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
    }

    match opcode {
        OP_TEXT => String::from_utf8(payload)
            .map(ClientFrame::Text)
            .map_err(|e| e.to_string()),
        OP_BINARY => Ok(ClientFrame::Binary(payload)),
        OP_CLOSE => Ok(ClientFrame::Close),
        OP_PING => Ok(ClientFrame::Ping(payload)),
        OP_PONG => Ok(ClientFrame::Pong),
        other => Err(format!("unsupported opcode 0x{:X}", other)),
    }
}

/// How long a new client waits for its state snapshot.
const SNAPSHOT_WAIT: Duration = Duration::from_millis(500);

/// Ask the engine for the current state and send it to this client only.
fn send_snapshot(id: u64, clients: &ClientList, command_tx: &Sender<Command>) {
    let (reply_tx, reply_rx) = bounded(1);
    if command_tx
        .send(Command::Connect(Some(SnapshotReply(reply_tx))))
        .is_err()
    {
        return;
    }
    match reply_rx.recv_timeout(SNAPSHOT_WAIT) {
        Ok(event) => match encode_event(&event) {
            Ok(json) => {
                send_to(clients, id, &encode_text_frame(&json));
            }
            Err(e) => warn!("JSON serialize error: {}", e),
        },
        Err(_) => debug!("client {}: no state snapshot", id),
    }
}

/// Pump one client's inbound frames into the command channel until it
/// closes or errors, answering pings and the closing handshake.
fn client_reader(
    id: u64,
    mut stream: TcpStream,
    clients: ClientList,
    command_tx: Sender<Command>,
) {
    send_snapshot(id, &clients, &command_tx);
    loop {
        match read_client_frame(&mut stream) {
            Ok(ClientFrame::Text(text)) => match decode_command(&text) {
                Ok(cmd) => {
                    debug!("client {} → {:?}", id, cmd);
                    if command_tx.send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("client {}: ignoring message: {}", id, e),
            },
            Ok(ClientFrame::Ping(payload)) => {
                send_to(&clients, id, &encode_frame(OP_PONG, &payload));
            }
            Ok(ClientFrame::Close) => {
                send_to(&clients, id, &encode_frame(OP_CLOSE, &[]));
                break;
            }
            Ok(ClientFrame::Binary(_)) | Ok(ClientFrame::Pong) => {}
            Err(e) => {
                debug!("client {} read ended: {}", id, e);
                break;
            }
        }
    }
    remove_client(&clients, id);
    info!("WebSocket client {} disconnected", id);
}

impl WsServer {
    pub fn new(event_rx: Receiver<EngineEvent>, command_tx: Sender<Command>, addr: String) -> Self {
        Self {
            event_rx,
            command_tx,
            addr,
        }
    }

    /// Run the server. Blocks the calling thread until the event channel closes.
    pub fn run(self) {
        let clients: ClientList = Arc::new(Mutex::new(Vec::new()));

        let listener = match TcpListener::bind(&self.addr) {
            Ok(l) => l,
            Err(e) => {
                error!("Server failed to bind {}: {}", self.addr, e);
                return;
            }
        };
        info!("WebSocket server listening on ws://{}", self.addr);

        let accept_clients = clients.clone();
        let command_tx = self.command_tx.clone();
        thread::Builder::new()
            .name("ws-accept".into())
            .spawn(move || {
                let mut next_id = 0u64;
                for stream in listener.incoming() {
                    match stream {
                        Ok(mut stream) => {
                            next_id += 1;
                            let id = next_id;
                            let cl = accept_clients.clone();
                            let tx = command_tx.clone();
                            // Short-lived thread per connection; WS connections
                            // stay on as the client's reader.
                            thread::spawn(move || match parse_request(&mut stream) {
                                Ok(req) if req.is_upgrade => {
                                    let Some(key) = req.ws_key else {
                                        warn!("Upgrade request without Sec-WebSocket-Key");
                                        return;
                                    };
                                    if let Err(e) = ws_handshake(&mut stream, &key) {
                                        warn!("WS handshake failed: {}", e);
                                        return;
                                    }
                                    let reader = match stream.try_clone() {
                                        Ok(r) => r,
                                        Err(e) => {
                                            warn!("WS clone failed: {}", e);
                                            return;
                                        }
                                    };
                                    info!("WebSocket client {} connected ({})", id, req.path);
                                    if let Ok(mut list) = cl.lock() {
                                        list.push(WsClient::new(id, stream));
                                    }
                                    client_reader(id, reader, cl, tx);
                                }
                                Ok(_) => serve_upgrade_required(&mut stream),
                                Err(e) => warn!("Request parse error: {}", e),
                            });
                        }
                        Err(e) => warn!("TCP accept error: {}", e),
                    }
                }
            })
            .expect("spawn ws-accept thread");

        // Broadcast loop
        let mut sent: u64 = 0;
        for event in self.event_rx.iter() {
            let json = match encode_event(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("JSON serialize error: {}", e);
                    continue;
                }
            };

            let Ok(mut cl) = clients.lock() else {
                error!("Client list poisoned; stopping broadcast");
                break;
            };
            let frame = encode_text_frame(&json);
            for client in cl.iter_mut() {
                if !client.send_frame(&frame) {
                    info!("Dropping WebSocket client {}", client.id);
                }
            }
            cl.retain(|c| c.alive);
            sent += 1;
        }
        info!("WebSocket server shutting down after {} events", sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn masked_frame(opcode: u8, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let mut f = vec![0x80 | opcode];
        if payload.len() < 126 {
            f.push(0x80 | payload.len() as u8);
        } else {
            f.push(0x80 | 126);
            f.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        f.extend_from_slice(&mask);
        f.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        f
    }

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_base64_padding() {
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b""), "");
    }

    #[test]
    fn test_text_frame_header_lengths() {
        let short = encode_text_frame("hi");
        assert_eq!(&short[..2], &[0x81, 2]);
        let medium = encode_text_frame(&"x".repeat(300));
        assert_eq!(&medium[..4], &[0x81, 126, 0x01, 0x2C]);
        assert_eq!(medium.len(), 304);
    }

    #[test]
    fn test_read_masked_text() {
        let msg = r#"{"event":"set_mutation","data":{"value":50}}"#;
        let bytes = masked_frame(0x1, msg.as_bytes(), [0x12, 0x34, 0x56, 0x78]);
        let frame = read_client_frame(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(frame, ClientFrame::Text(msg.to_string()));
    }

    #[test]
    fn test_read_extended_length() {
        let msg = "y".repeat(200);
        let bytes = masked_frame(0x1, msg.as_bytes(), [1, 2, 3, 4]);
        let frame = read_client_frame(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(frame, ClientFrame::Text(msg));
    }

    #[test]
    fn test_read_control_frames() {
        let close = masked_frame(0x8, &[], [9, 9, 9, 9]);
        assert_eq!(read_client_frame(&mut Cursor::new(close)), Ok(ClientFrame::Close));
        let ping = masked_frame(0x9, b"p", [0, 0, 0, 0]);
        assert_eq!(
            read_client_frame(&mut Cursor::new(ping)),
            Ok(ClientFrame::Ping(b"p".to_vec()))
        );
    }

    #[test]
    fn test_oversized_control_frame_rejected() {
        let ping = masked_frame(0x9, &[0u8; 126], [1, 2, 3, 4]);
        assert!(read_client_frame(&mut Cursor::new(ping)).is_err());
    }

    #[test]
    fn test_pong_frame_echoes_payload() {
        assert_eq!(encode_frame(OP_PONG, b"abc"), vec![0x8A, 3, b'a', b'b', b'c']);
        assert_eq!(encode_frame(OP_CLOSE, &[]), vec![0x88, 0]);
    }

    /// Connected (server side, client side) socket pair on loopback.
    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        (server, client)
    }

    #[test]
    fn test_client_session_snapshot_ping_close() {
        let (server, mut client) = socket_pair();
        let clients: ClientList = Arc::new(Mutex::new(Vec::new()));
        let reader = server.try_clone().unwrap();
        clients.lock().unwrap().push(WsClient::new(7, server));
        let (command_tx, command_rx) = crossbeam_channel::unbounded();

        let cl = clients.clone();
        let session = thread::spawn(move || client_reader(7, reader, cl, command_tx));

        // The engine side answers the connect on the private reply channel.
        match command_rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Command::Connect(Some(SnapshotReply(tx))) => tx
                .send(EngineEvent::StateChange {
                    state: crate::types::ArrangementState::Drop,
                    bar: 100,
                })
                .unwrap(),
            other => panic!("expected connect with reply, got {:?}", other),
        }
        match read_client_frame(&mut client).unwrap() {
            ClientFrame::Text(json) => {
                assert!(json.contains("state_change"));
                assert!(json.contains("\"bar\":100"));
            }
            other => panic!("expected snapshot text, got {:?}", other),
        }

        client
            .write_all(&masked_frame(0x9, b"hb", [5, 6, 7, 8]))
            .unwrap();
        assert_eq!(read_client_frame(&mut client), Ok(ClientFrame::Pong));

        client.write_all(&masked_frame(0x8, &[], [1, 1, 1, 1])).unwrap();
        assert_eq!(read_client_frame(&mut client), Ok(ClientFrame::Close));

        session.join().unwrap();
        assert!(clients.lock().unwrap().is_empty());
    }

    #[test]
    fn test_read_truncated_frame_errors() {
        let mut bytes = masked_frame(0x1, b"hello", [1, 1, 1, 1]);
        bytes.truncate(bytes.len() - 2);
        assert!(read_client_frame(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_server_frame_readable_as_unmasked() {
        let bytes = encode_text_frame("{\"event\":\"trigger_sidechain\",\"data\":{}}");
        let frame = read_client_frame(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Text("{\"event\":\"trigger_sidechain\",\"data\":{}}".to_string())
        );
    }
}
