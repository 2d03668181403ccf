//! Cast V2 device connector.
//!
//! Each connection is owned by one worker thread holding a blocking TLS socket.
//! Async callers talk to it through a command channel and get replies on
//! oneshot channels, matched by `requestId`. Replies whose caller already gave
//! up (deadline) are dropped.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use prost::Message;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, SignatureScheme, StreamOwned};
use screencast_types::{DeviceStatus, PlayerState, PlayerStatus, ReceiverApp};
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::cast_channel::{CastMessage, cast_message};
use crate::device::{
    CastError, DeviceClient, DeviceConnector, FaultSignal, FaultTrigger, MediaResource,
    ReceiverPlayer, fault_channel,
};
use crate::timeout::NETWORK_DEADLINE;

const CAST_PORT: u16 = 8009;
const NAMESPACE_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
const NAMESPACE_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
const NAMESPACE_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
const NAMESPACE_MEDIA: &str = "urn:x-cast:com.google.cast.media";
const SENDER_ID: &str = "sender-0";
const RECEIVER_ID: &str = "receiver-0";
const PING_INTERVAL: Duration = Duration::from_secs(5);
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Receiver app session joined after LAUNCH.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AppSession {
    transport_id: String,
    session_id: String,
    display_name: Option<String>,
}

type Reply<T> = oneshot::Sender<Result<T, CastError>>;

enum Command {
    ReceiverStatus(Reply<DeviceStatus>),
    Launch { app_id: String, reply: Reply<AppSession> },
    Load { app: AppSession, media: MediaResource, reply: Reply<Option<PlayerStatus>> },
    MediaStatus { app: AppSession, reply: Reply<Option<PlayerStatus>> },
    Stop { app: AppSession, media_session_id: i64, reply: Reply<()> },
    Close,
}

enum Pending {
    ReceiverStatus(Reply<DeviceStatus>),
    Launch { app_id: String, reply: Reply<AppSession> },
    Media(Reply<Option<PlayerStatus>>),
    Stop(Reply<()>),
}

impl Pending {
    fn is_abandoned(&self) -> bool {
        match self {
            Pending::ReceiverStatus(reply) => reply.is_closed(),
            Pending::Launch { reply, .. } => reply.is_closed(),
            Pending::Media(reply) => reply.is_closed(),
            Pending::Stop(reply) => reply.is_closed(),
        }
    }

    fn fail(self, err: CastError) {
        match self {
            Pending::ReceiverStatus(reply) => {
                let _ = reply.send(Err(err));
            }
            Pending::Launch { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Pending::Media(reply) => {
                let _ = reply.send(Err(err));
            }
            Pending::Stop(reply) => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

struct CastConnection {
    stream: StreamOwned<ClientConnection, TcpStream>,
    /// Bytes of frames not yet complete; survive read timeouts.
    inbound: Vec<u8>,
}

impl CastConnection {
    fn connect(addr: SocketAddr, server_name: ServerName<'static>) -> std::io::Result<Self> {
        let root_store = rustls::RootCertStore::empty();
        let mut config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoCertificateVerification));
        let conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let stream = TcpStream::connect_timeout(&addr, NETWORK_DEADLINE)?;
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        stream.set_write_timeout(Some(Duration::from_secs(2)))?;
        Ok(Self {
            stream: StreamOwned::new(conn, stream),
            inbound: Vec::new(),
        })
    }

    fn send_json(
        &mut self,
        destination_id: &str,
        namespace: &str,
        payload: &Value,
    ) -> std::io::Result<()> {
        let buf = encode_frame(destination_id, namespace, payload)?;
        self.stream.write_all(&buf)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Next complete frame, or `None` when the read window closed first.
    fn read_message(&mut self) -> std::io::Result<Option<CastMessage>> {
        if let Some(msg) = take_frame(&mut self.inbound)? {
            return Ok(Some(msg));
        }
        let mut chunk = [0u8; 4096];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "receiver closed the socket",
            )),
            Ok(n) => {
                self.inbound.extend_from_slice(&chunk[..n]);
                take_frame(&mut self.inbound)
            }
            Err(err) if is_timeout(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn shutdown(&mut self) {
        self.stream.conn.send_close_notify();
        let _ = self.stream.flush();
        let _ = self.stream.sock.shutdown(std::net::Shutdown::Both);
    }
}

/// Split one complete frame off the front of `buf`, leaving partial data in place.
fn take_frame(buf: &mut Vec<u8>) -> std::io::Result<Option<CastMessage>> {
    let Some(header) = buf.get(..4) else {
        return Ok(None);
    };
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {len}"),
        ));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    let msg = CastMessage::decode(&buf[4..4 + len])
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    buf.drain(..4 + len);
    Ok(Some(msg))
}

/// Length-prefixed protobuf frame carrying a JSON payload.
fn encode_frame(destination_id: &str, namespace: &str, payload: &Value) -> std::io::Result<Vec<u8>> {
    let payload = serde_json::to_string(payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let msg = CastMessage {
        protocol_version: cast_message::ProtocolVersion::Castv210 as i32,
        source_id: SENDER_ID.to_string(),
        destination_id: destination_id.to_string(),
        namespace: namespace.to_string(),
        payload_type: cast_message::PayloadType::String as i32,
        payload_utf8: Some(payload),
        payload_binary: None,
    };
    let mut body = Vec::new();
    msg.encode(&mut body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut buf = Vec::with_capacity(body.len() + 4);
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Why the worker loop ended.
enum WorkerExit {
    Closed,
    Fault(String),
}

struct ConnectionWorker {
    host: String,
    conn: CastConnection,
    pending: HashMap<i64, Pending>,
    request_id: i64,
    last_ping: Instant,
    last_player_state: Option<PlayerState>,
}

impl ConnectionWorker {
    fn run(&mut self, cmd_rx: &Receiver<Command>) -> WorkerExit {
        loop {
            loop {
                match cmd_rx.try_recv() {
                    Ok(Command::Close) => return WorkerExit::Closed,
                    Ok(cmd) => {
                        if let Err(err) = self.dispatch(cmd) {
                            return WorkerExit::Fault(err.to_string());
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return WorkerExit::Closed,
                }
            }

            if self.last_ping.elapsed() > PING_INTERVAL {
                if let Err(err) =
                    self.conn
                        .send_json(RECEIVER_ID, NAMESPACE_HEARTBEAT, &json!({ "type": "PING" }))
                {
                    return WorkerExit::Fault(err.to_string());
                }
                self.last_ping = Instant::now();
                self.pending.retain(|_, pending| !pending.is_abandoned());
            }

            match self.conn.read_message() {
                Ok(Some(msg)) => {
                    if let Some(reason) = self.handle_message(msg) {
                        return WorkerExit::Fault(reason);
                    }
                }
                Ok(None) => {}
                Err(err) => return WorkerExit::Fault(err.to_string()),
            }
        }
    }

    fn next_request_id(&mut self) -> i64 {
        let current = self.request_id;
        self.request_id = self.request_id.saturating_add(1);
        current
    }

    fn dispatch(&mut self, cmd: Command) -> std::io::Result<()> {
        let id = self.next_request_id();
        match cmd {
            Command::ReceiverStatus(reply) => {
                self.pending.insert(id, Pending::ReceiverStatus(reply));
                self.conn.send_json(
                    RECEIVER_ID,
                    NAMESPACE_RECEIVER,
                    &json!({ "type": "GET_STATUS", "requestId": id }),
                )
            }
            Command::Launch { app_id, reply } => {
                self.conn.send_json(
                    RECEIVER_ID,
                    NAMESPACE_RECEIVER,
                    &json!({ "type": "LAUNCH", "requestId": id, "appId": app_id }),
                )?;
                tracing::info!(host = %self.host, app_id = %app_id, "cast: launching receiver app");
                self.pending.insert(id, Pending::Launch { app_id, reply });
                Ok(())
            }
            Command::Load { app, media, reply } => {
                self.pending.insert(id, Pending::Media(reply));
                self.conn.send_json(
                    &app.transport_id,
                    NAMESPACE_MEDIA,
                    &load_payload(&media, &app.session_id, id),
                )
            }
            Command::MediaStatus { app, reply } => {
                self.pending.insert(id, Pending::Media(reply));
                self.conn.send_json(
                    &app.transport_id,
                    NAMESPACE_MEDIA,
                    &json!({ "type": "GET_STATUS", "requestId": id }),
                )
            }
            Command::Stop {
                app,
                media_session_id,
                reply,
            } => {
                self.pending.insert(id, Pending::Stop(reply));
                self.conn.send_json(
                    &app.transport_id,
                    NAMESPACE_MEDIA,
                    &json!({
                        "type": "STOP",
                        "requestId": id,
                        "mediaSessionId": media_session_id,
                    }),
                )
            }
            Command::Close => Ok(()),
        }
    }

    /// Handle one inbound message. Returns a fault reason when the link is gone.
    fn handle_message(&mut self, msg: CastMessage) -> Option<String> {
        if msg.payload_type != cast_message::PayloadType::String as i32 {
            return None;
        }
        let payload = msg.payload_utf8.unwrap_or_default();
        let Ok(value) = serde_json::from_str::<Value>(&payload) else {
            return None;
        };
        let msg_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let request_id = value.get("requestId").and_then(|v| v.as_i64()).unwrap_or(0);

        match msg.namespace.as_str() {
            NAMESPACE_HEARTBEAT => {
                if msg_type == "PING" {
                    if let Err(err) = self.conn.send_json(
                        &msg.source_id,
                        NAMESPACE_HEARTBEAT,
                        &json!({ "type": "PONG" }),
                    ) {
                        return Some(err.to_string());
                    }
                }
            }
            NAMESPACE_CONNECTION => {
                if msg_type == "CLOSE" && msg.source_id == RECEIVER_ID {
                    return Some("receiver closed the connection".to_string());
                }
            }
            NAMESPACE_RECEIVER => match (msg_type, self.pending.remove(&request_id)) {
                ("RECEIVER_STATUS", Some(Pending::ReceiverStatus(reply))) => {
                    let _ = reply.send(Ok(parse_receiver_status(&value)));
                }
                ("RECEIVER_STATUS", Some(Pending::Launch { app_id, reply })) => {
                    match find_app_session(&value, &app_id) {
                        Some(app) => {
                            if let Err(err) = self.conn.send_json(
                                &app.transport_id,
                                NAMESPACE_CONNECTION,
                                &json!({ "type": "CONNECT" }),
                            ) {
                                let _ = reply.send(Err(CastError::Transport(err.to_string())));
                                return Some(err.to_string());
                            }
                            tracing::info!(host = %self.host, app_id = %app_id, "cast: receiver app ready");
                            let _ = reply.send(Ok(app));
                        }
                        None => {
                            let _ = reply.send(Err(CastError::Launch(format!(
                                "{app_id} not running after launch"
                            ))));
                        }
                    }
                }
                ("LAUNCH_ERROR", Some(pending)) | ("INVALID_REQUEST", Some(pending)) => {
                    let reason = value
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .unwrap_or(msg_type)
                        .to_string();
                    pending.fail(CastError::Launch(reason));
                }
                (_, Some(pending)) => {
                    pending.fail(CastError::Protocol(format!("unexpected reply {msg_type}")));
                }
                (_, None) => {}
            },
            NAMESPACE_MEDIA => match (msg_type, self.pending.remove(&request_id)) {
                ("MEDIA_STATUS", Some(Pending::Media(reply))) => {
                    let status = parse_media_status(&value);
                    self.note_player_state(status.as_ref());
                    let _ = reply.send(Ok(status));
                }
                ("MEDIA_STATUS", Some(Pending::Stop(reply))) => {
                    let _ = reply.send(Ok(()));
                }
                ("MEDIA_STATUS", None) => {
                    let status = parse_media_status(&value);
                    self.note_player_state(status.as_ref());
                }
                (other, Some(pending)) => {
                    pending.fail(CastError::Load(other.to_string()));
                }
                (_, None) => {}
            },
            _ => {}
        }
        None
    }

    fn note_player_state(&mut self, status: Option<&PlayerStatus>) {
        let state = status.map(|s| s.player_state);
        if state != self.last_player_state {
            tracing::info!(host = %self.host, state = ?state, "cast: player status changed");
            self.last_player_state = state;
        }
    }

    fn fail_all(&mut self, reason: &str) {
        for (_, pending) in self.pending.drain() {
            pending.fail(CastError::Transport(reason.to_string()));
        }
    }
}

fn spawn_connection_worker(
    host: String,
    port: u16,
    cmd_rx: Receiver<Command>,
    ready: oneshot::Sender<Result<(), CastError>>,
    fault: FaultTrigger,
) {
    std::thread::spawn(move || {
        let opened = resolve_device_addr(&host, port).and_then(|addr| {
            let mut conn = CastConnection::connect(addr, server_name_for(&host))?;
            conn.send_json(RECEIVER_ID, NAMESPACE_CONNECTION, &json!({ "type": "CONNECT" }))?;
            Ok(conn)
        });
        let mut conn = match opened {
            Ok(conn) => conn,
            Err(err) => {
                let _ = ready.send(Err(err.into()));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            tracing::debug!(host = %host, "cast: connect abandoned by caller; closing");
            conn.shutdown();
            return;
        }
        tracing::info!(host = %host, "cast: connected");

        let mut worker = ConnectionWorker {
            host: host.clone(),
            conn,
            pending: HashMap::new(),
            request_id: 1,
            last_ping: Instant::now(),
            last_player_state: None,
        };
        match worker.run(&cmd_rx) {
            WorkerExit::Closed => {
                let _ = worker.conn.send_json(
                    RECEIVER_ID,
                    NAMESPACE_CONNECTION,
                    &json!({ "type": "CLOSE" }),
                );
                worker.conn.shutdown();
                worker.fail_all("connection closed");
                tracing::info!(host = %host, "cast: connection closed");
            }
            WorkerExit::Fault(reason) => {
                worker.conn.shutdown();
                tracing::warn!(host = %host, error = %reason, "cast: connection lost");
                fault.fire(reason.clone());
                worker.fail_all(&reason);
            }
        }
    });
}

/// Connects to receivers on the standard Cast port.
pub(crate) struct CastV2Connector;

#[async_trait]
impl DeviceConnector for CastV2Connector {
    async fn connect(&self, host: &str) -> Result<Box<dyn DeviceClient>, CastError> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (trigger, fault) = fault_channel();
        spawn_connection_worker(host.to_string(), CAST_PORT, cmd_rx, ready_tx, trigger);
        ready_rx
            .await
            .map_err(|_| CastError::Transport("connection worker exited".to_string()))??;
        Ok(Box::new(CastV2Client { cmd_tx, fault }))
    }
}

async fn request<T>(
    cmd_tx: &Sender<Command>,
    build: impl FnOnce(Reply<T>) -> Command,
) -> Result<T, CastError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(build(reply_tx))
        .map_err(|_| CastError::Transport("connection closed".to_string()))?;
    reply_rx
        .await
        .map_err(|_| CastError::Transport("connection closed".to_string()))?
}

struct CastV2Client {
    cmd_tx: Sender<Command>,
    fault: FaultSignal,
}

#[async_trait]
impl DeviceClient for CastV2Client {
    async fn launch_app(&self, app_id: &str) -> Result<Box<dyn ReceiverPlayer>, CastError> {
        let app_id = app_id.to_string();
        let app = request(&self.cmd_tx, |reply| Command::Launch { app_id, reply }).await?;
        Ok(Box::new(CastV2Player {
            cmd_tx: self.cmd_tx.clone(),
            app,
            media_session_id: Mutex::new(None),
        }))
    }

    async fn get_status(&self) -> Result<DeviceStatus, CastError> {
        request(&self.cmd_tx, Command::ReceiverStatus).await
    }

    fn fault(&self) -> FaultSignal {
        self.fault.clone()
    }

    fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

struct CastV2Player {
    cmd_tx: Sender<Command>,
    app: AppSession,
    media_session_id: Mutex<Option<i64>>,
}

impl CastV2Player {
    fn remember(&self, status: &Option<PlayerStatus>) {
        if let Some(id) = status.as_ref().and_then(|s| s.media_session_id) {
            if let Ok(mut current) = self.media_session_id.lock() {
                *current = Some(id);
            }
        }
    }
}

#[async_trait]
impl ReceiverPlayer for CastV2Player {
    async fn load(&self, media: &MediaResource) -> Result<Option<PlayerStatus>, CastError> {
        let app = self.app.clone();
        let media = media.clone();
        let status = request(&self.cmd_tx, |reply| Command::Load { app, media, reply }).await?;
        self.remember(&status);
        Ok(status)
    }

    async fn get_status(&self) -> Result<Option<PlayerStatus>, CastError> {
        let app = self.app.clone();
        let status = request(&self.cmd_tx, |reply| Command::MediaStatus { app, reply }).await?;
        self.remember(&status);
        Ok(status)
    }

    async fn stop(&self) -> Result<(), CastError> {
        let media_session_id = self.media_session_id.lock().ok().and_then(|id| *id);
        let Some(media_session_id) = media_session_id else {
            return Ok(());
        };
        let app = self.app.clone();
        request(&self.cmd_tx, |reply| Command::Stop {
            app,
            media_session_id,
            reply,
        })
        .await
    }

    fn display_name(&self) -> Option<String> {
        self.app.display_name.clone()
    }
}

fn parse_receiver_status(payload: &Value) -> DeviceStatus {
    let status = payload.get("status");
    let applications = status
        .and_then(|s| s.get("applications"))
        .and_then(|a| a.as_array())
        .map(|apps| {
            apps.iter()
                .map(|app| ReceiverApp {
                    app_id: app
                        .get("appId")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    display_name: app
                        .get("displayName")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    is_idle_screen: app
                        .get("isIdleScreen")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    session_id: app.get("sessionId").and_then(|v| v.as_str()).map(str::to_string),
                    transport_id: app
                        .get("transportId")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    let volume = status.and_then(|s| s.get("volume"));
    DeviceStatus {
        applications,
        volume_level: volume.and_then(|v| v.get("level")).and_then(|v| v.as_f64()),
        muted: volume.and_then(|v| v.get("muted")).and_then(|v| v.as_bool()),
    }
}

fn find_app_session(payload: &Value, app_id: &str) -> Option<AppSession> {
    parse_receiver_status(payload)
        .applications
        .into_iter()
        .find(|app| app.app_id == app_id)
        .and_then(|app| {
            Some(AppSession {
                transport_id: app.transport_id?,
                session_id: app.session_id?,
                display_name: app.display_name,
            })
        })
}

fn parse_media_status(payload: &Value) -> Option<PlayerStatus> {
    let status = payload.get("status")?.as_array()?.first()?;
    Some(PlayerStatus {
        media_session_id: status.get("mediaSessionId").and_then(|v| v.as_i64()),
        player_state: status
            .get("playerState")
            .and_then(|v| v.as_str())
            .map(PlayerState::parse)
            .unwrap_or(PlayerState::Unknown),
        current_time: status.get("currentTime").and_then(|v| v.as_f64()),
        idle_reason: status
            .get("idleReason")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        content_id: status
            .get("media")
            .and_then(|m| m.get("contentId"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

fn load_payload(media: &MediaResource, session_id: &str, request_id: i64) -> Value {
    json!({
        "type": "LOAD",
        "requestId": request_id,
        "sessionId": session_id,
        "media": {
            "contentId": media.url,
            "contentType": media.content_type,
            "streamType": "LIVE",
        },
        "autoplay": true,
    })
}

fn resolve_device_addr(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address"))
}

fn server_name_for(host: &str) -> ServerName<'static> {
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return ServerName::IpAddress(ip.into());
    }
    ServerName::try_from(host.to_string())
        .unwrap_or(ServerName::IpAddress(std::net::IpAddr::from([127, 0, 0, 1]).into()))
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

/// Receivers present self-signed device certificates.
#[derive(Debug)]
struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_status_lists_apps_and_volume() {
        let payload = json!({
            "type": "RECEIVER_STATUS",
            "requestId": 3,
            "status": {
                "applications": [{
                    "appId": "E8C28D3C",
                    "displayName": "Backdrop",
                    "isIdleScreen": true,
                    "sessionId": "s-1",
                    "transportId": "t-1"
                }],
                "volume": { "level": 0.5, "muted": false }
            }
        });
        let status = parse_receiver_status(&payload);
        assert_eq!(status.applications.len(), 1);
        assert!(status.applications[0].is_idle_screen);
        assert_eq!(status.volume_level, Some(0.5));
        assert_eq!(status.muted, Some(false));
        assert!(find_app_session(&payload, "CC1AD845").is_none());

        let empty = parse_receiver_status(&json!({ "status": {} }));
        assert!(empty.applications.is_empty());
    }

    #[test]
    fn finds_launched_app_session() {
        let payload = json!({
            "status": {
                "applications": [{
                    "appId": "62EFD2C1",
                    "displayName": "Dashboard Receiver",
                    "sessionId": "abc",
                    "transportId": "web-5"
                }]
            }
        });
        let app = find_app_session(&payload, "62EFD2C1").unwrap();
        assert_eq!(app.transport_id, "web-5");
        assert_eq!(app.session_id, "abc");
        assert_eq!(app.display_name.as_deref(), Some("Dashboard Receiver"));
    }

    #[test]
    fn media_status_reads_first_entry() {
        let payload = json!({
            "type": "MEDIA_STATUS",
            "status": [{
                "mediaSessionId": 7,
                "playerState": "BUFFERING",
                "currentTime": -1.0,
                "media": { "contentId": "http://h/live/lobby/dash.mpd" }
            }]
        });
        let status = parse_media_status(&payload).unwrap();
        assert_eq!(status.media_session_id, Some(7));
        assert_eq!(status.player_state, PlayerState::Buffering);
        assert_eq!(status.current_time, Some(-1.0));
        assert_eq!(status.content_id.as_deref(), Some("http://h/live/lobby/dash.mpd"));

        assert!(parse_media_status(&json!({ "status": [] })).is_none());
    }

    #[test]
    fn load_payload_requests_live_autoplay() {
        let media = MediaResource {
            url: "http://h/live/lobby/dash.mpd".to_string(),
            content_type: "application/dash+xml".to_string(),
        };
        let payload = load_payload(&media, "sess", 12);
        assert_eq!(payload["type"], "LOAD");
        assert_eq!(payload["requestId"], 12);
        assert_eq!(payload["sessionId"], "sess");
        assert_eq!(payload["media"]["streamType"], "LIVE");
        assert_eq!(payload["autoplay"], true);
    }

    #[test]
    fn partial_frames_wait_for_the_rest() {
        let ping = encode_frame(RECEIVER_ID, NAMESPACE_HEARTBEAT, &json!({ "type": "PING" })).unwrap();
        let pong = encode_frame(SENDER_ID, NAMESPACE_HEARTBEAT, &json!({ "type": "PONG" })).unwrap();
        let mut wire = ping.clone();
        wire.extend_from_slice(&pong);

        let mut inbound = Vec::new();
        // split inside the length prefix, then inside the body
        for piece in [&wire[..2], &wire[2..ping.len() - 3]] {
            inbound.extend_from_slice(piece);
            assert!(take_frame(&mut inbound).unwrap().is_none());
        }
        assert_eq!(inbound.len(), ping.len() - 3);

        inbound.extend_from_slice(&wire[ping.len() - 3..]);
        let first = take_frame(&mut inbound).unwrap().unwrap();
        assert_eq!(first.payload_utf8.as_deref(), Some("{\"type\":\"PING\"}"));
        let second = take_frame(&mut inbound).unwrap().unwrap();
        assert_eq!(second.payload_utf8.as_deref(), Some("{\"type\":\"PONG\"}"));
        assert!(inbound.is_empty());
        assert!(take_frame(&mut inbound).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut inbound = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        assert!(take_frame(&mut inbound).is_err());
    }

    #[test]
    fn frames_are_length_prefixed_protobuf() {
        let buf = encode_frame(RECEIVER_ID, NAMESPACE_HEARTBEAT, &json!({ "type": "PING" })).unwrap();
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);
        let msg = CastMessage::decode(&buf[4..]).unwrap();
        assert_eq!(msg.namespace, NAMESPACE_HEARTBEAT);
        assert_eq!(msg.destination_id, RECEIVER_ID);
        assert_eq!(msg.payload_utf8.as_deref(), Some("{\"type\":\"PING\"}"));
    }
}
