//! WebSocket server: accept loop, per-connection handling, and the frame
//! pump that fans captured frames out to every participant.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage, WebSocketStream};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::cache::FrameCache;
use crate::capture::pipeline::CaptureLoop;
use crate::capture::source::available_monitors;
use crate::capture::{EncodedFrame, MonitorInfo};
use crate::control;
use crate::protocol::{unix_now, Command, Event, ParticipantInfo, StatsPayload};
use crate::room::Room;
use crate::settings::{Settings, SharedSettings};

/// How long a fresh connection gets to send its `join` message.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-participant socket write timeout; a stalled client is dropped rather
/// than allowed to back up its queue forever.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// The one shared context: every handler gets this explicitly, nothing lives
/// in globals. Each field is its own lock; no code path holds two at once.
pub struct ServerContext {
    pub room: RwLock<Room>,
    pub settings: SharedSettings,
    pub cache: Arc<FrameCache>,
    pub broadcaster: Broadcaster,
    pub capture: CaptureLoop,
    pub monitors: Vec<MonitorInfo>,
    started_at: Instant,
    frame_rx: StdMutex<Option<mpsc::Receiver<Arc<EncodedFrame>>>>,
}

impl ServerContext {
    pub fn new(settings: Settings, test_pattern: bool) -> Arc<Self> {
        let settings: SharedSettings = Arc::new(StdRwLock::new(settings));
        let cache = Arc::new(FrameCache::new());
        // Bounded push channel between the capture thread and the pump;
        // overflow drops frames, the cache always has the latest.
        let (frame_tx, frame_rx) = mpsc::channel(2);
        let capture = CaptureLoop::new(settings.clone(), cache.clone(), frame_tx, test_pattern);

        Arc::new(Self {
            room: RwLock::new(Room::new()),
            settings,
            cache,
            broadcaster: Broadcaster::new(),
            capture,
            monitors: available_monitors(test_pattern),
            started_at: Instant::now(),
            frame_rx: StdMutex::new(Some(frame_rx)),
        })
    }

    /// Take the frame receiver (can only be called once).
    pub fn take_frame_rx(&self) -> Option<mpsc::Receiver<Arc<EncodedFrame>>> {
        self.frame_rx.lock().unwrap().take()
    }

    pub async fn stats(&self) -> StatsPayload {
        let (width, height, quality, monitor) = {
            let s = self.settings.read().unwrap();
            (s.width, s.height, s.quality, s.monitor)
        };
        let room = self.room.read().await;
        StatsPayload {
            fps: (self.cache.metrics().actual_fps() * 10.0).round() / 10.0,
            frame_count: self.cache.metrics().frame_count(),
            resolution: (width, height),
            quality,
            monitor,
            uptime: self.started_at.elapsed().as_secs_f64(),
            participant_count: room.len(),
            presenter_id: room.presenter_id(),
            room_id: room.id.clone(),
        }
    }

    pub async fn participant_list(&self) -> Vec<ParticipantInfo> {
        let room = self.room.read().await;
        room.participants()
            .iter()
            .map(|p| ParticipantInfo::new(p, room.is_presenter(p.id)))
            .collect()
    }

    /// Build a `frame` event from a cache snapshot (or its absence).
    pub fn frame_event(&self, frame: Option<&EncodedFrame>, stats: StatsPayload) -> Event {
        Event::Frame {
            frame: frame.map(|f| BASE64.encode(&f.jpeg)),
            timestamp: frame.map(|f| f.timestamp).unwrap_or_else(unix_now),
            stats,
        }
    }

    /// Shared disconnect path: socket teardown and failed deliveries both
    /// land here. Processes a worklist because the departure broadcasts can
    /// themselves discover more dead connections.
    pub async fn drop_participants(&self, ids: Vec<Uuid>) {
        let mut pending = ids;
        while let Some(id) = pending.pop() {
            self.broadcaster.unregister(id).await;

            let outcome = self.room.write().await.leave(id);
            let Some(outcome) = outcome else { continue };
            tracing::info!(
                participant = %id,
                name = %outcome.participant.name,
                "participant left"
            );

            // A presenter taking the feed down with them ends the share.
            if outcome.was_presenter && self.capture.is_running() {
                self.capture.stop_async().await;
            }

            let total = self.room.read().await.len();
            let mut dead = self
                .broadcaster
                .broadcast(&Event::UserLeft {
                    user: ParticipantInfo::new(&outcome.participant, false),
                    total_users: total,
                })
                .await;

            if let Some(new_presenter) = outcome.new_presenter {
                let users = self.participant_list().await;
                dead.extend(
                    self.broadcaster
                        .broadcast(&Event::PresenterChanged {
                            new_presenter: ParticipantInfo::new(&new_presenter, true),
                            users,
                        })
                        .await,
                );
            }

            for d in dead {
                if !pending.contains(&d) {
                    pending.push(d);
                }
            }
        }
    }
}

/// Register a freshly joined participant: room entry, broadcast channel,
/// `welcome` to them, `user_joined` to everyone else.
pub async fn join_participant(
    ctx: &ServerContext,
    name: Option<String>,
) -> (Uuid, mpsc::UnboundedReceiver<String>) {
    let (outcome, users, total, room_id) = {
        let mut room = ctx.room.write().await;
        let outcome = room.join(name);
        let users: Vec<ParticipantInfo> = room
            .participants()
            .iter()
            .map(|p| ParticipantInfo::new(p, room.is_presenter(p.id)))
            .collect();
        (outcome, users, room.len(), room.id.clone())
    };
    let id = outcome.participant.id;
    tracing::info!(
        participant = %id,
        name = %outcome.participant.name,
        presenter = outcome.granted_presenter,
        total_users = total,
        "participant joined"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    ctx.broadcaster.register(id, tx).await;

    ctx.broadcaster
        .send_to(
            id,
            &Event::Welcome {
                user_id: id,
                room_id,
                is_presenter: outcome.granted_presenter,
                users,
            },
        )
        .await;

    let dead = ctx
        .broadcaster
        .broadcast_except(
            id,
            &Event::UserJoined {
                user: ParticipantInfo::new(&outcome.participant, outcome.granted_presenter),
                total_users: total,
            },
        )
        .await;
    if !dead.is_empty() {
        ctx.drop_participants(dead).await;
    }

    (id, rx)
}

pub struct Server {
    addr: String,
    ctx: Arc<ServerContext>,
}

impl Server {
    pub fn new(addr: String, ctx: Arc<ServerContext>) -> Self {
        Self { addr, ctx }
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        tracing::info!(addr = %self.addr, "listening");

        if let Some(rx) = self.ctx.take_frame_rx() {
            tokio::spawn(frame_pump(self.ctx.clone(), rx));
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                match accept_async(stream).await {
                    Ok(ws) => {
                        if let Err(e) = handle_connection(ws, addr, ctx).await {
                            tracing::debug!(peer = %addr, error = %e, "connection error");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(peer = %addr, error = %e, "websocket handshake failed");
                    }
                }
            });
        }
    }
}

/// Drains the capture loop's push channel into the fan-out. Runs for the
/// process lifetime; idle whenever sharing is stopped.
pub async fn frame_pump(ctx: Arc<ServerContext>, mut rx: mpsc::Receiver<Arc<EncodedFrame>>) {
    while let Some(frame) = rx.recv().await {
        let stats = ctx.stats().await;
        let event = ctx.frame_event(Some(&frame), stats);
        let dead = ctx.broadcaster.broadcast(&event).await;
        if !dead.is_empty() {
            ctx.drop_participants(dead).await;
        }
    }
}

async fn handle_connection(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
) -> Result<()> {
    let (mut sink, mut stream) = ws.split();

    // The first message must be `join`; anything else is rejected at the
    // boundary and the socket closed.
    let Some(name) = read_join(&mut stream, addr).await else {
        let _ = sink.send(WsMessage::Close(None)).await;
        return Ok(());
    };

    let (id, mut rx) = join_participant(&ctx, name).await;

    loop {
        tokio::select! {
            queued = rx.recv() => {
                match queued {
                    Some(json) => {
                        if !write_with_timeout(&mut sink, json).await {
                            tracing::warn!(participant = %id, "write failed or timed out, dropping");
                            break;
                        }
                    }
                    None => break, // unregistered elsewhere
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Command>(&text) {
                            Ok(Command::Join { .. }) => {
                                ctx.broadcaster
                                    .send_to(id, &Event::Error { message: "already joined".into() })
                                    .await;
                            }
                            Ok(cmd) => control::handle_command(&ctx, id, cmd).await,
                            Err(e) => {
                                // Malformed or unknown: log, ignore, keep the
                                // connection open.
                                tracing::warn!(participant = %id, error = %e, "ignoring malformed message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sink.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(participant = %id, error = %e, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    ctx.drop_participants(vec![id]).await;
    Ok(())
}

async fn write_with_timeout(
    sink: &mut SplitSink<WebSocketStream<TcpStream>, WsMessage>,
    json: String,
) -> bool {
    matches!(
        tokio::time::timeout(WRITE_TIMEOUT, sink.send(WsMessage::Text(json))).await,
        Ok(Ok(()))
    )
}

/// Read and validate the opening `join` message.
async fn read_join(
    stream: &mut SplitStream<WebSocketStream<TcpStream>>,
    addr: SocketAddr,
) -> Option<Option<String>> {
    match tokio::time::timeout(JOIN_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => match serde_json::from_str::<Command>(&text) {
            Ok(Command::Join { name }) => Some(name),
            Ok(_) => {
                tracing::warn!(peer = %addr, "first message was not join");
                None
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "invalid join message");
                None
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "expected text join, got other frame");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "websocket error before join");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "connection closed before join");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, "join timeout");
            None
        }
    }
}
