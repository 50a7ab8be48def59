use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{interval, sleep_until, timeout, Duration, Instant};

use crate::call::signaling;
use crate::call::CallKey;
use crate::error::RelayError;
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::{ConnectionHandle, Frame};

/// Close code sent when the peer stops answering pings or goes idle.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent when a call session refuses another participant.
const CLOSE_SESSION_FULL: u16 = 4009;

/// How long the writer may keep flushing queued frames after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Which logical channel a connection serves.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// General presence channel: receives fan-out events, sends addressed signals.
    Presence,
    /// Call channel bound to one call session.
    Call(CallKey),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Presence => f.write_str("presence"),
            Endpoint::Call(key) => fmt::Display::fmt(key, f),
        }
    }
}

/// Membership of one connection in the registry or a call session.
///
/// Created only once the connection is admitted. Dropping it releases the
/// membership and stops the keepalive task, so cleanup happens exactly once
/// on every exit path, including panics and task cancellation.
struct Registration {
    state: AppState,
    username: String,
    endpoint: Endpoint,
    handle: ConnectionHandle,
    keepalive: Option<AbortHandle>,
}

impl Registration {
    fn admit(state: &AppState, username: &str, endpoint: Endpoint, handle: &ConnectionHandle) -> Result<Self, RelayError> {
        match &endpoint {
            Endpoint::Presence => {
                state.connections.register(username, handle.clone());
            }
            Endpoint::Call(key) => {
                let participants = state
                    .calls
                    .join(key, handle.clone(), state.ws.call_participant_limit())?;
                let peer = match key.participants() {
                    (low, high) if low == username => high,
                    (low, _) => low,
                };
                tracing::debug!(
                    username = %username,
                    peer = %peer,
                    call = %key,
                    participants,
                    "Joined call"
                );
            }
        }

        Ok(Self {
            state: state.clone(),
            username: username.to_string(),
            endpoint,
            handle: handle.clone(),
            keepalive: None,
        })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }

        match &self.endpoint {
            Endpoint::Presence => {
                self.state.connections.unregister(&self.username, &self.handle);
            }
            Endpoint::Call(key) => self.state.calls.leave(key, &self.handle),
        }

        tracing::debug!(
            username = %self.username,
            endpoint = %self.endpoint,
            connection_id = %self.handle.id(),
            "Connection released"
        );
    }
}

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from the connection's queue
/// - Reader loop: receives frames and dispatches them to the presence fan-out
///   or the call relay, depending on `endpoint`
///
/// Other connections reach this one through its `ConnectionHandle`.
pub async fn run_connection(socket: WebSocket, state: AppState, username: String, endpoint: Endpoint) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (handle, rx) = ConnectionHandle::channel();

    let mut registration = match Registration::admit(&state, &username, endpoint, &handle) {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(username = %username, error = %e, "Connection refused");
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_SESSION_FULL,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    tracing::info!(
        username = %username,
        endpoint = %registration.endpoint,
        connection_id = %handle.id(),
        "WebSocket actor started"
    );

    let mut writer = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let keepalive = tokio::spawn(keepalive_task(
        handle.clone(),
        pong_rx,
        state.ws.ping_interval(),
        state.ws.pong_timeout(),
    ));
    registration.keepalive = Some(keepalive.abort_handle());

    let idle_timeout = state.ws.idle_timeout();
    let mut last_frame = Instant::now();

    loop {
        let next = tokio::select! {
            _ = &mut writer => {
                tracing::debug!(username = %username, "Writer stopped, closing reader");
                break;
            }
            _ = idle_deadline(idle_timeout.map(|limit| last_frame + limit)) => {
                tracing::info!(username = %username, "Idle timeout, closing connection");
                let _ = handle.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Idle timeout".into(),
                })));
                break;
            }
            next = ws_receiver.next() => next,
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(_) | Message::Binary(_) => {
                    last_frame = Instant::now();
                    if let Some(frame) = Frame::from_message(msg) {
                        dispatch_frame(&state, &username, &registration.endpoint, &handle, frame);
                    }
                }
                Message::Pong(_) => {
                    // Pong received: notify the keepalive task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = handle.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        username = %username,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    username = %username,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(username = %username, "WebSocket stream ended");
                break;
            }
        }
    }

    drop(registration);
    drop(handle);

    // Let the writer flush anything still queued (e.g. a close frame).
    if !writer.is_finished() && timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(username = %username, "WebSocket actor stopped");
}

/// Route a data frame to the handler of the connection's channel.
/// Bad frames are logged and dropped; the connection stays open.
fn dispatch_frame(state: &AppState, username: &str, endpoint: &Endpoint, handle: &ConnectionHandle, frame: Frame) {
    let result = match endpoint {
        Endpoint::Presence => protocol::handle_presence_frame(&state.connections, username, &frame).map(|_| ()),
        Endpoint::Call(key) => signaling::handle_call_frame(&state.calls, key, username, handle, frame).map(|_| ()),
    };

    if let Err(e) = result {
        tracing::warn!(
            username = %username,
            endpoint = %endpoint,
            error = %e,
            "Dropping inbound frame"
        );
    }
}

/// Resolves at `deadline`, or never when idle timeouts are disabled.
async fn idle_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Writer task: receives messages from the queue and forwards them to the WebSocket sink.
/// Stops after a close frame, on a write error, or once every sender is gone.
async fn writer_task(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Keepalive task: sends periodic pings and closes the connection when a
/// pong does not come back in time. Only a pong received after the ping
/// counts.
async fn keepalive_task(
    handle: ConnectionHandle,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Unsolicited pongs since the last round must not satisfy this deadline
        while pong_rx.try_recv().is_ok() {}

        if handle.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died: connection is gone
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(connection_id = %handle.id(), "Pong timeout, closing connection");
                let _ = handle.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
