use crate::call::{CallKey, CallSessions};
use crate::chat::events::SignalEnvelope;
use crate::error::RelayError;
use crate::ws::{ConnectionHandle, Frame};

/// Dispatch one inbound frame from a call-channel connection.
///
/// Text frames carry JSON signals (`offer`, `answer`, `ice`, ...). They are
/// treated as opaque and forwarded as `{"from": <sender>, "data": <signal>}`.
/// Binary frames are media chunks and pass through untouched.
///
/// Returns the number of participants the frame was relayed to.
pub fn handle_call_frame(
    calls: &CallSessions,
    key: &CallKey,
    username: &str,
    sender: &ConnectionHandle,
    frame: Frame,
) -> Result<usize, RelayError> {
    let outbound = match frame {
        Frame::Text(text) => {
            let data: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| RelayError::MalformedFrame(format!("call signal is not JSON: {}", e)))?;
            let envelope = SignalEnvelope {
                from: username.to_string(),
                data,
            };
            let text = serde_json::to_string(&envelope)
                .map_err(|e| RelayError::MalformedFrame(e.to_string()))?;
            Frame::Text(text)
        }
        binary @ Frame::Binary(_) => binary,
    };

    Ok(calls.relay(key, &outbound, sender))
}
