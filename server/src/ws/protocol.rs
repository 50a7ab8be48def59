use serde::Deserialize;

use crate::chat::events::SignalEnvelope;
use crate::error::RelayError;
use crate::ws::broadcast::deliver_to_user;
use crate::ws::{ConnectionRegistry, Frame};

/// Addressed signal sent by a client over the presence channel:
/// `{"to": "bob", "data": ...}`.
#[derive(Debug, Deserialize)]
pub struct InboundSignal {
    pub to: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Parse a presence-channel frame into an addressed signal.
pub fn parse_presence_frame(frame: &Frame) -> Result<InboundSignal, RelayError> {
    let text = match frame {
        Frame::Text(text) => text,
        Frame::Binary(data) => {
            return Err(RelayError::MalformedFrame(format!(
                "binary frame ({} bytes) on presence channel",
                data.len()
            )))
        }
    };

    let signal: InboundSignal =
        serde_json::from_str(text).map_err(|e| RelayError::MalformedFrame(e.to_string()))?;

    if signal.to.is_empty() {
        return Err(RelayError::MalformedFrame("empty `to` field".to_string()));
    }
    Ok(signal)
}

/// Handle one inbound presence-channel frame: forward its payload to the
/// addressed user, stamped with the sender. Returns whether the target was
/// online.
pub fn handle_presence_frame(registry: &ConnectionRegistry, username: &str, frame: &Frame) -> Result<bool, RelayError> {
    let signal = parse_presence_frame(frame)?;

    let envelope = SignalEnvelope {
        from: username.to_string(),
        data: signal.data,
    };
    let delivered = deliver_to_user(registry, &signal.to, &envelope);

    if !delivered {
        tracing::debug!(
            username = %username,
            target = %signal.to,
            "Signal target offline, dropped"
        );
    }
    Ok(delivered)
}
