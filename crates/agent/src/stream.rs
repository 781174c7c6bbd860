//! Output side of a dialogue turn: free-text fragments followed by exactly
//! one terminal control message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    State {
        conversation_state: Value,
    },
    Sources {
        sources: Vec<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_state: Option<Value>,
    },
}

impl ControlMessage {
    pub fn state<T: Serialize>(state: &T) -> Self {
        Self::State { conversation_state: to_value(state) }
    }

    pub fn error<T: Serialize>(message: impl Into<String>, prior_state: &T) -> Self {
        Self::Error { message: message.into(), conversation_state: Some(to_value(prior_state)) }
    }

    pub fn conversation_state(&self) -> Option<&Value> {
        match self {
            Self::State { conversation_state } => Some(conversation_state),
            Self::Error { conversation_state, .. } => conversation_state.as_ref(),
            Self::Sources { .. } => None,
        }
    }
}

fn to_value<T: Serialize>(state: &T) -> Value {
    serde_json::to_value(state).unwrap_or(Value::Null)
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnEvent {
    Text(String),
    Control(ControlMessage),
}

pub type TurnStream = UnboundedReceiverStream<TurnEvent>;

/// Writer half of a turn. `finish` consumes the sink, so a turn can close
/// with at most one control message.
pub struct TurnSink {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl TurnSink {
    pub fn channel() -> (Self, TurnStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }

    /// Sends one text fragment. Empty fragments are dropped, as is output to
    /// a reader that has gone away.
    pub fn text(&self, fragment: impl Into<String>) {
        let fragment = fragment.into();
        if fragment.is_empty() {
            return;
        }
        let _ = self.tx.send(TurnEvent::Text(fragment));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn finish(self, control: ControlMessage) {
        let _ = self.tx.send(TurnEvent::Control(control));
    }
}

/// How generated text reaches the sink: as one block, or fragment by
/// fragment while the model produces it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Whole,
    Incremental,
}

/// Reply of a non-streaming dialogue turn.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnReply<S> {
    pub answer: String,
    pub conversation_state: S,
    /// Set when the turn failed and `conversation_state` is the prior state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Apology shown to the user when a turn fails outright.
pub fn failure_apology(error: &impl std::fmt::Display) -> String {
    format!("I encountered an error: {error}. Please try again.")
}

/// A turn drained into one value, for non-streaming callers.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectedTurn {
    pub text: String,
    pub control: Option<ControlMessage>,
}

pub async fn collect_turn(mut events: TurnStream) -> CollectedTurn {
    let mut text = String::new();
    let mut control = None;
    while let Some(event) = events.next().await {
        match event {
            TurnEvent::Text(fragment) if control.is_none() => text.push_str(&fragment),
            TurnEvent::Text(_) => {}
            TurnEvent::Control(message) => control = Some(message),
        }
    }
    CollectedTurn { text, control }
}
