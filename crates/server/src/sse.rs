//! Server-sent event framing of a dialogue turn.
//!
//! Each text fragment becomes one event whose lines are sent as separate
//! `data:` fields; the control message that ends the turn is serialized as
//! JSON into its own final event.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};

use carbonex_agent::{ControlMessage, TurnEvent, TurnStream};

const UNSERIALIZABLE_CONTROL: &str =
    r#"{"type":"error","message":"control message could not be serialized"}"#;

pub fn turn_events(events: TurnStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(events.map(|event| Ok(to_event(event)))).keep_alive(KeepAlive::default())
}

pub fn to_event(event: TurnEvent) -> Event {
    match event {
        TurnEvent::Text(text) => Event::default().data(normalize_line_endings(&text)),
        TurnEvent::Control(control) => Event::default().data(control_json(&control)),
    }
}

/// SSE cannot carry carriage returns.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn control_json(control: &ControlMessage) -> String {
    serde_json::to_string(control).unwrap_or_else(|_| UNSERIALIZABLE_CONTROL.to_string())
}
