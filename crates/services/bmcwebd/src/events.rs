//! Resource events and the streams that relay them.
//!
//! Handlers publish on an [`EventHub`]; every open SSE stream and WebSocket
//! subscription gets its own broadcast receiver. A subscriber that falls
//! behind loses the oldest events rather than slowing the publisher down.

use std::cell::Cell;
use std::rc::Rc;

use bmcweb_http::app::App;
use bmcweb_http::sse::SseConnection;
use bmcweb_http::websocket::WebSocket;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::prelude::*;

const EVENT_BACKLOG: usize = 64;

pub const EVENT_SERVICE_URI: &str = "/redfish/v1/EventService";
pub const SSE_URI: &str = "/redfish/v1/EventService/SSE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ResourceCreated,
    ResourceRemoved,
}

impl EventKind {
    pub fn message_id(&self) -> &'static str {
        match self {
            EventKind::ResourceCreated => "ResourceEvent.1.0.ResourceCreated",
            EventKind::ResourceRemoved => "ResourceEvent.1.0.ResourceRemoved",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            EventKind::ResourceCreated => "The resource has been created successfully.",
            EventKind::ResourceRemoved => "The resource has been removed successfully.",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub id: u64,
    pub kind: EventKind,
    /// `@odata.id` of the resource the event is about.
    pub origin: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Renders the event as a Redfish `Event` resource.
    pub fn to_json(&self) -> Value {
        json!({
            "@odata.type": "#Event.v1_4_0.Event",
            "Id": self.id.to_string(),
            "Name": "Event Log",
            "Events": [{
                "EventId": self.id.to_string(),
                "EventTimestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                "MessageId": self.kind.message_id(),
                "Message": self.kind.message(),
                "OriginOfCondition": { "@odata.id": self.origin },
            }],
        })
    }
}

pub struct EventHub {
    next_id: Cell<u64>,
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BACKLOG);
        Self {
            next_id: Cell::new(1),
            tx,
        }
    }

    /// Sends an event to every current subscriber and returns its id.
    pub fn publish(&self, kind: EventKind, origin: &str) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let event = Event {
            id,
            kind,
            origin: origin.to_string(),
            timestamp: Utc::now(),
        };
        // Err only means nobody is listening.
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!("Event {id} {kind:?} on {origin} reached {receivers} subscribers");
        id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

fn event_service() -> Value {
    json!({
        "@odata.id": EVENT_SERVICE_URI,
        "@odata.type": "#EventService.v1_5_0.EventService",
        "Id": "EventService",
        "Name": "Event Service",
        "ServiceEnabled": true,
        "ServerSentEventUri": SSE_URI,
    })
}

/// Registers the event service resource and both event streams.
pub fn setup_events(app: &mut App, hub: Rc<EventHub>) -> Result<()> {
    let router = app.router_mut();
    router
        .route("/redfish/v1/EventService/")
        .entity("EventService")
        .handler(|_req, resp, _params| {
            resp.res().set_json(event_service());
        })?;

    let sse_hub = hub.clone();
    router
        .route(SSE_URI)
        .entity("EventService")
        .sse(move |_req, stream, _params| relay_sse(sse_hub.subscribe(), stream))?;

    router
        .route("/subscribe")
        .entity("EventService")
        .websocket(move |_req, ws, _params| relay_websocket(hub.subscribe(), ws))?;
    Ok(())
}

async fn relay_sse(mut events: broadcast::Receiver<Event>, mut stream: SseConnection) {
    info!("Event stream opened");
    let mut closed = std::pin::pin!(stream.closed());
    loop {
        tokio::select! {
            _ = &mut closed => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let data = event.to_json().to_string();
                    if let Err(err) = stream.send_event(&event.id.to_string(), &data).await {
                        debug!("Event stream write failed: {err}");
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Event stream fell behind, {missed} events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!("Event stream closed");
}

async fn relay_websocket(mut events: broadcast::Receiver<Event>, ws: WebSocket) {
    info!("Event subscription opened");
    let (mut sink, mut incoming) = ws.split();
    loop {
        tokio::select! {
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Pings are answered by the protocol layer.
                Some(Ok(_)) => continue,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    let text = event.to_json().to_string();
                    if let Err(err) = sink.send(Message::text(text)).await {
                        debug!("Event subscription write failed: {err}");
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Event subscription fell behind, {missed} events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    let _ = sink.close().await;
    info!("Event subscription closed");
}
