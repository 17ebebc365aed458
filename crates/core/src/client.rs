//! Client connection (spec §6): a transport-agnostic sink for world
//! events. WebSocket/HTTP/CLI framing is an external collaborator
//! (spec §1); this trait is all the event bus (C10) depends on.

use serde_json::Value;

pub trait ClientConnection: Send + Sync {
    fn is_open(&self) -> bool;
    fn on_world_event(&self, _event_type: &str, _data: &Value) {}
    fn on_error(&self, _message: &str) {}
    fn on_log(&self, _event: &Value) {}
}
