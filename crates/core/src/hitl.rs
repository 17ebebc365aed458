//! HITL runtime (spec §4.4): option-request/response mediation, keyed
//! by `(worldId,requestId)`, with a timeout fallback.
//!
//! A `oneshot` channel backs each pending request, resolved exactly
//! once by whichever of "user responds" or "timeout fires" happens
//! first — generalized from a fixed approve/deny decision to an
//! arbitrary option set.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use relaycore_domain::hitl::{HitlOption, HitlOptionRequest, HitlOptionResolution, HitlResolutionSource};

use crate::error::{Error, Result};

struct Pending {
    request: HitlOptionRequest,
    default_option_id: String,
    chat_id: Option<String>,
    respond: oneshot::Sender<HitlOptionResolution>,
}

/// Normalizes a request's option set: trims id/label, drops empties and
/// duplicate ids. Returns an error if nothing usable remains.
fn normalize_options(options: &[HitlOption]) -> Result<Vec<HitlOption>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for opt in options {
        let id = opt.id.trim().to_string();
        let label = opt.label.trim().to_string();
        if id.is_empty() || label.is_empty() {
            continue;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        out.push(HitlOption {
            id,
            label,
            description: opt.description.clone(),
        });
    }
    if out.is_empty() {
        return Err(Error::HitlOptionNotFound("no usable options in request".to_string()));
    }
    Ok(out)
}

fn resolve_default_option_id(options: &[HitlOption], explicit: Option<&str>) -> String {
    if let Some(explicit) = explicit {
        if options.iter().any(|o| o.id == explicit) {
            return explicit.to_string();
        }
    }
    if let Some(no_option) = options.iter().find(|o| o.id == "no") {
        return no_option.id.clone();
    }
    options[0].id.clone()
}

/// A `system` event announcing a new option request (spec §6 HITL wire
/// payload). The event bus (C10) publishes this; callers of
/// `request_option` receive it as the return value to publish.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HitlAnnouncement {
    pub event_type: &'static str,
    pub request_id: String,
    pub title: String,
    pub message: String,
    pub options: Vec<HitlOption>,
    pub default_option_id: String,
    pub timeout_ms: u64,
    pub metadata: serde_json::Value,
}

pub struct HitlRuntime {
    pending: Mutex<HashMap<(String, String), Pending>>,
    default_timeout: Duration,
}

impl HitlRuntime {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Registers a pending request and returns the announcement to
    /// publish plus a future resolving once either the user responds or
    /// the timeout fires — whichever happens first.
    pub fn request_option(&self, mut request: HitlOptionRequest) -> Result<(HitlAnnouncement, oneshot::Receiver<HitlOptionResolution>)> {
        let options = normalize_options(&request.options)?;
        let default_option_id = resolve_default_option_id(&options, request.default_option_id.as_deref());
        request.options = options.clone();

        let timeout_ms = request.timeout_ms.unwrap_or(self.default_timeout.as_millis() as u64);
        let (tx, rx) = oneshot::channel();

        let key = (request.world_id.clone(), request.request_id.clone());
        self.pending.lock().insert(
            key,
            Pending {
                request: request.clone(),
                default_option_id: default_option_id.clone(),
                chat_id: request.chat_id.clone(),
                respond: tx,
            },
        );

        tracing::debug!(world_id = %request.world_id, request_id = %request.request_id, timeout_ms, "hitl option request registered");

        let announcement = HitlAnnouncement {
            event_type: "hitl-option-request",
            request_id: request.request_id,
            title: request.title,
            message: request.message,
            options,
            default_option_id,
            timeout_ms,
            metadata: request.metadata,
        };

        Ok((announcement, rx))
    }

    /// Resolves a request with `source:timeout` using its stored
    /// default option. A no-op if the request already resolved.
    pub fn resolve_timeout(&self, world_id: &str, request_id: &str) {
        let pending = self.pending.lock().remove(&(world_id.to_string(), request_id.to_string()));
        if let Some(pending) = pending {
            tracing::info!(world_id, request_id, option_id = %pending.default_option_id, "hitl request timed out, resolving with default");
            let _ = pending.respond.send(HitlOptionResolution {
                request_id: pending.request.request_id.clone(),
                option_id: pending.default_option_id.clone(),
                source: HitlResolutionSource::Timeout,
            });
        }
    }

    /// `submitWorldOptionResponse` (spec §4.4): rejects an unknown
    /// request, unknown option, or chat-scope mismatch; otherwise
    /// resolves with `source:user`.
    pub fn submit_response(&self, world_id: &str, request_id: &str, option_id: &str, chat_id: Option<&str>) -> Result<()> {
        let mut guard = self.pending.lock();
        let key = (world_id.to_string(), request_id.to_string());
        let Some(pending) = guard.get(&key) else {
            return Err(Error::HitlRequestNotFound(world_id.to_string(), request_id.to_string()));
        };

        if !pending.request.options.iter().any(|o| o.id == option_id) {
            return Err(Error::HitlOptionNotFound(option_id.to_string()));
        }
        if let (Some(expected), Some(actual)) = (&pending.chat_id, chat_id) {
            if expected != actual {
                return Err(Error::HitlChatScopeMismatch(request_id.to_string()));
            }
        }

        let pending = guard.remove(&key).expect("checked above");
        tracing::info!(world_id, request_id, option_id, "hitl request resolved by user");
        let _ = pending.respond.send(HitlOptionResolution {
            request_id: request_id.to_string(),
            option_id: option_id.to_string(),
            source: HitlResolutionSource::User,
        });
        Ok(())
    }

    pub fn is_pending(&self, world_id: &str, request_id: &str) -> bool {
        self.pending.lock().contains_key(&(world_id.to_string(), request_id.to_string()))
    }
}
