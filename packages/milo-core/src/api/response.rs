//! Shared JSON envelope helpers for REST handlers.
//!
//! Handlers either `?`-propagate a [`MiloError`] (its `IntoResponse` impl
//! produces the `{"error", "message", "status"}` body) or return one of
//! these on the success path, keeping every 2xx body shaped the same way.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// `{"ok": true, "data": <value>}` success envelope.
pub fn api_success<T: Serialize>(data: T) -> Response {
    Json(serde_json::json!({ "ok": true, "data": data })).into_response()
}

/// `{"ok": true}` for handlers with nothing to report beyond success.
pub fn api_ok() -> Response {
    Json(serde_json::json!({ "ok": true })).into_response()
}
