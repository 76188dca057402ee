use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::state::Settings;
use panel_core::PanelError;

pub const ACTOR_TOKEN_HEADER: &str = "x-panel-actor-token";

/// Compare two secrets without leaking their length or a mismatch position.
/// Both sides are hashed first, so the byte-by-byte XOR runs over fixed-size
/// digests regardless of input length.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    da.iter().zip(db.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Enforce the shared-secret header when one is configured. With no secret
/// set the gate is a no-op, which is the intended posture for a localhost
/// deployment.
pub fn require_actor_token(headers: &HeaderMap, settings: &Settings) -> Result<(), PanelError> {
    let Some(secret) = settings.routines_secret.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(ACTOR_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if constant_time_eq(presented, secret) {
        Ok(())
    } else {
        Err(PanelError::ActorTokenRejected)
    }
}
