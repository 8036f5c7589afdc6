//! Emergency stop synthesis.
//!
//! When an action deadline elapses without a terminal result, the bridge
//! assumes the executor may be wedged mid-action and releases the
//! actuators: a `STOP_ALL` request is synthesized toward the game client
//! that went silent. `STOP_ALL` is idempotent and always allowlisted at
//! the client, so firing it spuriously is safe; not firing it is not.

use tether_proto::{ActionRequest, ActionType};
use uuid::Uuid;

use crate::clock::wall_unix_ms;

/// TTL applied to a synthesized `STOP_ALL`. Short: either the client
/// takes it promptly or it is not taking anything.
pub const STOP_ALL_TTL_MS: u64 = 1000;

/// Builds a fresh `STOP_ALL` request targeted at `target_agent_id`.
#[must_use]
pub fn stop_all_request(target_agent_id: &str) -> ActionRequest {
    ActionRequest {
        request_id: Uuid::new_v4().to_string(),
        action_type: ActionType::StopAll as i32,
        target_agent_id: target_agent_id.to_string(),
        expires_at_unix_ms: wall_unix_ms() + STOP_ALL_TTL_MS,
        params: None,
    }
}
