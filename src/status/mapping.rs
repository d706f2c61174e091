//! Backend status code to domain state mapping.

use crate::release::StatusCode;
use crate::resource::ReleaseState;

/// Maps a backend status code to a domain state.
///
/// Total: codes the backend does not define map to `Unknown`.
#[must_use]
pub const fn state_for_code(code: StatusCode) -> ReleaseState {
    match code.0 {
        1 => ReleaseState::Deployed,
        2 => ReleaseState::Deleted,
        3 => ReleaseState::Superseded,
        4 => ReleaseState::Failed,
        5 => ReleaseState::Deleting,
        6 => ReleaseState::PendingInstall,
        7 => ReleaseState::PendingUpgrade,
        8 => ReleaseState::PendingRollback,
        _ => ReleaseState::Unknown,
    }
}
