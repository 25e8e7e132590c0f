use std::sync::atomic::{AtomicU8, Ordering};

use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{info, warn};

/// Process lifecycle tracking and the bare liveness responder.
///
/// The server moves through four states: it starts in `Starting`, becomes
/// `Ready` once the database is reachable and migrations have been applied,
/// flips to `Draining` when a shutdown signal is received, and ends in
/// `Stopped` once in-flight requests have drained (or the grace deadline
/// fired). The state is process-wide: middleware reads it to label metrics,
/// and the server loop advances it at each lifecycle step.
///
/// The liveness probe (`/status`) is deliberately independent of this state:
/// it only proves the process is able to answer HTTP, and keeps returning
/// 200 while draining so that orchestrators don't kill the pod mid-drain.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }

    fn from_u8(value: u8) -> LifecycleState {
        match value {
            0 => LifecycleState::Starting,
            1 => LifecycleState::Ready,
            2 => LifecycleState::Draining,
            _ => LifecycleState::Stopped,
        }
    }
}

static LIFECYCLE_STATE: AtomicU8 = AtomicU8::new(0);

pub fn get_lifecycle_state() -> LifecycleState {
    LifecycleState::from_u8(LIFECYCLE_STATE.load(Ordering::Relaxed))
}

/// Advance the process lifecycle state. Transitions are monotonic:
/// an attempt to move backwards (e.g. `Draining` -> `Ready`) is ignored,
/// so a late-arriving readiness flip cannot undo a shutdown.
pub fn advance_lifecycle_state(state: LifecycleState) {
    let target = state as u8;
    let mut current = LIFECYCLE_STATE.load(Ordering::Relaxed);
    loop {
        if target <= current {
            warn!(
                "ignoring lifecycle regression {} -> {}",
                LifecycleState::from_u8(current).as_str(),
                state.as_str()
            );
            return;
        }
        match LIFECYCLE_STATE.compare_exchange(
            current,
            target,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                info!("lifecycle state change: {}", state.as_str());
                return;
            }
            Err(observed) => current = observed,
        }
    }
}

/// Liveness responder. Always answers 200 with a fixed body, whatever the
/// state of the database or migrations: it only proves the process is alive.
pub async fn status() -> impl IntoResponse {
    (StatusCode::OK, "up and running")
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::to_bytes;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn status_is_fixed_200_up_and_running() {
        let response = status().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"up and running");
    }

    #[tokio::test]
    async fn lifecycle_state_only_moves_forward() {
        assert_eq!(get_lifecycle_state(), LifecycleState::Starting);

        advance_lifecycle_state(LifecycleState::Ready);
        assert_eq!(get_lifecycle_state(), LifecycleState::Ready);

        // Regressions are ignored
        advance_lifecycle_state(LifecycleState::Starting);
        assert_eq!(get_lifecycle_state(), LifecycleState::Ready);

        advance_lifecycle_state(LifecycleState::Draining);
        assert_eq!(get_lifecycle_state(), LifecycleState::Draining);
        advance_lifecycle_state(LifecycleState::Ready);
        assert_eq!(get_lifecycle_state(), LifecycleState::Draining);

        advance_lifecycle_state(LifecycleState::Stopped);
        assert_eq!(get_lifecycle_state(), LifecycleState::Stopped);
    }
}
