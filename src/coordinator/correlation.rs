//! Backend-response correlation engine
//!
//! Fan-out requests wait here until every targeted slave has answered or the
//! 5-second budget runs out, then exactly one Master→Backend response is
//! synthesized from the original request. The pass is reentrancy-guarded and
//! bounded (entry count and wall time) so the tick loop always makes
//! progress.

use std::sync::atomic::Ordering;

use tracing::{info, warn};

use super::state::{CoordinatorState, PendingBackendResponse};
use crate::core::{
    MAX_BACKEND_PROCESS_ITERATIONS, MAX_BACKEND_PROCESS_TIME_MS, RESPONSE_STATUS_ERROR,
};
use crate::protocol::{BackendMessage, BackendResponse};

/// Runs one correlation pass, returning the responses to transmit
///
/// Completed and timed-out entries are removed from the table; the caller
/// sends the returned responses after every lock is released.
pub fn process_pending_responses(state: &CoordinatorState, now_ms: u32) -> Vec<BackendResponse> {
    // Re-entry would double-emit responses
    if state.correlation_busy.swap(true, Ordering::AcqRel) {
        return Vec::new();
    }

    let started = state.correlation_started_ms.load(Ordering::Relaxed);
    if started != 0 && now_ms.wrapping_sub(started) > MAX_BACKEND_PROCESS_TIME_MS {
        warn!("correlation pass watchdog tripped, resetting");
        state.correlation_started_ms.store(0, Ordering::Relaxed);
        state.correlation_busy.store(false, Ordering::Release);
        return Vec::new();
    }
    state.correlation_started_ms.store(now_ms, Ordering::Relaxed);

    let mut responses = Vec::new();
    {
        let mut entries = state.pending_backend_responses.lock().unwrap();
        let mut index = 0;
        let mut examined = 0;
        while index < entries.len() && examined < MAX_BACKEND_PROCESS_ITERATIONS {
            examined += 1;
            let entry = &entries[index];
            if entry.is_complete() {
                info!(
                    message_id = entry.request.message_id(),
                    "fan-out complete, responding to backend"
                );
                if let Some(response) = completion_response(entry) {
                    responses.push(response);
                }
                entries.remove(index);
            } else if entry.is_timed_out(now_ms) {
                warn!(
                    message_id = entry.request.message_id(),
                    missing = entry.pending_slaves.len(),
                    "fan-out timed out, responding with error"
                );
                if let Some(response) = timeout_response(entry) {
                    responses.push(response);
                }
                entries.remove(index);
            } else {
                index += 1;
            }
        }
    }

    state.correlation_started_ms.store(0, Ordering::Relaxed);
    state.correlation_busy.store(false, Ordering::Release);
    responses
}

/// Builds the response for a fan-out whose slaves all answered
fn completion_response(entry: &PendingBackendResponse) -> Option<BackendResponse> {
    match &entry.request {
        BackendMessage::ModeConfig { mode } => Some(BackendResponse::ModeConfig {
            status: entry.overall_status(),
            mode: *mode,
        }),
        BackendMessage::Reset { slaves } => Some(BackendResponse::Reset {
            status: entry.overall_status(),
            slaves: slaves.clone(),
        }),
        other => {
            warn!(
                message_id = other.message_id(),
                "fan-out entry for a request kind that has no fan-out response"
            );
            None
        }
    }
}

/// Builds the error response for a fan-out that ran out of time
fn timeout_response(entry: &PendingBackendResponse) -> Option<BackendResponse> {
    match &entry.request {
        BackendMessage::ModeConfig { mode } => Some(BackendResponse::ModeConfig {
            status: RESPONSE_STATUS_ERROR,
            mode: *mode,
        }),
        BackendMessage::Reset { slaves } => Some(BackendResponse::Reset {
            status: RESPONSE_STATUS_ERROR,
            slaves: slaves.clone(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ResetEntry, BACKEND_RESPONSE_TIMEOUT_MS};

    const A: u32 = 0xA;
    const B: u32 = 0xB;

    fn reset_request() -> BackendMessage {
        BackendMessage::Reset {
            slaves: vec![
                ResetEntry {
                    id: A,
                    lock: 1,
                    clip_status: 0,
                },
                ResetEntry {
                    id: B,
                    lock: 1,
                    clip_status: 0,
                },
            ],
        }
    }

    #[test]
    fn test_reset_fanout_success() {
        let state = CoordinatorState::new();
        state.add_pending_backend_response(PendingBackendResponse::new(
            reset_request(),
            vec![A, B],
            1000,
        ));

        // No response while a slave is outstanding
        state.mark_fanout_response(A, crate::protocol::SlaveToMasterId::ResetResponse as u8, 0);
        assert!(process_pending_responses(&state, 1500).is_empty());

        state.mark_fanout_response(B, crate::protocol::SlaveToMasterId::ResetResponse as u8, 0);
        let responses = process_pending_responses(&state, 1900);
        assert_eq!(responses.len(), 1);
        match &responses[0] {
            BackendResponse::Reset { status, slaves } => {
                assert_eq!(*status, 0);
                assert_eq!(slaves.len(), 2);
                assert_eq!(slaves[0].id, A);
                assert_eq!(slaves[1].id, B);
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert!(state.pending_backend_responses.lock().unwrap().is_empty());

        // At most once: a later pass emits nothing
        assert!(process_pending_responses(&state, 2000).is_empty());
    }

    #[test]
    fn test_reset_fanout_timeout() {
        let state = CoordinatorState::new();
        state.add_pending_backend_response(PendingBackendResponse::new(
            reset_request(),
            vec![A, B],
            1000,
        ));
        state.mark_fanout_response(A, crate::protocol::SlaveToMasterId::ResetResponse as u8, 0);

        // Inside the budget: nothing yet
        assert!(process_pending_responses(&state, 1000 + BACKEND_RESPONSE_TIMEOUT_MS).is_empty());

        let responses = process_pending_responses(&state, 1001 + BACKEND_RESPONSE_TIMEOUT_MS);
        assert_eq!(responses.len(), 1);
        match &responses[0] {
            BackendResponse::Reset { status, slaves } => {
                assert_eq!(*status, 1);
                assert_eq!(slaves.len(), 2);
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert!(state.pending_backend_responses.lock().unwrap().is_empty());
    }

    #[test]
    fn test_partial_failure_yields_error_status() {
        let state = CoordinatorState::new();
        state.add_pending_backend_response(PendingBackendResponse::new(
            BackendMessage::ModeConfig { mode: 1 },
            vec![A, B],
            0,
        ));
        state.mark_fanout_response(
            A,
            crate::protocol::SlaveToMasterId::ResistanceConfigResponse as u8,
            0,
        );
        state.mark_fanout_response(
            B,
            crate::protocol::SlaveToMasterId::ResistanceConfigResponse as u8,
            2,
        );

        let responses = process_pending_responses(&state, 100);
        assert_eq!(
            responses,
            vec![BackendResponse::ModeConfig { status: 1, mode: 1 }]
        );
    }

    #[test]
    fn test_fifo_emission_order() {
        let state = CoordinatorState::new();
        state.add_pending_backend_response(PendingBackendResponse::new(
            BackendMessage::ModeConfig { mode: 0 },
            vec![A],
            0,
        ));
        state.add_pending_backend_response(PendingBackendResponse::new(
            BackendMessage::ModeConfig { mode: 2 },
            vec![A],
            0,
        ));
        let conduction = crate::protocol::SlaveToMasterId::ConductionConfigResponse as u8;
        state.mark_fanout_response(A, conduction, 0);
        // Second entry completes via the second reply
        state.mark_fanout_response(A, conduction, 0);

        let responses = process_pending_responses(&state, 100);
        assert_eq!(responses.len(), 2);
        assert!(matches!(responses[0], BackendResponse::ModeConfig { mode: 0, .. }));
        assert!(matches!(responses[1], BackendResponse::ModeConfig { mode: 2, .. }));
    }

    #[test]
    fn test_pass_is_bounded() {
        let state = CoordinatorState::new();
        for _ in 0..(MAX_BACKEND_PROCESS_ITERATIONS + 5) {
            let mut entry =
                PendingBackendResponse::new(BackendMessage::ModeConfig { mode: 0 }, vec![A], 0);
            entry.mark_response(A, 0);
            state.add_pending_backend_response(entry);
        }

        let first = process_pending_responses(&state, 100);
        assert_eq!(first.len(), MAX_BACKEND_PROCESS_ITERATIONS);
        // The remainder drains on the next tick
        let second = process_pending_responses(&state, 101);
        assert_eq!(second.len(), 5);
    }

    #[test]
    fn test_reentry_guard() {
        let state = CoordinatorState::new();
        state.correlation_busy.store(true, Ordering::Release);
        let mut entry =
            PendingBackendResponse::new(BackendMessage::ModeConfig { mode: 0 }, vec![A], 0);
        entry.mark_response(A, 0);
        state.add_pending_backend_response(entry);

        assert!(process_pending_responses(&state, 100).is_empty());

        state.correlation_busy.store(false, Ordering::Release);
        assert_eq!(process_pending_responses(&state, 101).len(), 1);
    }
}
