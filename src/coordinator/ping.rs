//! Ping session scheduler
//!
//! A backend PingControl request opens a session; the tick loop walks the
//! session table, emitting one PingRequest per interval until `total` probes
//! are out, then one final backend response reporting how many replies came
//! back.

use tracing::info;

use super::state::CoordinatorState;
use crate::protocol::{BackendResponse, SlaveCommand};

/// Work produced by one scheduler pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingAction {
    /// Transmit one probe to the target
    Probe {
        target_id: u32,
        command: SlaveCommand,
    },
    /// A session finished; report to the backend
    Finished(BackendResponse),
}

/// Advances every session whose interval has elapsed
pub fn advance_sessions(state: &CoordinatorState, now_ms: u32) -> Vec<PingAction> {
    let mut actions = Vec::new();
    let mut sessions = state.ping_sessions.lock().unwrap();

    sessions.retain_mut(|session| {
        if now_ms.wrapping_sub(session.last_sent_at) < u32::from(session.interval_ms) {
            return true;
        }
        if session.sent < session.total {
            session.sent += 1;
            session.last_sent_at = now_ms;
            actions.push(PingAction::Probe {
                target_id: session.target_id,
                command: SlaveCommand::PingRequest {
                    sequence: session.sent,
                    timestamp_ms: now_ms,
                },
            });
            true
        } else {
            info!(
                target_id = format_args!("{:#010x}", session.target_id),
                succeeded = session.succeeded,
                total = session.total,
                "ping session finished"
            );
            actions.push(PingAction::Finished(BackendResponse::Ping {
                mode: session.mode,
                total: session.total,
                succeeded: session.succeeded,
                destination_id: session.target_id,
            }));
            false
        }
    });

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::PingSession;

    fn session(now: u32) -> PingSession {
        PingSession {
            target_id: 0xC,
            mode: 0,
            total: 3,
            sent: 0,
            succeeded: 0,
            interval_ms: 100,
            last_sent_at: now,
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let state = CoordinatorState::new();
        state.add_ping_session(session(1000));

        // Probes at 100 ms spacing, sequences 1..=3
        let mut now = 1000;
        for expected_seq in 1..=3u16 {
            assert!(advance_sessions(&state, now + 99).is_empty());
            now += 100;
            let actions = advance_sessions(&state, now);
            assert_eq!(
                actions,
                vec![PingAction::Probe {
                    target_id: 0xC,
                    command: SlaveCommand::PingRequest {
                        sequence: expected_seq,
                        timestamp_ms: now,
                    },
                }]
            );
        }

        // Two replies arrive along the way
        state.note_ping_success(0xC);
        state.note_ping_success(0xC);

        // One interval after the last probe the session completes
        now += 100;
        let actions = advance_sessions(&state, now);
        assert_eq!(
            actions,
            vec![PingAction::Finished(BackendResponse::Ping {
                mode: 0,
                total: 3,
                succeeded: 2,
                destination_id: 0xC,
            })]
        );
        assert!(state.ping_sessions.lock().unwrap().is_empty());

        // Nothing further
        assert!(advance_sessions(&state, now + 1000).is_empty());
    }

    #[test]
    fn test_zero_count_session_reports_immediately() {
        let state = CoordinatorState::new();
        let mut s = session(0);
        s.total = 0;
        state.add_ping_session(s);

        let actions = advance_sessions(&state, 100);
        assert_eq!(
            actions,
            vec![PingAction::Finished(BackendResponse::Ping {
                mode: 0,
                total: 0,
                succeeded: 0,
                destination_id: 0xC,
            })]
        );
    }

    #[test]
    fn test_parallel_sessions() {
        let state = CoordinatorState::new();
        state.add_ping_session(session(0));
        let mut other = session(0);
        other.target_id = 0xD;
        other.interval_ms = 50;
        state.add_ping_session(other);

        let actions = advance_sessions(&state, 60);
        // Only the 50 ms session fires
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions[0],
            PingAction::Probe { target_id: 0xD, .. }
        ));
    }
}
