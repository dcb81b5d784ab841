//! Retry engine for confirmed slave commands
//!
//! Every confirmed command sits in `pending_commands` until its slave
//! replies. The tick loop calls [`collect_due`]; commands past their
//! exponential-backoff window are either scheduled for retransmission or
//! dropped once the budget is spent. Serialized frames are cached in the
//! entry, so a retry is a verbatim resend.

use tracing::warn;

use super::state::CoordinatorState;
use crate::core::{BASE_RETRY_TIMEOUT_MS, MAX_RETRY_TIMEOUT_MS};

/// Work produced by one retry pass
#[derive(Debug, Default)]
pub struct RetryPass {
    /// Frame sets to retransmit, in queue order
    pub resends: Vec<(u32, Vec<Vec<u8>>)>,
    /// `(target, message_id)` of commands that exhausted their budget
    pub dropped: Vec<(u32, u8)>,
}

/// Backoff window for the given attempt count: `min(100 · 2^n, 1000)` ms
pub fn retry_timeout_ms(retries_done: u8) -> u32 {
    let shifted = BASE_RETRY_TIMEOUT_MS.saturating_mul(1u32 << retries_done.min(31));
    shifted.min(MAX_RETRY_TIMEOUT_MS)
}

/// Scans the pending-command queue and advances every due entry
///
/// State is updated under the queue lock; the caller performs the actual
/// radio sends afterwards. A send that later fails is retried again on its
/// next window until the budget runs out, so a suppressed radio defers
/// rather than cancels.
pub fn collect_due(state: &CoordinatorState, now_ms: u32) -> RetryPass {
    let mut pass = RetryPass::default();
    let mut commands = state.pending_commands.lock().unwrap();

    commands.retain_mut(|command| {
        let window = retry_timeout_ms(command.retries_done);
        if now_ms.wrapping_sub(command.sent_at) <= window {
            return true;
        }
        if command.retries_done < command.max_retries {
            command.retries_done += 1;
            command.sent_at = now_ms;
            pass.resends
                .push((command.target_id, command.frames.clone()));
            true
        } else {
            warn!(
                target_id = format_args!("{:#010x}", command.target_id),
                message_id = command.message_id,
                retries = command.retries_done,
                "command exhausted its retries"
            );
            pass.dropped.push((command.target_id, command.message_id));
            false
        }
    });

    pass
}
