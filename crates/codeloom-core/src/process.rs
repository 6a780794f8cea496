//! Process liveness probing.
//!
//! Both the Atomic Writer's stale-lock detection and the Transaction
//! Manager's rollback bookkeeping need to know whether a recorded pid still
//! names a running process. This module is the single place that answers
//! that question.

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Returns true when `pid` names a currently running process.
///
/// Nonpositive pids are always reported dead without making a syscall. On
/// Unix this sends the null signal (`kill(pid, 0)`): `EPERM` means a process
/// exists but is owned by someone else (still alive), `ESRCH`/`ECHILD` mean
/// no such process, and any other errno is treated conservatively as "alive"
/// so that a transient probing failure never causes a live writer's lock to
/// be torn down from under it.
#[must_use]
pub fn is_process_alive(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    imp::probe(pid)
}

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    use tracing::trace;

    use super::PROCESS_TARGET;

    pub(super) fn probe(pid: i64) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(Errno::ESRCH) | Err(Errno::ECHILD) => false,
            Err(errno) => {
                trace!(target: PROCESS_TARGET, pid, %errno, "liveness probe failed, assuming alive");
                true
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    // Non-Unix platforms do not have a liveness probe implementation here;
    // assume alive so callers fall back to timeout-based recovery instead of
    // silently reaping a live writer's lock.
    pub(super) fn probe(_pid: i64) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_pids_are_dead() {
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(-1));
        assert!(!is_process_alive(-999));
    }

    #[cfg(unix)]
    #[test]
    fn current_process_is_alive() {
        let pid = i64::from(std::process::id());
        assert!(is_process_alive(pid));
    }

    #[cfg(unix)]
    #[test]
    fn implausible_pid_is_dead() {
        // PIDs this large cannot exist on any real system; ESRCH is expected.
        assert!(!is_process_alive(999_999_999));
    }
}
