/// Reaction-timeout supervision
///
/// At most one countdown is armed per session. Arming again first disarms the
/// previous countdown. A fired countdown only counts if its token still
/// matches the armed one: a fire that races a disarm (the task was already
/// past its sleep) is stale and must be dropped by the caller.
use std::{collections::HashMap, time::Duration};

use super::timer::{Timer, TimerHandle, Wakeup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArmedTimeout {
    device_id: u8,
    token: u64,
    handle: TimerHandle,
}

#[derive(Debug, Default)]
pub struct TimeoutSupervisor {
    armed: HashMap<u64, ArmedTimeout>,
    next_token: u64,
}

impl TimeoutSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a countdown for `device_id`; returns the token of the new countdown.
    pub fn arm(&mut self, timer: &mut dyn Timer, session: u64, device_id: u8, timeout: Duration) -> u64 {
        self.disarm(timer, session);

        self.next_token += 1;
        let token = self.next_token;
        let handle = timer.schedule(
            timeout,
            Wakeup::CommandTimeout {
                session,
                device_id,
                token,
            },
        );
        self.armed.insert(
            session,
            ArmedTimeout {
                device_id,
                token,
                handle,
            },
        );
        log::debug!("Timeout armed: session={session} device={device_id} token={token} after {timeout:?}");
        token
    }

    /// Cancel the countdown of a session. Returns whether one was armed.
    pub fn disarm(&mut self, timer: &mut dyn Timer, session: u64) -> bool {
        match self.armed.remove(&session) {
            Some(armed) => {
                timer.cancel(armed.handle);
                log::debug!("Timeout disarmed: session={session} token={}", armed.token);
                true
            }
            None => false,
        }
    }

    /// Accept a fired countdown. Returns false for stale fires.
    pub fn claim(&mut self, session: u64, device_id: u8, token: u64) -> bool {
        match self.armed.get(&session) {
            Some(armed) if armed.token == token && armed.device_id == device_id => {
                self.armed.remove(&session);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, session: u64) -> bool {
        self.armed.contains_key(&session)
    }

    pub fn armed_device(&self, session: u64) -> Option<u8> {
        self.armed.get(&session).map(|a| a.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTimer {
        scheduled: Vec<(TimerHandle, Wakeup)>,
        cancelled: Vec<TimerHandle>,
    }

    impl Timer for RecordingTimer {
        fn schedule(&mut self, _delay: Duration, wakeup: Wakeup) -> TimerHandle {
            let handle = TimerHandle(self.scheduled.len() as u64 + 1);
            self.scheduled.push((handle, wakeup));
            handle
        }

        fn cancel(&mut self, handle: TimerHandle) {
            self.cancelled.push(handle);
        }
    }

    #[test]
    fn test_rearm_disarms_previous() {
        let mut timer = RecordingTimer::default();
        let mut sup = TimeoutSupervisor::new();

        let first = sup.arm(&mut timer, 1, 2, Duration::from_millis(100));
        let second = sup.arm(&mut timer, 1, 3, Duration::from_millis(100));

        assert_eq!(timer.cancelled, vec![TimerHandle(1)]);
        assert!(!sup.claim(1, 2, first));
        assert_eq!(sup.armed_device(1), Some(3));
        assert!(sup.claim(1, 3, second));
        assert!(!sup.is_armed(1));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let mut timer = RecordingTimer::default();
        let mut sup = TimeoutSupervisor::new();

        let token = sup.arm(&mut timer, 7, 1, Duration::from_millis(100));
        assert!(sup.claim(7, 1, token));
        assert!(!sup.claim(7, 1, token));

        let token = sup.arm(&mut timer, 7, 1, Duration::from_millis(100));
        assert!(sup.disarm(&mut timer, 7));
        assert!(!sup.claim(7, 1, token));
        assert!(!sup.disarm(&mut timer, 7));
    }
}
