/// Scheduled callbacks for the engine loop
///
/// The engine never sleeps. Every delay (command timeout, settle delay,
/// round pause, duration tick) is a [`Wakeup`] scheduled on a [`Timer`] and
/// delivered back through the engine's input channel.
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use super::bus::EngineInput;

/// Identifies a scheduled wakeup so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// A scheduled callback. `session` is the engine-local session number, so
/// wakeups that outlive their session are recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Reaction timeout of an outstanding command
    CommandTimeout { session: u64, device_id: u8, token: u64 },
    /// Delayed activation (settle delay, round pause)
    Activate { session: u64, device_id: u8 },
    /// Wall-clock tick for duration-bounded modes
    Tick { session: u64 },
}

impl Wakeup {
    pub fn session(&self) -> u64 {
        match self {
            Wakeup::CommandTimeout { session, .. }
            | Wakeup::Activate { session, .. }
            | Wakeup::Tick { session } => *session,
        }
    }
}

pub trait Timer: Send {
    /// Deliver `wakeup` after `delay`.
    fn schedule(&mut self, delay: Duration, wakeup: Wakeup) -> TimerHandle;

    /// Cancel a pending wakeup. Unknown or already fired handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);

    /// Current time on the clock the delays are measured against.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Timer backed by tokio tasks that post into the engine channel
pub struct TokioTimer {
    runtime: tokio::runtime::Handle,
    tx: flume::Sender<EngineInput>,
    tasks: HashMap<u64, tokio::task::JoinHandle<()>>,
    next_id: u64,
}

impl TokioTimer {
    pub fn new(runtime: tokio::runtime::Handle, tx: flume::Sender<EngineInput>) -> Self {
        Self {
            runtime,
            tx,
            tasks: HashMap::new(),
            next_id: 0,
        }
    }
}

impl Timer for TokioTimer {
    fn schedule(&mut self, delay: Duration, wakeup: Wakeup) -> TimerHandle {
        self.tasks.retain(|_, task| !task.is_finished());

        self.next_id += 1;
        let id = self.next_id;
        let tx = self.tx.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(EngineInput::Wakeup(wakeup)).is_err() {
                log::debug!("Timer fired after engine shut down: {wakeup:?}");
            }
        });
        self.tasks.insert(id, task);
        TimerHandle(id)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle.0) {
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_timer_fires_and_cancels() -> anyhow::Result<()> {
        let (tx, rx) = flume::unbounded();
        let mut timer = TokioTimer::new(tokio::runtime::Handle::current(), tx);

        let cancelled = timer.schedule(Duration::from_millis(20), Wakeup::Tick { session: 1 });
        timer.schedule(Duration::from_millis(40), Wakeup::Tick { session: 2 });
        timer.cancel(cancelled);

        let input = tokio::time::timeout(Duration::from_secs(2), rx.recv_async()).await??;
        assert!(matches!(input, EngineInput::Wakeup(Wakeup::Tick { session: 2 })));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
