//! Deadline timer driver.
//!
//! A single background thread sleeps on a min-heap of pending deadlines and
//! calls back into the owning wait state when one comes due. Entries are
//! never removed early; reprogramming a deadline bumps the wait state's
//! `seq`, so a superseded entry fires as a no-op. Firing happens outside the
//! heap lock, so arming a timer from inside a wait-state lock cannot
//! deadlock against the driver.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::trace;

use crate::reactor::wait::WaitState;
use crate::reactor::Direction;

struct Entry {
    when: Instant,
    id: u64,
    seq: u64,
    dir: Direction,
    wait: Weak<WaitState>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.when == other.when && self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Entry) -> Ordering {
        self.when.cmp(&other.when).then(self.id.cmp(&other.id))
    }
}

struct DriverState {
    heap: BinaryHeap<Reverse<Entry>>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<DriverState>,
    cond: Condvar,
}

/// Arms timers on behalf of wait states. Cheap to clone.
#[derive(Clone)]
pub(crate) struct TimerHandle {
    shared: Arc<Shared>,
}

impl TimerHandle {
    /// Schedule `wait.deadline_fired(dir, seq)` for instant `when`.
    pub(crate) fn arm(&self, when: Instant, wait: Weak<WaitState>, dir: Direction, seq: u64) {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.heap.push(Reverse(Entry {
            when,
            id,
            seq,
            dir,
            wait,
        }));
        self.shared.cond.notify_one();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimerHandle")
    }
}

/// Owns the driver thread. Shuts it down on drop.
pub(crate) struct TimerDriver {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl TimerDriver {
    pub(crate) fn new() -> io::Result<TimerDriver> {
        let shared = Arc::new(Shared {
            state: Mutex::new(DriverState {
                heap: BinaryHeap::new(),
                next_id: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("parley-timer".into())
                .spawn(move || run(&shared))?
        };
        Ok(TimerDriver {
            shared,
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().shutdown = true;
        self.shared.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimerDriver")
    }
}

fn run(shared: &Shared) {
    let mut due = Vec::new();
    loop {
        {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    return;
                }
                let now = Instant::now();
                while state
                    .heap
                    .peek()
                    .map_or(false, |Reverse(entry)| entry.when <= now)
                {
                    if let Some(Reverse(entry)) = state.heap.pop() {
                        due.push(entry);
                    }
                }
                if !due.is_empty() {
                    break;
                }
                state = match state.heap.peek() {
                    None => shared.cond.wait(state).unwrap(),
                    Some(Reverse(next)) => {
                        let timeout = next.when - now;
                        shared.cond.wait_timeout(state, timeout).unwrap().0
                    }
                };
            }
        }
        // Fire with the heap lock released; deadline_fired takes the wait
        // state's lock and discards stale sequence numbers itself.
        for entry in due.drain(..) {
            if let Some(wait) = entry.wait.upgrade() {
                trace!("deadline fired ({:?}, seq {})", entry.dir, entry.seq);
                wait.deadline_fired(entry.dir, entry.seq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::wait::Mode;
    use std::time::Duration;

    #[test]
    fn armed_timer_expires_the_direction() {
        let driver = TimerDriver::new().unwrap();
        let ws = WaitState::new(driver.handle());

        ws.set_deadline(
            Some(Instant::now() + Duration::from_millis(20)),
            Mode::Read,
        );
        let err = ws.wait(Direction::Read).unwrap_err();
        assert!(crate::error::is_timeout(&err));
        // Only the read direction expired.
        ws.prepare(Direction::Write).unwrap();
    }

    #[test]
    fn earlier_timer_preempts_a_long_sleep() {
        let driver = TimerDriver::new().unwrap();
        let ws = WaitState::new(driver.handle());

        // The driver is already sleeping toward a distant deadline when a
        // near one arrives; it must wake up and honor the near one.
        ws.set_deadline(Some(Instant::now() + Duration::from_secs(600)), Mode::Write);
        thread::sleep(Duration::from_millis(10));
        ws.set_deadline(
            Some(Instant::now() + Duration::from_millis(20)),
            Mode::Write,
        );

        let start = Instant::now();
        let err = ws.wait(Direction::Write).unwrap_err();
        assert!(crate::error::is_timeout(&err));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn dropped_wait_state_is_skipped() {
        let driver = TimerDriver::new().unwrap();
        let ws = WaitState::new(driver.handle());
        ws.set_deadline(
            Some(Instant::now() + Duration::from_millis(10)),
            Mode::Read,
        );
        drop(ws);
        // Nothing to assert beyond "the driver does not panic".
        thread::sleep(Duration::from_millis(40));
    }
}
