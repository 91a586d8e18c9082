//! Per-descriptor wait state.
//!
//! One `WaitState` is created when a descriptor is registered with the
//! reactor and lives until the descriptor is closed. I/O callers park on it
//! when the native operation would block; the poller thread flips the ready
//! flags and broadcasts; deadline timers mark a direction expired. Each
//! direction carries its own `seq` counter ordering deadline reprogramming
//! against timers that are already in flight: a timer that fires with a
//! stale `seq` is a no-op, and reprogramming one direction leaves the other
//! direction's live timer untouched.

use std::io;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Instant;

use crate::error;
use crate::reactor::timer::TimerHandle;
use crate::reactor::Direction;

/// Which deadline(s) a `set_deadline` call applies to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Mode {
    Read,
    Write,
    Both,
}

impl Mode {
    fn covers(self, dir: Direction) -> bool {
        match self {
            Mode::Read => dir == Direction::Read,
            Mode::Write => dir == Direction::Write,
            Mode::Both => true,
        }
    }
}

#[derive(Default)]
struct DirState {
    /// A readiness event has been delivered and not yet consumed.
    ready: bool,
    /// The direction's deadline has passed. Sticky until the deadline is
    /// reprogrammed.
    expired: bool,
    /// Invalidates timers armed before this direction's last deadline
    /// change or the close.
    seq: u64,
}

struct State {
    /// Terminal once true.
    closing: bool,
    read: DirState,
    write: DirState,
}

impl State {
    fn dir_mut(&mut self, dir: Direction) -> &mut DirState {
        match dir {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    fn dir(&self, dir: Direction) -> &DirState {
        match dir {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }
}

pub(crate) struct WaitState {
    state: Mutex<State>,
    read_cond: Condvar,
    write_cond: Condvar,
    timers: TimerHandle,
    // Handed to armed timers so they never keep the descriptor alive.
    me: Weak<WaitState>,
}

impl WaitState {
    pub(crate) fn new(timers: TimerHandle) -> Arc<WaitState> {
        Arc::new_cyclic(|me| WaitState {
            state: Mutex::new(State {
                closing: false,
                read: DirState::default(),
                write: DirState::default(),
            }),
            read_cond: Condvar::new(),
            write_cond: Condvar::new(),
            timers,
            me: me.clone(),
        })
    }

    fn cond(&self, dir: Direction) -> &Condvar {
        match dir {
            Direction::Read => &self.read_cond,
            Direction::Write => &self.write_cond,
        }
    }

    /// Check that an I/O attempt in `dir` may proceed at all.
    pub(crate) fn prepare(&self, dir: Direction) -> io::Result<()> {
        let state = self.state.lock().unwrap();
        if state.closing {
            return Err(error::closed());
        }
        if state.dir(dir).expired {
            return Err(error::timeout());
        }
        Ok(())
    }

    /// Park until the direction becomes ready, its deadline expires, or the
    /// descriptor is closed. Consumes the ready flag on success: one
    /// readiness event licenses exactly one retry of the native operation.
    pub(crate) fn wait(&self, dir: Direction) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closing {
                return Err(error::closed());
            }
            if state.dir(dir).expired {
                return Err(error::timeout());
            }
            if state.dir(dir).ready {
                state.dir_mut(dir).ready = false;
                return Ok(());
            }
            state = self.cond(dir).wait(state).unwrap();
        }
    }

    /// Called by the poller when the foreign primitive reports readiness.
    /// Broadcast: every waiter wakes and races to consume the flag.
    pub(crate) fn ready(&self, dir: Direction) {
        let mut state = self.state.lock().unwrap();
        state.dir_mut(dir).ready = true;
        self.cond(dir).notify_all();
    }

    /// Program, clear, or retroactively expire the deadline for `mode`.
    ///
    /// A deadline at or before now expires immediately, unblocking current
    /// and future waiters; a future deadline arms a timer that checks the
    /// direction's captured `seq` when it fires. `None` clears the
    /// deadline. Directions not covered by `mode` are untouched; their
    /// armed timers stay live.
    pub(crate) fn set_deadline(&self, t: Option<Instant>, mode: Mode) {
        let mut state = self.state.lock().unwrap();
        if state.closing {
            return;
        }
        let now = Instant::now();
        for dir in [Direction::Read, Direction::Write] {
            if !mode.covers(dir) {
                continue;
            }
            state.dir_mut(dir).seq += 1;
            let seq = state.dir(dir).seq;
            match t {
                None => state.dir_mut(dir).expired = false,
                Some(t) if t <= now => {
                    state.dir_mut(dir).expired = true;
                    self.cond(dir).notify_all();
                }
                Some(t) => {
                    state.dir_mut(dir).expired = false;
                    self.timers.arm(t, self.me.clone(), dir, seq);
                }
            }
        }
    }

    /// Called by the timer driver. A no-op when `seq` is stale for the
    /// direction or the descriptor is closing, which absorbs the race
    /// between a timer firing and the deadline being reprogrammed or the
    /// descriptor closed.
    pub(crate) fn deadline_fired(&self, dir: Direction, seq: u64) {
        let mut state = self.state.lock().unwrap();
        if state.closing || seq != state.dir(dir).seq {
            return;
        }
        state.dir_mut(dir).expired = true;
        self.cond(dir).notify_all();
    }

    /// Mark the descriptor closed and wake every waiter on both directions.
    /// Returns false (and does nothing) if it was already closed.
    pub(crate) fn unblock(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closing {
            return false;
        }
        state.closing = true;
        state.read.seq += 1;
        state.write.seq += 1;
        self.read_cond.notify_all();
        self.write_cond.notify_all();
        true
    }
}

impl std::fmt::Debug for WaitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WaitState")
    }
}
