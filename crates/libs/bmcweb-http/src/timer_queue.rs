//! Bounded FIFO of deadline callbacks driven by a logical clock.
//!
//! Every connection arms its deadline here instead of owning a timer. The
//! server advances the clock once per tick and calls [`SharedTimerQueue::process`],
//! which fires every entry that has been waiting for a full window. Entries
//! are fired in insertion order; a cancelled entry stays in the ring as a
//! hole until it reaches the front.
//!
//! # Examples
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use bmcweb_http::timer_queue::SharedTimerQueue;
//!
//! let queue = SharedTimerQueue::new(2);
//! let fired = Rc::new(Cell::new(false));
//! let flag = fired.clone();
//! queue.add(Box::new(move || flag.set(true))).unwrap();
//!
//! queue.advance();
//! queue.process();
//! assert!(!fired.get());
//!
//! queue.advance();
//! queue.process();
//! assert!(fired.get());
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

/// Maximum number of pending entries.
pub const MAX_SIZE: usize = 100;

/// Ticks an entry waits before it fires.
pub const DEFAULT_WINDOW: u64 = 5;

pub type TimerCallback = Box<dyn FnOnce()>;

/// Identifies a pending entry for [`TimerQueue::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(usize);

/// The ring itself. Use [`SharedTimerQueue`] from connection code.
pub struct TimerQueue {
    entries: VecDeque<(u64, Option<TimerCallback>)>,
    /// Number of entries ever popped; tokens are `step + index`.
    step: usize,
    now: u64,
    window: u64,
}

impl TimerQueue {
    pub fn new(window: u64) -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_SIZE),
            step: 0,
            now: 0,
            window,
        }
    }

    /// Appends a callback stamped with the current tick.
    ///
    /// Returns `None` when the ring is full.
    pub fn add(&mut self, callback: TimerCallback) -> Option<TimerToken> {
        if self.entries.len() >= MAX_SIZE {
            debug!("Timer queue full, refusing new deadline");
            return None;
        }
        let token = TimerToken(self.step + self.entries.len());
        self.entries.push_back((self.now, Some(callback)));
        Some(token)
    }

    /// Turns a pending entry into a hole. Unknown or fired tokens are ignored.
    pub fn cancel(&mut self, token: TimerToken) {
        let Some(index) = token.0.checked_sub(self.step) else {
            return;
        };
        if let Some((_, callback)) = self.entries.get_mut(index) {
            *callback = None;
        }
    }

    /// Moves the logical clock one tick forward.
    pub fn advance(&mut self) {
        self.now += 1;
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Removes the front entry if its window has elapsed.
    ///
    /// The outer `Option` says whether an entry was popped, the inner one
    /// whether it still carried a callback.
    pub fn pop_expired(&mut self) -> Option<Option<TimerCallback>> {
        let (stamp, _) = self.entries.front()?;
        if self.now.saturating_sub(*stamp) < self.window {
            return None;
        }
        let (_, callback) = self.entries.pop_front()?;
        self.step += 1;
        Some(callback)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Loop-local handle to a [`TimerQueue`].
///
/// Callbacks run with the queue unborrowed, so they may add or cancel entries.
#[derive(Clone, Default)]
pub struct SharedTimerQueue(Rc<RefCell<TimerQueue>>);

impl SharedTimerQueue {
    pub fn new(window: u64) -> Self {
        Self(Rc::new(RefCell::new(TimerQueue::new(window))))
    }

    pub fn add(&self, callback: TimerCallback) -> Option<TimerToken> {
        self.0.borrow_mut().add(callback)
    }

    pub fn cancel(&self, token: TimerToken) {
        self.0.borrow_mut().cancel(token);
    }

    pub fn advance(&self) {
        self.0.borrow_mut().advance();
    }

    /// Fires every expired entry, front to back. Returns how many callbacks ran.
    pub fn process(&self) -> usize {
        let mut fired = 0;
        loop {
            let popped = self.0.borrow_mut().pop_expired();
            match popped {
                Some(Some(callback)) => {
                    callback();
                    fired += 1;
                }
                Some(None) => {}
                None => break,
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn window(&self) -> u64 {
        self.0.borrow().window()
    }
}
