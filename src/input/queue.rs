//! Bounded hand-off between hook callbacks and the dispatcher
//!
//! Keyboard events are never discarded. When the queue is full, room is
//! made by evicting injected events first, then pointer moves, then other
//! mouse events. Consecutive pointer moves coalesce into the newest one.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{RawInput, RawKind};

struct Shared {
    events: Mutex<VecDeque<RawInput>>,
    ready: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

fn is_key(input: &RawInput) -> bool {
    matches!(input.kind, RawKind::KeyDown(_) | RawKind::KeyUp(_))
}

fn is_move(input: &RawInput) -> bool {
    matches!(input.kind, RawKind::MouseMove(_))
}

/// Index of the queued event to give up for `incoming`, if any may go
fn eviction_victim(events: &VecDeque<RawInput>, incoming: &RawInput) -> Option<usize> {
    if incoming.injected {
        return None;
    }
    events
        .iter()
        .position(|e| e.injected)
        .or_else(|| events.iter().position(is_move))
        .or_else(|| {
            if is_key(incoming) {
                events.iter().position(|e| !is_key(e))
            } else {
                None
            }
        })
}

/// Producer side, held by hook callbacks. Never blocks.
#[derive(Clone)]
pub struct HookSink {
    shared: Arc<Shared>,
}

impl HookSink {
    /// Enqueue an event. Returns false when the event itself was discarded.
    pub fn offer(&self, input: RawInput) -> bool {
        if self.shared.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut events = self.shared.events.lock();
        if events.len() >= self.shared.capacity {
            if is_move(&input) && !input.injected && events.back().is_some_and(is_move) {
                events.pop_back();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            } else if let Some(victim) = eviction_victim(&events, &input) {
                events.remove(victim);
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            } else if input.injected || !is_key(&input) {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            // a queue full of physical key events still takes one more
        }
        events.push_back(input);
        drop(events);
        self.shared.ready.notify_one();
        true
    }
}

/// Consumer side, owned by the dispatcher thread
pub struct HookQueue {
    shared: Arc<Shared>,
}

impl HookQueue {
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                events: Mutex::new(VecDeque::with_capacity(capacity)),
                ready: Condvar::new(),
                capacity,
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// A producer handle for a hook backend
    pub fn sink(&self) -> HookSink {
        HookSink {
            shared: self.shared.clone(),
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RawInput> {
        let deadline = Instant::now() + timeout;
        let mut events = self.shared.events.lock();
        loop {
            if let Some(input) = events.pop_front() {
                return Some(input);
            }
            if self.shared.ready.wait_until(&mut events, deadline).timed_out() {
                return events.pop_front();
            }
        }
    }

    pub fn try_recv(&self) -> Option<RawInput> {
        self.shared.events.lock().pop_front()
    }

    /// Events lost because the queue was full
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for HookQueue {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}
