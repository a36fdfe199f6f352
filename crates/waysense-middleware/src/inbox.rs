//! Bounded, priority-aware producer → consumer inbox.
//!
//! Producers (the positioning task, the depth task, the speech collaborator)
//! push into an [`InboxSender`]; exactly one consumer drains the
//! [`InboxReceiver`].  Pushes never block.
//!
//! Items that report [`Ranked::is_pinned`] are always admitted, are never
//! displaced and do not count against the capacity.  For the remaining items,
//! a full inbox displaces the oldest of the lowest-ranked queued items,
//! provided it ranks equal to or lower than the incoming one.  Otherwise the
//! incoming item is rejected.
//!
//! Delivery order is FIFO across both kinds; priority ordering is the
//! consumer's job.
//!
//! # Example
//!
//! ```rust
//! use waysense_middleware::inbox::{inbox, Admission};
//!
//! let (tx, mut rx) = inbox::<u8>(2);
//! assert!(matches!(tx.push(1), Ok(Admission::Accepted)));
//! assert!(matches!(tx.push(2), Ok(Admission::Accepted)));
//! // Full: the oldest item ranked <= 3 is displaced.
//! assert!(matches!(tx.push(3), Ok(Admission::Displaced(1))));
//! assert_eq!(rx.try_recv(), Some(2));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use waysense_types::{SchedulerInput, WayError};

/// Rank used to pick the displacement victim under backpressure.
pub trait Ranked {
    fn rank(&self) -> u8;

    /// Pinned items bypass the capacity bound entirely.
    fn is_pinned(&self) -> bool {
        false
    }
}

impl Ranked for SchedulerInput {
    fn rank(&self) -> u8 {
        SchedulerInput::rank(self)
    }

    fn is_pinned(&self) -> bool {
        SchedulerInput::is_pinned(self)
    }
}

impl Ranked for u8 {
    fn rank(&self) -> u8 {
        *self
    }
}

/// Outcome of [`InboxSender::push`].
#[derive(Debug, PartialEq)]
pub enum Admission<T> {
    Accepted,
    /// The item was queued and this older item was dropped to make room.
    Displaced(T),
    /// The inbox was full of higher-ranked items; this is the pushed item.
    Rejected(T),
}

struct State<T> {
    items: VecDeque<T>,
    /// Queued items that are not pinned.
    bounded: usize,
    closed: bool,
}

impl<T: Ranked> State<T> {
    fn pop(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        if !item.is_pinned() {
            self.bounded -= 1;
        }
        Some(item)
    }

    /// Index of the oldest unpinned item with the lowest rank.
    fn victim(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, queued)| !queued.is_pinned())
            .min_by_key(|(i, queued)| (queued.rank(), *i))
            .map(|(i, _)| i)
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    capacity: usize,
    senders: AtomicUsize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }
}

/// Create an inbox holding at most `capacity` items (minimum 1).
pub fn inbox<T: Ranked>(capacity: usize) -> (InboxSender<T>, InboxReceiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::with_capacity(capacity),
            bounded: 0,
            closed: false,
        }),
        notify: Notify::new(),
        capacity,
        senders: AtomicUsize::new(1),
    });
    (
        InboxSender {
            shared: Arc::clone(&shared),
        },
        InboxReceiver { shared },
    )
}

/// Producer handle.  Clone freely; the inbox closes when the last sender is
/// dropped.
pub struct InboxSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Ranked> InboxSender<T> {
    /// Queue `item` without blocking.
    ///
    /// # Errors
    ///
    /// [`WayError::Channel`] once the inbox is closed.
    pub fn push(&self, item: T) -> Result<Admission<T>, WayError> {
        let admission = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(WayError::Channel("guidance inbox closed".into()));
            }
            if item.is_pinned() {
                state.items.push_back(item);
                Admission::Accepted
            } else if state.bounded < self.shared.capacity {
                state.items.push_back(item);
                state.bounded += 1;
                Admission::Accepted
            } else {
                let incoming = item.rank();
                let victim = match state.victim() {
                    Some(i) if state.items[i].rank() <= incoming => state.items.remove(i),
                    _ => None,
                };
                match victim {
                    Some(v) => {
                        state.items.push_back(item);
                        Admission::Displaced(v)
                    }
                    None => return Ok(Admission::Rejected(item)),
                }
            }
        };
        self.shared.notify.notify_one();
        Ok(admission)
    }

    /// Close the inbox for every sender.  Queued items remain receivable.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for InboxSender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for InboxSender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.close();
        }
    }
}

/// The single consumer handle.
pub struct InboxReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Ranked> InboxReceiver<T> {
    /// Wait for the next item.  Returns `None` once the inbox is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.lock();
                if let Some(item) = state.pop() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next item if one is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.shared.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
