//! [`AlertQueue`] – bounded priority queue of pending alerts.
//!
//! Ordering is by [`Alert::priority`] (highest first) and insertion order
//! among equals (FIFO).  Pushing an alert first drops pending alerts it
//! supersedes (see [`Alert::supersede_key`]); if the queue is still full the
//! lowest-priority entry is evicted, oldest first among equals.  An incoming
//! alert that ranks below everything pending is itself the one evicted.
//!
//! The queue is small (tens of entries), so linear scans are used throughout.

use tracing::debug;
use waysense_types::{Alert, AlertOrigin, Sector};

struct Pending {
    seq: u64,
    alert: Alert,
}

/// Outcome of [`AlertQueue::push`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PushOutcome {
    /// Pending alerts replaced by the newer one.
    pub superseded: Vec<Alert>,
    /// Alert dropped for capacity; may be the pushed alert itself.
    pub evicted: Option<Alert>,
}

/// Bounded priority queue with supersession and lowest-first eviction.
pub struct AlertQueue {
    capacity: usize,
    entries: Vec<Pending>,
    next_seq: u64,
}

impl AlertQueue {
    /// Create a queue holding at most `capacity` alerts (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest pending priority.
    pub fn peek_priority(&self) -> Option<u8> {
        self.entries.iter().map(|p| p.alert.priority).max()
    }

    /// Pending alerts in dequeue order.
    pub fn snapshot(&self) -> Vec<Alert> {
        let mut ordered: Vec<&Pending> = self.entries.iter().collect();
        ordered.sort_by(|a, b| b.alert.priority.cmp(&a.alert.priority).then(a.seq.cmp(&b.seq)));
        ordered.into_iter().map(|p| p.alert.clone()).collect()
    }

    /// Enqueue `alert`.
    pub fn push(&mut self, alert: Alert) -> PushOutcome {
        let superseded = self.supersede(&alert);

        let evicted = if self.entries.len() >= self.capacity {
            match self.lowest_index() {
                Some(i) if self.entries[i].alert.priority <= alert.priority => {
                    let victim = self.entries.remove(i).alert;
                    debug!(priority = victim.priority, message = %victim.message, "alert queue full, evicting");
                    Some(victim)
                }
                _ => {
                    debug!(priority = alert.priority, message = %alert.message, "alert queue full, rejecting");
                    return PushOutcome {
                        superseded,
                        evicted: Some(alert),
                    };
                }
            }
        } else {
            None
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Pending { seq, alert });
        PushOutcome { superseded, evicted }
    }

    /// Remove and return the highest-priority, oldest alert.
    pub fn pop(&mut self) -> Option<Alert> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.alert
                    .priority
                    .cmp(&b.alert.priority)
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;
        Some(self.entries.remove(idx).alert)
    }

    /// Drop pending alerts that `newer` supersedes.
    pub fn supersede(&mut self, newer: &Alert) -> Vec<Alert> {
        match newer.supersede_key() {
            Some(key) => self.drain_where(|a| a.supersede_key() == Some(key)),
            None => Vec::new(),
        }
    }

    /// Drop navigation alerts belonging to route generations before `epoch`.
    pub fn flush_navigation_before(&mut self, epoch: u32) -> usize {
        self.drain_where(|a| {
            a.origin == AlertOrigin::Navigation && a.route_epoch.is_none_or(|e| e < epoch)
        })
        .len()
    }

    /// Drop pending obstacle alerts for `sector`.
    pub fn retract_sector(&mut self, sector: Sector) -> usize {
        self.drain_where(|a| a.origin == AlertOrigin::Obstacle && a.sector == Some(sector))
            .len()
    }

    fn lowest_index(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.alert
                    .priority
                    .cmp(&b.alert.priority)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(i, _)| i)
    }

    fn drain_where(&mut self, pred: impl Fn(&Alert) -> bool) -> Vec<Alert> {
        let mut removed = Vec::new();
        self.entries.retain(|p| {
            if pred(&p.alert) {
                removed.push(p.alert.clone());
                false
            } else {
                true
            }
        });
        removed
    }
}
