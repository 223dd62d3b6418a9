//! Single-consumer playback queue with interruption fencing
//!
//! `clear()` empties the pending list, cancels the segment being played and
//! moves the fence to the next unallocated sequence number. Anything stamped
//! before the clear that arrives afterwards is refused as stale, as is
//! anything from a [`QueueProducer`] minted before the clear.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{Segment, SequenceAllocator};
use crate::{Error, Result};

struct Active {
    sequence_number: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Segment>,
    active: Option<Active>,
    epoch: u64,
    fence: u64,
    closed: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_none()
    }
}

struct Shared {
    state: Mutex<QueueState>,
    ready: Notify,
    idle: Notify,
    sequence: SequenceAllocator,
}

/// FIFO of segments awaiting synthesis
#[derive(Clone)]
pub struct PlaybackQueue {
    shared: Arc<Shared>,
}

impl PlaybackQueue {
    /// Create a queue fencing against `sequence`
    #[must_use]
    pub fn new(sequence: SequenceAllocator) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                ready: Notify::new(),
                idle: Notify::new(),
                sequence,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The allocator this queue fences against
    #[must_use]
    pub fn sequence(&self) -> &SequenceAllocator {
        &self.shared.sequence
    }

    /// Append a segment
    ///
    /// # Errors
    ///
    /// Returns `Error::StaleCallback` if the segment was stamped before the
    /// last clear or the queue is closed
    pub fn enqueue(&self, segment: Segment) -> Result<()> {
        let mut state = self.lock();
        Self::push(&mut state, segment)?;
        drop(state);
        self.shared.ready.notify_one();
        Ok(())
    }

    fn push(state: &mut QueueState, segment: Segment) -> Result<()> {
        if state.closed || segment.sequence_number < state.fence {
            return Err(Error::StaleCallback {
                sequence: segment.sequence_number,
            });
        }
        state.pending.push_back(segment);
        Ok(())
    }

    /// Handle bound to the current epoch
    #[must_use]
    pub fn producer(&self) -> QueueProducer {
        QueueProducer {
            queue: self.clone(),
            epoch: self.lock().epoch,
        }
    }

    /// Pop the next pending segment without waiting
    #[must_use]
    pub fn drain_next(&self) -> Option<Segment> {
        let mut state = self.lock();
        let segment = state.pending.pop_front();
        if state.is_idle() {
            self.shared.idle.notify_waiters();
        }
        segment
    }

    /// Wait for the next segment and mark it active
    ///
    /// The returned token is cancelled if the queue is cleared while the
    /// segment plays. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<(Segment, CancellationToken)> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(segment) = state.pending.pop_front() {
                    let cancel = CancellationToken::new();
                    state.active = Some(Active {
                        sequence_number: segment.sequence_number,
                        cancel: cancel.clone(),
                    });
                    return Some((segment, cancel));
                }
            }
            self.shared.ready.notified().await;
        }
    }

    /// Mark playback of `sequence_number` finished
    pub fn finish(&self, sequence_number: u64) {
        let mut state = self.lock();
        if state
            .active
            .as_ref()
            .is_some_and(|a| a.sequence_number == sequence_number)
        {
            state.active = None;
        }
        if state.is_idle() {
            self.shared.idle.notify_waiters();
        }
    }

    /// Drop every pending segment and cancel the active one
    ///
    /// Returns how many pending segments were dropped. Clearing an already
    /// clear queue changes nothing observable.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        if let Some(active) = state.active.take() {
            active.cancel.cancel();
        }
        state.epoch += 1;
        state.fence = self.shared.sequence.peek();
        drop(state);

        self.shared.idle.notify_waiters();
        if dropped > 0 {
            tracing::debug!(dropped, "playback queue cleared");
        }
        dropped
    }

    /// Clear and stop the consumer
    pub fn close(&self) {
        self.clear();
        self.lock().closed = true;
        self.shared.ready.notify_one();
        self.shared.idle.notify_waiters();
    }

    /// Wait until nothing is pending or playing
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            {
                let state = self.lock();
                if state.is_idle() || state.closed {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Pending segment count
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Sequence number of the segment being played
    #[must_use]
    pub fn active(&self) -> Option<u64> {
        self.lock().active.as_ref().map(|a| a.sequence_number)
    }

    /// Clears so far
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }
}

/// Enqueue handle that goes stale on the next clear
#[derive(Clone)]
pub struct QueueProducer {
    queue: PlaybackQueue,
    epoch: u64,
}

impl QueueProducer {
    /// Append a segment if no clear happened since this producer was made
    ///
    /// # Errors
    ///
    /// Returns `Error::StaleCallback` after a clear
    pub fn enqueue(&self, segment: Segment) -> Result<()> {
        let mut state = self.queue.lock();
        if state.epoch != self.epoch {
            return Err(Error::StaleCallback {
                sequence: segment.sequence_number,
            });
        }
        PlaybackQueue::push(&mut state, segment)?;
        drop(state);
        self.queue.shared.ready.notify_one();
        Ok(())
    }

    /// Whether a clear has happened since this producer was made
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.queue.lock().epoch != self.epoch
    }
}
