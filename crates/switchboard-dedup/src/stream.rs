use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use switchboard_core::Fingerprint;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::FlightError;
use crate::registry::{Flights, Shared};

struct StreamState<T, C, E> {
    chunks: Vec<C>,
    finished: Option<Result<T, FlightError<E>>>,
}

/// Shared state of one streamed flight
///
/// Chunks are kept in a replay buffer so a subscriber joining late still
/// sees the whole sequence. The call is cancelled once every subscriber,
/// the leader's own included, has gone.
pub(crate) struct StreamSlot<T, C, E> {
    state: Mutex<StreamState<T, C, E>>,
    /// Bumped on every chunk and on completion
    version: watch::Sender<u64>,
    subscribers: AtomicUsize,
    pub(crate) cancel: CancellationToken,
}

impl<T, C, E> StreamSlot<T, C, E> {
    pub(crate) fn new() -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(StreamState {
                chunks: Vec::new(),
                finished: None,
            }),
            version,
            subscribers: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, StreamState<T, C, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_finished(&self) -> bool {
        self.state().finished.is_some()
    }
}

fn is_slot<T, C, E>(shared: &Shared<T, C, E>, slot: &Arc<StreamSlot<T, C, E>>) -> bool {
    matches!(shared, Shared::Streamed(current) if Arc::ptr_eq(current, slot))
}

/// Producing side of a streamed flight
///
/// Dropping it before [`Publisher::finish`] ends the stream for every
/// subscriber with [`FlightError::Abandoned`].
pub struct Publisher<T, C, E> {
    flights: Option<Flights<T, C, E>>,
    fingerprint: Fingerprint,
    slot: Arc<StreamSlot<T, C, E>>,
    done: bool,
}

impl<T, C, E> Publisher<T, C, E> {
    pub(crate) const fn new(
        flights: Option<Flights<T, C, E>>,
        fingerprint: Fingerprint,
        slot: Arc<StreamSlot<T, C, E>>,
    ) -> Self {
        Self {
            flights,
            fingerprint,
            slot,
            done: false,
        }
    }

    /// Append a chunk and wake subscribers
    pub fn push(&self, chunk: C) {
        self.slot.state().chunks.push(chunk);
        self.slot.version.send_modify(|v| *v += 1);
    }

    /// Fires once no subscriber is left to read the stream
    pub fn cancellation(&self) -> CancellationToken {
        self.slot.cancel.clone()
    }

    /// Subscribers currently reading, the leader's own included
    pub fn subscriber_count(&self) -> usize {
        self.slot.subscribers.load(Ordering::Acquire)
    }

    /// End the stream with its final value or the leader's error
    pub fn finish(mut self, result: Result<T, E>) {
        self.done = true;
        self.complete(result.map_err(FlightError::Leader));
    }

    fn complete(&self, outcome: Result<T, FlightError<E>>) {
        if let Some(flights) = &self.flights {
            flights.remove_if(&self.fingerprint, |_, shared| is_slot(shared, &self.slot));
        }
        self.slot.state().finished = Some(outcome);
        self.slot.version.send_modify(|v| *v += 1);
    }
}

impl<T, C, E> Drop for Publisher<T, C, E> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        self.complete(Err(FlightError::Abandoned));
        tracing::warn!(fingerprint = %self.fingerprint.short(), "stream abandoned by its producer");
    }
}

/// Reading side of a streamed flight
pub struct Subscriber<T, C, E> {
    flights: Option<Flights<T, C, E>>,
    fingerprint: Fingerprint,
    slot: Arc<StreamSlot<T, C, E>>,
    version: watch::Receiver<u64>,
    cursor: usize,
    ended: bool,
}

impl<T, C, E> Subscriber<T, C, E> {
    pub(crate) fn attach(
        flights: Option<Flights<T, C, E>>,
        fingerprint: Fingerprint,
        slot: Arc<StreamSlot<T, C, E>>,
    ) -> Self {
        slot.subscribers.fetch_add(1, Ordering::AcqRel);
        let version = slot.version.subscribe();
        Self {
            flights,
            fingerprint,
            slot,
            version,
            cursor: 0,
            ended: false,
        }
    }
}

impl<T, C, E> Subscriber<T, C, E>
where
    T: Clone,
    C: Clone,
    E: Clone,
{
    /// Next chunk, the terminal error, or `None` once the stream ended
    pub async fn next(&mut self) -> Option<Result<C, FlightError<E>>> {
        loop {
            if self.ended {
                return None;
            }

            // Mark seen before reading so a push racing this check still wakes us
            self.version.borrow_and_update();
            {
                let state = self.slot.state();
                if let Some(chunk) = state.chunks.get(self.cursor) {
                    self.cursor += 1;
                    return Some(Ok(chunk.clone()));
                }
                if let Some(finished) = &state.finished {
                    self.ended = true;
                    return finished.as_ref().err().cloned().map(Err);
                }
            }

            if self.version.changed().await.is_err() {
                self.ended = true;
                return Some(Err(FlightError::Abandoned));
            }
        }
    }

    /// Wait for the stream to end, skipping chunks, and return its final value
    pub async fn outcome(&mut self) -> Result<T, FlightError<E>> {
        loop {
            self.version.borrow_and_update();
            let finished = self.slot.state().finished.clone();
            if let Some(outcome) = finished {
                self.ended = true;
                return outcome;
            }

            if self.version.changed().await.is_err() {
                self.ended = true;
                return Err(FlightError::Abandoned);
            }
        }
    }

    /// Final value of a stream that completed successfully
    pub fn completed(&self) -> Option<T> {
        match &self.slot.state().finished {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T, C, E> Drop for Subscriber<T, C, E> {
    fn drop(&mut self) {
        let mut counted = false;
        let mut cancelled = false;

        // Decrement under the entry lock so a concurrent join either sees a
        // live flight or a cancelled one, never a flight about to be cancelled
        if let Some(flights) = &self.flights {
            flights.remove_if(&self.fingerprint, |_, shared| {
                if !is_slot(shared, &self.slot) {
                    return false;
                }
                counted = true;
                let last = self.slot.subscribers.fetch_sub(1, Ordering::AcqRel) == 1;
                if last && !self.slot.is_finished() {
                    self.slot.cancel.cancel();
                    cancelled = true;
                }
                cancelled
            });
        }

        if !counted {
            let last = self.slot.subscribers.fetch_sub(1, Ordering::AcqRel) == 1;
            if last && !self.slot.is_finished() {
                self.slot.cancel.cancel();
                cancelled = true;
            }
        }

        if cancelled {
            tracing::info!(fingerprint = %self.fingerprint.short(), "last subscriber left, cancelling stream");
        }
    }
}
