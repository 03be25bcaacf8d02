use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use switchboard_core::Fingerprint;

use crate::flight::{LeaderGuard, Slot, Waiter};
use crate::stream::{Publisher, StreamSlot, Subscriber};

/// One in-progress call, buffered or streamed
pub(crate) enum Shared<T, C, E> {
    Buffered(Arc<Slot<T, E>>),
    Streamed(Arc<StreamSlot<T, C, E>>),
}

pub(crate) type Flights<T, C, E> = Arc<DashMap<Fingerprint, Shared<T, C, E>>>;

/// In-flight calls keyed by fingerprint
///
/// Buffered and streamed calls share one map, so a fingerprint has at most
/// one upstream call whichever way its callers asked for the answer. A
/// buffered caller that finds a live stream waits for the stream's final
/// value; a streaming caller that finds a buffered call waits for its result.
///
/// `T` is the final value of a flight, `C` a streamed chunk and `E` the
/// leader's error.
pub struct InflightRegistry<T, C, E> {
    flights: Flights<T, C, E>,
}

/// Role assigned by [`InflightRegistry::begin_or_join`]
pub enum Flight<T, C, E> {
    Leader(LeaderGuard<T, C, E>),
    Waiter(Waiter<T, C, E>),
}

/// Role assigned by [`InflightRegistry::begin_or_join_stream`]
pub enum StreamFlight<T, C, E> {
    /// Produce chunks through `publisher` and read them back through `subscriber`
    Leader {
        publisher: Publisher<T, C, E>,
        subscriber: Subscriber<T, C, E>,
    },
    /// Joined a live stream, replaying it from the first chunk
    Subscriber(Subscriber<T, C, E>),
    /// Joined a buffered call; its result arrives all at once
    Waiter(Waiter<T, C, E>),
}

impl<T, C, E> InflightRegistry<T, C, E>
where
    T: Clone,
    C: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Lead a new buffered flight for `fingerprint` or join the one in progress
    ///
    /// Check and insert happen under one entry lock, so exactly one caller
    /// leads per fingerprint. A stream whose subscribers all left is not
    /// joined; it is replaced.
    pub fn begin_or_join(&self, fingerprint: &Fingerprint) -> Flight<T, C, E> {
        match self.flights.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) => {
                let joined = match entry.get() {
                    Shared::Buffered(slot) => Some(Waiter::buffered(Arc::clone(slot))),
                    Shared::Streamed(slot) if !slot.cancel.is_cancelled() => {
                        Some(Waiter::streamed(self.subscriber(fingerprint, Arc::clone(slot))))
                    }
                    Shared::Streamed(_) => None,
                };
                if let Some(waiter) = joined {
                    tracing::debug!(fingerprint = %fingerprint.short(), "joined in-flight request");
                    return Flight::Waiter(waiter);
                }

                let slot = Slot::new();
                entry.insert(Shared::Buffered(Arc::clone(&slot)));
                Flight::Leader(self.lead(fingerprint, slot))
            }
            Entry::Vacant(entry) => {
                let slot = Slot::new();
                entry.insert(Shared::Buffered(Arc::clone(&slot)));
                Flight::Leader(self.lead(fingerprint, slot))
            }
        }
    }

    /// Lead a new streamed flight for `fingerprint` or join the one in progress
    pub fn begin_or_join_stream(&self, fingerprint: &Fingerprint) -> StreamFlight<T, C, E> {
        match self.flights.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) => {
                let joined = match entry.get() {
                    Shared::Streamed(slot) if !slot.cancel.is_cancelled() => {
                        Some(StreamFlight::Subscriber(self.subscriber(fingerprint, Arc::clone(slot))))
                    }
                    Shared::Buffered(slot) => Some(StreamFlight::Waiter(Waiter::buffered(Arc::clone(slot)))),
                    Shared::Streamed(_) => None,
                };
                if let Some(joined) = joined {
                    tracing::debug!(fingerprint = %fingerprint.short(), "joined in-flight stream");
                    return joined;
                }

                let slot = StreamSlot::new();
                entry.insert(Shared::Streamed(Arc::clone(&slot)));
                self.lead_stream(fingerprint, slot)
            }
            Entry::Vacant(entry) => {
                let slot = StreamSlot::new();
                entry.insert(Shared::Streamed(Arc::clone(&slot)));
                self.lead_stream(fingerprint, slot)
            }
        }
    }

    /// A streamed flight nobody else can join
    pub fn begin_detached(&self, fingerprint: &Fingerprint) -> (Publisher<T, C, E>, Subscriber<T, C, E>) {
        let slot = StreamSlot::new();
        let publisher = Publisher::new(None, fingerprint.clone(), Arc::clone(&slot));
        let subscriber = Subscriber::attach(None, fingerprint.clone(), slot);
        (publisher, subscriber)
    }

    /// Flights of either kind currently awaiting a result
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Buffered flights currently awaiting a result
    pub fn buffered_in_flight(&self) -> usize {
        self.count(|shared| matches!(shared, Shared::Buffered(_)))
    }

    /// Streams currently producing
    pub fn streams_in_flight(&self) -> usize {
        self.count(|shared| matches!(shared, Shared::Streamed(_)))
    }

    fn count(&self, kind: impl Fn(&Shared<T, C, E>) -> bool) -> usize {
        self.flights.iter().filter(|entry| kind(entry.value())).count()
    }

    fn lead(&self, fingerprint: &Fingerprint, slot: Arc<Slot<T, E>>) -> LeaderGuard<T, C, E> {
        LeaderGuard::new(Arc::clone(&self.flights), fingerprint.clone(), slot)
    }

    fn lead_stream(&self, fingerprint: &Fingerprint, slot: Arc<StreamSlot<T, C, E>>) -> StreamFlight<T, C, E> {
        let publisher = Publisher::new(Some(Arc::clone(&self.flights)), fingerprint.clone(), Arc::clone(&slot));
        let subscriber = self.subscriber(fingerprint, slot);
        StreamFlight::Leader { publisher, subscriber }
    }

    fn subscriber(&self, fingerprint: &Fingerprint, slot: Arc<StreamSlot<T, C, E>>) -> Subscriber<T, C, E> {
        Subscriber::attach(Some(Arc::clone(&self.flights)), fingerprint.clone(), slot)
    }
}

impl<T, C, E> Default for InflightRegistry<T, C, E>
where
    T: Clone,
    C: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C, E> Clone for InflightRegistry<T, C, E> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}
