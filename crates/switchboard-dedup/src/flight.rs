use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use switchboard_core::Fingerprint;
use tokio::sync::watch;

use crate::FlightError;
use crate::registry::{Flights, Shared};
use crate::stream::Subscriber;

type Outcome<T, E> = Option<Result<T, FlightError<E>>>;

/// Shared state of one buffered flight
pub(crate) struct Slot<T, E> {
    outcome: watch::Sender<Outcome<T, E>>,
    waiters: AtomicUsize,
}

impl<T, E> Slot<T, E> {
    pub(crate) fn new() -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            outcome,
            waiters: AtomicUsize::new(0),
        })
    }
}

/// Held by the caller performing a buffered call
///
/// Dropping it unresolved releases every waiter with
/// [`FlightError::Abandoned`].
pub struct LeaderGuard<T, C, E> {
    flights: Flights<T, C, E>,
    fingerprint: Fingerprint,
    slot: Arc<Slot<T, E>>,
    resolved: bool,
}

impl<T, C, E> LeaderGuard<T, C, E> {
    pub(crate) const fn new(flights: Flights<T, C, E>, fingerprint: Fingerprint, slot: Arc<Slot<T, E>>) -> Self {
        Self {
            flights,
            fingerprint,
            slot,
            resolved: false,
        }
    }

    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Callers currently waiting on this flight
    pub fn waiter_count(&self) -> usize {
        self.slot.waiters.load(Ordering::Acquire)
    }

    /// Publish the outcome to every waiter
    ///
    /// The entry is removed first, so a request arriving afterwards starts
    /// a fresh flight instead of joining a finished one.
    pub fn resolve(mut self, result: Result<T, E>) -> usize {
        self.resolved = true;
        self.release(result.map_err(FlightError::Leader))
    }

    fn release(&self, outcome: Result<T, FlightError<E>>) -> usize {
        self.flights.remove_if(&self.fingerprint, |_, shared| {
            matches!(shared, Shared::Buffered(slot) if Arc::ptr_eq(slot, &self.slot))
        });
        let waiters = self.waiter_count();
        self.slot.outcome.send_replace(Some(outcome));
        waiters
    }
}

impl<T, C, E> Drop for LeaderGuard<T, C, E> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        let waiters = self.release(Err(FlightError::Abandoned));
        tracing::warn!(
            fingerprint = %self.fingerprint.short(),
            waiters,
            "in-flight request abandoned by its leader"
        );
    }
}

/// Held by a caller sharing another caller's flight
///
/// The flight it joined may be buffered or streamed; either way only the
/// final value is delivered.
pub struct Waiter<T, C, E>(Wait<T, C, E>);

enum Wait<T, C, E> {
    Buffered(BufferedWait<T, E>),
    Streamed(Subscriber<T, C, E>),
}

struct BufferedWait<T, E> {
    slot: Arc<Slot<T, E>>,
    outcome: watch::Receiver<Outcome<T, E>>,
}

impl<T, E> Drop for BufferedWait<T, E> {
    fn drop(&mut self) {
        self.slot.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T, C, E> Waiter<T, C, E> {
    pub(crate) fn buffered(slot: Arc<Slot<T, E>>) -> Self {
        slot.waiters.fetch_add(1, Ordering::AcqRel);
        let outcome = slot.outcome.subscribe();
        Self(Wait::Buffered(BufferedWait { slot, outcome }))
    }

    pub(crate) const fn streamed(subscriber: Subscriber<T, C, E>) -> Self {
        Self(Wait::Streamed(subscriber))
    }
}

impl<T, C, E> Waiter<T, C, E>
where
    T: Clone,
    C: Clone,
    E: Clone,
{
    /// Wait for the leader's outcome
    ///
    /// Dropping the future only ends this caller's wait; the flight carries on
    /// unless this was the last reader of a stream.
    pub async fn wait(self) -> Result<T, FlightError<E>> {
        match self.0 {
            Wait::Buffered(mut wait) => match wait.outcome.wait_for(Option::is_some).await {
                Ok(outcome) => (*outcome).clone().unwrap_or(Err(FlightError::Abandoned)),
                Err(_) => Err(FlightError::Abandoned),
            },
            Wait::Streamed(mut subscriber) => subscriber.outcome().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use switchboard_core::{GenerationParams, Message};

    use super::*;
    use crate::{Flight, InflightRegistry};

    type Registry = InflightRegistry<String, String, String>;

    fn fingerprint(prompt: &str) -> Fingerprint {
        Fingerprint::compute(&[Message::user(prompt)], "openai/gpt-4o", &GenerationParams::default())
    }

    fn leader(flight: Flight<String, String, String>) -> LeaderGuard<String, String, String> {
        match flight {
            Flight::Leader(guard) => guard,
            Flight::Waiter(_) => panic!("expected to lead"),
        }
    }

    fn waiter(flight: Flight<String, String, String>) -> Waiter<String, String, String> {
        match flight {
            Flight::Waiter(waiter) => waiter,
            Flight::Leader(_) => panic!("expected to wait"),
        }
    }

    #[tokio::test]
    async fn waiters_receive_the_leaders_result() {
        let registry = Registry::new();
        let fp = fingerprint("hello");

        let guard = leader(registry.begin_or_join(&fp));
        let first = waiter(registry.begin_or_join(&fp));
        let second = waiter(registry.begin_or_join(&fp));
        assert_eq!(guard.waiter_count(), 2);
        assert_eq!(registry.in_flight(), 1);

        let pending = tokio::spawn(async move { (first.wait().await, second.wait().await) });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(guard.resolve(Ok("hi".to_owned())), 2);

        let (a, b) = pending.await.unwrap();
        assert_eq!(a.unwrap(), "hi");
        assert_eq!(b.unwrap(), "hi");
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_fan_out_too() {
        let registry = Registry::new();
        let fp = fingerprint("hello");

        let guard = leader(registry.begin_or_join(&fp));
        let joined = waiter(registry.begin_or_join(&fp));
        guard.resolve(Err("upstream down".to_owned()));

        assert!(matches!(joined.wait().await, Err(FlightError::Leader(e)) if e == "upstream down"));
    }

    #[tokio::test]
    async fn dropped_leader_abandons_waiters() {
        let registry = Registry::new();
        let fp = fingerprint("hello");

        let guard = leader(registry.begin_or_join(&fp));
        let joined = waiter(registry.begin_or_join(&fp));
        drop(guard);

        assert!(matches!(joined.wait().await, Err(FlightError::Abandoned)));
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn resolved_flight_is_not_joined() {
        let registry = Registry::new();
        let fp = fingerprint("hello");

        leader(registry.begin_or_join(&fp)).resolve(Ok("first".to_owned()));
        let again = leader(registry.begin_or_join(&fp));
        again.resolve(Ok("second".to_owned()));
    }

    #[tokio::test]
    async fn waiter_timeout_leaves_the_flight_running() {
        let registry = Registry::new();
        let fp = fingerprint("hello");

        let guard = leader(registry.begin_or_join(&fp));
        let impatient = waiter(registry.begin_or_join(&fp));
        let patient = waiter(registry.begin_or_join(&fp));

        let timed_out = tokio::time::timeout(Duration::from_millis(5), impatient.wait()).await;
        assert!(timed_out.is_err());
        assert_eq!(guard.waiter_count(), 1);

        guard.resolve(Ok("done".to_owned()));
        assert_eq!(patient.wait().await.unwrap(), "done");
    }

    #[test]
    fn distinct_fingerprints_lead_separately() {
        let registry = Registry::new();
        let _a = leader(registry.begin_or_join(&fingerprint("a")));
        let _b = leader(registry.begin_or_join(&fingerprint("b")));
        assert_eq!(registry.in_flight(), 2);
    }
}
