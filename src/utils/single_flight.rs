//! Request coalescing for cache refreshes
//!
//! At most one flight per `SingleFlight` is active at a time. Callers arriving
//! while a flight is running await the same shared future and receive a clone
//! of its output.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

type Flight<T> = Shared<BoxFuture<'static, T>>;

struct FlightSlot<T: Clone> {
    generation: u64,
    current: Option<(u64, Flight<T>)>,
}

pub struct SingleFlight<T: Clone> {
    slot: Mutex<FlightSlot<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(FlightSlot {
                generation: 0,
                current: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlightSlot<T>> {
        // The slot holds no invariant a panicking holder could break
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `make()` unless a flight is already running, then await the
    /// flight's output. `make` is not called when joining.
    ///
    /// The second field of the result is `true` for the caller that started
    /// the flight.
    pub async fn run<F, Fut>(&self, make: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (generation, flight, leader) = {
            let mut slot = self.lock();
            match &slot.current {
                Some((generation, flight)) => (*generation, flight.clone(), false),
                None => {
                    slot.generation += 1;
                    let generation = slot.generation;
                    let flight = make().boxed().shared();
                    slot.current = Some((generation, flight.clone()));
                    (generation, flight, true)
                }
            }
        };

        let output = flight.await;

        let mut slot = self.lock();
        if matches!(&slot.current, Some((current, _)) if *current == generation) {
            slot.current = None;
        }
        (output, leader)
    }

    pub fn in_flight(&self) -> bool {
        self.lock().current.is_some()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
