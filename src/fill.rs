use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::types::Result;

/// Outcome of one cache fill, broadcast to every caller waiting on the key.
pub(crate) type FillResult = Result<Arc<[u8]>>;

/// One in-flight fill: a rendezvous for every caller that missed on the
/// same key while the fetch was running.
#[derive(Debug)]
pub(crate) struct Flight {
    state: Mutex<FlightState>,
    done: Condvar,
}

#[derive(Debug)]
struct FlightState {
    waiters: usize,
    outcome: Option<FillResult>,
}

/// What [`FillMap::join_or_lead`] handed back: either this caller runs the
/// fetch, or it parks until the leader publishes.
pub(crate) enum Ticket {
    Lead(Arc<Flight>),
    Wait(Arc<Flight>),
}

/// Per-key single-flight registry.
///
/// The map itself is guarded by a small mutex, but `join_or_lead` must only
/// be called while the engine's write lock is held: that lock is what
/// serializes the final miss check against flight creation, so a key can
/// never gain two leaders. Waiting and draining happen without the engine
/// lock. The flight stays registered until its last waiter has consumed
/// the outcome; callers arriving in that drain window join the existing
/// outcome instead of starting a second fetch.
#[derive(Debug)]
pub(crate) struct FillMap {
    flights: Mutex<HashMap<String, Arc<Flight>>>,
}

impl FillMap {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Joins the flight for `key`, creating it (and electing the caller
    /// leader) if none exists. Caller must hold the engine write lock.
    pub fn join_or_lead(&self, key: &str) -> Ticket {
        let mut flights = self.flights.lock().unwrap();
        if let Some(flight) = flights.get(key) {
            flight.state.lock().unwrap().waiters += 1;
            Ticket::Wait(Arc::clone(flight))
        } else {
            let flight = Arc::new(Flight {
                state: Mutex::new(FlightState {
                    waiters: 1,
                    outcome: None,
                }),
                done: Condvar::new(),
            });
            flights.insert(key.to_owned(), Arc::clone(&flight));
            Ticket::Lead(flight)
        }
    }

    /// Stores the fetch outcome and wakes every waiter. Called once per
    /// flight, by its leader.
    pub fn publish(&self, flight: &Flight, outcome: FillResult) {
        let mut state = flight.state.lock().unwrap();
        state.outcome = Some(outcome);
        flight.done.notify_all();
    }

    /// Blocks until the flight's outcome is published, then consumes this
    /// caller's share of it. The last consumer tears the flight out of the
    /// registry; a pointer-identity check keeps a slow drainer from
    /// removing a successor flight registered under the same key.
    pub fn consume(&self, key: &str, flight: &Arc<Flight>) -> FillResult {
        let (result, last) = {
            let mut state = flight.state.lock().unwrap();
            let result = loop {
                if let Some(outcome) = state.outcome.clone() {
                    break outcome;
                }
                state = flight.done.wait(state).unwrap();
            };
            state.waiters -= 1;
            (result, state.waiters == 0)
        };

        if last {
            let mut flights = self.flights.lock().unwrap();
            if let Some(current) = flights.get(key) {
                if Arc::ptr_eq(current, flight) {
                    flights.remove(key);
                }
            }
        }
        result
    }

    #[cfg(test)]
    fn in_flight(&self, key: &str) -> bool {
        self.flights.lock().unwrap().contains_key(key)
    }
}
