// File: src/voice/listeners.rs

use std::collections::HashMap;
use std::hash::Hash;

use tracing::{debug, warn};

use radiobot_common::traits::voice_traits::{EventSource, ListenerId, SignalHandler};

/// Tracks the handlers installed on one live link or player.
///
/// Holds at most one binding per event name. `install` drops whatever is
/// still bound before adding new handlers, and `teardown` must run before the
/// owning object is discarded so no handler outlives it.
pub struct ListenerRegistry<E> {
    owner: &'static str,
    bindings: HashMap<E, ListenerId>,
}

impl<E> ListenerRegistry<E>
where
    E: Copy + Eq + Hash + std::fmt::Debug,
{
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            bindings: HashMap::new(),
        }
    }

    pub fn install<S>(&mut self, source: &S, handlers: Vec<(E, SignalHandler)>)
    where
        S: EventSource<E> + ?Sized,
    {
        let stale = self.teardown(source);
        if stale > 0 {
            warn!("[Listeners] {} had {stale} stale binding(s) before setup", self.owner);
        }

        for (event, handler) in handlers {
            let id = source.on(event, handler);
            if let Some(previous) = self.bindings.insert(event, id) {
                // Same event listed twice: keep the newest.
                source.off(previous);
            }
        }
        debug!("[Listeners] {} bound {:?}", self.owner, self.bound_events());
    }

    /// Removes every tracked binding and returns how many were removed.
    pub fn teardown<S>(&mut self, source: &S) -> usize
    where
        S: EventSource<E> + ?Sized,
    {
        let mut removed = 0;
        for (event, id) in self.bindings.drain() {
            if source.off(id) {
                removed += 1;
            } else {
                debug!("[Listeners] {} binding for {:?} was already gone", self.owner, event);
            }
        }
        removed
    }

    pub fn is_bound(&self, event: E) -> bool {
        self.bindings.contains_key(&event)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn bound_events(&self) -> Vec<E> {
        self.bindings.keys().copied().collect()
    }
}
