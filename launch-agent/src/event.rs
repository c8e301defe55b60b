// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A settable, clearable flag that tasks can wait on.
///
/// Every `set()` bumps a generation counter, so a waiter that was pending when
/// the event got set returns even if someone clears the event before the waiter
/// is polled again.
#[derive(Debug, Default)]
pub struct Event {
    flag: AtomicBool,
    generation: AtomicU64,
    notifier: event_listener::Event,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.flag.store(true, Ordering::SeqCst);
        self.notifier.notify(usize::MAX);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once the event is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        loop {
            if self.fired_since(generation) {
                return;
            }
            let listener = self.notifier.listen();
            // a set() between the check above and listen() would otherwise be lost
            if self.fired_since(generation) {
                return;
            }
            listener.await;
        }
    }

    fn fired_since(&self, generation: u64) -> bool {
        self.is_set() || self.generation.load(Ordering::SeqCst) != generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::{block_on, LocalPool};
    use futures::task::LocalSpawnExt;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_immediately_when_set() {
        let event = Event::new();
        event.set();
        block_on(event.wait());
        assert!(event.is_set());
    }

    #[test]
    fn clear_resets_flag() {
        let event = Event::new();
        event.set();
        event.clear();
        assert!(!event.is_set());
    }

    #[test]
    fn set_from_other_thread_wakes_waiter() {
        let event = Arc::new(Event::new());
        let setter = event.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        block_on(event.wait());
        handle.join().unwrap();
    }

    #[test]
    fn pending_waiter_survives_set_followed_by_clear() {
        let event = Rc::new(Event::new());
        let woke = Rc::new(std::cell::Cell::new(false));
        let mut pool = LocalPool::new();

        let waiter_event = event.clone();
        let waiter_woke = woke.clone();
        pool.spawner()
            .spawn_local(async move {
                waiter_event.wait().await;
                waiter_woke.set(true);
            })
            .unwrap();

        pool.run_until_stalled();
        assert!(!woke.get());

        event.set();
        event.clear();
        pool.run_until_stalled();
        assert!(woke.get());
    }

    #[test]
    fn waiter_started_after_clear_keeps_waiting() {
        let event = Rc::new(Event::new());
        event.set();
        event.clear();

        let woke = Rc::new(std::cell::Cell::new(false));
        let mut pool = LocalPool::new();
        let waiter_event = event.clone();
        let waiter_woke = woke.clone();
        pool.spawner()
            .spawn_local(async move {
                waiter_event.wait().await;
                waiter_woke.set(true);
            })
            .unwrap();

        pool.run_until_stalled();
        assert!(!woke.get());
        event.set();
        pool.run_until_stalled();
        assert!(woke.get());
    }
}
