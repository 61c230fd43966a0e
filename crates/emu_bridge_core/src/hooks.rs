use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::emulator::HookEvent;
use crate::sync::{read, write};

/// A consumer of emulator hooks. Callbacks run on the emulation thread and must
/// only touch in-memory buffers.
pub trait HookSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_hook(&self, event: &HookEvent);
}

/// Single fan-out point between the emulation core and hook consumers. A
/// panicking subscriber is logged and skipped; the others still see the event.
#[derive(Default)]
pub struct HookDispatcher {
    subscribers: RwLock<Vec<Arc<dyn HookSubscriber>>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn HookSubscriber>) {
        write(&self.subscribers).push(subscriber);
    }

    pub fn clear(&self) {
        write(&self.subscribers).clear();
    }

    pub fn len(&self) -> usize {
        read(&self.subscribers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatch(&self, event: &HookEvent) {
        let subscribers = read(&self.subscribers);
        for subscriber in subscribers.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.on_hook(event)));
            if outcome.is_err() {
                warn!(
                    subscriber = subscriber.name(),
                    hook = event.kind(),
                    "hook subscriber panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl HookSubscriber for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn on_hook(&self, _event: &HookEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Exploding;

    impl HookSubscriber for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn on_hook(&self, _event: &HookEvent) {
            panic!("subscriber failure");
        }
    }

    #[test]
    fn test_panicking_subscriber_does_not_starve_others() {
        let dispatcher = HookDispatcher::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        dispatcher.subscribe(Arc::new(Exploding));
        dispatcher.subscribe(counter.clone());

        dispatcher.dispatch(&HookEvent::FrameComplete { frame: 1 });
        dispatcher.dispatch(&HookEvent::FrameComplete { frame: 2 });

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.len(), 2);
    }

    #[test]
    fn test_clear_detaches_subscribers() {
        let dispatcher = HookDispatcher::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        dispatcher.subscribe(counter.clone());
        dispatcher.clear();
        dispatcher.dispatch(&HookEvent::FrameComplete { frame: 1 });
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        assert!(dispatcher.is_empty());
    }
}
