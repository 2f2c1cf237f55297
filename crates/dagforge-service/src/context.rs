// Typed state container handed to every registered `Service`, plus a
// teardown stack so resources that need async cleanup (pools, brokers,
// servers) get it in the reverse order they were acquired.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

type BoxedAny = Box<dyn Any + Send + Sync>;
type Teardown = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Holds one instance per type, keyed by `TypeId`, so singletons (the
/// executor, the event bus, the storage backend) can be looked up by type
/// instead of threaded through every constructor by hand.
#[derive(Default)]
pub struct ApplicationContext {
    state: Mutex<HashMap<TypeId, BoxedAny>>,
    teardown: Mutex<Vec<Box<dyn FnOnce() -> Teardown + Send>>>,
    pub services_ready: Arc<parking_lot::RwLock<bool>>,
}

impl ApplicationContext {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            teardown: Mutex::new(Vec::new()),
            services_ready: Arc::new(parking_lot::RwLock::new(false)),
        }
    }

    /// Registers a value of type `T` in the context. A second `insert::<T>`
    /// replaces the first.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Registers a value and a teardown closure to run (in LIFO order with
    /// every other registered teardown) when the context is torn down.
    pub fn insert_with_teardown<T, F, Fut>(&self, value: T, teardown: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(value);
        self.teardown.lock().push(Box::new(move || Box::pin(teardown())));
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.state.lock().get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    /// Runs every registered teardown in reverse-acquisition order. Safe to
    /// call more than once; the second call is a no-op since the stack is
    /// drained on the first.
    pub async fn teardown(&self) {
        let pending: Vec<_> = std::mem::take(&mut *self.teardown.lock());
        for teardown in pending.into_iter().rev() {
            teardown().await;
        }
    }

    pub fn mark_services_ready(&self, ready: bool) {
        *self.services_ready.write() = ready;
    }

    pub fn are_services_ready(&self) -> bool {
        *self.services_ready.read()
    }
}
