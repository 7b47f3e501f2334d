//! Shared mutable state handed to connection tasks.

use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Clones the value out so the lock is not held while the caller works on it.
pub fn snapshot<T: Clone>(state: &Shared<T>) -> T {
    state.lock().clone()
}
