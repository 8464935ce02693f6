use parking_lot::Mutex;
use std::sync::Arc;

/// Process-wide shared state, lock held only for short critical sections.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
