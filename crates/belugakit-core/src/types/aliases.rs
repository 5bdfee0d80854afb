//! Type aliases for commonly used complex types.
//!
//! Complex types like `Arc<Mutex<Option<T>>>` are hard to read at a glance.
//! The aliases below give them meaningful names and keep the same pattern
//! used the same way across crates.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use belugakit_core::types::*;
//!
//! // Instead of: Arc<Mutex<Option<PendingScan>>>
//! let slot: ThreadSafeOption<PendingScan> = thread_safe_none();
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// THREAD-SAFE SHARED TYPES (Arc<Mutex<T>>)
// =============================================================================

/// A thread-safe, mutex-protected wrapper for cross-task sharing.
///
/// Uses `parking_lot::Mutex`, which never poisons and needs no `unwrap` on lock.
///
/// # Example
/// ```rust,ignore
/// let timer: ThreadSafe<RunTimer> = thread_safe(RunTimer::new(params));
/// timer.lock().tick();
/// ```
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// A thread-safe optional wrapper, used for single-occupant slots.
pub type ThreadSafeOption<T> = Arc<Mutex<Option<T>>>;

/// A thread-safe hash map for cross-task key-value storage.
pub type ThreadSafeMap<K, V> = Arc<Mutex<HashMap<K, V>>>;

// =============================================================================
// CALLBACK TYPES
// =============================================================================

/// A callback that receives a single parameter.
///
/// Thread-safe, suitable for notifications fired from the channel read loop.
pub type DataCallback<T> = Box<dyn Fn(T) + Send + Sync>;

/// A callback that receives a single parameter and can be shared between
/// several event handlers.
pub type SharedCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

// =============================================================================
// CONSTRUCTOR HELPERS
// =============================================================================

/// Create a new `ThreadSafe<T>` from a value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

/// Create a new `ThreadSafeOption<T>` initialized to `None`.
#[inline]
pub fn thread_safe_none<T>() -> ThreadSafeOption<T> {
    Arc::new(Mutex::new(None))
}

/// Create a new empty `ThreadSafeMap<K, V>`.
#[inline]
pub fn thread_safe_map<K, V>() -> ThreadSafeMap<K, V> {
    Arc::new(Mutex::new(HashMap::new()))
}
