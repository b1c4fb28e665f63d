//! Bounded pools of reusable codec engines
//!
//! Deflate and inflate state objects are expensive to set up. Each
//! compressor keeps a small pool of them; engines are reset when they come
//! back, and dropped when the pool is already full.

use std::collections::VecDeque;

use flate2::{Compress, Compression, Decompress};
use parking_lot::Mutex;

/// Default number of idle engines kept per pool
pub const DEFAULT_MAX_IDLE_ENGINES: usize = 10;

/// A codec state object that can be pooled
pub trait Engine: Send {
    /// Build a fresh engine
    fn create() -> Self;

    /// Return the engine to its initial state
    fn reset(&mut self);
}

impl Engine for Compress {
    fn create() -> Self {
        Self::new(Compression::fast(), true)
    }

    fn reset(&mut self) {
        Compress::reset(self);
    }
}

impl Engine for Decompress {
    fn create() -> Self {
        Self::new(true)
    }

    fn reset(&mut self) {
        Decompress::reset(self, true);
    }
}

/// Bounded pool of idle engines
#[derive(Debug)]
pub struct EnginePool<T> {
    idle: Mutex<VecDeque<T>>,
    max_idle: usize,
}

impl<T: Engine> EnginePool<T> {
    /// Create a pool that retains at most `max_idle` engines
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(VecDeque::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Run `f` with an engine drawn from the pool, creating one if none is
    /// idle. The engine is reset and handed back afterwards.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut engine = self.idle.lock().pop_front().unwrap_or_else(T::create);
        let result = f(&mut engine);
        self.give_back(engine);
        result
    }

    /// Number of idle engines currently held
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn give_back(&self, mut engine: T) {
        engine.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push_back(engine);
        }
        // Pool full: the engine is dropped
    }
}

impl<T: Engine> Default for EnginePool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_ENGINES)
    }
}
