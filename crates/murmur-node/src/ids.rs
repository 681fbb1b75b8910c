//! Unique identifiers for `generate` requests.

use parking_lot::Mutex;
use ulid::{Generator, Ulid};

/// Hands out ULIDs that are strictly increasing within this process.
pub struct IdGenerator {
    inner: Mutex<Generator>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    pub fn next_id(&self) -> String {
        // Overflow of the random part within one millisecond is the only
        // failure; a fresh random ULID is still collision-resistant.
        self.inner
            .lock()
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
