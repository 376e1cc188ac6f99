//! Correlation id allocation for outbound requests.

/// Pomelo-compatible ceiling: ids run 1..=254 and wrap.
pub const DEFAULT_REQUEST_ID_CEILING: u32 = 255;

/// Hands out request ids starting at 1. Id 0 means "no correlation" and is
/// never produced; when the next id would reach the ceiling it wraps to 1.
#[derive(Clone, Debug)]
pub struct RequestIdAllocator {
    next: u32,
    ceiling: u32,
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_ID_CEILING)
    }
}

impl RequestIdAllocator {
    /// `ceiling` is exclusive and raised to 2 so at least one id exists.
    #[must_use]
    pub fn new(ceiling: u32) -> Self {
        Self {
            next: 1,
            ceiling: ceiling.max(2),
        }
    }

    #[must_use]
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Number of distinct ids before the sequence repeats.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.ceiling - 1
    }

    /// The id the next call to [`Self::next_id`] returns.
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.next
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        if self.next >= self.ceiling {
            self.next = 1;
        }
        id
    }

    pub fn reset(&mut self) {
        self.next = 1;
    }
}
