use std::sync::atomic::{AtomicI64, Ordering};

/// Redirect budget shared by every flow of a measurement.
#[derive(Debug)]
pub struct NumRedirects {
    count: AtomicI64,
}

impl NumRedirects {
    pub fn new(max: i64) -> Self {
        Self { count: AtomicI64::new(max) }
    }

    /// Consumes one unit of budget. Once exhausted it never recovers.
    pub fn can_follow_one_more_redirect(&self) -> bool {
        self.count.fetch_sub(1, Ordering::SeqCst) - 1 >= 0
    }
}
