//! Cached `date:` header value
//!
//! Formatting an RFC 1123 date per response is wasted work at high request
//! rates. A single background task publishes a fresh value into an atomic
//! cell; response writers load a snapshot and copy its bytes into their own
//! output buffer before any await point.

use arc_swap::ArcSwap;
use httpdate::fmt_http_date;
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::task::JoinHandle;

/// Single-producer, many-consumer cell holding the most recently formatted
/// RFC 1123 date (GMT).
pub(crate) struct DateService {
    current: Arc<ArcSwap<String>>,
    handle: JoinHandle<()>,
}

impl DateService {
    /// Publishes the current date and starts the refresher task.
    ///
    /// Must be called inside a tokio runtime.
    pub(crate) fn start(interval: Duration) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(fmt_http_date(SystemTime::now())));
        let cell = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                cell.store(Arc::new(fmt_http_date(SystemTime::now())));
            }
        });

        DateService { current, handle }
    }

    /// Snapshot of the cached date. The returned value stays coherent even
    /// while the refresher publishes a newer one.
    #[inline]
    pub(crate) fn current(&self) -> Arc<String> {
        self.current.load_full()
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
