/*!
 * Stop Tokens
 * In-process cancellation signal shared between a source and its tokens
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owner side of a cancellation signal
#[derive(Debug, Default)]
pub struct StopSource {
    flag: Arc<AtomicBool>,
}

impl StopSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observing this source
    pub fn token(&self) -> StopToken {
        StopToken {
            flag: Some(Arc::clone(&self.flag)),
        }
    }

    /// Request stop; returns `true` only for the call that made the transition
    pub fn request_stop(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    pub fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Observer side of a cancellation signal
///
/// The default token is never stopped.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Option<Arc<AtomicBool>>,
}

impl StopToken {
    /// Token that can never be stopped
    #[inline]
    pub const fn never() -> Self {
        Self { flag: None }
    }

    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.flag
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Whether a stop request can ever be observed through this token
    #[inline]
    pub fn stop_possible(&self) -> bool {
        self.flag.is_some()
    }
}
