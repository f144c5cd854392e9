//! Process-wide upload rate limit
//!
//! Bytes are granted per wall-clock second. A caller asks for the bytes it
//! would like to send and is either granted some of them or told to wait a
//! short random interval and ask again. Across all callers the bytes granted
//! within one wall-clock second never exceed the limit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Shortest wait handed out when the current second is used up
pub const MIN_WAIT_MS: u64 = 10;

/// Longest wait handed out when the current second is used up
pub const MAX_WAIT_MS: u64 = 100;

static GLOBAL: RwLock<Option<Arc<Throttle>>> = RwLock::new(None);

/// Outcome of asking the throttle for bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// This many bytes may be sent now
    Granted(u64),
    /// Nothing is left this second; ask again after this long
    Wait(Duration),
}

#[derive(Debug)]
struct Window {
    second: u64,
    used: u64,
}

/// Byte-rate limiter shared by every upload stream
#[derive(Debug)]
pub struct Throttle {
    bytes_per_second: u64,
    window: Mutex<Window>,
    clock: Option<Arc<AtomicU64>>,
}

impl Throttle {
    /// Create a throttle allowing `bytes_per_second`
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second: bytes_per_second.max(1),
            window: Mutex::new(Window { second: 0, used: 0 }),
            clock: None,
        }
    }

    /// Throttle reading the current second from `clock` instead of the system
    pub fn with_clock(bytes_per_second: u64, clock: Arc<AtomicU64>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::new(bytes_per_second)
        }
    }

    /// Current epoch second as seen by this throttle
    pub fn current_second(&self) -> u64 {
        match &self.clock {
            Some(clock) => clock.load(Ordering::SeqCst),
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Configured limit
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Ask for up to `wanted` bytes in the current wall-clock second
    pub fn reserve(&self, wanted: u64) -> Reservation {
        self.reserve_at(wanted, self.current_second())
    }

    /// Ask for up to `wanted` bytes during the given epoch second
    pub fn reserve_at(&self, wanted: u64, second: u64) -> Reservation {
        if wanted == 0 {
            return Reservation::Granted(0);
        }

        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.second != second {
            window.second = second;
            window.used = 0;
        }

        let remaining = self.bytes_per_second.saturating_sub(window.used);
        if remaining == 0 {
            let wait = rand::rng().random_range(MIN_WAIT_MS..=MAX_WAIT_MS);
            return Reservation::Wait(Duration::from_millis(wait));
        }

        let granted = wanted.min(remaining);
        window.used += granted;
        Reservation::Granted(granted)
    }

    /// Wait until at least one byte is granted, returning the grant
    pub async fn acquire(&self, wanted: u64) -> u64 {
        loop {
            match self.reserve(wanted) {
                Reservation::Granted(n) => return n,
                Reservation::Wait(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

/// Throttle applied to uploads, if a limit is configured
pub fn global() -> Option<Arc<Throttle>> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Install or remove the process-wide upload limit
///
/// An unchanged limit keeps the existing throttle so that its current
/// window carries over.
pub fn set_global_limit(bytes_per_second: Option<u64>) {
    let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    match bytes_per_second {
        None => *global = None,
        Some(limit) => {
            if global.as_ref().map(|t| t.bytes_per_second()) != Some(limit.max(1)) {
                tracing::debug!(bytes_per_second = limit, "Upload throttle enabled");
                *global = Some(Arc::new(Throttle::new(limit)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grants_up_to_limit_then_waits() {
        let throttle = Throttle::new(100);
        assert_eq!(throttle.reserve_at(60, 1), Reservation::Granted(60));
        assert_eq!(throttle.reserve_at(60, 1), Reservation::Granted(40));

        match throttle.reserve_at(1, 1) {
            Reservation::Wait(d) => {
                assert!(d >= Duration::from_millis(MIN_WAIT_MS));
                assert!(d <= Duration::from_millis(MAX_WAIT_MS));
            }
            other => panic!("expected wait, got {other:?}"),
        }
    }

    #[test]
    fn test_window_resets_each_second() {
        let throttle = Throttle::new(10);
        assert_eq!(throttle.reserve_at(10, 5), Reservation::Granted(10));
        assert!(matches!(throttle.reserve_at(1, 5), Reservation::Wait(_)));
        assert_eq!(throttle.reserve_at(10, 6), Reservation::Granted(10));
    }

    #[test]
    fn test_zero_request_is_free() {
        let throttle = Throttle::new(1);
        assert_eq!(throttle.reserve_at(1, 1), Reservation::Granted(1));
        assert_eq!(throttle.reserve_at(0, 1), Reservation::Granted(0));
    }

    #[test]
    fn test_concurrent_callers_never_exceed_limit() {
        let throttle = Arc::new(Throttle::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                std::thread::spawn(move || {
                    let mut granted = 0;
                    for _ in 0..100 {
                        if let Reservation::Granted(n) = throttle.reserve_at(7, 42) {
                            granted += n;
                        }
                    }
                    granted
                })
            })
            .collect();

        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_manual_clock_drives_window() {
        let clock = Arc::new(AtomicU64::new(7));
        let throttle = Throttle::with_clock(5, Arc::clone(&clock));
        assert_eq!(throttle.reserve(5), Reservation::Granted(5));
        assert!(matches!(throttle.reserve(1), Reservation::Wait(_)));

        clock.store(8, Ordering::SeqCst);
        assert_eq!(throttle.current_second(), 8);
        assert_eq!(throttle.reserve(5), Reservation::Granted(5));
    }

    #[tokio::test]
    async fn test_acquire_returns_grant() {
        let throttle = Throttle::new(1 << 20);
        let n = throttle.acquire(4096).await;
        assert!(n > 0 && n <= 4096);
    }

    #[test]
    fn test_global_limit() {
        set_global_limit(Some(2048));
        let first = global().unwrap();
        assert_eq!(first.bytes_per_second(), 2048);

        set_global_limit(Some(2048));
        assert!(Arc::ptr_eq(&first, &global().unwrap()));

        set_global_limit(None);
        assert!(global().is_none());
    }
}
