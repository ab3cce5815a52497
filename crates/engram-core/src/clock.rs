//! Clock & identity
//!
//! Wall clock source behind a trait so tests can drive time explicitly,
//! plus id minting in the `m_<timestamp36>_<hex8>` format.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Monotonic wall clock source
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Current instant as epoch milliseconds
    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Real wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += delta;
    }

    /// Jump the clock to an absolute instant
    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Mint a fresh item id: `m_<timestamp36>_<hex8>`
///
/// The timestamp component keeps ids roughly sortable by creation time; the
/// suffix takes its entropy from a v4 UUID.
pub fn mint_id(clock: &dyn Clock) -> String {
    let ts = clock.now_ms().max(0) as u64;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("m_{}_{}", to_base36(ts), &suffix[..8])
}

/// Check the `m_<timestamp36>_<hex8>` shape without allocating
pub fn is_valid_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("m_") else {
        return false;
    };
    let Some((ts, suffix)) = rest.split_once('_') else {
        return false;
    };
    !ts.is_empty()
        && ts.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
        && suffix.len() == 8
        && suffix
            .bytes()
            .all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_id_shape() {
        let clock = SystemClock;
        let id = mint_id(&clock);
        assert!(is_valid_id(&id), "bad id: {id}");
    }

    #[test]
    fn test_minted_ids_unique() {
        let clock = SystemClock;
        let a = mint_id(&clock);
        let b = mint_id(&clock);
        assert_ne!(a, b);
    }

    #[test]
    fn test_base36_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_id_validation_rejects_malformed() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("m_"));
        assert!(!is_valid_id("x_abc_12345678"));
        assert!(!is_valid_id("m_abc_1234567"));
        assert!(!is_valid_id("m_abc_1234567G"));
        assert!(is_valid_id("m_ly2k3f_0a1b2c3d"));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(Utc::now());
        let t0 = clock.now();
        clock.advance(Duration::days(7));
        assert_eq!(clock.now() - t0, Duration::days(7));
    }
}
