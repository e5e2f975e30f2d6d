//! Time-ordered unique id generation.
//!
//! Ids are 20 characters over a 64-symbol alphabet chosen so that the
//! ASCII order of the symbols matches their numeric order. The first 8
//! characters encode a 48-bit millisecond timestamp, the remaining 12 are
//! random. Two ids generated within the same millisecond reuse the previous
//! random suffix incremented by one (with carry), so ids produced by a
//! single generator sort strictly in creation order. The transaction log
//! relies on this: its natural order is the generated-id order.

use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;

/// 64 symbols in ascending ASCII order: `-`, digits, uppercase, `_`, lowercase.
const PUSH_CHARS: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const RAND_LEN: usize = 12;
const TIME_LEN: usize = 8;

struct GeneratorState {
    last_time_ms: i64,
    last_rand: [u8; RAND_LEN],
}

/// Generates 20-character ids that sort lexicographically in creation order.
pub struct PushIdGenerator {
    state: Mutex<GeneratorState>,
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                last_time_ms: 0,
                last_rand: [0; RAND_LEN],
            }),
        }
    }

    /// Produce the next id. Strictly monotonic per generator instance.
    pub fn generate(&self) -> String {
        let now_ms = Utc::now().timestamp_millis();
        // Poisoning cannot corrupt the counter state; keep generating.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now_ms == state.last_time_ms {
            // Same millisecond: bump the suffix instead of resampling, so
            // the new id is guaranteed to sort after the previous one.
            for i in (0..RAND_LEN).rev() {
                if state.last_rand[i] < 63 {
                    state.last_rand[i] += 1;
                    break;
                }
                state.last_rand[i] = 0;
            }
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_rand.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
            state.last_time_ms = now_ms;
        }

        let mut id = [0u8; TIME_LEN + RAND_LEN];
        let mut t = now_ms;
        for i in (0..TIME_LEN).rev() {
            id[i] = PUSH_CHARS[(t % 64) as usize];
            t /= 64;
        }
        for (i, &r) in state.last_rand.iter().enumerate() {
            id[TIME_LEN + i] = PUSH_CHARS[r as usize];
        }

        id.iter().map(|&b| b as char).collect()
    }
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_length_and_alphabet() {
        let gen = PushIdGenerator::new();
        let id = gen.generate();
        assert_eq!(id.len(), 20);
        assert!(id.bytes().all(|b| PUSH_CHARS.contains(&b)));
    }

    #[test]
    fn test_strictly_monotonic() {
        let gen = PushIdGenerator::new();
        let mut previous = gen.generate();
        for _ in 0..1000 {
            let next = gen.generate();
            assert!(next > previous, "{next} should sort after {previous}");
            previous = next;
        }
    }

    #[test]
    fn test_timestamp_prefix_orders_across_milliseconds() {
        let gen = PushIdGenerator::new();
        let first = gen.generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = gen.generate();
        assert!(second[..8] > first[..8]);
    }

    #[test]
    fn test_alphabet_is_ascii_sorted() {
        let mut sorted = *PUSH_CHARS;
        sorted.sort_unstable();
        assert_eq!(&sorted, PUSH_CHARS);
    }
}
