use getrandom::getrandom;
use std::sync::atomic::{AtomicU64, Ordering};

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_WIDTH: usize = 8;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(1);

fn base36_encode_u64(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while value > 0 {
        chars.push(BASE36_ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    chars.iter().rev().collect()
}

fn base36_encode_fixed_u64(mut value: u64, width: usize) -> String {
    let mut chars = vec!['0'; width];
    for idx in (0..width).rev() {
        chars[idx] = BASE36_ALPHABET[(value % 36) as usize] as char;
        value /= 36;
    }
    chars.into_iter().collect()
}

fn random_sample() -> u64 {
    let mut bytes = [0_u8; 8];
    if getrandom(&mut bytes).is_ok() {
        return u64::from_le_bytes(bytes);
    }
    // Entropy source unavailable: stay unique within the process.
    let counter = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    counter.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ nanos
}

/// Builds `<prefix>-<base36 millis>-<8 random base36 chars>`.
pub fn generate_id(prefix: &str, now_millis: i64) -> String {
    let timestamp = u64::try_from(now_millis).unwrap_or(0);
    let suffix = base36_encode_fixed_u64(random_sample(), SUFFIX_WIDTH);
    format!("{prefix}-{}-{suffix}", base36_encode_u64(timestamp))
}
