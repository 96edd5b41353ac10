use anyhow::bail;
use chrono::{DateTime, Utc};
use uuid::Uuid;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const USER_ID_SLICE: usize = 4;
const TIMESTAMP_MODULUS: u64 = 36 * 36 * 36 * 36;
const SUFFIX_LEN: usize = 3;

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();

    String::from_utf8(digits).unwrap_or_default()
}

/// Builds a shareable referral code: a slice of the user id, the trailing
/// digits of `now` in base 36 and a short random suffix, upper-cased.
pub fn generate_referral_code(user_id: &str, now: DateTime<Utc>) -> Result<String, anyhow::Error> {
    if user_id.trim().is_empty() {
        bail!("Cannot generate a referral code for an empty user id");
    }

    let prefix: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(USER_ID_SLICE)
        .collect();

    let millis = now.timestamp_millis().unsigned_abs();
    let stamp = to_base36(millis % TIMESTAMP_MODULUS);

    let random = Uuid::new_v4().as_u128();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|i| BASE36_DIGITS[((random >> (i * 8)) % 36) as usize] as char)
        .collect();

    Ok(format!("{}{}{}", prefix, stamp, suffix).to_uppercase())
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(TIMESTAMP_MODULUS - 1), "zzzz");
    }

    #[test]
    fn referral_code_shape() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let code = generate_referral_code("abc-def-123", now).unwrap();

        assert!(code.starts_with("ABCD"));
        assert_eq!(code, code.to_uppercase());
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(code.len() >= USER_ID_SLICE + 1 + SUFFIX_LEN);
        assert!(code.len() <= USER_ID_SLICE + 4 + SUFFIX_LEN);
    }

    #[test]
    fn referral_code_uses_short_ids_whole() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let code = generate_referral_code("u1", now).unwrap();

        assert!(code.starts_with("U1"));
    }

    #[test]
    fn referral_code_rejects_empty_id() {
        assert!(generate_referral_code("", Utc::now()).is_err());
        assert!(generate_referral_code("   ", Utc::now()).is_err());
    }

    #[test]
    fn manual_clock_moves() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
