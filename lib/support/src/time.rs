use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, used to stamp bootstrap-handshake watchdog
/// deadlines and log records.
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_plausible() {
        let now = timestamp_secs();
        assert!(now > 1_700_000_000);
    }
}
