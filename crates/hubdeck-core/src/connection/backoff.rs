use std::time::Duration;

/// Delay before reconnection attempt `attempt` (1-based):
/// `min(base * 2^(attempt - 1), cap)`.
pub fn calculate_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(30);

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(calculate_backoff(1, BASE, CAP), Duration::from_secs(1));
        assert_eq!(calculate_backoff(2, BASE, CAP), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3, BASE, CAP), Duration::from_secs(4));
        assert_eq!(calculate_backoff(5, BASE, CAP), Duration::from_secs(16));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(calculate_backoff(6, BASE, CAP), CAP);
        assert_eq!(calculate_backoff(u32::MAX, BASE, CAP), CAP);
    }

    #[test]
    fn backoff_is_monotonic() {
        let delays: Vec<_> = (1..=12).map(|n| calculate_backoff(n, BASE, CAP)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= CAP));
    }

    #[test]
    fn attempt_zero_behaves_like_first() {
        assert_eq!(calculate_backoff(0, BASE, CAP), BASE);
    }
}
