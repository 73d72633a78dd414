//! Pure price evaluators for the tick handler. Long entries fill at the
//! ask, short entries at the bid; the spread buffer widens the hit band in
//! the direction that makes a fill easier to register, never the stop.

use crate::domain::signal::Direction;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitCheck {
    pub is_hit: bool,
    /// True when the buffer admitted a hit that exact matching would not
    /// have. Tracked for stats and buffer-usage logging.
    pub buffer_allowed: bool,
}

/// Signed distance from the current price to the limit; positive means the
/// level has not been reached yet.
pub fn signed_distance(direction: Direction, current_price: Decimal, limit_price: Decimal) -> Decimal {
    match direction {
        Direction::Long => current_price - limit_price,
        Direction::Short => limit_price - current_price,
    }
}

/// Limit-hit predicate. `current_price` is the direction-appropriate entry
/// price (ask for long, bid for short).
pub fn check_limit_hit(
    direction: Direction,
    current_price: Decimal,
    limit_price: Decimal,
    spread: Decimal,
    buffer_enabled: bool,
) -> HitCheck {
    let spread = spread.max(Decimal::ZERO);

    let (is_hit, exact_hit) = match direction {
        Direction::Long => {
            let exact = current_price <= limit_price;
            let buffered = current_price <= limit_price + spread;
            (if buffer_enabled { buffered } else { exact }, exact)
        }
        Direction::Short => {
            let exact = current_price >= limit_price;
            let buffered = current_price >= limit_price - spread;
            (if buffer_enabled { buffered } else { exact }, exact)
        }
    };

    HitCheck {
        is_hit,
        buffer_allowed: buffer_enabled && is_hit && !exact_hit,
    }
}

/// Stop-loss predicate. Always exact; `close_price` is the opposite-side
/// price (bid for long, ask for short).
pub fn check_stop_loss(direction: Direction, close_price: Decimal, stop_loss: Decimal) -> bool {
    match direction {
        Direction::Long => close_price <= stop_loss,
        Direction::Short => close_price >= stop_loss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_long_exact_hit() {
        let check = check_limit_hit(Direction::Long, dec!(1.08500), dec!(1.0850), dec!(0), false);
        assert!(check.is_hit);
        assert!(!check.buffer_allowed);
    }

    #[test]
    fn test_long_miss_without_buffer() {
        let check = check_limit_hit(
            Direction::Long,
            dec!(1.08520),
            dec!(1.0850),
            dec!(0.0001),
            false,
        );
        assert!(!check.is_hit);
    }

    #[test]
    fn test_long_buffer_admits_hit_within_spread() {
        let check = check_limit_hit(
            Direction::Long,
            dec!(1.08505),
            dec!(1.0850),
            dec!(0.0001),
            true,
        );
        assert!(check.is_hit);
        assert!(check.buffer_allowed);
    }

    #[test]
    fn test_short_buffer_scenario() {
        // bid 2499.80 vs limit 2500.00, spread 0.40: only the buffer admits it
        let exact = check_limit_hit(
            Direction::Short,
            dec!(2499.80),
            dec!(2500.00),
            dec!(0.40),
            false,
        );
        assert!(!exact.is_hit);

        let buffered = check_limit_hit(
            Direction::Short,
            dec!(2499.80),
            dec!(2500.00),
            dec!(0.40),
            true,
        );
        assert!(buffered.is_hit);
        assert!(buffered.buffer_allowed);
    }

    #[test]
    fn test_zero_buffer_equals_disabled() {
        for price in [dec!(1.0849), dec!(1.0850), dec!(1.0851)] {
            let with_zero = check_limit_hit(Direction::Long, price, dec!(1.0850), dec!(0), true);
            let without = check_limit_hit(Direction::Long, price, dec!(1.0850), dec!(0), false);
            assert_eq!(with_zero.is_hit, without.is_hit);
            assert!(!with_zero.buffer_allowed);
        }
    }

    #[test]
    fn test_negative_spread_treated_as_zero() {
        let check = check_limit_hit(
            Direction::Long,
            dec!(1.0851),
            dec!(1.0850),
            dec!(-0.5),
            true,
        );
        assert!(!check.is_hit);
    }

    #[test]
    fn test_signed_distance() {
        assert_eq!(
            signed_distance(Direction::Long, dec!(1.0860), dec!(1.0850)),
            dec!(0.0010)
        );
        assert_eq!(
            signed_distance(Direction::Short, dec!(1.0860), dec!(1.0850)),
            dec!(-0.0010)
        );
    }

    #[test]
    fn test_stop_loss_exact_touch_counts() {
        assert!(check_stop_loss(Direction::Long, dec!(1.0820), dec!(1.0820)));
        assert!(check_stop_loss(Direction::Long, dec!(1.0819), dec!(1.0820)));
        assert!(!check_stop_loss(Direction::Long, dec!(1.0821), dec!(1.0820)));
        assert!(check_stop_loss(Direction::Short, dec!(2510.00), dec!(2510.00)));
        assert!(!check_stop_loss(Direction::Short, dec!(2509.99), dec!(2510.00)));
    }
}
