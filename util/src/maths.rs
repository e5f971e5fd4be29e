//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
///
/// The mapping is not limited to the target range, values outside the source range are
/// extrapolated. Use [`clamp`] on the result if this isn't wanted.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    target_range.0
        + ((value - source_range.0)
        * (target_range.1 - target_range.0)
        / (source_range.1 - source_range.0))
}

/// Clamp a value between `min` and `max`.
///
/// Unlike `f64::clamp` this does not panic if `min > max`, the `max` bound is applied first so the
/// `min` bound wins. NaN values are returned unchanged.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Round a value to the nearest integer (halfway cases away from zero) and clamp it into
/// `[0, max]`.
pub fn round_to_u16<T>(value: T, max: u16) -> u16
where
    T: Float
{
    let rounded = clamp(
        &value.round(),
        &T::zero(),
        &T::from(max).unwrap_or_else(T::zero)
    );

    rounded.to_u16().unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0.0, 1.0), (1800.0, 2200.0), 0.5), 2000.0);
        assert_eq!(lin_map((0.0, -1.0), (1800.0, 1400.0), -0.25), 1700.0);
        assert_eq!(lin_map((0.0, 1.0), (0.0, 10.0), 2.0), 20.0);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(&1.5f64, &0.0, &1.0), 1.0);
        assert_eq!(clamp(&-0.5f64, &0.0, &1.0), 0.0);
        assert_eq!(clamp(&0.25f64, &0.0, &1.0), 0.25);
    }

    #[test]
    fn test_round_to_u16() {
        assert_eq!(round_to_u16(368.64f64, 4095), 369);
        assert_eq!(round_to_u16(1740.375f64, 4095), 1740);
        assert_eq!(round_to_u16(5000.0f64, 4095), 4095);
        assert_eq!(round_to_u16(-3.0f64, 4095), 0);
    }
}
