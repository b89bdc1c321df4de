/// Trait representing instants in time. Allows running the WFPad engine with
/// custom time sources. If you want to use the engine with a different time
/// source than `std::time::Instant`, implement this trait for your instant
/// type, and the [`Duration`] trait for your corresponding duration type.
pub trait Instant: Clone + Copy + PartialOrd {
    type Duration: Duration;

    /// Returns the amount of time elapsed from another instant to this one.
    ///
    /// Should return a zero duration if `earlier` is later than `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Self::Duration;

    /// Returns `self + duration`, or `None` on overflow.
    fn checked_add(&self, duration: Self::Duration) -> Option<Self>;
}

pub trait Duration: Clone + Copy {
    /// Creates a new duration from the specified number of microseconds.
    fn from_micros(micros: u64) -> Self;

    /// Creates a new duration from the specified number of milliseconds.
    fn from_millis(millis: u64) -> Self {
        Self::from_micros(millis.saturating_mul(1000))
    }

    /// This duration expressed as fractional milliseconds.
    fn as_millis_f64(&self) -> f64;
}

impl Instant for std::time::Instant {
    type Duration = std::time::Duration;

    #[inline(always)]
    fn saturating_duration_since(&self, earlier: Self) -> Self::Duration {
        self.saturating_duration_since(earlier)
    }

    #[inline(always)]
    fn checked_add(&self, duration: Self::Duration) -> Option<Self> {
        std::time::Instant::checked_add(self, duration)
    }
}

impl Duration for std::time::Duration {
    #[inline(always)]
    fn from_micros(micros: u64) -> Self {
        Self::from_micros(micros)
    }

    #[inline(always)]
    fn as_millis_f64(&self) -> f64 {
        self.as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::Duration;

    #[test]
    fn std_duration_millisecond_conversions() {
        let d = <std::time::Duration as Duration>::from_millis(2);
        assert_eq!(d, std::time::Duration::from_micros(2000));
        assert_eq!(d.as_millis_f64(), 2.0);

        let half = <std::time::Duration as Duration>::from_micros(500);
        assert_eq!(half.as_millis_f64(), 0.5);
    }
}
