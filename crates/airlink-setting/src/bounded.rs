use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::SettingError;
use crate::remote::{RejectPolicy, RemoteSetting, SetOutcome};

/// Numeric setting with a device-advertised `[min, max]` envelope. `None`
/// means unbounded on that side.
#[derive(Debug)]
pub struct BoundedSetting<T> {
    inner: RemoteSetting<T>,
    min: Option<T>,
    max: Option<T>,
}

impl<T> BoundedSetting<T>
where
    T: Clone + PartialOrd + fmt::Debug,
{
    pub fn new<F>(name: &'static str, initial: T, transmit: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self { inner: RemoteSetting::new(name, initial, transmit), min: None, max: None }
    }

    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.inner = self.inner.with_timeout(duration);
        self
    }

    pub fn with_policy(mut self, policy: RejectPolicy) -> Self {
        self.inner = self.inner.with_policy(policy);
        self
    }

    pub fn value(&self) -> &T { self.inner.value() }
    pub fn confirmed(&self) -> &T { self.inner.confirmed() }
    pub fn updating(&self) -> bool { self.inner.updating() }
    pub fn deadline(&self) -> Option<Instant> { self.inner.deadline() }
    pub fn min(&self) -> Option<&T> { self.min.as_ref() }
    pub fn max(&self) -> Option<&T> { self.max.as_ref() }

    pub fn clamp(&self, value: T) -> T {
        if let Some(min) = &self.min {
            if value < *min { return min.clone(); }
        }
        if let Some(max) = &self.max {
            if value > *max { return max.clone(); }
        }
        value
    }

    /// Clamps into the envelope, then behaves like [`RemoteSetting::set`].
    /// A value that does not order against itself (NaN) is never sent.
    pub fn set(&mut self, value: T, now: Instant) -> SetOutcome {
        if !comparable(&value) {
            debug!("setting {}: incomparable value={:?}", self.inner.name(), value);
            return SetOutcome::Unsupported;
        }
        let value = self.clamp(value);
        self.inner.set(value, now)
    }

    /// Backend report; `None` leaves that part unchanged. An envelope that
    /// would end up inverted is refused as a whole.
    pub fn update_bounds(&mut self, min: Option<T>, value: Option<T>, max: Option<T>) -> Result<bool, SettingError> {
        for (part, v) in [("min", &min), ("value", &value), ("max", &max)] {
            if let Some(v) = v {
                if !comparable(v) {
                    return Err(SettingError::Incomparable {
                        name: self.inner.name(),
                        part,
                        value: format!("{:?}", v),
                    });
                }
            }
        }
        let new_min = min.or_else(|| self.min.clone());
        let new_max = max.or_else(|| self.max.clone());
        if let (Some(lo), Some(hi)) = (&new_min, &new_max) {
            if lo > hi {
                return Err(SettingError::InvertedBounds {
                    name: self.inner.name(),
                    min: format!("{:?}", lo),
                    max: format!("{:?}", hi),
                });
            }
        }

        let mut changed = new_min != self.min || new_max != self.max;
        self.min = new_min;
        self.max = new_max;
        if let Some(v) = value {
            changed |= self.inner.update(v);
        }
        Ok(changed)
    }

    pub fn update(&mut self, value: T) -> bool {
        if !comparable(&value) {
            debug!("setting {}: ignoring incomparable report value={:?}", self.inner.name(), value);
            return false;
        }
        self.inner.update(value)
    }

    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        self.inner.poll_timeout(now)
    }

    pub fn cancel_rollback<F: FnOnce()>(&mut self, on_cancelled: F) {
        self.inner.cancel_rollback(on_cancelled)
    }
}

fn comparable<T: PartialOrd>(value: &T) -> bool {
    value.partial_cmp(value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;

    fn bounded(rec: &Recorder<i32>) -> BoundedSetting<i32> {
        let mut s = BoundedSetting::new("speed", 5, rec.transmit());
        s.update_bounds(Some(2), None, Some(10)).unwrap();
        s
    }

    #[test]
    fn clamps_before_transmit() {
        let t0 = Instant::now();
        let rec = Recorder::accepting();
        let mut s = bounded(&rec);

        s.set(15, t0);
        assert_eq!(*s.value(), 10);
        s.set(-3, t0);
        assert_eq!(*s.value(), 2);
        assert_eq!(rec.sent(), vec![10, 2]);
    }

    #[test]
    fn clamped_to_current_value_is_unchanged() {
        let rec = Recorder::accepting();
        let mut s = bounded(&rec);
        s.update(10);
        assert_eq!(s.set(42, Instant::now()), SetOutcome::Unchanged);
        assert!(rec.sent().is_empty());
    }

    #[test]
    fn unbounded_sides_pass_through() {
        let rec = Recorder::accepting();
        let mut s = BoundedSetting::new("speed", 0, rec.transmit());
        assert!(s.update_bounds(None, None, Some(3)).unwrap());
        s.set(-100, Instant::now());
        assert_eq!(rec.sent(), vec![-100]);
        assert_eq!(s.min(), None);
        assert_eq!(s.max(), Some(&3));
    }

    #[test]
    fn partial_update_keeps_other_parts() {
        let rec = Recorder::accepting();
        let mut s = bounded(&rec);
        assert!(s.update_bounds(None, Some(7), None).unwrap());
        assert_eq!((s.min(), s.value(), s.max()), (Some(&2), &7, Some(&10)));
        assert!(!s.update_bounds(Some(2), Some(7), Some(10)).unwrap());
        assert!(s.update_bounds(Some(1), None, None).unwrap());
    }

    #[test]
    fn inverted_envelope_is_refused() {
        let rec = Recorder::accepting();
        let mut s = bounded(&rec);
        let err = s.update_bounds(Some(11), Some(3), None).unwrap_err();
        assert!(matches!(err, SettingError::InvertedBounds { name: "speed", .. }));
        assert_eq!((s.min(), s.value(), s.max()), (Some(&2), &5, Some(&10)));
    }

    #[test]
    fn float_bounds_roll_back() {
        let t0 = Instant::now();
        let rec = Recorder::accepting();
        let mut s = BoundedSetting::new("zoom", 1.0f64, rec.transmit()).with_timeout(Duration::from_secs(1));
        s.update_bounds(Some(1.0), None, Some(3.0)).unwrap();
        s.set(8.5, t0);
        assert_eq!(rec.sent(), vec![3.0]);
        assert!(s.updating());
        assert!(s.poll_timeout(t0 + Duration::from_secs(1)));
        assert_eq!(*s.value(), 1.0);
    }

    #[test]
    fn nan_request_is_not_sent() {
        let t0 = Instant::now();
        let rec = Recorder::accepting();
        let mut s = BoundedSetting::new("zoom", 1.0f64, rec.transmit());
        s.update_bounds(Some(2.0), None, Some(10.0)).unwrap();
        assert_eq!(s.set(f64::NAN, t0), SetOutcome::Unsupported);
        assert!(rec.sent().is_empty());
        assert!(!s.updating());
        assert_eq!(*s.value(), 1.0);
    }

    #[test]
    fn nan_report_is_not_adopted() {
        let rec = Recorder::accepting();
        let mut s = BoundedSetting::new("zoom", 1.0f64, rec.transmit());
        assert!(!s.update(f64::NAN));
        assert!(!s.update(f64::NAN));
        assert_eq!(*s.value(), 1.0);

        let err = s.update_bounds(None, Some(f64::NAN), Some(4.0)).unwrap_err();
        assert!(matches!(err, SettingError::Incomparable { name: "zoom", part: "value", .. }));
        assert_eq!((s.min(), s.value(), s.max()), (None, &1.0, None));
        assert!(s.update_bounds(Some(f64::NAN), None, None).is_err());
        assert_eq!(s.min(), None);
    }
}
