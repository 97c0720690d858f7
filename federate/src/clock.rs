//! Track requested and granted simulation time.

use crate::Error;

/// Fraction of the step delta within which a requested boundary snaps to the stop time.
///
/// Repeated addition of a delta such as `0.1` drifts below the exact multiple, which would otherwise
/// schedule an extra, vanishingly short step just before the stop time.
const SNAP: f64 = 1e-9;

/// Simulation time of a single federate.
///
/// `next` is always `min(current + delta, stop)` once scheduled, and `current` is always the time
/// most recently granted by the federation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Clock {
    current: f64,
    next: f64,
    delta: f64,
    stop: f64,
}

impl Clock {
    /// Create a clock at time zero with its first boundary at time zero.
    pub fn new(delta: f64, stop: f64) -> Result<Self, Error> {
        if !delta.is_finite() || delta <= 0.0 {
            return Err(Error::InvalidStepDelta(delta));
        }
        if !stop.is_finite() || stop <= 0.0 {
            return Err(Error::InvalidStopTime(stop));
        }
        Ok(Self {
            current: 0.0,
            next: 0.0,
            delta,
            stop,
        })
    }

    /// Time most recently granted.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Boundary most recently scheduled.
    pub fn next(&self) -> f64 {
        self.next
    }

    /// Step between boundaries.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Time at which the federate stops.
    pub fn stop(&self) -> f64 {
        self.stop
    }

    /// Returns true if the current time is the boundary most recently requested.
    #[allow(clippy::float_cmp)]
    pub fn at_boundary(&self) -> bool {
        self.current == self.next
    }

    /// Returns true if the federation granted a time past the requested boundary.
    pub fn overshot(&self) -> bool {
        self.current > self.next
    }

    /// Returns true once the stop time has been reached.
    pub fn finished(&self) -> bool {
        self.current >= self.stop
    }

    /// Schedule the boundary after the current time and return it.
    pub fn schedule(&mut self) -> f64 {
        let next = self.current + self.delta;
        self.next = if next >= self.stop - self.delta * SNAP {
            self.stop
        } else {
            next
        };
        self.next
    }

    /// Record the time granted by the federation.
    pub fn grant(&mut self, granted: f64) -> Result<(), Error> {
        if granted.is_nan() || granted < self.current {
            return Err(Error::TimeRegression {
                current: self.current,
                granted,
            });
        }
        self.current = granted;
        Ok(())
    }

    /// Number of time requests needed to reach the stop time when every request is granted as
    /// asked.
    pub fn steps(&self) -> usize {
        let exact = self.stop / self.delta;
        let rounded = exact.round();
        if (exact - rounded).abs() <= SNAP * rounded.max(1.0) {
            rounded as usize
        } else {
            exact.ceil() as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    /// Drive a clock whose requests are always granted as asked.
    fn boundaries(delta: f64, stop: f64) -> (Vec<f64>, usize) {
        let mut clock = Clock::new(delta, stop).unwrap();
        let mut visited = Vec::new();
        let mut requests = 0;
        while !clock.finished() {
            if clock.at_boundary() {
                visited.push(clock.current());
                clock.schedule();
            }
            requests += 1;
            clock.grant(clock.next()).unwrap();
        }
        if clock.at_boundary() {
            visited.push(clock.current());
        }
        (visited, requests)
    }

    #[test]
    fn test_integer_steps() {
        let (visited, requests) = boundaries(1.0, 3.0);
        assert_eq!(visited, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(requests, 3);
    }

    #[test]
    fn test_clipped_to_stop() {
        let (visited, requests) = boundaries(2.0, 5.0);
        assert_eq!(visited, vec![0.0, 2.0, 4.0, 5.0]);
        assert_eq!(requests, 3);
    }

    #[test_case(1.0, 3.0)]
    #[test_case(0.1, 1.0)]
    #[test_case(0.3, 1.0)]
    #[test_case(0.25, 10.0)]
    #[test_case(7.0, 3.0)]
    #[test_case(0.01, 2.5)]
    fn test_request_count(delta: f64, stop: f64) {
        let (visited, requests) = boundaries(delta, stop);
        let clock = Clock::new(delta, stop).unwrap();
        assert_eq!(requests, clock.steps());
        assert_eq!(visited.len(), requests + 1);
        assert_eq!(*visited.last().unwrap(), stop);
        assert!(visited.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_granted_beyond_request() {
        let mut clock = Clock::new(1.0, 10.0).unwrap();
        clock.schedule();
        clock.grant(1.5).unwrap();
        assert!(!clock.at_boundary());
        assert!(clock.overshot());
        assert_eq!(clock.current(), 1.5);

        // Rescheduling anchors the next boundary at the granted time
        assert_eq!(clock.schedule(), 2.5);
        assert!(!clock.overshot());
    }

    #[test]
    fn test_granted_below_request() {
        let mut clock = Clock::new(1.0, 10.0).unwrap();
        clock.schedule();
        clock.grant(0.5).unwrap();
        assert!(!clock.at_boundary());
        assert!(!clock.overshot());
        assert_eq!(clock.next(), 1.0);
    }

    #[test]
    fn test_time_regression() {
        let mut clock = Clock::new(1.0, 10.0).unwrap();
        clock.grant(2.0).unwrap();
        assert!(matches!(
            clock.grant(1.0),
            Err(Error::TimeRegression { .. })
        ));
        assert!(matches!(
            clock.grant(f64::NAN),
            Err(Error::TimeRegression { .. })
        ));
        assert_eq!(clock.current(), 2.0);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(Clock::new(0.0, 1.0), Err(Error::InvalidStepDelta(_))));
        assert!(matches!(Clock::new(-1.0, 1.0), Err(Error::InvalidStepDelta(_))));
        assert!(matches!(
            Clock::new(f64::NAN, 1.0),
            Err(Error::InvalidStepDelta(_))
        ));
        assert!(matches!(Clock::new(1.0, 0.0), Err(Error::InvalidStopTime(_))));
        assert!(matches!(
            Clock::new(1.0, f64::INFINITY),
            Err(Error::InvalidStopTime(_))
        ));
    }
}
