//! Single sensor cell with smoothed display value

/// Divisor applied to the raw/display gap each render tick.
const FADE_STEP: f64 = 5.0;

/// Gap below which the display value snaps to the raw value.
const SNAP_THRESHOLD: f64 = 0.5;

/// One pressure cell. Holds the latest raw reading separately from the
/// value actually rendered; the display value chases the raw value a
/// fraction per tick so updates fade in rather than flicker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSpot {
    /// Horizontal position within the layout, in pixels
    pub x: f64,
    /// Vertical position within the layout, in pixels
    pub y: f64,
    raw: u8,
    display: f64,
}

impl SensorSpot {
    /// Create a spot at a fixed layout position, reading zero
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            raw: 0,
            display: 0.0,
        }
    }

    /// Record a new raw reading. The display value is untouched until the
    /// next tick.
    pub fn set_value(&mut self, raw: u8) {
        self.raw = raw;
    }

    /// Latest raw reading
    pub fn raw(&self) -> u8 {
        self.raw
    }

    /// Current smoothed display value
    pub fn display(&self) -> f64 {
        self.display
    }

    /// Advance the display value one step toward the raw value. Returns
    /// true when the display value moved.
    pub fn tick(&mut self) -> bool {
        let target = f64::from(self.raw);
        let diff = target - self.display;
        if diff == 0.0 {
            return false;
        }
        if diff.abs() < SNAP_THRESHOLD {
            self.display = target;
        } else {
            self.display += diff / FADE_STEP;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_value_does_not_touch_display() {
        let mut spot = SensorSpot::new(0.0, 0.0);
        spot.set_value(200);
        assert_eq!(spot.display(), 0.0);
        assert_eq!(spot.raw(), 200);
    }

    #[test]
    fn test_tick_converges_monotonically() {
        let mut spot = SensorSpot::new(0.0, 0.0);
        spot.set_value(100);
        let mut previous = spot.display();
        for _ in 0..200 {
            spot.tick();
            assert!(spot.display() >= previous);
            assert!(spot.display() <= 100.0);
            previous = spot.display();
        }
        assert_eq!(spot.display(), 100.0);
    }

    #[test]
    fn test_tick_snaps_small_gap() {
        let mut spot = SensorSpot::new(0.0, 0.0);
        spot.set_value(100);
        while spot.tick() {}
        assert_eq!(spot.display(), 100.0);

        // Converge back down as well
        spot.set_value(0);
        while spot.tick() {}
        assert_eq!(spot.display(), 0.0);
    }

    #[test]
    fn test_tick_steady_state_reports_no_motion() {
        let mut spot = SensorSpot::new(3.0, 4.0);
        assert!(!spot.tick());
        spot.set_value(50);
        while spot.tick() {}
        assert!(!spot.tick());
    }
}
