// =============================================================================
// PositionSizer — pure trade-value sizing function (spec §4.6)
// =============================================================================

/// Sizes a trade as a fraction of account value, capped by buying power and
/// optionally scaled by signal strength.
pub struct PositionSizer {
    pub min_strength: f64,
    pub max_strength: f64,
    pub scale_by_strength: bool,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self { min_strength: 0.1, max_strength: 1.0, scale_by_strength: true }
    }
}

impl PositionSizer {
    pub fn calculate(&self, strength: f64, account_value: f64, buying_power: f64, max_position_pct: f64) -> f64 {
        let cap = (account_value * max_position_pct).min(buying_power).max(0.0);
        if !self.scale_by_strength {
            return cap;
        }
        let clamped = strength.clamp(self.min_strength, self.max_strength);
        (cap * clamped).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_buying_power() {
        let sizer = PositionSizer { scale_by_strength: false, ..Default::default() };
        let value = sizer.calculate(1.0, 100_000.0, 5_000.0, 0.20);
        assert_eq!(value, 5_000.0);
    }

    #[test]
    fn caps_at_account_pct_when_buying_power_is_ample() {
        let sizer = PositionSizer { scale_by_strength: false, ..Default::default() };
        let value = sizer.calculate(1.0, 100_000.0, 100_000.0, 0.20);
        assert_eq!(value, 20_000.0);
    }

    #[test]
    fn scales_by_clamped_strength() {
        let sizer = PositionSizer::default();
        let value = sizer.calculate(0.5, 100_000.0, 100_000.0, 0.20);
        assert_eq!(value, 20_000.0 * 0.5);

        // strength below min_strength is clamped up
        let value = sizer.calculate(0.01, 100_000.0, 100_000.0, 0.20);
        assert_eq!(value, 20_000.0 * 0.1);
    }

    #[test]
    fn never_negative() {
        let sizer = PositionSizer::default();
        let value = sizer.calculate(1.0, 100_000.0, -500.0, 0.20);
        assert_eq!(value, 0.0);
    }
}
