// =============================================================================
// MomentumStrategy — the one fully specified strategy (see strategy::mod docs)
// =============================================================================

use serde_json::{json, Value};

use super::{Bars, PositionInfo, SignalAction, Strategy, StrategyError, TradingSignal};

/// Buys on strong upward momentum over `lookback`, sells on reversal past
/// `sell_threshold`, otherwise holds.
pub struct MomentumStrategy {
    pub lookback: usize,
    pub momentum_threshold: f64,
    pub sell_threshold: f64,
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self { lookback: 20, momentum_threshold: 0.02, sell_threshold: -0.02 }
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn required_history(&self) -> usize {
        self.lookback
    }

    fn analyze(
        &self,
        symbol: &str,
        bars: &Bars,
        current_price: f64,
        current_position: Option<PositionInfo>,
    ) -> Result<TradingSignal, StrategyError> {
        let closes = bars.closes();
        let start = closes.len().saturating_sub(self.lookback);
        let window = &closes[start..];

        let momentum = match window.first() {
            Some(first) if *first != 0.0 => (current_price - first) / first,
            _ => 0.0,
        };

        let (action, reason) = if current_position.is_none() && momentum >= self.momentum_threshold {
            (SignalAction::Buy, format!("momentum {:.2}% over {} bars", momentum * 100.0, self.lookback))
        } else if current_position.is_some() && momentum <= self.sell_threshold {
            (SignalAction::Sell, format!("momentum reversed to {:.2}%", momentum * 100.0))
        } else {
            (SignalAction::Hold, format!("momentum {:.2}% within band", momentum * 100.0))
        };

        let strength = momentum.abs().min(1.0);

        Ok(TradingSignal {
            symbol: symbol.to_string(),
            action,
            strength,
            reason,
            current_price,
            momentum,
        })
    }

    fn parameters(&self) -> Value {
        json!({
            "lookback": self.lookback,
            "momentum_threshold": self.momentum_threshold,
            "sell_threshold": self.sell_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Bars {
        Bars(closes.iter().map(|&c| crate::strategy::Bar { close: c, open: c, high: c, low: c, volume: 1000.0 }).collect())
    }

    #[test]
    fn buys_on_strong_upward_momentum() {
        let strat = MomentumStrategy::default();
        let bars = bars_from_closes(&[100.0; 20]);
        let signal = strat.analyze("AAA", &bars, 103.0, None).unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
    }

    #[test]
    fn holds_within_band() {
        let strat = MomentumStrategy::default();
        let bars = bars_from_closes(&[100.0; 20]);
        let signal = strat.analyze("AAA", &bars, 100.5, None).unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn sells_on_reversal_when_holding() {
        let strat = MomentumStrategy::default();
        let bars = bars_from_closes(&[100.0; 20]);
        let position = PositionInfo { quantity: 10.0, entry_price: 100.0, unrealized_pnl_pct: 0.0 };
        let signal = strat.analyze("AAA", &bars, 97.0, Some(position)).unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
    }
}
