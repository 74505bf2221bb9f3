//! Recipient risk configuration: defaults plus per-recipient overrides.

use std::collections::HashMap;
use std::fmt::Write;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Risk budget configuration, usually the `risk` section of the pipeline file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskConfig {
    /// Default limits applied to every recipient unless overridden.
    #[serde(default)]
    pub defaults: RiskLimits,
    /// Per-recipient overrides keyed by recipient id. Missing fields inherit
    /// from `defaults`.
    #[serde(default)]
    pub recipients: HashMap<i64, RiskOverrides>,
}

/// Complete set of limits for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RiskLimits {
    /// Maximum cumulative risk per day, in percent of deposit.
    pub daily_risk_limit: Decimal,
    pub max_open_positions: u32,
    pub deposit: Decimal,
    /// Percent of deposit risked on each trade.
    pub risk_per_trade: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            daily_risk_limit: Decimal::new(50, 1),
            max_open_positions: 5,
            deposit: Decimal::from(1000),
            risk_per_trade: Decimal::new(10, 1),
        }
    }
}

/// Per-recipient overrides. Every field optional; missing inherits from defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskOverrides {
    pub daily_risk_limit: Option<Decimal>,
    pub max_open_positions: Option<u32>,
    pub deposit: Option<Decimal>,
    pub risk_per_trade: Option<Decimal>,
}

impl RiskConfig {
    /// Returns the effective limits for a recipient, merging overrides with defaults.
    pub fn limits_for(&self, recipient_id: i64) -> RiskLimits {
        match self.recipients.get(&recipient_id) {
            Some(overrides) => RiskLimits {
                daily_risk_limit: overrides
                    .daily_risk_limit
                    .unwrap_or(self.defaults.daily_risk_limit),
                max_open_positions: overrides
                    .max_open_positions
                    .unwrap_or(self.defaults.max_open_positions),
                deposit: overrides.deposit.unwrap_or(self.defaults.deposit),
                risk_per_trade: overrides
                    .risk_per_trade
                    .unwrap_or(self.defaults.risk_per_trade),
            },
            None => self.defaults.clone(),
        }
    }

    /// Returns a human-readable description of all limits for start-up logs.
    pub fn describe_limits(&self) -> String {
        let mut out = String::from("Risk limits:\n");

        let _ = writeln!(out, "  Defaults:");
        let _ = writeln!(
            out,
            "    daily_risk_limit: {}%",
            self.defaults.daily_risk_limit
        );
        let _ = writeln!(
            out,
            "    max_open_positions: {}",
            self.defaults.max_open_positions
        );
        let _ = writeln!(out, "    deposit: {}", self.defaults.deposit);
        let _ = writeln!(out, "    risk_per_trade: {}%", self.defaults.risk_per_trade);

        let mut ids: Vec<_> = self.recipients.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let overrides = &self.recipients[&id];
            let _ = writeln!(out, "  recipient {id}:");
            if let Some(v) = overrides.daily_risk_limit {
                let _ = writeln!(out, "    daily_risk_limit: {v}%");
            }
            if let Some(v) = overrides.max_open_positions {
                let _ = writeln!(out, "    max_open_positions: {v}");
            }
            if let Some(v) = overrides.deposit {
                let _ = writeln!(out, "    deposit: {v}");
            }
            if let Some(v) = overrides.risk_per_trade {
                let _ = writeln!(out, "    risk_per_trade: {v}%");
            }
        }

        out
    }
}
