use crate::error::RiskError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskCategory {
    Low,
    Moderate,
    High,
}

impl RiskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskCategory::Low => "LOW",
            RiskCategory::Moderate => "MODERATE",
            RiskCategory::High => "HIGH",
        }
    }

    pub fn label(self) -> String {
        format!("{} RISK", self.as_str())
    }

    /// Gauge colour used by the display layer.
    pub fn color(self) -> &'static str {
        match self {
            RiskCategory::Low => "#22c55e",
            RiskCategory::Moderate => "#facc15",
            RiskCategory::High => "#ef4444",
        }
    }

    pub fn is_urgent(self) -> bool {
        matches!(self, RiskCategory::High)
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskCategory::Low),
            "MODERATE" | "MEDIUM" => Ok(RiskCategory::Moderate),
            "HIGH" => Ok(RiskCategory::High),
            _ => Err(format!("unknown risk category: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.4,
            high: 0.7,
        }
    }
}

impl RiskThresholds {
    pub fn new(low: f64, high: f64) -> Result<Self, RiskError> {
        let t = Self { low, high };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<(), RiskError> {
        let ok = self.low.is_finite()
            && self.high.is_finite()
            && 0.0 <= self.low
            && self.low < self.high
            && self.high <= 1.0;
        if ok {
            Ok(())
        } else {
            Err(RiskError::InvalidThresholds {
                low: self.low,
                high: self.high,
            })
        }
    }

    pub fn categorize(&self, probability: f64) -> RiskCategory {
        if probability < self.low {
            RiskCategory::Low
        } else if probability < self.high {
            RiskCategory::Moderate
        } else {
            RiskCategory::High
        }
    }
}

/// Whole percent, truncated toward zero.
pub fn risk_percent(probability: f64) -> u8 {
    (probability.clamp(0.0, 1.0) * 100.0).floor() as u8
}
