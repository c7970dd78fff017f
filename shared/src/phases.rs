//! Metabolic phase classification
//!
//! Maps elapsed fasting hours to a discrete phase label. The bands are
//! contiguous and exhaustive: every non-negative elapsed value falls in
//! exactly one phase, and more elapsed time never maps to an earlier phase.

use serde::{Deserialize, Serialize};

/// A named metabolic stage of a fast, keyed by elapsed hours.
///
/// Declaration order is band order, so the derived `Ord` matches phase
/// progression.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FastingPhase {
    /// [0, 4h): digesting the last meal, blood glucose elevated
    PostMeal,
    /// [4h, 8h): insulin falling, switching from glucose to stored fuel
    FuelSwitching,
    /// [8h, 12h): glycogen drawdown, fat mobilization ramping up
    FatMobilization,
    /// [12h, 16h): ketone production becomes measurable
    MildKetosis,
    /// [16h, 20h): cellular cleanup pathways upregulated
    AutophagyPotential,
    /// [20h, ∞): deep adaptation, sustained ketosis
    DeepAdaptive,
}

/// All phases in band order
pub const ALL_PHASES: [FastingPhase; 6] = [
    FastingPhase::PostMeal,
    FastingPhase::FuelSwitching,
    FastingPhase::FatMobilization,
    FastingPhase::MildKetosis,
    FastingPhase::AutophagyPotential,
    FastingPhase::DeepAdaptive,
];

impl FastingPhase {
    /// Hour range for this phase, inclusive lower / exclusive upper.
    /// The final phase is open-ended.
    pub fn range(&self) -> (f64, f64) {
        match self {
            FastingPhase::PostMeal => (0.0, 4.0),
            FastingPhase::FuelSwitching => (4.0, 8.0),
            FastingPhase::FatMobilization => (8.0, 12.0),
            FastingPhase::MildKetosis => (12.0, 16.0),
            FastingPhase::AutophagyPotential => (16.0, 20.0),
            FastingPhase::DeepAdaptive => (20.0, f64::INFINITY),
        }
    }

    /// Elapsed hours at which this phase begins
    pub fn starts_at_hours(&self) -> f64 {
        self.range().0
    }

    /// Position in the band order, 0-based
    pub fn index(&self) -> usize {
        ALL_PHASES.iter().position(|p| p == self).unwrap_or(0)
    }

    /// Human-readable label
    pub fn description(&self) -> &'static str {
        match self {
            FastingPhase::PostMeal => "Post-meal",
            FastingPhase::FuelSwitching => "Fuel switching",
            FastingPhase::FatMobilization => "Fat mobilization",
            FastingPhase::MildKetosis => "Mild ketosis",
            FastingPhase::AutophagyPotential => "Autophagy potential",
            FastingPhase::DeepAdaptive => "Deep adaptive",
        }
    }
}

/// Classify elapsed fasting hours into a phase.
///
/// Total for all inputs: negative values (clock skew on freshly started
/// fasts) land in the first phase.
pub fn phase_for_elapsed(hours: f64) -> FastingPhase {
    for phase in ALL_PHASES {
        let (_, upper) = phase.range();
        if hours < upper {
            return phase;
        }
    }
    FastingPhase::DeepAdaptive
}

/// Every phase passed through at the given elapsed time, ascending.
///
/// A fast that has reached phase `k` has necessarily passed through every
/// earlier phase, so this is always a prefix of [`ALL_PHASES`].
pub fn phases_reached(hours: f64) -> Vec<FastingPhase> {
    ALL_PHASES
        .iter()
        .copied()
        .filter(|p| hours >= p.starts_at_hours())
        .collect()
}
