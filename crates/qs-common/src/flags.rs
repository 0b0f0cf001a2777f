//! Upload/flag policy applied to finished summaries.
//!
//! Rules are checked in priority order and the first match wins:
//!
//! 1. `MaxPercent`: a single tick reached `max_percent`
//! 2. `Sigma4`: the fourth-root deviation reached `sigma4_deviation`
//! 3. `StandardDeviation`: the RMS deviation reached `standard_deviation`
//! 4. `SearchIndexer`: the process is a well-known indexer
//!
//! Unflagged processes are not reported in detail but still count toward
//! category aggregates.

use serde::{Deserialize, Serialize};

use crate::summary::ProcessPerformanceSummary;

/// Why a process was selected for a detail record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlagReason {
    MaxPercent,
    Sigma4,
    StandardDeviation,
    SearchIndexer,
}

impl FlagReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagReason::MaxPercent => "MaxPercent",
            FlagReason::Sigma4 => "Sigma4",
            FlagReason::StandardDeviation => "StandardDeviation",
            FlagReason::SearchIndexer => "SearchIndexer",
        }
    }
}

impl std::fmt::Display for FlagReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for [`evaluate_flag`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagThresholds {
    pub max_percent: f64,
    pub sigma4_deviation: f64,
    pub standard_deviation: f64,
    /// Indexer image names, compared case-insensitively.
    pub indexer_names: Vec<String>,
}

impl Default for FlagThresholds {
    fn default() -> Self {
        Self {
            max_percent: 20.0,
            sigma4_deviation: 4.0,
            standard_deviation: 1.0,
            indexer_names: vec![
                "SearchIndexer.exe".to_string(),
                "tracker-miner-fs-3".to_string(),
                "baloo_file".to_string(),
            ],
        }
    }
}

impl FlagThresholds {
    pub fn is_indexer(&self, name: &str) -> bool {
        self.indexer_names
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(name))
    }
}

/// Raw metric form of the policy, for callers without a full summary.
pub fn evaluate_metrics(
    max_percent: f64,
    sigma4_deviation: f64,
    standard_deviation: f64,
    name: &str,
    thresholds: &FlagThresholds,
) -> Option<FlagReason> {
    if max_percent >= thresholds.max_percent {
        Some(FlagReason::MaxPercent)
    } else if sigma4_deviation >= thresholds.sigma4_deviation {
        Some(FlagReason::Sigma4)
    } else if standard_deviation >= thresholds.standard_deviation {
        Some(FlagReason::StandardDeviation)
    } else if thresholds.is_indexer(name) {
        Some(FlagReason::SearchIndexer)
    } else {
        None
    }
}

/// Apply the flag policy to one summary.
pub fn evaluate_flag(
    summary: &ProcessPerformanceSummary,
    thresholds: &FlagThresholds,
) -> Option<FlagReason> {
    evaluate_metrics(
        summary.max_percent(),
        summary.sigma4_deviation(),
        summary.standard_deviation(),
        &summary.name,
        thresholds,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::ProcessCategory;

    #[test]
    fn test_first_match_wins() {
        let t = FlagThresholds::default();
        assert_eq!(
            evaluate_metrics(25.0, 5.0, 2.0, "x", &t),
            Some(FlagReason::MaxPercent)
        );
        assert_eq!(
            evaluate_metrics(10.0, 5.0, 2.0, "x", &t),
            Some(FlagReason::Sigma4)
        );
        assert_eq!(
            evaluate_metrics(10.0, 3.0, 2.0, "x", &t),
            Some(FlagReason::StandardDeviation)
        );
        assert_eq!(
            evaluate_metrics(10.0, 3.0, 0.5, "searchindexer.EXE", &t),
            Some(FlagReason::SearchIndexer)
        );
        assert_eq!(evaluate_metrics(10.0, 3.0, 0.5, "bash", &t), None);
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let t = FlagThresholds::default();
        assert_eq!(
            evaluate_metrics(20.0, 0.0, 0.0, "x", &t),
            Some(FlagReason::MaxPercent)
        );
        assert_eq!(
            evaluate_metrics(0.0, 4.0, 0.0, "x", &t),
            Some(FlagReason::Sigma4)
        );
        assert_eq!(
            evaluate_metrics(0.0, 0.0, 1.0, "x", &t),
            Some(FlagReason::StandardDeviation)
        );
    }

    #[test]
    fn test_summary_burst_flags_max_percent() {
        let mut s = ProcessPerformanceSummary::new(9, "worker", ProcessCategory::Unknown);
        for p in [0.0, 0.0, 50.0, 0.0] {
            s.stats.record(p, 2.0);
        }
        assert_eq!(
            evaluate_flag(&s, &FlagThresholds::default()),
            Some(FlagReason::MaxPercent)
        );
    }

    #[test]
    fn test_idle_summary_not_flagged() {
        let s = ProcessPerformanceSummary::new(9, "worker", ProcessCategory::Unknown);
        assert_eq!(evaluate_flag(&s, &FlagThresholds::default()), None);
    }

    #[test]
    fn test_custom_thresholds() {
        let t = FlagThresholds {
            max_percent: 90.0,
            sigma4_deviation: 80.0,
            standard_deviation: 70.0,
            indexer_names: vec![],
        };
        assert_eq!(evaluate_metrics(25.0, 5.0, 2.0, "SearchIndexer.exe", &t), None);
    }
}
