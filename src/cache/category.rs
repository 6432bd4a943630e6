//! Analysis categories and their invalidation scope

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of generative-AI request sharing one TTL and one invalidation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisCategory {
    /// Short question about a single student, usually asked right after a data change
    QuickInsight,

    /// Full per-student analysis
    StudentAnalysis,

    /// Intervention plan for a student
    InterventionPlan,

    /// Narrative progress report for a student
    NarrativeReport,

    /// Pattern report across a cohort
    CohortPatterns,
}

/// Which kind of change makes entries of a category stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Invalidated by changes to individual entities (students)
    Entity,

    /// Invalidated by changes to a cohort scope
    Cohort,
}

impl AnalysisCategory {
    /// All categories, in declaration order
    pub const ALL: [AnalysisCategory; 5] = [
        AnalysisCategory::QuickInsight,
        AnalysisCategory::StudentAnalysis,
        AnalysisCategory::InterventionPlan,
        AnalysisCategory::NarrativeReport,
        AnalysisCategory::CohortPatterns,
    ];

    /// Stable wire name, also used as the cache key prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisCategory::QuickInsight => "quick_insight",
            AnalysisCategory::StudentAnalysis => "student_analysis",
            AnalysisCategory::InterventionPlan => "intervention_plan",
            AnalysisCategory::NarrativeReport => "narrative_report",
            AnalysisCategory::CohortPatterns => "cohort_patterns",
        }
    }

    /// Invalidation scope for entries of this category
    pub fn scope_kind(&self) -> ScopeKind {
        match self {
            AnalysisCategory::CohortPatterns => ScopeKind::Cohort,
            _ => ScopeKind::Entity,
        }
    }

    /// Default TTL in minutes, reflecting how volatile the inputs are
    pub fn default_ttl_minutes(&self) -> u64 {
        match self {
            AnalysisCategory::QuickInsight => 15,
            AnalysisCategory::InterventionPlan => 30,
            AnalysisCategory::StudentAnalysis => 60,
            AnalysisCategory::NarrativeReport => 60,
            AnalysisCategory::CohortPatterns => 120,
        }
    }
}

impl fmt::Display for AnalysisCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisCategory {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CacheError::InvalidCategory(s.to_string()))
    }
}
