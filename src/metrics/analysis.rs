//! Self-analysis over the ledger
//!
//! System-wide aggregates and rule-based improvement suggestions.

use serde::{Deserialize, Serialize};

use super::execution::ExecutionLedger;

/// Workers need this many tasks before they get suggestions
const MIN_TASKS_FOR_SUGGESTIONS: u64 = 5;
const LOW_SUCCESS_RATE: f64 = 0.7;
const CRITICAL_SUCCESS_RATE: f64 = 0.5;
/// Seconds
const SLOW_AVERAGE: f64 = 30.0;
const SYSTEM_MIN_TASKS: u64 = 20;
const SYSTEM_TARGET_SUCCESS_RATE: f64 = 0.8;
const REFERENCED_FAILURES: usize = 3;

/// Aggregates across every worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemPerformance {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub success_rate: f64,
    /// Seconds
    pub average_execution_time: f64,
    pub worker_count: usize,
    pub total_insights: usize,
    pub applied_insights: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    SkillImprovement,
    PerformanceOptimization,
    SystemOptimization,
}

impl std::fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestionKind::SkillImprovement => write!(f, "skill_improvement"),
            SuggestionKind::PerformanceOptimization => write!(f, "performance_optimization"),
            SuggestionKind::SystemOptimization => write!(f, "system_optimization"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    Low,
    Medium,
    High,
}

/// A suggestion for improvement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSuggestion {
    pub kind: SuggestionKind,
    pub priority: SuggestionPriority,
    /// None for system-level suggestions
    pub worker: Option<String>,
    pub description: String,
    /// Supporting evidence, e.g. the most recent failures
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl ExecutionLedger {
    /// Totals and success rate across all workers
    pub fn get_system_performance(&self) -> SystemPerformance {
        let state = self.read();

        let total_tasks: u64 = state.metrics.values().map(|m| m.total_tasks).sum();
        let successful_tasks: u64 = state.metrics.values().map(|m| m.successful_tasks).sum();
        let failed_tasks: u64 = state.metrics.values().map(|m| m.failed_tasks).sum();
        let total_time: f64 = state.metrics.values().map(|m| m.total_execution_time).sum();

        let (success_rate, average_execution_time) = if total_tasks > 0 {
            (
                successful_tasks as f64 / total_tasks as f64,
                total_time / total_tasks as f64,
            )
        } else {
            (0.0, 0.0)
        };

        SystemPerformance {
            total_tasks,
            successful_tasks,
            failed_tasks,
            success_rate,
            average_execution_time,
            worker_count: state.metrics.len(),
            total_insights: state.insights.len(),
            applied_insights: state.insights.iter().filter(|i| i.applied).count(),
        }
    }

    /// Rule-based suggestions for workers with enough history
    pub fn get_improvement_suggestions(&self) -> Vec<ImprovementSuggestion> {
        let mut suggestions = Vec::new();

        {
            let state = self.read();
            for (role, metrics) in &state.metrics {
                if metrics.total_tasks < MIN_TASKS_FOR_SUGGESTIONS {
                    continue;
                }

                let rate = metrics.success_rate();
                if rate < LOW_SUCCESS_RATE {
                    let mut recent_failures: Vec<String> = state
                        .history
                        .iter()
                        .rev()
                        .filter(|r| r.worker_role == *role && !r.success)
                        .take(REFERENCED_FAILURES)
                        .map(|r| r.label())
                        .collect();
                    recent_failures.reverse();

                    suggestions.push(ImprovementSuggestion {
                        kind: SuggestionKind::SkillImprovement,
                        priority: if rate < CRITICAL_SUCCESS_RATE {
                            SuggestionPriority::High
                        } else {
                            SuggestionPriority::Medium
                        },
                        worker: Some(role.clone()),
                        description: format!(
                            "Worker '{}' succeeds on {:.0}% of tasks; review its recent failures and add guidance",
                            role,
                            rate * 100.0
                        ),
                        evidence: recent_failures,
                    });
                }

                if metrics.average_execution_time > SLOW_AVERAGE {
                    suggestions.push(ImprovementSuggestion {
                        kind: SuggestionKind::PerformanceOptimization,
                        priority: SuggestionPriority::Medium,
                        worker: Some(role.clone()),
                        description: format!(
                            "Worker '{}' takes {:.1}s per task on average; simplify its tasks or tooling",
                            role, metrics.average_execution_time
                        ),
                        evidence: vec![format!("{} tasks observed", metrics.total_tasks)],
                    });
                }
            }
        }

        let system = self.get_system_performance();
        if system.total_tasks > SYSTEM_MIN_TASKS && system.success_rate < SYSTEM_TARGET_SUCCESS_RATE {
            suggestions.push(ImprovementSuggestion {
                kind: SuggestionKind::SystemOptimization,
                priority: SuggestionPriority::High,
                worker: None,
                description: format!(
                    "Overall success rate is {:.0}% across {} tasks; review task decomposition and worker assignment",
                    system.success_rate * 100.0,
                    system.total_tasks
                ),
                evidence: vec![format!(
                    "{} failed of {} total",
                    system.failed_tasks, system.total_tasks
                )],
            });
        }

        suggestions
    }
}
