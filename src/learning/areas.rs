//! Improvement areas and the recommendations that address them

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::trend::{TrendAnalysis, TrendDirection};
use crate::extraction::CREW_CONFIG_FILE;
use crate::metrics::LearningInsight;
use crate::types::{agent_config_target, ChangeAction, ChangePayload, Recommendation, KNOWLEDGE_TARGET};

const DECLINE_CONFIDENCE: f64 = 0.6;
const STEEP_DECLINE_SLOPE: f64 = -0.02;
const LOW_SUCCESS_RATE: f64 = 0.7;
const VERY_LOW_SUCCESS_RATE: f64 = 0.5;
/// Seconds
const SLOW_EXECUTION: f64 = 5.0;
/// High-impact insights expected among the recent ones
const MIN_HIGH_IMPACT_INSIGHTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    PerformanceDecline,
    LowSuccessRate,
    SlowExecution,
    OverallDecline,
    LowLearningRate,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueKind::PerformanceDecline => write!(f, "performance_decline"),
            IssueKind::LowSuccessRate => write!(f, "low_success_rate"),
            IssueKind::SlowExecution => write!(f, "slow_execution"),
            IssueKind::OverallDecline => write!(f, "overall_decline"),
            IssueKind::LowLearningRate => write!(f, "low_learning_rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

/// A problem the trend analysis surfaced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementArea {
    pub issue: IssueKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    pub detail: String,
    /// The number that triggered the rule (slope, rate, seconds or count)
    pub metric: f64,
}

impl ImprovementArea {
    fn worker(issue: IssueKind, severity: Severity, worker: &str, detail: String, metric: f64) -> Self {
        Self {
            issue,
            severity,
            worker: Some(worker.to_string()),
            detail,
            metric,
        }
    }

    fn system(issue: IssueKind, severity: Severity, detail: String, metric: f64) -> Self {
        Self {
            issue,
            severity,
            worker: None,
            detail,
            metric,
        }
    }
}

/// Apply the area rules in order: per-worker decline, success rate and
/// speed, then system decline and learning rate.
pub fn identify_improvement_areas(
    analysis: &TrendAnalysis,
    recent_insights: &[LearningInsight],
) -> Vec<ImprovementArea> {
    let mut areas = Vec::new();
    if !analysis.is_sufficient() {
        return areas;
    }

    for (name, worker) in &analysis.workers {
        let trend = &worker.trend;
        if trend.direction == TrendDirection::Declining && trend.confidence > DECLINE_CONFIDENCE {
            let severity = if trend.slope < STEEP_DECLINE_SLOPE {
                Severity::High
            } else {
                Severity::Medium
            };
            areas.push(ImprovementArea::worker(
                IssueKind::PerformanceDecline,
                severity,
                name,
                format!(
                    "Success rate declining (slope {:.4}, confidence {:.2})",
                    trend.slope, trend.confidence
                ),
                trend.slope,
            ));
        }

        if worker.success_rate < LOW_SUCCESS_RATE {
            let severity = if worker.success_rate < VERY_LOW_SUCCESS_RATE {
                Severity::High
            } else {
                Severity::Medium
            };
            areas.push(ImprovementArea::worker(
                IssueKind::LowSuccessRate,
                severity,
                name,
                format!("Success rate {:.1}%", worker.success_rate * 100.0),
                worker.success_rate,
            ));
        }

        if worker.average_execution_time > SLOW_EXECUTION {
            areas.push(ImprovementArea::worker(
                IssueKind::SlowExecution,
                Severity::Medium,
                name,
                format!("Average execution time {:.2}s", worker.average_execution_time),
                worker.average_execution_time,
            ));
        }
    }

    if let Some(system) = &analysis.system {
        if system.trend.direction == TrendDirection::Declining {
            areas.push(ImprovementArea::system(
                IssueKind::OverallDecline,
                Severity::High,
                format!("System score declining (slope {:.4})", system.trend.slope),
                system.trend.slope,
            ));
        }
    }

    let high_impact = recent_insights.iter().filter(|i| i.is_high_impact()).count();
    if high_impact < MIN_HIGH_IMPACT_INSIGHTS {
        areas.push(ImprovementArea::system(
            IssueKind::LowLearningRate,
            Severity::Medium,
            format!(
                "Only {} high-impact insights among the last {}",
                high_impact,
                recent_insights.len()
            ),
            high_impact as f64,
        ));
    }

    areas
}

fn recommendation(
    area: &ImprovementArea,
    target: String,
    action: ChangeAction,
    payload: ChangePayload,
    confidence: f64,
) -> Recommendation {
    Recommendation {
        target,
        action,
        payload,
        confidence,
        issue: area.issue.to_string(),
        worker: area.worker.clone(),
    }
}

fn worker_field(area: &ImprovementArea, field: &str, value: serde_json::Value, confidence: f64) -> Option<Recommendation> {
    let worker = area.worker.as_deref()?;
    Some(recommendation(
        area,
        agent_config_target(worker),
        ChangeAction::UpdateField,
        ChangePayload::field(field, value).with_reason(area.detail.clone()),
        confidence,
    ))
}

fn guideline(worker: &str, area: &ImprovementArea) -> ChangePayload {
    ChangePayload {
        title: Some(format!("Guidelines for {}", worker)),
        content: Some(format!(
            "The {} worker's success rate is trending down. Review its recent failures, \
             narrow the scope of each assignment and confirm inputs before starting.",
            worker
        )),
        category: Some("agents".to_string()),
        tags: vec!["guideline".to_string(), worker.to_string()],
        ..ChangePayload::default()
    }
    .with_reason(area.detail.clone())
}

/// Map areas to recommendations, highest confidence first
pub fn generate_recommendations(areas: &[ImprovementArea]) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    for area in areas {
        match area.issue {
            IssueKind::PerformanceDecline => {
                recs.extend(worker_field(area, "max_iter", json!(30), 0.7));
                if let Some(worker) = area.worker.as_deref() {
                    recs.push(recommendation(
                        area,
                        KNOWLEDGE_TARGET.to_string(),
                        ChangeAction::Add,
                        guideline(worker, area),
                        0.6,
                    ));
                }
            }
            IssueKind::LowSuccessRate => {
                recs.extend(worker_field(area, "reasoning", json!(true), 0.8));
            }
            IssueKind::SlowExecution => {
                recs.extend(worker_field(area, "max_iter", json!(15), 0.6));
            }
            IssueKind::OverallDecline => recs.push(recommendation(
                area,
                CREW_CONFIG_FILE.to_string(),
                ChangeAction::UpdateField,
                ChangePayload::field("planning", json!(true)).with_reason(area.detail.clone()),
                0.7,
            )),
            IssueKind::LowLearningRate => recs.push(recommendation(
                area,
                KNOWLEDGE_TARGET.to_string(),
                ChangeAction::AnalyzePatterns,
                ChangePayload::default().with_reason(area.detail.clone()),
                0.8,
            )),
        }
    }

    // Stable: equal confidences keep area order
    recs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::trend::{AnalysisStatus, SystemTrend, TrendStats, WorkerTrend};
    use crate::metrics::InsightType;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn stats(slope: f64, confidence: f64, direction: TrendDirection) -> TrendStats {
        TrendStats {
            slope,
            confidence,
            direction,
            points: 10,
        }
    }

    fn worker(name: &str, trend: TrendStats, success_rate: f64, time: f64) -> WorkerTrend {
        WorkerTrend {
            worker: name.to_string(),
            trend,
            success_rate,
            average_execution_time: time,
            total_tasks: 50,
        }
    }

    fn analysis(workers: Vec<WorkerTrend>, system: Option<TrendStats>) -> TrendAnalysis {
        TrendAnalysis {
            status: AnalysisStatus::Analyzed,
            total_tasks: 200,
            required_tasks: 100,
            workers: workers.into_iter().map(|w| (w.worker.clone(), w)).collect::<BTreeMap<_, _>>(),
            system: system.map(|trend| SystemTrend {
                trend,
                current_score: 0.5,
                success_rate: 0.8,
                average_execution_time: 1.0,
                learning_velocity: 0.0,
            }),
            analyzed_at: Utc::now(),
        }
    }

    fn high_impact_insights(n: usize) -> Vec<LearningInsight> {
        (0..n)
            .map(|_| LearningInsight::new(InsightType::FailurePattern, "x", "w", 0.8))
            .collect()
    }

    #[test]
    fn test_rules_in_order() {
        let a = analysis(
            vec![worker("coder", stats(-0.03, 0.9, TrendDirection::Declining), 0.4, 6.0)],
            Some(stats(-0.01, 0.5, TrendDirection::Declining)),
        );
        let areas = identify_improvement_areas(&a, &[]);
        let issues: Vec<_> = areas.iter().map(|a| a.issue).collect();
        assert_eq!(
            issues,
            vec![
                IssueKind::PerformanceDecline,
                IssueKind::LowSuccessRate,
                IssueKind::SlowExecution,
                IssueKind::OverallDecline,
                IssueKind::LowLearningRate,
            ]
        );
        assert_eq!(areas[0].severity, Severity::High);
        assert_eq!(areas[1].severity, Severity::High);
        assert_eq!(areas[2].severity, Severity::Medium);
        assert_eq!(areas[0].worker.as_deref(), Some("coder"));
        assert!(areas[3].worker.is_none());
    }

    #[test]
    fn test_thresholds() {
        let a = analysis(
            vec![
                // Declining but not confident enough
                worker("a", stats(-0.05, 0.6, TrendDirection::Declining), 0.7, 5.0),
                // Medium severity on both
                worker("b", stats(-0.015, 0.7, TrendDirection::Declining), 0.6, 1.0),
            ],
            Some(stats(0.0, 0.0, TrendDirection::Stable)),
        );
        let areas = identify_improvement_areas(&a, &high_impact_insights(5));
        assert_eq!(areas.len(), 2);
        assert!(areas.iter().all(|a| a.worker.as_deref() == Some("b")));
        assert!(areas.iter().all(|a| a.severity == Severity::Medium));
    }

    #[test]
    fn test_insufficient_data_has_no_areas() {
        let mut a = analysis(vec![], None);
        a.status = AnalysisStatus::InsufficientData;
        assert!(identify_improvement_areas(&a, &[]).is_empty());
    }

    #[test]
    fn test_recommendations_sorted_by_confidence() {
        let a = analysis(
            vec![worker("Senior Coder", stats(-0.03, 0.9, TrendDirection::Declining), 0.6, 7.0)],
            Some(stats(-0.01, 0.9, TrendDirection::Declining)),
        );
        let areas = identify_improvement_areas(&a, &[]);
        let recs = generate_recommendations(&areas);

        let confidences: Vec<f64> = recs.iter().map(|r| r.confidence).collect();
        assert_eq!(confidences, vec![0.8, 0.8, 0.7, 0.7, 0.6, 0.6]);

        // Ties keep area order
        assert_eq!(recs[0].issue, "low_success_rate");
        assert_eq!(recs[0].target, "config/agents/senior_coder.yaml");
        assert_eq!(recs[0].payload.field.as_deref(), Some("reasoning"));
        assert_eq!(recs[1].issue, "low_learning_rate");
        assert_eq!(recs[1].action, ChangeAction::AnalyzePatterns);
        assert!(recs[1].is_knowledge());

        assert_eq!(recs[2].payload.value, Some(json!(30)));
        assert_eq!(recs[3].target, CREW_CONFIG_FILE);
        assert_eq!(recs[4].action, ChangeAction::Add);
        assert_eq!(recs[4].payload.category.as_deref(), Some("agents"));
        assert_eq!(recs[5].payload.value, Some(json!(15)));
    }
}
