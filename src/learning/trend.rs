//! Rolling-window trend detection over the ledger
//!
//! A success/failure sequence becomes a windowed success-rate series, a
//! degree-1 least-squares fit gives the slope, and the slope is classified
//! against a threshold.
//!
//! Confidence is `1 - SS_res / SS_tot` where SS_res is measured against a
//! line through the *first* windowed value (slope from the fit, intercept not).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::metrics::{ExecutionLedger, ExecutionRecord};

/// Seconds at which the composite time score reaches zero
const TIME_SCALE: f64 = 10.0;
const SUCCESS_WEIGHT: f64 = 0.4;
const TIME_WEIGHT: f64 = 0.3;
const VELOCITY_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Improving => write!(f, "improving"),
            TrendDirection::Declining => write!(f, "declining"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    pub slope: f64,
    pub confidence: f64,
    pub direction: TrendDirection,
    /// Length of the windowed series
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTrend {
    pub worker: String,
    pub trend: TrendStats,
    pub success_rate: f64,
    pub average_execution_time: f64,
    pub total_tasks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemTrend {
    pub trend: TrendStats,
    /// Composite score of the most recent window
    pub current_score: f64,
    pub success_rate: f64,
    pub average_execution_time: f64,
    pub learning_velocity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Analyzed,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub status: AnalysisStatus,
    pub total_tasks: u64,
    pub required_tasks: u64,
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerTrend>,
    #[serde(default)]
    pub system: Option<SystemTrend>,
    pub analyzed_at: DateTime<Utc>,
}

impl TrendAnalysis {
    pub fn is_sufficient(&self) -> bool {
        self.status == AnalysisStatus::Analyzed
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Window size used for a sequence of `n` outcomes
pub fn window_size(n: usize, max_window: usize) -> usize {
    max_window.min(n / 2)
}

/// Sliding-window averages; empty when the window would be zero
pub fn windowed_means(values: &[f64], max_window: usize) -> Vec<f64> {
    let window = window_size(values.len(), max_window);
    if window == 0 {
        return Vec::new();
    }
    values.windows(window).map(mean).collect()
}

/// Least-squares `(slope, intercept)` over x = 0..n
pub fn linear_fit(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }

    let slope = sxy / sxx;
    Some((slope, y_mean - slope * x_mean))
}

/// `1 - SS_res/SS_tot` with the first value standing in for the intercept.
/// Zero when the series is flat.
pub fn first_value_confidence(values: &[f64], slope: f64) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };
    let y_mean = mean(values);
    let ss_tot: f64 = values.iter().map(|y| (y - y_mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return 0.0;
    }
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + first)).powi(2))
        .sum();
    1.0 - ss_res / ss_tot
}

pub fn classify(slope: f64, threshold: f64) -> TrendDirection {
    if slope > threshold {
        TrendDirection::Improving
    } else if slope < -threshold {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

/// Trend of an already-windowed series; None with fewer than two points
pub fn series_trend(series: &[f64], threshold: f64) -> Option<TrendStats> {
    let (slope, _) = linear_fit(series)?;
    Some(TrendStats {
        slope,
        confidence: first_value_confidence(series, slope),
        direction: classify(slope, threshold),
        points: series.len(),
    })
}

/// Composite health score of one window of executions
pub fn composite_score(records: &[ExecutionRecord], learning_velocity: f64) -> f64 {
    let outcomes: Vec<f64> = records.iter().map(|r| if r.success { 1.0 } else { 0.0 }).collect();
    let times: Vec<f64> = records.iter().map(|r| r.execution_time).collect();
    SUCCESS_WEIGHT * mean(&outcomes)
        + TIME_WEIGHT * (1.0 - mean(&times) / TIME_SCALE)
        + VELOCITY_WEIGHT * learning_velocity
}

/// Computes worker and system trends from a ledger
pub struct TrendAnalyzer {
    ledger: Arc<ExecutionLedger>,
    config: AnalysisConfig,
}

impl TrendAnalyzer {
    pub fn new(ledger: Arc<ExecutionLedger>, config: AnalysisConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze_performance_trends(&self) -> TrendAnalysis {
        let total_tasks = self.ledger.total_tasks();
        let mut analysis = TrendAnalysis {
            status: AnalysisStatus::InsufficientData,
            total_tasks,
            required_tasks: self.config.min_tasks_for_analysis,
            workers: BTreeMap::new(),
            system: None,
            analyzed_at: Utc::now(),
        };

        if total_tasks < self.config.min_tasks_for_analysis {
            info!(
                "Trend analysis needs {} tasks, ledger has {}",
                self.config.min_tasks_for_analysis, total_tasks
            );
            return analysis;
        }
        analysis.status = AnalysisStatus::Analyzed;

        for (role, metrics) in self.ledger.all_worker_metrics() {
            if metrics.total_tasks < self.config.min_worker_tasks {
                continue;
            }
            let Some(trend) = self.worker_trend(&role) else {
                continue;
            };
            debug!(
                "Worker '{}' trend: {} (slope {:.4}, confidence {:.2})",
                role, trend.direction, trend.slope, trend.confidence
            );
            analysis.workers.insert(
                role.clone(),
                WorkerTrend {
                    worker: role,
                    trend,
                    success_rate: metrics.success_rate(),
                    average_execution_time: metrics.average_execution_time,
                    total_tasks: metrics.total_tasks,
                },
            );
        }

        analysis.system = self.system_trend();
        info!(
            "Analyzed {} worker trends over {} tasks (system: {})",
            analysis.workers.len(),
            total_tasks,
            analysis
                .system
                .as_ref()
                .map_or("n/a".to_string(), |s| s.trend.direction.to_string())
        );
        analysis
    }

    fn worker_trend(&self, role: &str) -> Option<TrendStats> {
        let history = self.ledger.worker_history(role, self.config.history_window);
        let outcomes: Vec<f64> = history.iter().map(|r| if r.success { 1.0 } else { 0.0 }).collect();
        let series = windowed_means(&outcomes, self.config.max_window);
        series_trend(&series, self.config.worker_slope_threshold)
    }

    fn system_trend(&self) -> Option<SystemTrend> {
        let history = self.ledger.recent_history(self.config.history_window);
        let velocity = self.ledger.learning_velocity();
        let window = window_size(history.len(), self.config.max_window);
        if window == 0 {
            return None;
        }

        let series: Vec<f64> = history
            .windows(window)
            .map(|w| composite_score(w, velocity))
            .collect();
        let trend = series_trend(&series, self.config.system_slope_threshold)?;
        let performance = self.ledger.get_system_performance();

        Some(SystemTrend {
            trend,
            current_score: series.last().copied().unwrap_or_default(),
            success_rate: performance.success_rate,
            average_execution_time: performance.average_execution_time,
            learning_velocity: velocity,
        })
    }
}
