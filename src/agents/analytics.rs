//! Analytics agent
//!
//! Interprets data produced by upstream steps (typically a Query step) or,
//! when run on its own, answers trend and KPI questions from the model.
//! Numeric series found in upstream payloads under a `values` key are
//! summarized locally so the model is handed exact figures.

use super::{build_messages, detect_kind, Agent, AgentTask, UpstreamOutcome};
use crate::llm::{GenerationParams, ModelProvider};
use crate::types::{AgentOutput, Domain, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

const ANALYSES: &[(&str, &[&str])] = &[
    ("forecasting", &["forecast", "predict", "projection", "next quarter", "next month"]),
    ("anomaly_detection", &["anomaly", "outlier", "unusual", "unexpected", "spike"]),
    ("correlation_analysis", &["correlation", "relationship", "impact of", "influence"]),
    ("performance_analysis", &["performance", "kpi", "metric", "benchmark", "compare"]),
    ("trend_analysis", &["trend", "over time", "growth", "decline", "pattern"]),
];

/// Summary statistics for one numeric series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Relative change from the first to the last value, in percent.
    pub change_pct: Option<f64>,
}

impl SeriesSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let first = *values.first()?;
        let last = *values.last()?;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let change_pct = (first != 0.0).then(|| (last - first) / first.abs() * 100.0);
        Some(Self {
            count: values.len(),
            mean,
            min,
            max,
            change_pct,
        })
    }

    fn describe(&self) -> String {
        let mut line = format!(
            "{} points, mean {:.2}, min {:.2}, max {:.2}",
            self.count, self.mean, self.min, self.max
        );
        if let Some(change) = self.change_pct {
            line.push_str(&format!(", change {:+.1}%", change));
        }
        line
    }
}

pub struct AnalyticsAgent {
    agent_id: String,
    provider: Arc<dyn ModelProvider>,
    model: String,
}

impl AnalyticsAgent {
    pub fn new(
        agent_id: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            provider,
            model: model.into(),
        }
    }
}

fn series_of(data: &serde_json::Value) -> Option<Vec<f64>> {
    let values: Vec<f64> = data
        .get("values")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_f64())
        .collect();
    (!values.is_empty()).then_some(values)
}

#[async_trait]
impl Agent for AnalyticsAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn domains(&self) -> Vec<Domain> {
        vec![Domain::Analytics]
    }

    async fn execute(&self, task: &AgentTask) -> Result<AgentOutput> {
        let analysis = detect_kind(&task.utterance.text, ANALYSES, "general_analysis");
        let period = task.slot("period").unwrap_or("last 12 months");

        let mut context = Vec::new();
        let mut summaries = Vec::new();
        let mut sources = Vec::new();
        for upstream in &task.upstream {
            match &upstream.outcome {
                UpstreamOutcome::Available(output) => {
                    context.push(format!("Data from the {} step:\n{}", upstream.domain, output.content));
                    if let Some(summary) = series_of(&output.data).and_then(|v| SeriesSummary::from_values(&v)) {
                        context.push(format!("Computed statistics: {}", summary.describe()));
                        summaries.push(summary);
                    }
                    sources.extend(output.sources.iter().cloned());
                }
                UpstreamOutcome::Absent { reason } => {
                    context.push(format!(
                        "The {} data is unavailable ({}). State which conclusions this limits.",
                        upstream.domain, reason
                    ));
                }
            }
        }

        let system_prompt = format!(
            "You are the Analytics agent of an ERP copilot. Perform a {} over {}. \
             Lead with the key finding, support it with the figures provided, \
             flag data quality limits and end with one recommended next step.",
            analysis.replace('_', " "),
            period
        );
        let messages = build_messages(&system_prompt, Some(&context.join("\n\n")), task);
        let insight = self
            .provider
            .generate(&messages, &self.model, &GenerationParams::default().with_temperature(0.2))
            .await?;

        Ok(AgentOutput::text(insight)
            .with_data(json!({
                "analysis_type": analysis,
                "period": period,
                "series": summaries,
            }))
            .with_sources(sources))
    }

    async fn health_check(&self) -> Result<()> {
        self.provider.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{task, CannedProvider};
    use crate::agents::UpstreamOutput;

    #[test]
    fn test_series_summary() {
        let s = SeriesSummary::from_values(&[100.0, 80.0, 120.0, 150.0]).unwrap();
        assert_eq!(s.count, 4);
        assert_eq!(s.mean, 112.5);
        assert_eq!(s.min, 80.0);
        assert_eq!(s.max, 150.0);
        assert_eq!(s.change_pct, Some(50.0));
        assert!(SeriesSummary::from_values(&[]).is_none());
        assert_eq!(SeriesSummary::from_values(&[0.0, 5.0]).unwrap().change_pct, None);
    }

    #[tokio::test]
    async fn test_analytics_uses_upstream_series() {
        let provider = Arc::new(CannedProvider::replying("Sales grew 50%."));
        let agent = AnalyticsAgent::new("analytics-1", provider.clone(), "test-model");
        let mut t = task(Domain::Analytics, "show the sales trend this quarter", &[("period", "this quarter")]);
        t.upstream.push(UpstreamOutput {
            step_id: 0,
            domain: Domain::Query,
            agent_id: Some("query-1".into()),
            outcome: UpstreamOutcome::Available(
                AgentOutput::text("Monthly sales: 100, 80, 120, 150")
                    .with_data(json!({"values": [100, 80, 120, 150]}))
                    .with_sources(vec!["erp://sales/monthly".into()]),
            ),
        });

        let out = agent.execute(&t).await.unwrap();

        assert_eq!(out.data["analysis_type"], "trend_analysis");
        assert_eq!(out.data["series"][0]["count"], 4);
        assert_eq!(out.sources, vec!["erp://sales/monthly"]);
        let prompt = provider.last_prompt();
        assert!(prompt.contains("change +50.0%"));
        assert!(prompt.contains("this quarter"));
    }

    #[tokio::test]
    async fn test_absent_upstream_is_acknowledged() {
        let provider = Arc::new(CannedProvider::replying("Limited analysis."));
        let agent = AnalyticsAgent::new("analytics-1", provider.clone(), "test-model");
        let mut t = task(Domain::Analytics, "forecast revenue", &[]);
        t.upstream.push(UpstreamOutput {
            step_id: 0,
            domain: Domain::Query,
            agent_id: Some("query-1".into()),
            outcome: UpstreamOutcome::Absent {
                reason: "step 0 (query) did not finish in time".into(),
            },
        });

        let out = agent.execute(&t).await.unwrap();

        assert_eq!(out.data["analysis_type"], "forecasting");
        assert!(provider.last_prompt().contains("query data is unavailable"));
    }
}
