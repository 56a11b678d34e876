//! Result synthesis.
//!
//! Turns the terminal results of a plan into response sections. Each
//! connected dependency component yields at most one section: a chain is
//! merged in step order, a lone step stands alone. Components where nothing
//! succeeded produce no section; their failures stay visible through the
//! diagnostics.

use super::plan::ExecutionPlan;
use crate::types::{AgentResult, Provenance, ResponseStatus, Section};

/// Sections plus the overall status for a finished plan.
pub fn synthesize(plan: &ExecutionPlan, results: &[AgentResult]) -> (Vec<Section>, ResponseStatus) {
    let sections = plan
        .components()
        .into_iter()
        .filter_map(|component| merge_component(&component, results))
        .collect();
    (sections, ResponseStatus::from_results(results))
}

fn merge_component(component: &[usize], results: &[AgentResult]) -> Option<Section> {
    let members: Vec<&AgentResult> = component
        .iter()
        .filter_map(|id| results.iter().find(|r| r.step_id == *id))
        .collect();

    let succeeded: Vec<&AgentResult> = members.iter().copied().filter(|r| r.is_success()).collect();
    let last = succeeded.last()?;

    let mut provenance = Provenance {
        step_ids: component.to_vec(),
        complete: succeeded.len() == members.len(),
        ..Default::default()
    };
    let mut parts = Vec::with_capacity(succeeded.len());
    for result in &succeeded {
        let Some(payload) = &result.payload else {
            continue;
        };
        if let Some(agent_id) = &result.agent_id {
            if !provenance.contributors.contains(agent_id) {
                provenance.contributors.push(agent_id.clone());
            }
        }
        for source in &payload.sources {
            if !provenance.sources.contains(source) {
                provenance.sources.push(source.clone());
            }
        }
        let content = payload.content.trim();
        if !content.is_empty() {
            parts.push(content.to_string());
        }
    }

    Some(Section {
        agent_id: last.agent_id.clone().unwrap_or_default(),
        domain: last.domain,
        content: parts.join("\n\n"),
        provenance,
    })
}
