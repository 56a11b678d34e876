//! Execution plans and the routing engine
//!
//! The routing engine turns ranked intents and a registry snapshot into an
//! [`ExecutionPlan`]. Plans are validated on construction (every dependency
//! points at an earlier step, so the graph is acyclic) and are immutable
//! afterwards.

use crate::agents::registry::RegistrySnapshot;
use crate::types::{AgentDescriptor, AppError, Domain, Intent, Result, Slots};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Default confidence lead the top intent needs for a single-step plan.
pub const DEFAULT_DOMINANCE_MARGIN: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Part of a dependency chain.
    Sequential,
    /// Independent of every other step.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTarget {
    Agent(String),
    /// No eligible agent existed when the plan was built.
    Unroutable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: usize,
    pub domain: Domain,
    pub target: StepTarget,
    pub input_slots: Slots,
    pub mode: StepMode,
    pub depends_on: Vec<usize>,
    pub confidence: f32,
}

impl PlanStep {
    pub fn agent_id(&self) -> Option<&str> {
        match &self.target {
            StepTarget::Agent(id) => Some(id),
            StepTarget::Unroutable { .. } => None,
        }
    }

    pub fn is_routable(&self) -> bool {
        matches!(self.target, StepTarget::Agent(_))
    }
}

/// Ordered, validated, immutable set of steps for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// Validate and freeze a plan.
    ///
    /// # Errors
    ///
    /// [`AppError::Planning`] when step ids are not `0..n` in order, or a step
    /// depends on itself, a later step, or the same step twice.
    pub fn new(steps: Vec<PlanStep>) -> Result<Self> {
        for (index, step) in steps.iter().enumerate() {
            if step.step_id != index {
                return Err(AppError::Planning(format!(
                    "step at position {} has id {}",
                    index, step.step_id
                )));
            }
            let mut seen = HashSet::new();
            for dep in &step.depends_on {
                if *dep >= step.step_id {
                    return Err(AppError::Planning(format!(
                        "step {} depends on non-earlier step {}",
                        step.step_id, dep
                    )));
                }
                if !seen.insert(*dep) {
                    return Err(AppError::Planning(format!(
                        "step {} lists dependency {} twice",
                        step.step_id, dep
                    )));
                }
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn step(&self, step_id: usize) -> Option<&PlanStep> {
        self.steps.get(step_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that have an agent to dispatch to.
    pub fn routable_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_routable()).count()
    }

    /// Steps that list `step_id` as a dependency.
    pub fn dependents(&self, step_id: usize) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.contains(&step_id))
            .map(|s| s.step_id)
            .collect()
    }

    /// Connected components of the dependency graph, each in step order,
    /// ordered by their first step.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let n = self.steps.len();
        let mut parent: Vec<usize> = (0..n).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                let a = find(&mut parent, step.step_id);
                let b = find(&mut parent, *dep);
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for id in 0..n {
            let root = find(&mut parent, id);
            groups.entry(root).or_default().push(id);
        }
        let mut components: Vec<Vec<usize>> = groups.into_values().collect();
        components.sort_by_key(|c| c[0]);
        components
    }
}

/// "`domain` consumes the output of `after`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRule {
    pub domain: Domain,
    pub after: Domain,
}

pub fn default_dependency_rules() -> Vec<DependencyRule> {
    vec![
        DependencyRule {
            domain: Domain::Compliance,
            after: Domain::Action,
        },
        DependencyRule {
            domain: Domain::Analytics,
            after: Domain::Query,
        },
    ]
}

/// Find a cycle among dependency rules, returned as the domains involved.
pub fn find_rule_cycle(rules: &[DependencyRule]) -> Option<Vec<Domain>> {
    fn visit(
        node: Domain,
        rules: &[DependencyRule],
        visiting: &mut Vec<Domain>,
        done: &mut BTreeSet<Domain>,
    ) -> Option<Vec<Domain>> {
        if let Some(pos) = visiting.iter().position(|d| *d == node) {
            let mut cycle = visiting[pos..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if done.contains(&node) {
            return None;
        }
        visiting.push(node);
        for rule in rules.iter().filter(|r| r.domain == node) {
            if let Some(cycle) = visit(rule.after, rules, visiting, done) {
                return Some(cycle);
            }
        }
        visiting.pop();
        done.insert(node);
        None
    }

    let mut done = BTreeSet::new();
    for domain in Domain::ALL {
        if let Some(cycle) = visit(domain, rules, &mut Vec::new(), &mut done) {
            return Some(cycle);
        }
    }
    None
}

/// Slack for confidences that only miss the margin by f32 rounding.
const MARGIN_TOLERANCE: f64 = 1e-6;

/// Whether `top` leads `runner_up` by at least `margin`.
fn dominates(top: f32, runner_up: f32, margin: f32) -> bool {
    f64::from(top) - f64::from(runner_up) + MARGIN_TOLERANCE >= f64::from(margin)
}

/// Healthy before Degraded, then lower load, then lowest id.
pub fn choose_candidate(candidates: &[AgentDescriptor]) -> Option<&AgentDescriptor> {
    candidates.iter().min_by(|a, b| {
        a.health_status
            .preference()
            .cmp(&b.health_status.preference())
            .then(a.load.cmp(&b.load))
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    })
}

pub struct RoutingEngine {
    margin: f32,
    rules: Vec<DependencyRule>,
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self {
            margin: DEFAULT_DOMINANCE_MARGIN,
            rules: default_dependency_rules(),
        }
    }
}

impl RoutingEngine {
    /// # Errors
    ///
    /// [`AppError::Configuration`] when the dependency rules form a cycle.
    pub fn new(margin: f32, rules: Vec<DependencyRule>) -> Result<Self> {
        if let Some(cycle) = find_rule_cycle(&rules) {
            let names: Vec<&str> = cycle.iter().map(Domain::as_str).collect();
            return Err(AppError::Configuration(format!(
                "routing dependency cycle: {}",
                names.join(" -> ")
            )));
        }
        Ok(Self {
            margin: margin.max(0.0),
            rules,
        })
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Build the plan for one request against a point-in-time snapshot.
    ///
    /// # Errors
    ///
    /// [`AppError::Planning`] when there are no intents.
    pub fn plan(&self, intents: &[Intent], snapshot: &RegistrySnapshot) -> Result<ExecutionPlan> {
        let mut ranked: Vec<&Intent> = Vec::new();
        for intent in intents {
            match ranked.iter_mut().find(|i| i.domain == intent.domain) {
                Some(existing) if existing.confidence < intent.confidence => *existing = intent,
                Some(_) => {}
                None => ranked.push(intent),
            }
        }
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.domain.cmp(&b.domain))
        });

        let Some(top) = ranked.first() else {
            return Err(AppError::Planning("no intents to plan".to_string()));
        };

        let dominant = ranked
            .get(1)
            .is_none_or(|runner_up| dominates(top.confidence, runner_up.confidence, self.margin));
        let selected: Vec<&Intent> = if dominant {
            vec![*top]
        } else {
            ranked.clone()
        };

        let ordered = self.order(&selected);

        let position: BTreeMap<Domain, usize> = ordered
            .iter()
            .enumerate()
            .map(|(i, intent)| (intent.domain, i))
            .collect();

        let mut steps: Vec<PlanStep> = ordered
            .iter()
            .enumerate()
            .map(|(step_id, intent)| {
                let mut depends_on: Vec<usize> = self
                    .rules
                    .iter()
                    .filter(|r| r.domain == intent.domain)
                    .filter_map(|r| position.get(&r.after).copied())
                    .collect();
                depends_on.sort_unstable();
                depends_on.dedup();

                let candidates = snapshot.list(intent.domain);
                let target = match choose_candidate(&candidates) {
                    Some(d) => StepTarget::Agent(d.agent_id.clone()),
                    None => StepTarget::Unroutable {
                        reason: format!("no eligible agent for domain '{}'", intent.domain),
                    },
                };

                PlanStep {
                    step_id,
                    domain: intent.domain,
                    target,
                    input_slots: intent.extracted_slots.clone(),
                    mode: StepMode::Parallel,
                    depends_on,
                    confidence: intent.confidence,
                }
            })
            .collect();

        let chained: BTreeSet<usize> = steps
            .iter()
            .flat_map(|s| s.depends_on.iter().copied().chain((!s.depends_on.is_empty()).then_some(s.step_id)))
            .collect();
        for step in &mut steps {
            if chained.contains(&step.step_id) {
                step.mode = StepMode::Sequential;
            }
        }

        debug!(
            steps = steps.len(),
            domains = ?steps.iter().map(|s| s.domain).collect::<Vec<_>>(),
            "execution plan built"
        );
        ExecutionPlan::new(steps)
    }

    /// Topological order over selected domains; ties keep confidence order.
    fn order<'a>(&self, selected: &[&'a Intent]) -> Vec<&'a Intent> {
        let present: BTreeSet<Domain> = selected.iter().map(|i| i.domain).collect();
        let mut remaining: Vec<&'a Intent> = selected.to_vec();
        let mut placed: BTreeSet<Domain> = BTreeSet::new();
        let mut ordered = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let ready = remaining.iter().position(|intent| {
                self.rules
                    .iter()
                    .filter(|r| r.domain == intent.domain && present.contains(&r.after))
                    .all(|r| placed.contains(&r.after))
            });
            // Rules are acyclic, so some intent is always ready.
            let index = ready.unwrap_or(0);
            let intent = remaining.remove(index);
            placed.insert(intent.domain);
            ordered.push(intent);
        }
        ordered
    }
}
