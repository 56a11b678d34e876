//! Planning, dispatch and synthesis.
//!
//! A request moves through three stages here:
//!
//! 1. [`RoutingEngine::plan`] turns ranked intents into an [`ExecutionPlan`]
//! 2. [`StepDispatcher::run`] drives every step to a terminal [`AgentResult`]
//! 3. [`synthesize`] folds the results into response sections
//!
//! ```ignore
//! let plan = engine.plan(&intents, &registry.snapshot())?;
//! let outcome = dispatcher.run(&plan, &ctx, deadline, &cancel).await;
//! let (sections, status) = synthesize(&plan, &outcome.results);
//! ```
//!
//! [`AgentResult`]: crate::types::AgentResult

pub mod engine;
pub mod plan;
pub mod synthesis;

pub use engine::{DispatchContext, DispatchOutcome, StepDispatcher, DEFAULT_STEP_TIMEOUT};
pub use plan::{
    default_dependency_rules, DependencyRule, ExecutionPlan, PlanStep, RoutingEngine, StepMode,
    StepTarget, DEFAULT_DOMINANCE_MARGIN,
};
pub use synthesis::synthesize;
