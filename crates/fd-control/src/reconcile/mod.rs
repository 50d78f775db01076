//! Health reconciliation

mod engine;
mod plan;

pub use engine::{ReconcileEngine, Remediator};
pub use plan::{candidate_reasons, select_candidates};
