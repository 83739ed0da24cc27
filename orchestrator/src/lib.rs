// Background orchestrator: reconciliation engine, dispatch handler,
// product refresh batch processor, and the run loop tying them together

pub mod dispatch;
pub mod orchestrator;
pub mod reconcile;
pub mod refresh;
