pub mod errors;
pub mod planner;
pub mod reconciler;
pub mod structs;
pub mod utils;

#[cfg(test)]
mod tests;

pub use planner::{BackfillPlan, BackfillPlanner};
pub use reconciler::{GapReconciler, ReconcileOutcome, ReconcilerConfig};
pub use structs::{Candle, Interval, SeriesKey, TimestampMS};
