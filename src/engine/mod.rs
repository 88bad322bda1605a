//! Engine pipeline: aggregate prices, detect discrepancies, size the
//! trade, orchestrate execution.

pub mod aggregator;
pub mod detector;
pub mod orchestrator;
pub mod sizing;

pub use aggregator::PriceAggregator;
pub use orchestrator::Orchestrator;
