/// CSV export of step results.
pub mod export;
