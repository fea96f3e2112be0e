//! Scenario-based tests for knowledge-pipeline

mod active_run;
mod cancellation;
mod chunk_embed;
mod event_order;
mod fail_fast;
mod retry_budget;
