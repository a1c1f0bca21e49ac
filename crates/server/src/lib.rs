pub mod api;
pub mod control;
pub mod metrics;
pub mod state;
