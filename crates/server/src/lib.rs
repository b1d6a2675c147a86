//! HTTP surface for the pulse pipeline controller: operator and worker
//! report API, `/metrics` exposition.

pub mod api;
pub mod metrics;
pub mod state;
