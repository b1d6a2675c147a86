pub mod audit;
pub mod error;
pub mod handlers;
pub mod items;
pub mod middleware;
pub mod orchestrator;
pub mod routes;
pub mod topology;

pub use routes::create_router;
