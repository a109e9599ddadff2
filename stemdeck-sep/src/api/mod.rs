//! HTTP API handlers for stemdeck-sep

pub mod health;
pub mod jobs;
pub mod modules;
pub mod process;
pub mod projects;
pub mod sse;
pub mod unify;

pub use health::health_routes;
pub use jobs::job_routes;
pub use modules::module_routes;
pub use process::process_routes;
pub use projects::project_routes;
pub use sse::job_event_stream;
pub use unify::unify_routes;
