pub mod config;
pub mod error;
pub mod jobs;
pub mod server;
pub mod state;

pub use config::ExecutorArgs;
pub use server::build_router;
pub use state::ExecutorState;
