pub mod config;
pub mod error;
pub mod pool;
pub mod registry;
pub mod server;
pub mod state;

pub use config::ManagerArgs;
pub use pool::ExecutorPool;
pub use registry::InstanceRegistry;
pub use server::build_router;
pub use state::ManagerState;
