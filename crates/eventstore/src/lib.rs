pub mod console;
pub mod store;

pub use console::HeadlessConsole;
pub use store::{JobEventStore, SharedJobEventStore, StoreError};
