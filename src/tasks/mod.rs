pub mod handlers;

// Re-export common types
pub use handlers::{crawl_soldout_flow, register_handlers, TaskContext};
