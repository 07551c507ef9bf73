pub mod products;

// Re-export common types
pub use products::{save_in_batches, ProductStore, ProductStoreFactory};
