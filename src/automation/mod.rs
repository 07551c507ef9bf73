pub mod deletion;
pub mod order;
pub mod registration;

// Re-export common types
pub use deletion::{delete_products, DeleteOutcome, ListingAdmin};
pub use order::{place_order, OrderForm, OrderOutcome, OrderRequest, OrderStatus};
pub use registration::{register_all, PageOutcome, RegistrationPage, RegistrationSummary};
