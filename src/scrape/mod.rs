pub mod catalog;
pub mod delivery;
pub mod pagination;
pub mod soldout;

// Re-export common types
pub use catalog::{CatalogEntry, ProductItem, ProductRecord};
pub use delivery::DeliveryRecord;
pub use pagination::{paginate, PageChunk, Paginated, StopReason};
pub use soldout::{extract_product_codes, SoldoutRow};
