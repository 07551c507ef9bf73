use anyhow::Result;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

/// The listing-management surface used to remove sold-out products
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ListingAdmin: Send + Sync {
    /// Search a product code; whether a matching listing appeared
    async fn search(&self, product_code: &str) -> Result<bool>;

    /// Delete the listed product, accepting the confirm dialog
    async fn delete_listed(&self) -> Result<()>;
}

/// Per-code outcome of a deletion sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub product_code: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Delete every listed product among the given codes.
///
/// Codes that are no longer listed are recorded as not deleted without a
/// failure reason; one code's error never stops the sweep.
pub async fn delete_products(admin: &dyn ListingAdmin, codes: &[String]) -> Vec<DeleteOutcome> {
    let mut outcomes = Vec::with_capacity(codes.len());

    for code in codes {
        let outcome = match admin.search(code).await {
            Ok(false) => {
                info!("Product {} is not listed, nothing to delete", code);
                DeleteOutcome {
                    product_code: code.clone(),
                    deleted: false,
                    reason: None,
                }
            }
            Ok(true) => match admin.delete_listed().await {
                Ok(()) => {
                    info!("Deleted product {}", code);
                    DeleteOutcome {
                        product_code: code.clone(),
                        deleted: true,
                        reason: None,
                    }
                }
                Err(e) => {
                    warn!("Failed to delete product {}: {:#}", code, e);
                    DeleteOutcome {
                        product_code: code.clone(),
                        deleted: false,
                        reason: Some(format!("{:#}", e)),
                    }
                }
            },
            Err(e) => {
                warn!("Search for product {} failed: {:#}", code, e);
                DeleteOutcome {
                    product_code: code.clone(),
                    deleted: false,
                    reason: Some(format!("{:#}", e)),
                }
            }
        };

        outcomes.push(outcome);
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn one_failing_code_does_not_stop_the_sweep() {
        let mut admin = MockListingAdmin::new();
        admin.expect_search().with(eq("A1")).returning(|_| Ok(true));
        admin.expect_search().with(eq("A2")).returning(|_| Err(anyhow!("timeout")));
        admin.expect_search().with(eq("A3")).returning(|_| Ok(true));
        admin.expect_delete_listed().times(2).returning(|| Ok(()));

        let codes = vec!["A1".to_string(), "A2".to_string(), "A3".to_string()];
        let outcomes = delete_products(&admin, &codes).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].deleted);
        assert!(!outcomes[1].deleted);
        assert!(outcomes[1].reason.as_deref().unwrap().contains("timeout"));
        assert!(outcomes[2].deleted);
    }

    #[tokio::test]
    async fn unlisted_codes_are_recorded_without_a_reason() {
        let mut admin = MockListingAdmin::new();
        admin.expect_search().returning(|_| Ok(false));
        admin.expect_delete_listed().times(0);

        let outcomes = delete_products(&admin, &["GONE".to_string()]).await;
        assert!(!outcomes[0].deleted);
        assert!(outcomes[0].reason.is_none());
    }
}
