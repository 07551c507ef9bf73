use anyhow::Result;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::utils::error::WorkerError;

/// Receiver details for an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,
    pub phone: String,
    pub postcode: String,
    pub address: String,
    #[serde(default)]
    pub memo: Option<String>,
}

/// One line of an order: a product, its option text and a quantity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_code: String,
    /// Option text to select; empty for products without options
    #[serde(default)]
    pub option_name: String,
    pub quantity: u32,
}

/// A purchase order against the supplier admin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub order_id: String,
    pub receiver: Receiver,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Success,
    Failed,
}

/// Outcome of one order item; computed once, never mutated afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub product_code: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Aggregated outcome of one order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOutcome {
    pub order_id: String,
    pub status: OrderStatus,
    pub items: Vec<ItemResult>,
}

/// The order form surface of the admin site.
///
/// The engine below drives the Search → SelectOption → SetQuantity →
/// FillAddress → Submit → Await-Confirmation transitions through this
/// seam; the selector-level implementation lives with the browser code.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderForm: Send + Sync {
    /// Search a product and wait for its order affordance.
    ///
    /// Ok(false) when the affordance never appears within the bounded wait.
    async fn open_order_form(&self, product_code: &str) -> Result<bool>;

    /// Option texts currently offered by the form
    async fn option_labels(&self) -> Result<Vec<String>>;

    /// Select the option at the given index
    async fn choose_option(&self, index: usize) -> Result<()>;

    async fn set_quantity(&self, quantity: u32) -> Result<()>;

    async fn fill_receiver(&self, receiver: &Receiver) -> Result<()>;

    /// Submit the form with the one-shot confirm acceptor armed
    async fn submit_and_confirm(&self) -> Result<()>;
}

/// Collapse all whitespace runs to single spaces for option comparison
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the offered option whose normalized text contains the normalized
/// requested text
pub fn match_option(requested: &str, available: &[String]) -> Option<usize> {
    let wanted = normalize_whitespace(requested);

    available
        .iter()
        .position(|label| normalize_whitespace(label).contains(&wanted))
}

/// Place every item of an order, collecting one result per item.
///
/// Missing receiver fields abort the whole job before any item runs; an
/// individual item failure is recorded and the remaining items are still
/// attempted.
pub async fn place_order(form: &dyn OrderForm, request: &OrderRequest) -> Result<OrderOutcome> {
    validate_receiver(&request.receiver)?;

    let mut items = Vec::with_capacity(request.items.len());

    for item in &request.items {
        match place_order_item(form, &request.receiver, item).await {
            Ok(()) => {
                info!("Order {} item {} placed", request.order_id, item.product_code);
                items.push(ItemResult {
                    product_code: item.product_code.clone(),
                    status: OrderStatus::Success,
                    reason: None,
                });
            }
            Err(e) => {
                warn!(
                    "Order {} item {} failed: {:#}",
                    request.order_id, item.product_code, e
                );
                items.push(ItemResult {
                    product_code: item.product_code.clone(),
                    status: OrderStatus::Failed,
                    reason: Some(format!("{:#}", e)),
                });
            }
        }
    }

    let status = if items.iter().any(|item| item.status == OrderStatus::Failed) {
        OrderStatus::Failed
    } else {
        OrderStatus::Success
    };

    Ok(OrderOutcome {
        order_id: request.order_id.clone(),
        status,
        items,
    })
}

/// Drive one item through the full transition chain
async fn place_order_item(form: &dyn OrderForm, receiver: &Receiver, item: &OrderItem) -> Result<()> {
    if item.quantity == 0 {
        return Err(WorkerError::InvalidQuantity(item.quantity).into());
    }

    if !form.open_order_form(&item.product_code).await? {
        return Err(WorkerError::OrderControlMissing(item.product_code.clone()).into());
    }

    if !item.option_name.trim().is_empty() {
        let labels = form.option_labels().await?;
        let index = match_option(&item.option_name, &labels).ok_or_else(|| {
            WorkerError::OptionNotFound {
                requested: item.option_name.clone(),
                available: labels.clone(),
            }
        })?;
        form.choose_option(index).await?;
    }

    form.set_quantity(item.quantity).await?;
    form.fill_receiver(receiver).await?;
    form.submit_and_confirm().await?;

    Ok(())
}

fn validate_receiver(receiver: &Receiver) -> Result<()> {
    if receiver.name.trim().is_empty() {
        return Err(WorkerError::MissingField("receiver.name").into());
    }
    if receiver.phone.trim().is_empty() {
        return Err(WorkerError::MissingField("receiver.phone").into());
    }
    if receiver.postcode.trim().is_empty() {
        return Err(WorkerError::MissingField("receiver.postcode").into());
    }
    if receiver.address.trim().is_empty() {
        return Err(WorkerError::MissingField("receiver.address").into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> Receiver {
        Receiver {
            name: "Kim".to_string(),
            phone: "010-1234-5678".to_string(),
            postcode: "04524".to_string(),
            address: "100 Sejong-daero".to_string(),
            memo: None,
        }
    }

    fn item(code: &str, option: &str) -> OrderItem {
        OrderItem {
            product_code: code.to_string(),
            option_name: option.to_string(),
            quantity: 1,
        }
    }

    #[test]
    fn option_matching_normalizes_whitespace() {
        let available = vec!["Red  /  L".to_string(), "Blue / M".to_string()];
        assert_eq!(match_option(" Red / L ", &available), Some(0));
        assert_eq!(match_option("Blue / M", &available), Some(1));
        assert_eq!(match_option("Green / XL", &available), None);
    }

    #[test]
    fn option_matching_is_substring_based() {
        let available = vec!["Color: Blue / Size: M".to_string()];
        assert_eq!(match_option("Blue / Size: M", &available), Some(0));
    }

    #[tokio::test]
    async fn failed_option_match_does_not_abort_sibling_items() {
        let mut form = MockOrderForm::new();

        // All 3 items are searched, including the one that fails
        form.expect_open_order_form().times(3).returning(|_| Ok(true));
        form.expect_option_labels()
            .times(3)
            .returning(|| Ok(vec!["Red / L".to_string(), "Blue / M".to_string()]));
        // Only items 1 and 3 get past option selection
        form.expect_choose_option().times(2).returning(|_| Ok(()));
        form.expect_set_quantity().times(2).returning(|_| Ok(()));
        form.expect_fill_receiver().times(2).returning(|_| Ok(()));
        form.expect_submit_and_confirm().times(2).returning(|| Ok(()));

        let request = OrderRequest {
            order_id: "ord-1".to_string(),
            receiver: receiver(),
            items: vec![
                item("P1", "Red / L"),
                item("P2", "Green / XL"),
                item("P3", "Blue / M"),
            ],
        };

        let outcome = place_order(&form, &request).await.unwrap();

        assert_eq!(outcome.items.len(), 3);
        assert_eq!(outcome.items[0].status, OrderStatus::Success);
        assert_eq!(outcome.items[1].status, OrderStatus::Failed);
        assert!(outcome.items[1].reason.as_deref().unwrap().contains("no option matching"));
        assert_eq!(outcome.items[2].status, OrderStatus::Success);
        assert_eq!(outcome.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn missing_order_affordance_fails_the_item() {
        let mut form = MockOrderForm::new();
        form.expect_open_order_form().times(1).returning(|_| Ok(false));

        let request = OrderRequest {
            order_id: "ord-2".to_string(),
            receiver: receiver(),
            items: vec![item("GONE", "")],
        };

        let outcome = place_order(&form, &request).await.unwrap();
        assert_eq!(outcome.items[0].status, OrderStatus::Failed);
        assert!(outcome.items[0].reason.as_deref().unwrap().contains("no order control"));
    }

    #[tokio::test]
    async fn zero_quantity_fails_the_item_before_searching() {
        let mut form = MockOrderForm::new();
        form.expect_open_order_form().times(0);

        let request = OrderRequest {
            order_id: "ord-3".to_string(),
            receiver: receiver(),
            items: vec![OrderItem {
                product_code: "P1".to_string(),
                option_name: String::new(),
                quantity: 0,
            }],
        };

        let outcome = place_order(&form, &request).await.unwrap();
        assert_eq!(outcome.items[0].status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn empty_receiver_field_aborts_the_whole_order() {
        let form = MockOrderForm::new();

        let mut bad_receiver = receiver();
        bad_receiver.phone = "  ".to_string();

        let request = OrderRequest {
            order_id: "ord-4".to_string(),
            receiver: bad_receiver,
            items: vec![item("P1", "")],
        };

        let err = place_order(&form, &request).await.unwrap_err();
        assert!(err.to_string().contains("receiver.phone"));
    }

    #[tokio::test]
    async fn item_without_option_skips_option_selection() {
        let mut form = MockOrderForm::new();
        form.expect_open_order_form().times(1).returning(|_| Ok(true));
        form.expect_option_labels().times(0);
        form.expect_set_quantity().times(1).returning(|_| Ok(()));
        form.expect_fill_receiver().times(1).returning(|_| Ok(()));
        form.expect_submit_and_confirm().times(1).returning(|| Ok(()));

        let request = OrderRequest {
            order_id: "ord-5".to_string(),
            receiver: receiver(),
            items: vec![item("P1", "")],
        };

        let outcome = place_order(&form, &request).await.unwrap();
        assert_eq!(outcome.status, OrderStatus::Success);
    }
}
