use anyhow::{Result, anyhow};
use scraper::{Html, Selector};
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::cli::config::DeliverySelectors;

/// One waybill row from the delivery listing, in page traversal order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub name: String,
    pub phone: String,
    pub state: String,
    pub payment_method: String,
    pub courier: String,
    pub tracking_number: String,
}

/// Fixed column order of the delivery table
const NAME_COL: usize = 0;
const PHONE_COL: usize = 1;
const STATE_COL: usize = 2;
const PAYMENT_COL: usize = 3;
const COURIER_COL: usize = 4;
const TRACKING_COL: usize = 5;

/// Parse delivery rows whose courier matches the allow-list.
///
/// Rows with fewer cells than the fixed layout are skipped; record order
/// follows page traversal order.
pub fn parse_delivery_rows(
    html: &str,
    selectors: &DeliverySelectors,
    courier_allow_list: &[String],
) -> Result<Vec<DeliveryRecord>> {
    let doc = Html::parse_document(html);
    let row_sel = parse_selector(&selectors.row)?;
    let cell_sel = parse_selector("td")?;

    let mut records = Vec::new();

    for row in doc.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();

        if cells.len() <= TRACKING_COL {
            debug!("Skipping delivery row with {} cells", cells.len());
            continue;
        }

        let courier = cells[COURIER_COL].clone();
        let allowed = courier_allow_list
            .iter()
            .any(|allowed| courier.contains(allowed.as_str()));
        if !allowed {
            continue;
        }

        records.push(DeliveryRecord {
            name: cells[NAME_COL].clone(),
            phone: cells[PHONE_COL].clone(),
            state: cells[STATE_COL].clone(),
            payment_method: cells[PAYMENT_COL].clone(),
            courier,
            tracking_number: cells[TRACKING_COL].clone(),
        });
    }

    Ok(records)
}

/// Whether the next-page affordance is present in the snapshot
pub fn has_next_page(html: &str, selectors: &DeliverySelectors) -> Result<bool> {
    let doc = Html::parse_document(html);
    let next_sel = parse_selector(&selectors.next_page)?;

    Ok(doc.select(&next_sel).next().is_some())
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid selector '{}': {}", selector, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::AppConfig;

    fn selectors() -> DeliverySelectors {
        AppConfig::default().selectors.delivery
    }

    const PAGE: &str = r#"
        <table class="delivery_list"><tbody>
          <tr>
            <td>Kim</td><td>010-1111-2222</td><td>shipped</td>
            <td>card</td><td>CJ Logistics</td><td>6789</td>
          </tr>
          <tr>
            <td>Lee</td><td>010-3333-4444</td><td>preparing</td>
            <td>transfer</td><td>Unknown Courier</td><td>1234</td>
          </tr>
          <tr>
            <td>Park</td><td>010-5555-6666</td><td>shipped</td>
            <td>card</td><td>Hanjin (express)</td><td>5555</td>
          </tr>
        </tbody></table>
    "#;

    #[test]
    fn filters_rows_by_courier_allow_list() {
        let allow = vec!["CJ Logistics".to_string(), "Hanjin".to_string()];
        let records = parse_delivery_rows(PAGE, &selectors(), &allow).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Kim");
        assert_eq!(records[0].tracking_number, "6789");
        // Allow-list matching is a substring match so suffixed courier
        // names still pass
        assert_eq!(records[1].courier, "Hanjin (express)");
    }

    #[test]
    fn records_follow_page_traversal_order() {
        let allow = vec!["CJ Logistics".to_string(), "Hanjin".to_string(), "Unknown Courier".to_string()];
        let records = parse_delivery_rows(PAGE, &selectors(), &allow).unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Kim", "Lee", "Park"]);
    }

    #[test]
    fn short_rows_are_skipped() {
        let html = r#"<table class="delivery_list"><tbody><tr><td>only</td></tr></tbody></table>"#;
        let allow = vec!["CJ".to_string()];
        let records = parse_delivery_rows(html, &selectors(), &allow).unwrap();
        assert!(records.is_empty());
    }
}
