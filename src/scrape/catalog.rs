use anyhow::{Result, anyhow};
use scraper::{Html, Selector};
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::cli::config::CatalogSelectors;

/// One row of the registered-product listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub product_code: String,
    pub detail_url: String,
}

/// A product option line on the detail screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductItem {
    pub item_name: String,
    pub consumer_price: i64,
    pub seller_price: i64,
}

/// Full price record extracted from a product detail screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub product_code: String,
    pub consumer_price: i64,
    pub seller_price: i64,
    pub shipping_cost: i64,
    pub items: Vec<ProductItem>,
}

/// Parse the catalog listing rows from a snapshot
pub fn parse_catalog_rows(html: &str, selectors: &CatalogSelectors) -> Result<Vec<CatalogEntry>> {
    let doc = Html::parse_document(html);
    let row_sel = parse_selector(&selectors.row)?;
    let code_sel = parse_selector(&selectors.code_cell)?;
    let link_sel = parse_selector(&selectors.detail_link)?;

    let mut entries = Vec::new();

    for row in doc.select(&row_sel) {
        let code = row
            .select(&code_sel)
            .next()
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let href = row
            .select(&link_sel)
            .next()
            .and_then(|link| link.value().attr("href"))
            .map(str::to_string);

        if code.is_empty() {
            debug!("Skipping catalog row without a product code");
            continue;
        }
        let Some(detail_url) = href else {
            debug!("Skipping catalog row without a detail link: {}", code);
            continue;
        };

        entries.push(CatalogEntry {
            product_code: code,
            detail_url,
        });
    }

    Ok(entries)
}

/// Whether the next-page affordance is present in the snapshot
pub fn has_next_page(html: &str, selectors: &CatalogSelectors) -> Result<bool> {
    let doc = Html::parse_document(html);
    let next_sel = parse_selector(&selectors.next_page)?;

    Ok(doc.select(&next_sel).next().is_some())
}

/// Parse a product detail snapshot into its price record
pub fn parse_product_detail(
    html: &str,
    selectors: &CatalogSelectors,
    product_code: &str,
) -> Result<ProductRecord> {
    let doc = Html::parse_document(html);

    let consumer_price = first_price(&doc, &selectors.detail_consumer_price)?;
    let seller_price = first_price(&doc, &selectors.detail_seller_price)?;
    let shipping_cost = first_price(&doc, &selectors.detail_shipping_cost).unwrap_or(0);

    let item_row_sel = parse_selector(&selectors.detail_item_row)?;
    let item_name_sel = parse_selector(&selectors.detail_item_name)?;
    let item_consumer_sel = parse_selector(&selectors.detail_item_consumer_price)?;
    let item_seller_sel = parse_selector(&selectors.detail_item_seller_price)?;

    let mut items = Vec::new();
    for row in doc.select(&item_row_sel) {
        let item_name = row
            .select(&item_name_sel)
            .next()
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        if item_name.is_empty() {
            continue;
        }

        let consumer = row
            .select(&item_consumer_sel)
            .next()
            .map(|cell| parse_price(&cell.text().collect::<String>()))
            .unwrap_or(0);
        let seller = row
            .select(&item_seller_sel)
            .next()
            .map(|cell| parse_price(&cell.text().collect::<String>()))
            .unwrap_or(0);

        items.push(ProductItem {
            item_name,
            consumer_price: consumer,
            seller_price: seller,
        });
    }

    Ok(ProductRecord {
        product_code: product_code.to_string(),
        consumer_price,
        seller_price,
        shipping_cost,
        items,
    })
}

fn first_price(doc: &Html, selector: &str) -> Result<i64> {
    let sel = parse_selector(selector)?;
    let cell = doc
        .select(&sel)
        .next()
        .ok_or_else(|| anyhow!("price element not found: {}", selector))?;

    Ok(parse_price(&cell.text().collect::<String>()))
}

/// Price cells mix digits with currency symbols and separators
pub fn parse_price(text: &str) -> i64 {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid selector '{}': {}", selector, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::AppConfig;

    fn selectors() -> CatalogSelectors {
        AppConfig::default().selectors.catalog
    }

    #[test]
    fn parses_listing_rows() {
        let html = r#"
            <table class="prod_list"><tbody>
              <tr>
                <td class="code">CH100</td>
                <td class="title"><a href="/product/view/100">First</a></td>
              </tr>
              <tr>
                <td class="code">CH101</td>
                <td class="title"><a href="/product/view/101">Second</a></td>
              </tr>
              <tr>
                <td class="code"></td>
                <td class="title"><a href="/product/view/102">No code</a></td>
              </tr>
            </tbody></table>
        "#;

        let entries = parse_catalog_rows(html, &selectors()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].product_code, "CH100");
        assert_eq!(entries[0].detail_url, "/product/view/100");
    }

    #[test]
    fn parses_detail_with_option_items() {
        let html = r#"
            <div class="price_area">
              <span class="consumer"><em>12,000</em></span>
              <span class="seller"><em>9,500</em></span>
              <span class="shipping"><em>2,500</em></span>
            </div>
            <table class="option_list"><tbody>
              <tr>
                <td class="opt_name">Red / L</td>
                <td class="opt_consumer">12,000</td>
                <td class="opt_seller">9,500</td>
              </tr>
              <tr>
                <td class="opt_name">Blue / M</td>
                <td class="opt_consumer">13,000</td>
                <td class="opt_seller">10,000</td>
              </tr>
            </tbody></table>
        "#;

        let record = parse_product_detail(html, &selectors(), "CH100").unwrap();
        assert_eq!(record.product_code, "CH100");
        assert_eq!(record.consumer_price, 12000);
        assert_eq!(record.seller_price, 9500);
        assert_eq!(record.shipping_cost, 2500);
        assert_eq!(record.items.len(), 2);
        assert_eq!(record.items[1].item_name, "Blue / M");
        assert_eq!(record.items[1].seller_price, 10000);
    }

    #[test]
    fn missing_top_level_price_is_an_error() {
        let html = "<div></div>";
        assert!(parse_product_detail(html, &selectors(), "CH100").is_err());
    }

    #[test]
    fn price_parsing_strips_everything_but_digits() {
        assert_eq!(parse_price("12,000 KRW"), 12000);
        assert_eq!(parse_price("  8500"), 8500);
        assert_eq!(parse_price("free"), 0);
    }
}
