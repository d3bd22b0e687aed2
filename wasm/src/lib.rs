//! WebAssembly module for the logistics console
//!
//! Provides client-side computation for:
//! - Authoritative stock and total imported of a product record
//! - Product name keys used to spot duplicates while typing
//! - Order totals for the order editor

use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    web_sys::console::debug_1(&JsValue::from_str("inventory ledger wasm loaded"));
}

fn js_error(message: String) -> JsValue {
    js_sys::Error::new(&message).into()
}

fn parse_product(product_json: &str) -> Result<Product, String> {
    serde_json::from_str(product_json).map_err(|e| format!("Invalid product JSON: {}", e))
}

fn order_total(items_json: &str) -> Result<String, String> {
    let items: Vec<OrderItem> =
        serde_json::from_str(items_json).map_err(|e| format!("Invalid items JSON: {}", e))?;
    Ok(calculate_order_total(&items).to_string())
}

fn invariant_problem(product_json: &str) -> Result<Option<String>, String> {
    let product = parse_product(product_json)?;
    Ok(check_product_invariants(&product).err().map(|e| e.to_string()))
}

/// Stock to display for a product record, bounded by its total imported
#[wasm_bindgen]
pub fn authoritative_stock(product_json: &str) -> Result<i64, JsValue> {
    let product = parse_product(product_json).map_err(js_error)?;
    Ok(compute_authoritative_stock(&product))
}

/// Lifetime units received, preferring the import history over the stored total
#[wasm_bindgen]
pub fn total_imported(product_json: &str) -> Result<i64, JsValue> {
    let product = parse_product(product_json).map_err(js_error)?;
    Ok(authoritative_total_imported(&product))
}

/// Description of the first broken stock invariant, if any
#[wasm_bindgen]
pub fn product_invariant_problem(product_json: &str) -> Result<Option<String>, JsValue> {
    invariant_problem(product_json).map_err(js_error)
}

/// Case, diacritic and whitespace insensitive key for a product name
#[wasm_bindgen]
pub fn product_name_key(name: &str) -> String {
    normalize_product_name(name)
}

/// Product id the backend derives for a new product of this name
#[wasm_bindgen]
pub fn product_id_for_name(name: &str) -> String {
    product_id_from_name(name)
}

/// Whether two names would be merged as duplicates
#[wasm_bindgen]
pub fn names_are_duplicates(a: &str, b: &str) -> bool {
    ProductNameKey::from_name(a) == ProductNameKey::from_name(b)
}

/// Order total for a JSON array of order items, as a decimal string
#[wasm_bindgen]
pub fn calculate_order_total_json(items_json: &str) -> Result<String, JsValue> {
    order_total(items_json).map_err(js_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT: &str = r#"{
        "id": "banh-mi",
        "name": "Bánh mì",
        "selling_price": "2.50",
        "stock_quantity": 14,
        "total_imported": 10,
        "created_at": "2024-05-01T08:00:00Z",
        "updated_at": "2024-05-01T08:00:00Z"
    }"#;

    #[test]
    fn test_parse_product_and_bound_stock() {
        let product = parse_product(PRODUCT).unwrap();
        assert_eq!(compute_authoritative_stock(&product), 10);
        assert!(parse_product("{").is_err());
    }

    #[test]
    fn test_invariant_problem_reported() {
        let problem = invariant_problem(PRODUCT).unwrap();
        assert!(problem.is_some());
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(product_name_key("  Bánh  MÌ "), "banh mi");
        assert_eq!(product_id_for_name("Bánh mì"), "banh-mi");
        assert!(names_are_duplicates("Phở Bò", "pho bo"));
        assert!(!names_are_duplicates("Phở Bò", "pho ga"));
    }

    #[test]
    fn test_order_total() {
        let items = r#"[
            {"product_id": "banh-mi", "name": "Bánh mì", "quantity": 3, "price": "2.50"},
            {"name": "Bag", "quantity": 1, "price": "0.25"}
        ]"#;
        assert_eq!(order_total(items).unwrap(), "7.75");
        assert!(order_total("not json").is_err());
    }
}
