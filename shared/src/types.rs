//! Common types used across the ledger: product name keys and identifiers

use serde::{Deserialize, Serialize};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};
use uuid::Uuid;

/// Fallback identifier for names that normalize to nothing
const EMPTY_NAME_ID: &str = "product";

/// Case, diacritic and whitespace insensitive comparison key for a product name.
///
/// "  Cà  Phê Sữa " and "ca phe sua" share the key `"ca phe sua"`.
pub fn normalize_product_name(name: &str) -> String {
    let folded: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'đ' | 'Đ' => 'd',
            'ł' | 'Ł' => 'l',
            'ø' | 'Ø' => 'o',
            _ => c,
        })
        .collect::<String>()
        .to_lowercase();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic product id derived from the normalized name.
///
/// Two creations of the same name collide on purpose.
pub fn product_id_from_name(name: &str) -> String {
    let mut id = String::new();
    let mut pending_dash = false;
    for c in normalize_product_name(name).chars() {
        if c.is_alphanumeric() {
            if pending_dash && !id.is_empty() {
                id.push('-');
            }
            pending_dash = false;
            id.push(c);
        } else {
            pending_dash = true;
        }
    }

    if id.is_empty() {
        EMPTY_NAME_ID.to_string()
    } else {
        id
    }
}

/// Id for a product that must not collide with an existing one of the same name
pub fn unique_product_id(name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", product_id_from_name(name), &suffix[..8])
}

/// Normalized name used to group duplicate products
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProductNameKey(pub String);

impl ProductNameKey {
    pub fn from_name(name: &str) -> Self {
        Self(normalize_product_name(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductNameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_case_diacritic_and_whitespace_insensitive() {
        assert_eq!(normalize_product_name("  Cà  Phê Sữa "), "ca phe sua");
        assert_eq!(normalize_product_name("CA PHE\tSUA"), "ca phe sua");
        assert_eq!(normalize_product_name("Đường Kính"), "duong kinh");
        assert_eq!(normalize_product_name("Crème Brûlée"), "creme brulee");
    }

    #[test]
    fn test_product_id_is_deterministic() {
        assert_eq!(product_id_from_name("Cà Phê Sữa"), "ca-phe-sua");
        assert_eq!(product_id_from_name("ca phe  sua"), "ca-phe-sua");
        assert_eq!(product_id_from_name("Gạo (5kg)"), "gao-5kg");
    }

    #[test]
    fn test_product_id_for_empty_name() {
        assert_eq!(product_id_from_name("   "), "product");
        assert_eq!(product_id_from_name("!!!"), "product");
    }

    #[test]
    fn test_unique_product_id_keeps_prefix() {
        let a = unique_product_id("Tea");
        let b = unique_product_id("Tea");
        assert!(a.starts_with("tea-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_name_key_equality() {
        assert_eq!(ProductNameKey::from_name("Trà Xanh"), ProductNameKey::from_name("tra  xanh"));
    }
}
