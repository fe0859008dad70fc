//! Product metadata carried on purchase records.

use serde::{Deserialize, Serialize};

/// The product bought in a purchase, as shown on receipts and dashboards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Product {
    /// Menu identifier (e.g. "espresso-double").
    pub id: String,
    /// Display name (e.g. "Double Espresso").
    pub name: String,
}

impl Product {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        let product = Product::new("latte-oat", "Oat Latte");
        let json = serde_json::to_string(&product).expect("serialize");
        let back: Product = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, product);
    }
}
