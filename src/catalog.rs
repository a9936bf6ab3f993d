//! Product catalog collaborator. The checkout core only reads from it.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::amount::Rate;
use crate::model::Product;
use crate::Amount;

/// Source of product records by barcode.
pub trait Catalog: Send + Sync {
    fn product(&self, barcode: &str) -> Option<Product>;
}

/// Key-value catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<String, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-loaded with the demo store's products.
    pub fn demo() -> Self {
        let catalog = Self::new();
        let tax = Rate::from_scaled(500);
        for (barcode, name, price) in [
            ("12345", "Milk 1L", 60),
            ("67890", "Bread", 40),
            ("54321", "Eggs (12)", 80),
        ] {
            catalog.upsert(Product {
                barcode: barcode.to_string(),
                name: name.to_string(),
                price: Amount::from_units(price),
                tax_rate: tax,
                stock: 100,
            });
        }
        catalog
    }

    pub fn upsert(&self, product: Product) -> Product {
        self.products
            .write()
            .insert(product.barcode.clone(), product.clone());
        product
    }

    pub fn remove(&self, barcode: &str) -> Option<Product> {
        self.products.write().remove(barcode)
    }

    pub fn list(&self) -> Vec<Product> {
        let mut products: Vec<_> = self.products.read().values().cloned().collect();
        products.sort_by(|a, b| a.barcode.cmp(&b.barcode));
        products
    }
}

impl Catalog for InMemoryCatalog {
    fn product(&self, barcode: &str) -> Option<Product> {
        self.products.read().get(barcode).cloned()
    }
}
