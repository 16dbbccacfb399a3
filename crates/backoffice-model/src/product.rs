//! Catalog products
//!
//! The product form edits every value as text; numbers accept a comma as
//! decimal separator and are parsed when the payload is built.

use crate::entity::{Draft, Entity};
use crate::error::ModelError;
use crate::id::RecordId;
use crate::validation::{ValidationError, ValidationErrors};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Product record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Server id
    pub id: RecordId,
    /// Listed in the storefront
    #[serde(default)]
    pub active: bool,
    /// Stock keeping unit
    pub sku: String,
    /// Display name
    pub name: String,
    /// Marketing description
    #[serde(default)]
    pub description: String,
    /// Technical sheet
    #[serde(default)]
    pub technical: String,
    /// Brand
    #[serde(default)]
    pub brand: String,
    /// Units in stock
    #[serde(default)]
    pub stock: u32,
    /// Sale price
    pub price: f64,
    /// Promotional discount, percent
    #[serde(default)]
    pub promotion: f64,
    /// Profit margin, percent
    #[serde(default)]
    pub profit: f64,
    /// Unit cost
    #[serde(default)]
    pub cost: f64,
    /// Average rating (server owned)
    #[serde(default)]
    pub rating: f64,
    /// Number of ratings (server owned)
    #[serde(default)]
    pub ratings: u32,
    /// Units sold (server owned)
    #[serde(default)]
    pub sold: u32,
    /// Supplier
    pub supplier_id: RecordId,
}

impl Entity for Product {
    const NAMESPACE: &'static str = "product";
    type Draft = ProductDraft;

    fn id(&self) -> RecordId {
        self.id
    }
}

/// Product form fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductField {
    /// SKU
    Sku,
    /// Name
    Name,
    /// Description
    Description,
    /// Technical sheet
    Technical,
    /// Brand
    Brand,
    /// Stock units
    Stock,
    /// Price
    Price,
    /// Promotion percent
    Promotion,
    /// Profit percent
    Profit,
    /// Cost
    Cost,
    /// Supplier id
    SupplierId,
}

impl fmt::Display for ProductField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sku => "sku",
            Self::Name => "name",
            Self::Description => "description",
            Self::Technical => "technical",
            Self::Brand => "brand",
            Self::Stock => "stock",
            Self::Price => "price",
            Self::Promotion => "promotion",
            Self::Profit => "profit",
            Self::Cost => "cost",
            Self::SupplierId => "supplier_id",
        };
        f.write_str(name)
    }
}

/// Product create/edit form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductDraft {
    /// Set when editing an existing product
    pub id: Option<RecordId>,
    /// Listed in the storefront; new products start unlisted
    pub active: Option<bool>,
    /// SKU
    pub sku: String,
    /// Name
    pub name: String,
    /// Description
    pub description: String,
    /// Technical sheet
    pub technical: String,
    /// Brand
    pub brand: String,
    /// Stock, as typed
    pub stock: String,
    /// Price, as typed
    pub price: String,
    /// Promotion, as typed
    pub promotion: String,
    /// Profit, as typed
    pub profit: String,
    /// Cost, as typed
    pub cost: String,
    /// Supplier id, as typed
    pub supplier_id: String,
}

#[derive(Serialize)]
struct ProductPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active: Option<bool>,
    sku: &'a str,
    name: &'a str,
    description: &'a str,
    technical: &'a str,
    brand: &'a str,
    stock: u32,
    price: f64,
    promotion: f64,
    profit: f64,
    cost: f64,
    supplier_id: RecordId,
}

fn parse_decimal(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_count(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0);
    }
    trimmed.parse().ok()
}

fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

impl ProductDraft {
    fn slot(&mut self, field: ProductField) -> &mut String {
        match field {
            ProductField::Sku => &mut self.sku,
            ProductField::Name => &mut self.name,
            ProductField::Description => &mut self.description,
            ProductField::Technical => &mut self.technical,
            ProductField::Brand => &mut self.brand,
            ProductField::Stock => &mut self.stock,
            ProductField::Price => &mut self.price,
            ProductField::Promotion => &mut self.promotion,
            ProductField::Profit => &mut self.profit,
            ProductField::Cost => &mut self.cost,
            ProductField::SupplierId => &mut self.supplier_id,
        }
    }
}

impl Draft for ProductDraft {
    type Entity = Product;
    type Field = ProductField;

    fn from_record(record: &Product) -> Self {
        Self {
            id: Some(record.id),
            active: Some(record.active),
            sku: record.sku.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            technical: record.technical.clone(),
            brand: record.brand.clone(),
            stock: record.stock.to_string(),
            price: format_decimal(record.price),
            promotion: format_decimal(record.promotion),
            profit: format_decimal(record.profit),
            cost: format_decimal(record.cost),
            supplier_id: record.supplier_id.to_string(),
        }
    }

    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn field(&self, field: ProductField) -> &str {
        match field {
            ProductField::Sku => &self.sku,
            ProductField::Name => &self.name,
            ProductField::Description => &self.description,
            ProductField::Technical => &self.technical,
            ProductField::Brand => &self.brand,
            ProductField::Stock => &self.stock,
            ProductField::Price => &self.price,
            ProductField::Promotion => &self.promotion,
            ProductField::Profit => &self.profit,
            ProductField::Cost => &self.cost,
            ProductField::SupplierId => &self.supplier_id,
        }
    }

    fn set_field(&mut self, field: ProductField, value: String) {
        *self.slot(field) = value;
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        errors.require("sku", &self.sku);
        errors.require("name", &self.name);

        if errors.require("price", &self.price) && parse_decimal(&self.price).is_none() {
            errors.push(ValidationError::malformed("price", "expected a non-negative amount"));
        }
        for (field, value) in [
            (ProductField::Promotion, &self.promotion),
            (ProductField::Profit, &self.profit),
            (ProductField::Cost, &self.cost),
        ] {
            if parse_decimal(value).is_none() {
                errors.push(ValidationError::malformed(
                    field.to_string(),
                    "expected a non-negative amount",
                ));
            }
        }
        if parse_count(&self.stock).is_none() {
            errors.push(ValidationError::malformed("stock", "expected a whole number"));
        }
        if errors.require("supplier_id", &self.supplier_id)
            && self.supplier_id.parse::<RecordId>().is_err()
        {
            errors.push(ValidationError::malformed("supplier_id", "expected a supplier id"));
        }

        errors.into_result()
    }

    fn to_wire(&self) -> Result<serde_json::Value, ModelError> {
        self.validate()?;

        // validate() guarantees every parse below succeeds
        let payload = ProductPayload {
            id: self.id,
            active: self.active,
            sku: self.sku.trim(),
            name: self.name.trim(),
            description: &self.description,
            technical: &self.technical,
            brand: self.brand.trim(),
            stock: parse_count(&self.stock).unwrap_or_default(),
            price: parse_decimal(&self.price).unwrap_or_default(),
            promotion: parse_decimal(&self.promotion).unwrap_or_default(),
            profit: parse_decimal(&self.profit).unwrap_or_default(),
            cost: parse_decimal(&self.cost).unwrap_or_default(),
            supplier_id: self.supplier_id.parse().unwrap_or(RecordId(0)),
        };

        Ok(serde_json::to_value(payload)?)
    }
}
