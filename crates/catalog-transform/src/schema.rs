//! Target schemas for each supported marketplace.
//!
//! A [`TargetSchema`] is static configuration: the ordered output columns,
//! the subset the marketplace rejects listings without, and the guidance
//! text handed to the model. Built-in schemas cover the six marketplaces the
//! service ships with; custom schemas can be loaded from JSON at startup.

use crate::error::{Result, ResultExt, TransformError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Output column layout for one marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchema {
    /// Short identifier, used in run ids and output file names.
    pub name: String,
    /// Human-readable marketplace name used in prompts.
    pub display_name: String,
    /// Output columns in canonical order.
    pub columns: Vec<String>,
    /// Columns that must be populated; a subset of `columns`.
    #[serde(default)]
    pub required: Vec<String>,
    /// Marketplace-specific mapping guidance for the model.
    #[serde(default)]
    pub guidelines: String,
}

impl TargetSchema {
    /// Load a schema from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("Reading schema file {}", path.display()))?;
        let schema: TargetSchema = serde_json::from_str(&content)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Check that the schema is usable: non-empty, unique columns, and a
    /// required set drawn from the columns.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(TransformError::InvalidConfig(format!(
                "schema '{}' has no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.as_str()) {
                return Err(TransformError::InvalidConfig(format!(
                    "schema '{}' lists column '{}' twice",
                    self.name, column
                )));
            }
        }

        if let Some(unknown) = self.required.iter().find(|r| !seen.contains(r.as_str())) {
            return Err(TransformError::InvalidConfig(format!(
                "schema '{}' marks unknown column '{}' as required",
                self.name, unknown
            )));
        }

        Ok(())
    }

    pub fn is_required(&self, column: &str) -> bool {
        self.required.iter().any(|r| r == column)
    }

    /// Columns used to score row completeness: the required subset, or every
    /// column when the schema marks none.
    pub fn scoring_columns(&self) -> &[String] {
        if self.required.is_empty() {
            &self.columns
        } else {
            &self.required
        }
    }
}

/// Marketplaces with a built-in schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    Amazon,
    Walmart,
    Reebelo,
    Meta,
    TikTok,
    Catch,
}

impl Marketplace {
    pub const ALL: [Marketplace; 6] = [
        Marketplace::Amazon,
        Marketplace::Walmart,
        Marketplace::Reebelo,
        Marketplace::Meta,
        Marketplace::TikTok,
        Marketplace::Catch,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Walmart => "walmart",
            Self::Reebelo => "reebelo",
            Self::Meta => "meta",
            Self::TikTok => "tiktok",
            Self::Catch => "catch",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Amazon => "Amazon Inventory Loader",
            Self::Walmart => "Walmart Marketplace",
            Self::Reebelo => "Reebelo Marketplace",
            Self::Meta => "Meta (Facebook) product catalog",
            Self::TikTok => "TikTok Shop catalog",
            Self::Catch => "Catch Marketplace",
        }
    }

    /// Build the static schema for this marketplace.
    pub fn target_schema(&self) -> TargetSchema {
        let (columns, required, guidelines): (&[&str], &[&str], &str) = match self {
            Self::Amazon => (AMAZON_COLUMNS, AMAZON_REQUIRED, AMAZON_GUIDELINES),
            Self::Walmart => (WALMART_COLUMNS, WALMART_REQUIRED, WALMART_GUIDELINES),
            Self::Reebelo => (REEBELO_COLUMNS, REEBELO_REQUIRED, REEBELO_GUIDELINES),
            Self::Meta => (META_COLUMNS, META_REQUIRED, META_GUIDELINES),
            Self::TikTok => (TIKTOK_COLUMNS, TIKTOK_REQUIRED, TIKTOK_GUIDELINES),
            Self::Catch => (CATCH_COLUMNS, CATCH_REQUIRED, CATCH_GUIDELINES),
        };

        TargetSchema {
            name: self.id().to_string(),
            display_name: self.display_name().to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            required: required.iter().map(|c| c.to_string()).collect(),
            guidelines: guidelines.trim().to_string(),
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Marketplace {
    type Err = TransformError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Marketplace::ALL
            .into_iter()
            .find(|m| m.id() == wanted)
            .ok_or_else(|| TransformError::UnknownMarketplace(s.to_string()))
    }
}

// ============================================================================
// Built-in catalogs
// ============================================================================

const AMAZON_COLUMNS: &[&str] = &[
    "item_sku", "external_product_id", "external_product_id_type", "item_name",
    "brand_name", "manufacturer", "feed_product_type", "update_delete",
    "standard_price", "quantity", "product_tax_code", "product_site_launch_date",
    "restock_date", "fulfillment_latency", "item_condition", "main_image_url",
    "swatch_image_url", "other_image_url1", "other_image_url2", "other_image_url3",
    "item_type", "model", "part_number", "bullet_point1", "bullet_point2",
    "bullet_point3", "bullet_point4", "bullet_point5", "generic_keywords",
    "product_description",
];

const AMAZON_REQUIRED: &[&str] = &[
    "item_sku", "item_name", "brand_name", "feed_product_type", "update_delete",
    "standard_price", "quantity",
];

const AMAZON_GUIDELINES: &str = r#"
- item_sku: copy the source SKU exactly, never modify it
- external_product_id / external_product_id_type: only when a real UPC/EAN/GTIN exists in the source
- item_name: "[Brand] [Model] [Color] [Capacity]" without condition suffixes
- manufacturer: same as brand_name unless the source says otherwise
- feed_product_type: "wireless_phone" for phones, "wireless_accessories" for accessories, otherwise "consumer_electronics"
- update_delete: always "Update"
- standard_price: decimal number without currency symbols
- quantity: source quantity, or 0 when unknown
- item_condition: "Premium" -> "Used - Like New", "Excellent" -> "Used - Very Good", "Good" -> "Used - Good", none -> "New"
- bullet_point1..5: short feature bullets drawn from the source data
"#;

const WALMART_COLUMNS: &[&str] = &[
    "sku", "specProductType", "productIdType", "productId", "productName",
    "brand", "price", "ShippingWeight", "shortDescription", "keyFeatures",
    "mainImageUrl", "countPerPack", "multipackQuantity", "cellPhoneType",
    "color", "condition", "screenSize", "screenSizeUnit", "wirelessTechnologies",
    "additionalImageUrl", "manufacturerName", "manufacturerPartNumber",
    "mobileOperatingSystem", "modelName", "modelNumber", "ramMemory",
    "ramMemoryUnit", "simCardSize", "simCardType",
];

const WALMART_REQUIRED: &[&str] = &[
    "sku", "specProductType", "productIdType", "productId", "productName",
    "brand", "price", "ShippingWeight", "shortDescription", "mainImageUrl",
];

const WALMART_GUIDELINES: &str = r#"
- sku: copy the source SKU exactly
- productIdType: one of UPC, GTIN, EAN, ISBN; productId holds the matching value
- price: decimal number without currency symbols
- ShippingWeight: pounds, numeric only
- shortDescription: one or two sentences; keyFeatures: semicolon separated
- condition: New, Refurbished or Pre-Owned
"#;

const REEBELO_COLUMNS: &[&str] = &[
    "Category", "Reebelo ID", "Your SKU", "Reebelo PSKU (if applicable)",
    "Product Reference Type (UPC, GTIN, ASCIN)", "Product Reference Value",
    "Product Title", "Condition", "Brand", "Price", "Min Price", "Quantity",
    "Variant A (required)", "Variant B (required)", "Variant C (optional)",
    "Title: Specification 1", "Description: Specification 1",
    "Title: Specification 2", "Description: Specification 2",
    "Title: Specification 3", "Description: Specification 3",
    "Title: Specification 4", "Description: Specification 4",
    "Image URL 1", "Image URL 2",
];

const REEBELO_REQUIRED: &[&str] = &[
    "Category", "Your SKU", "Product Title", "Condition", "Brand", "Price",
    "Quantity", "Variant A (required)", "Variant B (required)",
];

const REEBELO_GUIDELINES: &str = r#"
- Your SKU: copy the source SKU exactly
- Variant A is usually storage capacity, Variant B colour, Variant C network or carrier
- Condition: map grading words (Premium, Excellent, Good) to the Reebelo grade names
- Min Price: leave equal to Price when the source has no floor price
"#;

const META_COLUMNS: &[&str] = &[
    "id", "title", "description", "availability", "condition", "price", "link",
    "image_link", "brand", "google_product_category", "product_type",
    "sale_price", "sale_price_effective_date", "gtin", "mpn", "item_group_id",
    "gender", "age_group", "color", "size", "shipping", "custom_label_0",
];

const META_REQUIRED: &[&str] = &[
    "id", "title", "description", "availability", "condition", "price", "link",
    "image_link", "brand",
];

const META_GUIDELINES: &str = r#"
- id: a unique identifier per product, prefer the source SKU
- availability: "in stock", "out of stock", "preorder" or "available for order"
- condition: "new", "refurbished" or "used"
- price: amount followed by ISO currency code, e.g. "9.99 USD"
- google_product_category: a Google product taxonomy path
"#;

const TIKTOK_COLUMNS: &[&str] = &[
    "sku_id", "title", "description", "availability", "condition", "price",
    "link", "image_link", "brand", "google_product_category", "video_link",
    "additional_image_link", "age_group", "color", "gender", "item_group_id",
    "material", "pattern", "product_type", "sale_price",
    "sale_price_effective_date", "shipping", "shipping_weight", "gtin", "mpn",
    "size", "custom_label_0",
];

const TIKTOK_REQUIRED: &[&str] = &[
    "sku_id", "title", "description", "availability", "condition", "price",
    "link", "image_link", "brand",
];

const TIKTOK_GUIDELINES: &str = r#"
- sku_id: copy the source SKU exactly
- availability: "in stock" or "out of stock"
- condition: "new", "refurbished" or "used"
- price: amount followed by ISO currency code, e.g. "19.99 USD"
"#;

const CATCH_COLUMNS: &[&str] = &[
    "category", "internal-sku", "title", "product-reference-value",
    "product-reference-type", "product-description", "brand", "condition",
    "product-quantity-multiplier", "colour", "keywords", "image-1", "image-2",
    "image-3", "weight", "weight-unit", "model-number", "gtin", "mpn", "uid",
    "variant-group-code", "model", "contains-button-cell-batteries",
];

const CATCH_REQUIRED: &[&str] = &[
    "category", "internal-sku", "title", "product-description", "brand",
    "image-1", "contains-button-cell-batteries", "uid",
];

const CATCH_GUIDELINES: &str = r#"
- internal-sku: copy the source SKU exactly
- product-reference-type: EAN, UPC or ISBN matching product-reference-value
- image-1: main product image URL
- contains-button-cell-batteries: "Yes" or "No"
- uid: unique per row, reuse the SKU when nothing better exists
"#;
