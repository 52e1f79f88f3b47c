//! Shared data model: worker and group identifiers, product and stock payloads.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of one monitor or task, supplied by the management layer.
    WorkerId
);

string_id!(
    /// Identifier of a task group binding monitors to tasks.
    GroupId
);

/// Product details a monitor reports once a tracked identifier is available.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    /// Display name
    pub name: String,
    /// Product image URL
    pub image: Option<String>,
    /// Listed price, when the retailer exposes one
    pub price: Option<f64>,
    /// Retailer-specific fields (variant ids, offer ids, tokens)
    #[serde(default)]
    pub site_fields: BTreeMap<String, String>,
}

impl ProductInfo {
    /// Creates a product with a name and no other details.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the listed price.
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Adds a retailer-specific field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.site_fields.insert(key.into(), value.into());
        self
    }

    /// Whether the listed price is within `ceiling`.
    ///
    /// A product without a listed price always passes; there is nothing to filter on.
    pub fn within_ceiling(&self, ceiling: Option<f64>) -> bool {
        match (self.price, ceiling) {
            (Some(price), Some(ceiling)) => price <= ceiling,
            _ => true,
        }
    }
}

/// One in-stock episode for a tracked identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockInfo {
    /// Identifier (SKU, variant id, URL) that came into stock
    pub identifier: String,
    /// What the monitor found
    pub product: ProductInfo,
    /// When the monitor found it
    pub discovered_at: DateTime<Utc>,
}

impl StockInfo {
    /// Stamps a discovery with the current time.
    pub fn discovered(identifier: impl Into<String>, product: ProductInfo) -> Self {
        Self {
            identifier: identifier.into(),
            product,
            discovered_at: Utc::now(),
        }
    }
}
