//! Typed Business Central API v2.0 entities.
//!
//! Only the commonly used fields are mapped; everything the API may omit is
//! optional. Unknown fields are ignored.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// An entity set reachable through the standard API.
pub trait Record: DeserializeOwned + Send {
    /// Entity-set segment, e.g. `"customers"`.
    const ENTITY_SET: &'static str;
    /// Whether the set lives under `companies({id})/`.
    const COMPANY_SCOPED: bool = true;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    #[serde(default)]
    pub system_version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub business_profile_id: Option<String>,
}

impl Record for Company {
    const ENTITY_SET: &'static str = "companies";
    const COMPANY_SCOPED: bool = false;
}

/// An environment of the signed-in tenant, as listed by the environments
/// endpoint next to the API root. Not an entity set of API v2.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BcEnvironment {
    pub name: String,
    /// `"Production"` or `"Sandbox"`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub application_family: Option<String>,
    #[serde(default)]
    pub aad_tenant_id: Option<String>,
    #[serde(default)]
    pub web_client_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// `"Company"` or `"Person"`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub salesperson_code: Option<String>,
    #[serde(default)]
    pub balance_due: Option<f64>,
    #[serde(default)]
    pub credit_limit: Option<f64>,
    #[serde(default)]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub payment_terms_id: Option<String>,
    #[serde(default)]
    pub blocked: Option<String>,
    #[serde(default)]
    pub last_modified_date_time: Option<String>,
}

impl Record for Customer {
    const ENTITY_SET: &'static str = "customers";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub payment_terms_id: Option<String>,
    #[serde(default)]
    pub balance: Option<f64>,
}

impl Record for Vendor {
    const ENTITY_SET: &'static str = "vendors";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub item_category_code: Option<String>,
    #[serde(default)]
    pub blocked: Option<bool>,
    #[serde(default)]
    pub gtin: Option<String>,
    #[serde(default)]
    pub inventory: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub unit_cost: Option<f64>,
    #[serde(default)]
    pub base_unit_of_measure_code: Option<String>,
    #[serde(default)]
    pub last_modified_date_time: Option<String>,
}

impl Record for Item {
    const ENTITY_SET: &'static str = "items";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrder {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub order_date: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_number: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub total_amount_excluding_tax: Option<f64>,
    #[serde(default)]
    pub total_amount_including_tax: Option<f64>,
}

impl Record for SalesOrder {
    const ENTITY_SET: &'static str = "salesOrders";
}
