use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::calendar::BsDate;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerType {
    Customer,
    Supplier,
}

impl CustomerType {
    pub fn as_str(self) -> &'static str {
        match self {
            CustomerType::Customer => "customer",
            CustomerType::Supplier => "supplier",
        }
    }
}

impl FromStr for CustomerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(CustomerType::Customer),
            "supplier" => Ok(CustomerType::Supplier),
            other => Err(Error::validation(format!(
                "Invalid customer type '{other}': expected customer or supplier"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub customer_type: CustomerType,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(alias = "customer_type", alias = "type")]
    pub customer_type: CustomerType,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "customer_type", alias = "type")]
    pub customer_type: Option<CustomerType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Money handed to the customer (they owe us).
    Given,
    /// Money taken from the customer (we owe them, or they paid back).
    Received,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Given => "given",
            TransactionType::Received => "received",
        }
    }

    /// Effect of an entry of this type on the customer balance.
    pub fn signed(self, amount: f64) -> f64 {
        match self {
            TransactionType::Given => amount,
            TransactionType::Received => -amount,
        }
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "given" | "give" | "diye" => Ok(TransactionType::Given),
            "received" | "receive" | "liye" => Ok(TransactionType::Received),
            other => Err(Error::validation(format!(
                "Invalid transaction type '{other}': expected given or received"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub id: String,
    pub user_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub amount: f64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub transaction_date: BsDate,
    pub balance_after: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    #[serde(alias = "customer_id")]
    pub customer_id: String,
    pub amount: f64,
    #[serde(alias = "transaction_type", alias = "type")]
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "transaction_date", alias = "date")]
    pub transaction_date: BsDate,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryUpdate {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default, alias = "transaction_type", alias = "type")]
    pub transaction_type: Option<TransactionType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "transaction_date", alias = "date")]
    pub transaction_date: Option<BsDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub phone: String,
    pub name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Remote document kinds; each maps to one Firestore collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Customer,
    TransactionEntry,
    Profile,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::TransactionEntry => "transaction_entry",
            EntityKind::Profile => "profile",
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Customer => "customers",
            EntityKind::TransactionEntry => "transaction_entries",
            EntityKind::Profile => "profiles",
        }
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "customer" | "customers" => Ok(EntityKind::Customer),
            "transaction_entry" | "transaction_entries" => Ok(EntityKind::TransactionEntry),
            "profile" | "profiles" => Ok(EntityKind::Profile),
            other => Err(Error::validation(format!("Unknown entity '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
        }
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(OperationKind::Create),
            "UPDATE" => Ok(OperationKind::Update),
            "DELETE" => Ok(OperationKind::Delete),
            other => Err(Error::validation(format!("Unknown operation '{other}'"))),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local mutation waiting to be pushed to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub entity: EntityKind,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub timestamp: String,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Number of later edits merged into this row.
    pub revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    System,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }
}

impl FromStr for Theme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" | "auto" => Ok(Theme::System),
            other => Err(Error::validation(format!("Unknown theme '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ne,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ne => "ne",
        }
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "ne" | "np" | "nepali" => Ok(Language::Ne),
            other => Err(Error::validation(format!("Unknown language '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerBalance {
    pub customer_id: String,
    pub customer_name: String,
    pub customer_type: CustomerType,
    pub total_given: f64,
    pub total_received: f64,
    /// Positive: the customer owes us. Negative: we owe the customer.
    pub balance: f64,
    pub entry_count: i64,
    pub last_transaction_date: Option<BsDate>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub total_given: f64,
    pub total_received: f64,
    pub to_receive: f64,
    pub to_give: f64,
    pub customer_to_receive: f64,
    pub customer_to_give: f64,
    pub supplier_to_receive: f64,
    pub supplier_to_give: f64,
    pub customer_count: usize,
    pub balances: Vec<CustomerBalance>,
}
