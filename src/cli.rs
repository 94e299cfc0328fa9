//! Command line front end.
//!
//! Every subcommand except `invoke` and `sync watch` maps onto one
//! `commands::dispatch` call, so the terminal and any other front end go
//! through the same handlers.

use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::commands::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "mero-hisab", version)]
#[command(
    about = "Mero Hisab - Nepali ledger, BS calendar and interest calculator",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the database and logs
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Print logs to the terminal (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bikram Sambat calendar tools
    Bs {
        #[command(subcommand)]
        action: BsAction,
    },

    /// Interest on a loan between two BS dates
    Interest {
        principal: f64,

        /// Rate in percent
        rate: f64,

        /// Start date (BS)
        #[arg(long)]
        from: String,

        /// End date (BS), today when omitted
        #[arg(long)]
        to: Option<String>,

        /// Treat the rate as rupees per hundred per month
        #[arg(long)]
        monthly: bool,

        /// Compound yearly, half-yearly, quarterly or monthly
        #[arg(long)]
        compound: Option<String>,
    },

    /// Sign in with a one-time code
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Customers and suppliers
    Customer {
        #[command(subcommand)]
        action: CustomerAction,
    },

    /// Ledger entries
    Txn {
        #[command(subcommand)]
        action: TxnAction,
    },

    /// Balance of one customer
    Balance { customer_id: String },

    /// Totals across all customers and suppliers
    Summary,

    /// Offline queue and cloud sync
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Preferences and credentials
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Call a command handler by name with a JSON payload
    Invoke {
        name: Option<String>,

        /// JSON payload; plain text is sent as a string
        payload: Option<String>,

        /// List command names
        #[arg(long)]
        list: bool,
    },

    /// Version and build info
    About,

    /// Database and queue health
    Health,
}

#[derive(Subcommand, Debug)]
pub enum BsAction {
    /// Today's BS date
    Today,
    /// Convert a BS date (YYYY-MM-DD) to AD
    ToAd { date: String },
    /// Convert an AD date (YYYY-MM-DD) to BS
    FromAd { date: String },
    /// Month grid for a BS year and month
    Month { year: u16, month: u8 },
    /// Years, months and days between two BS dates
    Diff { from: String, to: String },
    /// Shift a BS date by a number of days
    AddDays {
        date: String,
        #[arg(allow_negative_numbers = true)]
        days: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuthAction {
    /// Text a verification code to a mobile number
    RequestOtp { phone: String },
    /// Sign in with the code
    Verify { phone: String, code: String },
    /// Show the current session
    Status,
    /// Sign out
    Logout,
    /// Set the display name on the profile
    Name { name: String },
}

#[derive(Subcommand, Debug)]
pub enum CustomerAction {
    Add {
        name: String,
        #[arg(long)]
        phone: Option<String>,
        /// Record as a supplier instead of a customer
        #[arg(long)]
        supplier: bool,
    },
    List {
        /// customer or supplier
        #[arg(long = "type")]
        kind: Option<String>,
    },
    Show { id: String },
    Search { query: String },
    /// Look up by phone number
    Phone { phone: String },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long = "type")]
        kind: Option<String>,
    },
    /// Delete a customer and all of its entries
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum TxnAction {
    Add {
        customer_id: String,
        amount: f64,
        /// given or received
        kind: String,
        /// BS date, today when omitted
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    List {
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    Show { id: String },
    Update {
        id: String,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    Delete { id: String },
    /// Interest on a customer's outstanding balance
    Interest {
        customer_id: String,
        rate: f64,
        #[arg(long)]
        monthly: bool,
        #[arg(long)]
        compound: Option<String>,
        /// BS date to count up to, today when omitted
        #[arg(long)]
        as_of: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SyncAction {
    Status,
    /// Push the queue and pull remote changes
    Now,
    Pull,
    /// Check whether the remote store is reachable
    Ping,
    /// Show queued operations
    Queue {
        /// Include failed operations
        #[arg(long)]
        all: bool,
    },
    /// Drop queued operations
    Clear {
        /// Only drop failed operations
        #[arg(long)]
        failed: bool,
    },
    /// Re-queue failed operations
    Retry,
    /// Keep syncing in the background until interrupted
    Watch {
        /// Seconds between cycles
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    Show,
    /// Show or set the theme (light, dark, system)
    Theme { value: Option<String> },
    /// Show or set the language (en, ne)
    Language { value: Option<String> },
    /// Format an amount in the current language
    Format {
        #[arg(allow_negative_numbers = true)]
        amount: f64,
    },
    /// Show or store remote credentials
    Credentials {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        sms_token: Option<String>,
        #[arg(long)]
        id_token: Option<String>,
    },
    /// Remove credentials, preferences and the saved session
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

/// Build a JSON object from the `Some` fields.
fn object(fields: &[(&str, Option<Value>)]) -> Value {
    let mut map = Map::new();
    for (key, value) in fields {
        if let Some(value) = value {
            map.insert((*key).to_string(), value.clone());
        }
    }
    Value::Object(map)
}

fn opt_str(value: &Option<String>) -> Option<Value> {
    value.as_ref().map(|s| json!(s))
}

fn basis(monthly: bool) -> Option<Value> {
    monthly.then(|| json!("monthly"))
}

/// Handler name and payload for a subcommand. `None` for subcommands that
/// are not a single handler call.
pub fn invocation(command: &Command) -> Option<(&'static str, Value)> {
    let call = match command {
        Command::Bs { action } => match action {
            BsAction::Today => ("bs_today", Value::Null),
            BsAction::ToAd { date } => ("bs_to_ad", json!(date)),
            BsAction::FromAd { date } => ("bs_from_ad", json!(date)),
            BsAction::Month { year, month } => {
                ("bs_month", json!({ "year": year, "month": month }))
            }
            BsAction::Diff { from, to } => ("bs_diff", json!({ "from": from, "to": to })),
            BsAction::AddDays { date, days } => {
                ("bs_add_days", json!({ "date": date, "days": days }))
            }
        },
        Command::Interest {
            principal,
            rate,
            from,
            to,
            monthly,
            compound,
        } => (
            "interest_calculate",
            object(&[
                ("principal", Some(json!(principal))),
                ("rate", Some(json!(rate))),
                ("start", Some(json!(from))),
                ("end", opt_str(to)),
                ("rateBasis", basis(*monthly)),
                ("compounding", opt_str(compound)),
            ]),
        ),
        Command::Auth { action } => match action {
            AuthAction::RequestOtp { phone } => ("auth_request_otp", json!(phone)),
            AuthAction::Verify { phone, code } => {
                ("auth_verify_otp", json!({ "phone": phone, "code": code }))
            }
            AuthAction::Status => ("auth_session", Value::Null),
            AuthAction::Logout => ("auth_logout", Value::Null),
            AuthAction::Name { name } => ("auth_update_profile", json!(name)),
        },
        Command::Customer { action } => match action {
            CustomerAction::Add {
                name,
                phone,
                supplier,
            } => (
                "customer_create",
                json!({
                    "name": name,
                    "phone": phone.clone().unwrap_or_default(),
                    "customerType": if *supplier { "supplier" } else { "customer" },
                }),
            ),
            CustomerAction::List { kind } => {
                ("customer_list", object(&[("type", opt_str(kind))]))
            }
            CustomerAction::Show { id } => ("customer_get", json!(id)),
            CustomerAction::Search { query } => ("customer_search", json!(query)),
            CustomerAction::Phone { phone } => ("customer_find_by_phone", json!(phone)),
            CustomerAction::Update {
                id,
                name,
                phone,
                kind,
            } => (
                "customer_update",
                object(&[
                    ("id", Some(json!(id))),
                    ("name", opt_str(name)),
                    ("phone", opt_str(phone)),
                    ("customerType", opt_str(kind)),
                ]),
            ),
            CustomerAction::Delete { id } => ("customer_delete", json!(id)),
        },
        Command::Txn { action } => match action {
            TxnAction::Add {
                customer_id,
                amount,
                kind,
                date,
                note,
            } => (
                "transaction_add",
                object(&[
                    ("customerId", Some(json!(customer_id))),
                    ("amount", Some(json!(amount))),
                    ("transactionType", Some(json!(kind))),
                    ("transactionDate", opt_str(date)),
                    ("description", opt_str(note)),
                ]),
            ),
            TxnAction::List { customer, from, to } => (
                "transaction_list",
                object(&[
                    ("customerId", opt_str(customer)),
                    ("from", opt_str(from)),
                    ("to", opt_str(to)),
                ]),
            ),
            TxnAction::Show { id } => ("transaction_get", json!(id)),
            TxnAction::Update {
                id,
                amount,
                kind,
                date,
                note,
            } => (
                "transaction_update",
                object(&[
                    ("id", Some(json!(id))),
                    ("amount", amount.map(|a| json!(a))),
                    ("transactionType", opt_str(kind)),
                    ("transactionDate", opt_str(date)),
                    ("description", opt_str(note)),
                ]),
            ),
            TxnAction::Delete { id } => ("transaction_delete", json!(id)),
            TxnAction::Interest {
                customer_id,
                rate,
                monthly,
                compound,
                as_of,
            } => (
                "interest_for_customer",
                object(&[
                    ("customerId", Some(json!(customer_id))),
                    ("rate", Some(json!(rate))),
                    ("rateBasis", basis(*monthly)),
                    ("compounding", opt_str(compound)),
                    ("asOf", opt_str(as_of)),
                ]),
            ),
        },
        Command::Balance { customer_id } => ("balance_get", json!(customer_id)),
        Command::Summary => ("ledger_summary", Value::Null),
        Command::Sync { action } => match action {
            SyncAction::Status => ("sync_status", Value::Null),
            SyncAction::Now => ("sync_force", Value::Null),
            SyncAction::Pull => ("sync_pull", Value::Null),
            SyncAction::Ping => ("sync_network_status", Value::Null),
            SyncAction::Queue { all } => ("sync_queue_list", json!({ "includeFailed": all })),
            SyncAction::Clear { failed: true } => ("sync_clear_failed", Value::Null),
            SyncAction::Clear { failed: false } => ("sync_queue_clear", Value::Null),
            SyncAction::Retry => ("sync_retry_failed", Value::Null),
            SyncAction::Watch { .. } => return None,
        },
        Command::Settings { action } => match action {
            SettingsAction::Show => ("settings_get_all", Value::Null),
            SettingsAction::Theme { value: None } => ("settings_get_theme", Value::Null),
            SettingsAction::Theme { value: Some(v) } => ("settings_set_theme", json!(v)),
            SettingsAction::Language { value: None } => ("settings_get_language", Value::Null),
            SettingsAction::Language { value: Some(v) } => ("settings_set_language", json!(v)),
            SettingsAction::Format { amount } => ("settings_format_amount", json!(amount)),
            SettingsAction::Credentials {
                project,
                api_key,
                sms_token,
                id_token,
            } => {
                let nothing_given = project.is_none()
                    && api_key.is_none()
                    && sms_token.is_none()
                    && id_token.is_none();
                if nothing_given {
                    ("settings_get_credentials", Value::Null)
                } else {
                    (
                        "settings_update_credentials",
                        object(&[
                            ("firebaseProjectId", opt_str(project)),
                            ("firebaseApiKey", opt_str(api_key)),
                            ("smsAuthToken", opt_str(sms_token)),
                            ("idToken", opt_str(id_token)),
                        ]),
                    )
                }
            }
            SettingsAction::Reset { .. } => ("settings_factory_reset", Value::Null),
        },
        Command::Invoke { .. } => return None,
        Command::About => ("diagnostics_about", Value::Null),
        Command::Health => ("diagnostics_health", Value::Null),
    };
    Some(call)
}

fn invoke_payload(raw: Option<&str>) -> Option<Value> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

/// Run one parsed command against `state`.
pub async fn execute(command: &Command, state: &AppState) -> anyhow::Result<Value> {
    match command {
        Command::Invoke { list: true, .. } => return Ok(json!(commands::COMMANDS)),
        Command::Invoke { name: None, .. } => {
            anyhow::bail!("Command name required (see `invoke --list`)")
        }
        Command::Invoke {
            name: Some(name),
            payload,
            ..
        } => {
            return commands::dispatch(name, invoke_payload(payload.as_deref()), state)
                .await
                .map_err(anyhow::Error::msg)
        }
        Command::Settings {
            action: SettingsAction::Reset { yes: false },
        } => anyhow::bail!("Factory reset removes credentials and preferences; pass --yes"),
        Command::Sync {
            action: SyncAction::Watch { interval },
        } => return watch(state, *interval).await,
        _ => {}
    }

    let (name, payload) = invocation(command)
        .ok_or_else(|| anyhow::anyhow!("Nothing to run for this command"))?;
    let payload = (!payload.is_null()).then_some(payload);
    commands::dispatch(name, payload, state)
        .await
        .map_err(anyhow::Error::msg)
}

async fn watch(state: &AppState, interval: Option<u64>) -> anyhow::Result<Value> {
    let remote = state.remote().map_err(anyhow::Error::msg)?;
    let interval = Duration::from_secs(interval.unwrap_or(state.config.sync_interval_secs).max(1));
    let user_id = crate::auth::current_session(&state.auth).map(|s| s.user_id);

    let handle = crate::sync::start_sync_loop(
        state.db.clone(),
        remote,
        state.sync.clone(),
        commands::sync::retry_policy(state),
        interval,
        user_id,
    );
    tokio::signal::ctrl_c().await?;
    info!("interrupt received; stopping sync loop");
    state.sync.stop();
    handle.await?;

    crate::sync::get_sync_status(&state.db, &state.sync).map_err(anyhow::Error::from)
}
