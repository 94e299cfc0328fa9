//! Theme and language preferences, plus locale-aware amount formatting.

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::calendar::to_nepali_digits;
use crate::db;
use crate::error::Result;
use crate::models::{Language, Theme};

const CATEGORY: &str = "preferences";
const KEY_THEME: &str = "theme";
const KEY_LANGUAGE: &str = "language";

pub fn get_theme(conn: &Connection) -> Theme {
    db::get_setting(conn, CATEGORY, KEY_THEME)
        .and_then(|v| v.parse().ok())
        .unwrap_or(Theme::System)
}

pub fn set_theme(conn: &Connection, theme: Theme) -> Result<()> {
    db::set_setting(conn, CATEGORY, KEY_THEME, theme.as_str())
}

pub fn get_language(conn: &Connection) -> Language {
    db::get_setting(conn, CATEGORY, KEY_LANGUAGE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(Language::En)
}

pub fn set_language(conn: &Connection, language: Language) -> Result<()> {
    db::set_setting(conn, CATEGORY, KEY_LANGUAGE, language.as_str())
}

pub fn snapshot(conn: &Connection) -> Value {
    json!({
        "theme": get_theme(conn).as_str(),
        "language": get_language(conn).as_str(),
    })
}

/// Group digits the South Asian way: `1234567` -> `12,34,567`.
fn group_digits(integer: &str) -> String {
    if integer.len() <= 3 {
        return integer.to_string();
    }
    let (head, tail) = integer.split_at(integer.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();
    format!("{},{tail}", groups.join(","))
}

/// `Rs. 1,23,456.50`, or `रु. १,२३,४५६.५०` for Nepali.
pub fn format_amount(amount: f64, language: Language) -> String {
    let rounded = (amount.abs() * 100.0).round() as u64;
    let integer = (rounded / 100).to_string();
    let paisa = rounded % 100;
    let sign = if amount < 0.0 && rounded > 0 { "-" } else { "" };
    let body = format!("{sign}{}.{paisa:02}", group_digits(&integer));
    match language {
        Language::En => format!("Rs. {body}"),
        Language::Ne => format!("रु. {}", to_nepali_digits(&body)),
    }
}
