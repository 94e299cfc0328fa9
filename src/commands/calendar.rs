use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_payload, payload_object, to_json};
use crate::calendar::{self, BsDate};
use crate::interest::{self, Frequency, InterestMethod, InterestRequest, RateBasis};

#[derive(Debug, Deserialize)]
struct DatePayload {
    #[serde(alias = "bs", alias = "ad")]
    date: String,
}

#[derive(Debug, Deserialize)]
struct MonthPayload {
    year: u16,
    month: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangePayload {
    #[serde(alias = "from", alias = "start_date", alias = "startDate")]
    start: BsDate,
    #[serde(alias = "to", alias = "end_date", alias = "endDate")]
    end: BsDate,
}

#[derive(Debug, Deserialize)]
struct AddDaysPayload {
    date: BsDate,
    days: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterestPayload {
    principal: f64,
    rate: f64,
    #[serde(default, alias = "rate_basis", alias = "basis")]
    rate_basis: Option<String>,
    #[serde(alias = "from", alias = "start_date", alias = "startDate")]
    start: BsDate,
    #[serde(default, alias = "to", alias = "end_date", alias = "endDate")]
    end: Option<BsDate>,
    #[serde(default, alias = "frequency", alias = "method")]
    compounding: Option<String>,
}

/// `"monthly"`-style rate basis; defaults to per annum.
pub(super) fn parse_rate_basis(raw: Option<&str>) -> Result<RateBasis, String> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("annual") | Some("yearly") | Some("per_annum") | Some("year") => {
            Ok(RateBasis::PerAnnum)
        }
        Some("monthly") | Some("per_month") | Some("month") => Ok(RateBasis::PerMonth),
        Some(other) => Err(format!("Unknown rate basis '{other}'")),
    }
}

/// Missing, `"simple"` or `"none"` mean simple interest; anything else
/// names the compounding frequency.
pub(super) fn parse_method(raw: Option<&str>) -> Result<InterestMethod, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(InterestMethod::Simple),
        Some(s) if s.eq_ignore_ascii_case("simple") || s.eq_ignore_ascii_case("none") => {
            Ok(InterestMethod::Simple)
        }
        Some(s) => Frequency::parse(s)
            .map(InterestMethod::Compound)
            .map_err(String::from),
    }
}

fn date_json(date: &BsDate) -> Value {
    json!({
        "bs": date.to_string(),
        "bsNepali": date.to_nepali_string(),
        "ad": date.to_ad().format("%Y-%m-%d").to_string(),
        "weekday": date.weekday().to_string(),
        "long": date.to_long_string(),
        "longNepali": date.to_long_string_np(),
    })
}

pub fn bs_today() -> Result<Value, String> {
    let today = BsDate::today().map_err(String::from)?;
    Ok(date_json(&today))
}

pub fn bs_from_ad(arg0: Option<Value>) -> Result<Value, String> {
    let payload: DatePayload = parse_payload(payload_object(arg0, "date"), "date")?;
    let ad = NaiveDate::parse_from_str(payload.date.trim(), "%Y-%m-%d")
        .map_err(|e| format!("Invalid AD date '{}': {e}", payload.date))?;
    let bs = BsDate::from_ad(ad).map_err(String::from)?;
    Ok(date_json(&bs))
}

pub fn bs_to_ad(arg0: Option<Value>) -> Result<Value, String> {
    let payload: DatePayload = parse_payload(payload_object(arg0, "date"), "date")?;
    let bs: BsDate = payload.date.parse().map_err(String::from)?;
    Ok(date_json(&bs))
}

pub fn bs_month(arg0: Option<Value>) -> Result<Value, String> {
    let payload: MonthPayload = parse_payload(payload_object(arg0, "year"), "month")?;
    let grid = calendar::month_grid(payload.year, payload.month).map_err(String::from)?;
    to_json(&grid)
}

pub fn bs_diff(arg0: Option<Value>) -> Result<Value, String> {
    let payload: RangePayload = parse_payload(payload_object(arg0, "start"), "date range")?;
    let duration = payload.start.diff(&payload.end).map_err(String::from)?;
    Ok(json!({
        "years": duration.years,
        "months": duration.months,
        "days": duration.days,
        "totalDays": payload.start.days_until(&payload.end),
        "text": duration.to_string(),
    }))
}

pub fn bs_add_days(arg0: Option<Value>) -> Result<Value, String> {
    let payload: AddDaysPayload = parse_payload(payload_object(arg0, "date"), "add days")?;
    let date = payload.date.add_days(payload.days).map_err(String::from)?;
    Ok(date_json(&date))
}

pub fn interest_calculate(arg0: Option<Value>) -> Result<Value, String> {
    let payload: InterestPayload = parse_payload(payload_object(arg0, "principal"), "interest")?;
    let end = match payload.end {
        Some(end) => end,
        None => BsDate::today().map_err(String::from)?,
    };
    let request = InterestRequest {
        principal: payload.principal,
        rate: payload.rate,
        rate_basis: parse_rate_basis(payload.rate_basis.as_deref())?,
        start: payload.start,
        end,
        method: parse_method(payload.compounding.as_deref())?,
    };
    let breakdown = interest::calculate(&request).map_err(String::from)?;
    to_json(&breakdown)
}
