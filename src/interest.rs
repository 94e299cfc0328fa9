//! Loan interest over BS date ranges.
//!
//! Periods are measured the way lenders in Nepal count them: whole BS years
//! and months first, then the leftover days over a 365-day year. Compound
//! interest capitalizes at every full period and accrues simple interest on
//! the compounded amount for whatever remains.

use serde::{Deserialize, Serialize};

use crate::calendar::{BsDate, BsDuration};
use crate::error::{Error, Result};

const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    /// Percent per year.
    PerAnnum,
    /// Rupees per hundred per month ("saikada masik").
    PerMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Yearly,
    HalfYearly,
    Quarterly,
    Monthly,
}

impl Frequency {
    pub fn periods_per_year(self) -> u32 {
        match self {
            Frequency::Yearly => 1,
            Frequency::HalfYearly => 2,
            Frequency::Quarterly => 4,
            Frequency::Monthly => 12,
        }
    }

    fn months_per_period(self) -> u32 {
        12 / self.periods_per_year()
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "yearly" | "annual" | "annually" => Ok(Frequency::Yearly),
            "halfyearly" | "semiannual" | "semiannually" => Ok(Frequency::HalfYearly),
            "quarterly" => Ok(Frequency::Quarterly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(Error::validation(format!(
                "Unknown compounding frequency '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "frequency", rename_all = "snake_case")]
pub enum InterestMethod {
    Simple,
    Compound(Frequency),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestRequest {
    pub principal: f64,
    pub rate: f64,
    pub rate_basis: RateBasis,
    pub start: BsDate,
    pub end: BsDate,
    pub method: InterestMethod,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestBreakdown {
    pub principal: f64,
    pub interest: f64,
    pub total: f64,
    pub annual_rate: f64,
    pub method: InterestMethod,
    pub start: BsDate,
    pub end: BsDate,
    pub duration: BsDuration,
    pub total_days: i64,
    /// Number of times interest was capitalized (0 for simple interest).
    pub compounded_periods: u32,
}

/// Round to paisa.
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn annual_rate(rate: f64, basis: RateBasis) -> f64 {
    match basis {
        RateBasis::PerAnnum => rate,
        RateBasis::PerMonth => rate * 12.0,
    }
}

fn validate(req: &InterestRequest) -> Result<()> {
    if !req.principal.is_finite() || req.principal <= 0.0 {
        return Err(Error::validation("Principal must be a positive amount"));
    }
    if !req.rate.is_finite() || req.rate < 0.0 {
        return Err(Error::validation("Interest rate cannot be negative"));
    }
    if req.end < req.start {
        return Err(Error::validation(format!(
            "End date {} is before start date {}",
            req.end, req.start
        )));
    }
    Ok(())
}

/// Year fraction covered by `months` months and `days` days.
fn year_fraction(months: u32, days: u32) -> f64 {
    months as f64 / 12.0 + days as f64 / DAYS_PER_YEAR
}

pub fn calculate(req: &InterestRequest) -> Result<InterestBreakdown> {
    validate(req)?;

    let duration = req.start.diff(&req.end)?;
    let total_days = req.start.days_until(&req.end);
    let annual = annual_rate(req.rate, req.rate_basis);
    let r = annual / 100.0;

    let (amount, compounded_periods) = match req.method {
        InterestMethod::Simple => {
            let fraction = year_fraction(duration.total_months(), duration.days);
            (req.principal * (1.0 + r * fraction), 0)
        }
        InterestMethod::Compound(freq) => {
            let per_period = freq.months_per_period();
            let full = duration.total_months() / per_period;
            let leftover_months = duration.total_months() % per_period;
            let periodic = r / freq.periods_per_year() as f64;
            let compounded = req.principal * (1.0 + periodic).powi(full as i32);
            let fraction = year_fraction(leftover_months, duration.days);
            (compounded * (1.0 + r * fraction), full)
        }
    };

    let principal = round_money(req.principal);
    let total = round_money(amount);
    Ok(InterestBreakdown {
        principal,
        interest: round_money(total - principal),
        total,
        annual_rate: annual,
        method: req.method,
        start: req.start,
        end: req.end,
        duration,
        total_days,
        compounded_periods,
    })
}
