use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

use crate::database::Database;
use crate::models::{AssetKey, Tenancy, UnitCandidate, UnitType};
use crate::sheet_parser::{Cell, Column, SheetRow};

const MIN_YEAR_OF_CONSTRUCTION: i32 = 1700;

static DOTTED_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{2})$").unwrap()
});

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub rows: usize,
    pub portfolios_created: usize,
    pub assets_created: usize,
    pub units_created: usize,
    pub units_updated: usize,
    pub units_unchanged: usize,
}

/// Applies every row in order. The first failing row stops the batch and
/// rows before it stay written.
pub fn reconcile_rows(db: &Database, rows: &[SheetRow], current_year: i32) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for (i, row) in rows.iter().enumerate() {
        reconcile_row(db, row, current_year, &mut report)
            .with_context(|| format!("Row {} could not be processed", i + 1))?;
    }
    Ok(report)
}

fn reconcile_row(db: &Database, row: &SheetRow, current_year: i32, report: &mut ReconcileReport) -> Result<()> {
    // 1. Portfolio by name
    let portfolio_name = required_text(row, Column::Portfolio)?;
    let (portfolio, portfolio_created) = db.upsert_portfolio(&portfolio_name)?;

    // 2. Asset keyed by every asset column
    let year_of_construction = int_field(row, Column::AssetYoc)?;
    let year_of_construction = i32::try_from(year_of_construction)
        .map_err(|_| anyhow!("asset_yoc {} is not a valid year", year_of_construction))?;
    if !(MIN_YEAR_OF_CONSTRUCTION..=current_year).contains(&year_of_construction) {
        bail!(
            "asset_yoc {} is outside {}..={}",
            year_of_construction,
            MIN_YEAR_OF_CONSTRUCTION,
            current_year
        );
    }
    let key = AssetKey {
        portfolio_id: portfolio.id,
        reference: required_text(row, Column::AssetRef)?,
        city: required_text(row, Column::AssetCity)?,
        address: required_text(row, Column::AssetAddress)?,
        zipcode: int_field(row, Column::AssetZipcode)?,
        is_restricted: bool_field(row, Column::AssetIsRestricted)?,
        year_of_construction,
    };
    let (asset, asset_created) = db.get_or_create_asset(&key)?;

    // 3. Unit candidate
    let unit_type = UnitType::from_sheet_label(&row.get(Column::UnitType).as_text());
    let candidate = unit_candidate(row, asset.id, unit_type, current_year)?;

    // 4. Create, update or leave the unit alone
    let existing = db.find_units(&candidate.reference, unit_type)?;
    if existing.is_empty() {
        db.insert_unit(&candidate)?;
        report.units_created += 1;
    } else if existing.iter().any(|u| candidate.matches(u)) {
        report.units_unchanged += 1;
    } else {
        let now = Utc::now();
        let ids: Vec<i64> = existing.iter().map(|u| u.id).collect();
        report.units_updated += db.update_units(&ids, &candidate, now)?;
        db.touch_asset(asset.id, now)?;
    }

    report.rows += 1;
    if portfolio_created {
        report.portfolios_created += 1;
    }
    if asset_created {
        report.assets_created += 1;
    }
    Ok(())
}

fn unit_candidate(row: &SheetRow, asset_id: i64, unit_type: UnitType, current_year: i32) -> Result<UnitCandidate> {
    let tenancy = if row.get(Column::UnitTenant).is_empty() {
        None
    } else {
        Some(Tenancy {
            tenant: row.get(Column::UnitTenant).as_text(),
            rent: decimal_field(row, Column::UnitRent)?,
            lease_start: reformat_lease_start(&required_text(row, Column::UnitLeaseStart)?, current_year)?,
        })
    };

    let lease_end = match row.get(Column::UnitLeaseEnd) {
        Cell::Empty => None,
        cell => Some(reformat_lease_end(&cell.as_text())?),
    };

    Ok(UnitCandidate {
        asset_id,
        reference: required_text(row, Column::UnitRef)?,
        is_rented: rented_flag(row)?,
        size: int_field(row, Column::UnitSize)?,
        unit_type,
        tenancy,
        lease_end,
    })
}

/// `DD.MM.YY` to a date in 20YY, or in 19YY when 20YY is still in the future.
pub fn reformat_lease_start(raw: &str, current_year: i32) -> Result<NaiveDate> {
    let (day, month, yy) = split_dotted_date(raw)?;
    let year = if current_year - (2000 + yy) >= 0 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| anyhow!("Invalid lease start date: {}", raw))
}

/// `DD.MM.YY` to a date in 20YY, with no century adjustment.
pub fn reformat_lease_end(raw: &str) -> Result<NaiveDate> {
    let (day, month, yy) = split_dotted_date(raw)?;
    NaiveDate::from_ymd_opt(2000 + yy, month, day).ok_or_else(|| anyhow!("Invalid lease end date: {}", raw))
}

fn split_dotted_date(raw: &str) -> Result<(u32, u32, i32)> {
    let caps = DOTTED_DATE_RE
        .captures(raw.trim())
        .ok_or_else(|| anyhow!("Expected a DD.MM.YY date, got '{}'", raw))?;
    Ok((caps[1].parse()?, caps[2].parse()?, caps[3].parse()?))
}

fn required_text(row: &SheetRow, column: Column) -> Result<String> {
    let cell = row.get(column);
    if cell.is_empty() {
        bail!("Missing value for {}", column.name());
    }
    Ok(cell.as_text())
}

fn int_field(row: &SheetRow, column: Column) -> Result<i64> {
    match row.get(column) {
        Cell::Int(i) => Ok(*i),
        Cell::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        Cell::Text(s) => s
            .trim()
            .parse::<i64>()
            .with_context(|| format!("{} is not an integer: '{}'", column.name(), s)),
        other => bail!("{} is not an integer: {:?}", column.name(), other),
    }
}

fn decimal_field(row: &SheetRow, column: Column) -> Result<Decimal> {
    let cell = row.get(column);
    let value = match cell {
        Cell::Int(i) => Decimal::from(*i),
        Cell::Float(f) => Decimal::try_from(*f)
            .with_context(|| format!("{} is not a decimal: {}", column.name(), f))?,
        Cell::Text(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .with_context(|| format!("{} is not a decimal: '{}'", column.name(), s))?,
        other => bail!("{} is not a decimal: {:?}", column.name(), other),
    };
    Ok(value.round_dp(2))
}

fn bool_field(row: &SheetRow, column: Column) -> Result<bool> {
    match row.get(column) {
        Cell::Bool(b) => Ok(*b),
        Cell::Int(1) => Ok(true),
        Cell::Int(0) => Ok(false),
        Cell::Text(s) => match s.trim() {
            "True" | "true" | "TRUE" | "t" | "1" => Ok(true),
            "False" | "false" | "FALSE" | "f" | "0" => Ok(false),
            other => bail!("{} is not a boolean: '{}'", column.name(), other),
        },
        other => bail!("{} is not a boolean: {:?}", column.name(), other),
    }
}

/// `unit_is_rented` is capitalized first, so "true", "TRUE" and "True" all
/// read as rented.
fn rented_flag(row: &SheetRow) -> Result<bool> {
    let raw = row.get(Column::UnitIsRented).as_text();
    match capitalize(raw.trim()).as_str() {
        "True" => Ok(true),
        "False" => Ok(false),
        other => bail!("unit_is_rented must be True or False, got '{}'", other),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
