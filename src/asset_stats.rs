use anyhow::Result;
use chrono::Datelike;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::database::Database;
use crate::models::{Asset, Unit};

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct AssetSummary {
    pub address: String,
    pub zipcode: i64,
    pub city: String,
    pub year_of_construction: i32,
    pub restricted_area: bool,
    pub number_of_units: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_rent: Decimal,
    pub total_area: i64,
    pub area_rented: i64,
    pub vacancy: String,
    pub walt: String,
    pub latest_update: String,
}

pub fn summarize_asset(asset: &Asset, units: &[Unit], current_year: i32) -> AssetSummary {
    let total_rent: Decimal = units
        .iter()
        .filter(|u| u.is_rented)
        .map(|u| u.rent.unwrap_or(Decimal::ZERO))
        .sum();
    let total_area: i64 = units.iter().map(|u| u.size).sum();
    let area_rented: i64 = units.iter().filter(|u| u.is_rented).map(|u| u.size).sum();

    let latest_update = units
        .iter()
        .map(|u| u.updated_at)
        .max()
        .unwrap_or(asset.updated_at)
        .format("%d.%m.%Y")
        .to_string();

    AssetSummary {
        address: asset.address.clone(),
        zipcode: asset.zipcode,
        city: asset.city.clone(),
        year_of_construction: asset.year_of_construction,
        restricted_area: asset.is_restricted,
        number_of_units: units.len(),
        total_rent,
        total_area,
        area_rented,
        vacancy: format!("{} %", one_decimal_at_least(vacancy_rate(units))),
        walt: format!("{} years", one_decimal_at_least(calculate_walt(units, current_year))),
        latest_update,
    }
}

/// Share of unrented units in percent, rounded to 2 decimals.
pub fn vacancy_rate(units: &[Unit]) -> Decimal {
    if units.is_empty() {
        return Decimal::ZERO;
    }
    let vacant = units.iter().filter(|u| !u.is_rented).count();
    (Decimal::from(vacant * 100) / Decimal::from(units.len())).round_dp(2)
}

/// Weighted average lease term in years, rounded to 1 decimal. Each rented
/// unit with a lease end contributes its share of the asset's total area
/// times its remaining years, rounded to 3 decimals.
pub fn calculate_walt(units: &[Unit], current_year: i32) -> Decimal {
    let total_area: i64 = units.iter().map(|u| u.size).sum();
    if total_area == 0 {
        return Decimal::ZERO;
    }
    let total_area = Decimal::from(total_area);

    let walt: Decimal = units
        .iter()
        .filter(|u| u.is_rented)
        .filter_map(|u| u.lease_end.map(|end| (u.size, end)))
        .map(|(size, end)| {
            let remaining_years = Decimal::from(end.year() - current_year);
            (Decimal::from(size) / total_area * remaining_years).round_dp(3)
        })
        .sum();
    walt.round_dp(1)
}

// 50 -> "50.0", 33.33 -> "33.33"
fn one_decimal_at_least(value: Decimal) -> String {
    let normalized = value.normalize();
    if normalized.scale() == 0 {
        format!("{}.0", normalized)
    } else {
        normalized.to_string()
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct AssetPage {
    pub count: i64,
    pub page: usize,
    pub num_pages: usize,
    pub results: Vec<AssetSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetListing {
    Page(AssetPage),
    UnknownReference(String),
    NoAssets,
    InvalidPage,
}

/// One page of summaries, most recently updated asset first. `page` is
/// 1-based.
pub fn list_asset_summaries(
    db: &Database,
    reference: Option<&str>,
    page: usize,
    page_size: usize,
    current_year: i32,
) -> Result<AssetListing> {
    let count = db.count_assets(reference)?;
    if count == 0 {
        return Ok(match reference {
            Some(r) => AssetListing::UnknownReference(r.to_string()),
            None => AssetListing::NoAssets,
        });
    }

    let page_size = page_size.max(1);
    let num_pages = (count as usize).div_ceil(page_size);
    if page == 0 || page > num_pages {
        return Ok(AssetListing::InvalidPage);
    }

    let offset = (page - 1) * page_size;
    let assets = db.list_assets(reference, page_size as i64, offset as i64)?;
    let mut results = Vec::with_capacity(assets.len());
    for asset in &assets {
        let units = db.units_for_asset(asset.id)?;
        results.push(summarize_asset(asset, &units, current_year));
    }

    Ok(AssetListing::Page(AssetPage {
        count,
        page,
        num_pages,
        results,
    }))
}
