mod common;

use chrono::{NaiveDate, TimeZone, Utc};
use common::{csv_document, FixtureRow};
use realestate_portfolio_server_rs::asset_stats::{
    calculate_walt, list_asset_summaries, summarize_asset, vacancy_rate, AssetListing,
};
use realestate_portfolio_server_rs::database::Database;
use realestate_portfolio_server_rs::models::{Asset, AssetKey, Unit, UnitType};
use realestate_portfolio_server_rs::reconcile::reconcile_rows;
use realestate_portfolio_server_rs::sheet_parser::{parse_sheet, SheetFormat};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const YEAR: i32 = 2026;

fn asset() -> Asset {
    let ts = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
    Asset {
        id: 1,
        portfolio_id: 1,
        reference: "A-1".to_string(),
        city: "Berlin".to_string(),
        address: "Torstrasse 12".to_string(),
        zipcode: 10119,
        is_restricted: true,
        year_of_construction: 1990,
        created_at: ts,
        updated_at: ts,
    }
}

fn unit(id: i64, size: i64, rent: Option<Decimal>, lease_end_year: Option<i32>) -> Unit {
    let ts = Utc.with_ymd_and_hms(2025, 6, id as u32, 12, 0, 0).unwrap();
    Unit {
        id,
        asset_id: 1,
        reference: format!("U-{}", id),
        unit_type: UnitType::Residential,
        size,
        is_rented: rent.is_some(),
        rent,
        tenant: rent.map(|_| "Jane Roe".to_string()),
        lease_start: rent.map(|_| NaiveDate::from_ymd_opt(2020, 8, 1).unwrap()),
        lease_end: lease_end_year.map(|y| NaiveDate::from_ymd_opt(y, 8, 1).unwrap()),
        created_at: ts,
        updated_at: ts,
    }
}

#[test]
fn test_asset_without_units() {
    let summary = summarize_asset(&asset(), &[], YEAR);
    assert_eq!(summary.number_of_units, 0);
    assert_eq!(summary.total_rent, Decimal::ZERO);
    assert_eq!(summary.total_area, 0);
    assert_eq!(summary.area_rented, 0);
    assert_eq!(summary.vacancy, "0.0 %");
    assert_eq!(summary.walt, "0.0 years");
    assert_eq!(summary.latest_update, "01.03.2025");
}

#[test]
fn test_half_rented_asset() {
    let units = [unit(1, 500, Some(dec!(1200)), Some(YEAR + 2)), unit(2, 500, None, None)];
    let summary = summarize_asset(&asset(), &units, YEAR);

    assert_eq!(summary.number_of_units, 2);
    assert_eq!(summary.total_rent, dec!(1200));
    assert_eq!(summary.total_area, 1000);
    assert_eq!(summary.area_rented, 500);
    assert_eq!(summary.vacancy, "50.0 %");
    assert_eq!(summary.walt, "1.0 years");
    assert!(summary.restricted_area);
    assert_eq!(summary.latest_update, "02.06.2025");
}

#[test]
fn test_vacancy_keeps_two_decimals() {
    let units = [
        unit(1, 100, Some(dec!(500)), None),
        unit(2, 100, Some(dec!(500)), None),
        unit(3, 100, None, None),
    ];
    assert_eq!(vacancy_rate(&units), dec!(33.33));
    assert_eq!(summarize_asset(&asset(), &units, YEAR).vacancy, "33.33 %");
}

#[test]
fn test_walt_ignores_vacant_and_open_ended_units() {
    let units = [
        unit(1, 300, Some(dec!(900)), Some(YEAR + 5)),
        unit(2, 300, Some(dec!(900)), None),
        unit(3, 400, None, Some(YEAR + 10)),
    ];
    // 300 / 1000 * 5
    assert_eq!(calculate_walt(&units, YEAR), dec!(1.5));
}

#[test]
fn test_walt_rounds_each_contribution() {
    let units = [
        unit(1, 1, Some(dec!(10)), Some(YEAR + 1)),
        unit(2, 1, Some(dec!(10)), Some(YEAR + 1)),
        unit(3, 1, Some(dec!(10)), Some(YEAR + 1)),
    ];
    // 3 * round(1/3, 3) = 0.999 -> 1.0
    assert_eq!(calculate_walt(&units, YEAR), dec!(1.0));
}

#[test]
fn test_walt_with_zero_area() {
    let units = [unit(1, 0, Some(dec!(10)), Some(YEAR + 3))];
    assert_eq!(calculate_walt(&units, YEAR), Decimal::ZERO);
}

#[test]
fn test_summary_serializes_rent_as_number() {
    let units = [unit(1, 80, Some(dec!(950.50)), Some(YEAR + 1))];
    let json = serde_json::to_value(summarize_asset(&asset(), &units, YEAR)).unwrap();
    assert_eq!(json["total_rent"], serde_json::json!(950.5));
    assert_eq!(json["restricted_area"], serde_json::json!(true));
    assert_eq!(json["zipcode"], serde_json::json!(10119));
}

fn seeded_db(rows: &[FixtureRow]) -> Database {
    let db = Database::new(":memory:").unwrap();
    let parsed = parse_sheet(&csv_document(rows), SheetFormat::Csv, Some(b',')).unwrap();
    reconcile_rows(&db, &parsed, YEAR).unwrap();
    db
}

#[test]
fn test_listing_pages_through_assets() {
    let db = seeded_db(&[
        FixtureRow::rented("A-1", "U-1"),
        FixtureRow::rented("A-2", "U-2"),
        FixtureRow::vacant("A-3", "U-3"),
    ]);

    let AssetListing::Page(first) = list_asset_summaries(&db, None, 1, 2, YEAR).unwrap() else {
        panic!("expected a page");
    };
    assert_eq!(first.count, 3);
    assert_eq!(first.num_pages, 2);
    assert_eq!(first.results.len(), 2);

    let AssetListing::Page(second) = list_asset_summaries(&db, None, 2, 2, YEAR).unwrap() else {
        panic!("expected a page");
    };
    assert_eq!(second.results.len(), 1);

    assert_eq!(list_asset_summaries(&db, None, 3, 2, YEAR).unwrap(), AssetListing::InvalidPage);
}

#[test]
fn test_listing_filters_by_reference() {
    let db = seeded_db(&[
        FixtureRow::rented("A-1", "U-1"),
        FixtureRow::vacant("A-1", "U-2"),
        FixtureRow::rented("A-2", "U-3"),
    ]);

    let AssetListing::Page(page) = list_asset_summaries(&db, Some("A-1"), 1, 2, YEAR).unwrap() else {
        panic!("expected a page");
    };
    assert_eq!(page.count, 1);
    assert_eq!(page.results[0].number_of_units, 2);
    assert_eq!(page.results[0].vacancy, "50.0 %");
    assert_eq!(page.results[0].address, "Torstrasse 12");
}

#[test]
fn test_listing_reports_missing_assets() {
    let db = Database::new(":memory:").unwrap();
    assert_eq!(list_asset_summaries(&db, None, 1, 2, YEAR).unwrap(), AssetListing::NoAssets);

    let db = seeded_db(&[FixtureRow::rented("A-1", "U-1")]);
    assert_eq!(
        list_asset_summaries(&db, Some("Z-9"), 1, 2, YEAR).unwrap(),
        AssetListing::UnknownReference("Z-9".to_string())
    );
}

#[test]
fn test_listing_includes_assets_without_units() {
    let db = Database::new(":memory:").unwrap();
    let (portfolio, _) = db.upsert_portfolio("Empty Fund").unwrap();
    db.get_or_create_asset(&AssetKey {
        portfolio_id: portfolio.id,
        reference: "E-1".to_string(),
        city: "Leipzig".to_string(),
        address: "Markt 1".to_string(),
        zipcode: 4109,
        is_restricted: false,
        year_of_construction: 1905,
    })
    .unwrap();

    let AssetListing::Page(page) = list_asset_summaries(&db, Some("E-1"), 1, 2, YEAR).unwrap() else {
        panic!("expected a page");
    };
    assert_eq!(page.results[0].number_of_units, 0);
    assert_eq!(page.results[0].vacancy, "0.0 %");
    assert_eq!(page.results[0].walt, "0.0 years");
}
