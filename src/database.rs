use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::str::FromStr;

use crate::models::{Asset, AssetKey, Document, Portfolio, Unit, UnitCandidate, UnitType};

pub struct Database {
    conn: Connection,
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS portfolios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // reference is indexed but not unique: rows that differ in any other
        // asset column get their own asset
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS assets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                portfolio_id INTEGER NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
                reference TEXT NOT NULL,
                city TEXT NOT NULL,
                address TEXT NOT NULL,
                zipcode INTEGER NOT NULL,
                is_restricted INTEGER NOT NULL DEFAULT 0,
                year_of_construction INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_assets_reference ON assets (reference)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_assets_updated_at ON assets (updated_at)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
                reference TEXT NOT NULL,
                unit_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                is_rented INTEGER NOT NULL DEFAULT 0,
                rent TEXT,
                tenant TEXT,
                lease_start TEXT,
                lease_end TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (reference, unit_type)
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_units_asset ON units (asset_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file TEXT NOT NULL,
                delimiter TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    // Documents

    pub fn insert_document(&self, file: &str, delimiter: Option<u8>) -> Result<Document> {
        let now = format_timestamp(Utc::now());
        let delimiter = delimiter.map(|d| (d as char).to_string());
        self.conn.execute(
            "INSERT INTO documents (file, delimiter, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![file, delimiter, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_document(id)?
            .with_context(|| format!("Document {} vanished after insert", id))
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let doc = self
            .conn
            .query_row(
                "SELECT id, file, delimiter, created_at, updated_at FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    let delimiter: Option<String> = row.get(2)?;
                    Ok(Document {
                        id: row.get(0)?,
                        file: row.get(1)?,
                        delimiter: delimiter.and_then(|d| d.bytes().next()),
                        created_at: text_col(row, 3)?,
                        updated_at: text_col(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(doc)
    }

    // Portfolios

    /// Returns the portfolio with `name`, creating it when absent. The flag
    /// is true when a row was inserted.
    pub fn upsert_portfolio(&self, name: &str) -> Result<(Portfolio, bool)> {
        if let Some(existing) = self.find_portfolio(name)? {
            return Ok((existing, false));
        }
        let now = format_timestamp(Utc::now());
        self.conn.execute(
            "INSERT INTO portfolios (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![name, now],
        )?;
        let created = self
            .find_portfolio(name)?
            .with_context(|| format!("Portfolio {} vanished after insert", name))?;
        Ok((created, true))
    }

    pub fn find_portfolio(&self, name: &str) -> Result<Option<Portfolio>> {
        let portfolio = self
            .conn
            .query_row(
                "SELECT id, name, created_at, updated_at FROM portfolios WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Portfolio {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: text_col(row, 2)?,
                        updated_at: text_col(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(portfolio)
    }

    /// Deletes a portfolio together with its assets and their units.
    pub fn delete_portfolio(&self, id: i64) -> Result<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM portfolios WHERE id = ?1", params![id])?;
        Ok(rows_affected > 0)
    }

    // Assets

    pub fn get_or_create_asset(&self, key: &AssetKey) -> Result<(Asset, bool)> {
        let existing = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM assets
                     WHERE portfolio_id = ?1 AND reference = ?2 AND city = ?3 AND address = ?4
                       AND zipcode = ?5 AND is_restricted = ?6 AND year_of_construction = ?7
                     ORDER BY id LIMIT 1",
                    ASSET_COLUMNS
                ),
                params![
                    key.portfolio_id,
                    key.reference,
                    key.city,
                    key.address,
                    key.zipcode,
                    key.is_restricted,
                    key.year_of_construction,
                ],
                asset_from_row,
            )
            .optional()?;
        if let Some(asset) = existing {
            return Ok((asset, false));
        }

        let now = format_timestamp(Utc::now());
        self.conn.execute(
            "INSERT INTO assets (
                portfolio_id, reference, city, address, zipcode,
                is_restricted, year_of_construction, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                key.portfolio_id,
                key.reference,
                key.city,
                key.address,
                key.zipcode,
                key.is_restricted,
                key.year_of_construction,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let asset = self
            .get_asset(id)?
            .with_context(|| format!("Asset {} vanished after insert", id))?;
        Ok((asset, true))
    }

    pub fn get_asset(&self, id: i64) -> Result<Option<Asset>> {
        let asset = self
            .conn
            .query_row(
                &format!("SELECT {} FROM assets WHERE id = ?1", ASSET_COLUMNS),
                params![id],
                asset_from_row,
            )
            .optional()?;
        Ok(asset)
    }

    pub fn touch_asset(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE assets SET updated_at = ?1 WHERE id = ?2",
            params![format_timestamp(at), id],
        )?;
        Ok(())
    }

    pub fn count_assets(&self, reference: Option<&str>) -> Result<i64> {
        let count = match reference {
            Some(r) => self.conn.query_row(
                "SELECT count(*) FROM assets WHERE reference = ?1",
                params![r],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT count(*) FROM assets", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    /// Most recently updated first.
    pub fn list_assets(&self, reference: Option<&str>, limit: i64, offset: i64) -> Result<Vec<Asset>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM assets
             WHERE (?1 IS NULL OR reference = ?1)
             ORDER BY updated_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            ASSET_COLUMNS
        ))?;
        let assets = stmt
            .query_map(params![reference, limit, offset], asset_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(assets)
    }

    // Units

    pub fn find_units(&self, reference: &str, unit_type: UnitType) -> Result<Vec<Unit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM units WHERE reference = ?1 AND unit_type = ?2 ORDER BY id",
            UNIT_COLUMNS
        ))?;
        let units = stmt
            .query_map(params![reference, unit_type.code()], unit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    pub fn units_for_asset(&self, asset_id: i64) -> Result<Vec<Unit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM units WHERE asset_id = ?1 ORDER BY created_at DESC, id DESC",
            UNIT_COLUMNS
        ))?;
        let units = stmt
            .query_map(params![asset_id], unit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    pub fn insert_unit(&self, candidate: &UnitCandidate) -> Result<Unit> {
        let now = format_timestamp(Utc::now());
        let tenancy = candidate.tenancy.as_ref();
        self.conn.execute(
            "INSERT INTO units (
                asset_id, reference, unit_type, size, is_rented,
                rent, tenant, lease_start, lease_end, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                candidate.asset_id,
                candidate.reference,
                candidate.unit_type.code(),
                candidate.size,
                candidate.is_rented,
                tenancy.map(|t| t.rent.to_string()),
                tenancy.map(|t| t.tenant.clone()),
                tenancy.map(|t| t.lease_start.to_string()),
                candidate.lease_end.map(|d| d.to_string()),
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let unit = self
            .get_unit(id)?
            .with_context(|| format!("Unit {} vanished after insert", id))?;
        Ok(unit)
    }

    pub fn get_unit(&self, id: i64) -> Result<Option<Unit>> {
        let unit = self
            .conn
            .query_row(
                &format!("SELECT {} FROM units WHERE id = ?1", UNIT_COLUMNS),
                params![id],
                unit_from_row,
            )
            .optional()?;
        Ok(unit)
    }

    /// Writes the candidate's attributes onto every unit in `ids`. Tenancy
    /// and lease end columns are only written when the candidate carries them.
    pub fn update_units(&self, ids: &[i64], candidate: &UnitCandidate, at: DateTime<Utc>) -> Result<usize> {
        let mut sets = vec![
            "asset_id = ?",
            "reference = ?",
            "unit_type = ?",
            "size = ?",
            "is_rented = ?",
            "updated_at = ?",
        ];
        let mut values = vec![
            Value::Integer(candidate.asset_id),
            Value::Text(candidate.reference.clone()),
            Value::Text(candidate.unit_type.code().to_string()),
            Value::Integer(candidate.size),
            Value::Integer(candidate.is_rented as i64),
            Value::Text(format_timestamp(at)),
        ];
        if let Some(ref tenancy) = candidate.tenancy {
            sets.extend(["tenant = ?", "rent = ?", "lease_start = ?"]);
            values.push(Value::Text(tenancy.tenant.clone()));
            values.push(Value::Text(tenancy.rent.to_string()));
            values.push(Value::Text(tenancy.lease_start.to_string()));
        }
        if let Some(end) = candidate.lease_end {
            sets.push("lease_end = ?");
            values.push(Value::Text(end.to_string()));
        }

        let mut total = 0;
        for id in ids {
            let sql = format!("UPDATE units SET {} WHERE id = ?", sets.join(", "));
            let mut row_values = values.clone();
            row_values.push(Value::Integer(*id));
            total += self.conn.execute(&sql, params_from_iter(row_values))?;
        }
        Ok(total)
    }

    pub fn portfolio_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT count(*) FROM portfolios", [], |r| r.get(0))?)
    }

    pub fn unit_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT count(*) FROM units", [], |r| r.get(0))?)
    }
}

const ASSET_COLUMNS: &str = "id, portfolio_id, reference, city, address, zipcode, \
     is_restricted, year_of_construction, created_at, updated_at";

const UNIT_COLUMNS: &str = "id, asset_id, reference, unit_type, size, is_rented, \
     rent, tenant, lease_start, lease_end, created_at, updated_at";

fn asset_from_row(row: &Row) -> rusqlite::Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        portfolio_id: row.get(1)?,
        reference: row.get(2)?,
        city: row.get(3)?,
        address: row.get(4)?,
        zipcode: row.get(5)?,
        is_restricted: row.get(6)?,
        year_of_construction: row.get(7)?,
        created_at: text_col(row, 8)?,
        updated_at: text_col(row, 9)?,
    })
}

fn unit_from_row(row: &Row) -> rusqlite::Result<Unit> {
    let code: String = row.get(3)?;
    let unit_type = UnitType::from_code(&code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("Unknown unit type code: {}", code).into(),
        )
    })?;
    Ok(Unit {
        id: row.get(0)?,
        asset_id: row.get(1)?,
        reference: row.get(2)?,
        unit_type,
        size: row.get(4)?,
        is_rented: row.get(5)?,
        rent: opt_text_col(row, 6)?,
        tenant: row.get(7)?,
        lease_start: opt_text_col(row, 8)?,
        lease_end: opt_text_col(row, 9)?,
        created_at: text_col(row, 10)?,
        updated_at: text_col(row, 11)?,
    })
}

// Decimals, dates and timestamps are stored as text
fn text_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    T::from_str(&s).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_text_col<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(s) if !s.is_empty() => T::from_str(&s)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        _ => Ok(None),
    }
}
