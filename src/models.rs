use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Portfolio {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Asset {
    pub id: i64,
    pub portfolio_id: i64,
    pub reference: String,
    pub city: String,
    pub address: String,
    pub zipcode: i64,
    pub is_restricted: bool,
    pub year_of_construction: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Every column an asset row is matched on when reconciling a sheet row.
/// Two rows only share an asset when all of these are equal.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetKey {
    pub portfolio_id: i64,
    pub reference: String,
    pub city: String,
    pub address: String,
    pub zipcode: i64,
    pub is_restricted: bool,
    pub year_of_construction: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Residential,
    Commercial,
    Office,
    Retail,
}

impl UnitType {
    /// Maps the `unit_type` sheet column. Matching is case-sensitive and
    /// anything that is not RESIDENTIAL, OFFICE or RETAIL (including
    /// "COMMERCIAL", lowercase spellings and typos) is Commercial.
    pub fn from_sheet_label(label: &str) -> Self {
        match label {
            "RESIDENTIAL" => UnitType::Residential,
            "OFFICE" => UnitType::Office,
            "RETAIL" => UnitType::Retail,
            _ => UnitType::Commercial,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            UnitType::Residential => "rs",
            UnitType::Commercial => "cm",
            UnitType::Office => "of",
            UnitType::Retail => "rt",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "rs" => Some(UnitType::Residential),
            "cm" => Some(UnitType::Commercial),
            "of" => Some(UnitType::Office),
            "rt" => Some(UnitType::Retail),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Unit {
    pub id: i64,
    pub asset_id: i64,
    pub reference: String,
    pub unit_type: UnitType,
    pub size: i64,
    pub is_rented: bool,
    pub rent: Option<Decimal>,
    pub tenant: Option<String>,
    pub lease_start: Option<NaiveDate>,
    pub lease_end: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tenant, rent and lease start always travel together.
#[derive(Debug, Clone, PartialEq)]
pub struct Tenancy {
    pub tenant: String,
    pub rent: Decimal,
    pub lease_start: NaiveDate,
}

/// Attribute set built from one sheet row. Optional parts that are `None`
/// are neither compared nor written, so an existing tenant survives a row
/// whose tenant cell is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitCandidate {
    pub asset_id: i64,
    pub reference: String,
    pub is_rented: bool,
    pub size: i64,
    pub unit_type: UnitType,
    pub tenancy: Option<Tenancy>,
    pub lease_end: Option<NaiveDate>,
}

impl UnitCandidate {
    pub fn matches(&self, unit: &Unit) -> bool {
        if unit.asset_id != self.asset_id
            || unit.reference != self.reference
            || unit.is_rented != self.is_rented
            || unit.size != self.size
            || unit.unit_type != self.unit_type
        {
            return false;
        }

        if let Some(ref tenancy) = self.tenancy {
            if unit.tenant.as_deref() != Some(tenancy.tenant.as_str())
                || unit.rent != Some(tenancy.rent)
                || unit.lease_start != Some(tenancy.lease_start)
            {
                return false;
            }
        }

        match self.lease_end {
            Some(end) => unit.lease_end == Some(end),
            None => true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Document {
    pub id: i64,
    pub file: String,
    #[serde(skip)]
    pub delimiter: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
