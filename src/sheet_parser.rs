use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;

pub const HEADER_SCHEMA: [&str; 16] = [
    "portfolio",
    "asset_ref",
    "asset_address",
    "asset_zipcode",
    "asset_city",
    "asset_is_restricted",
    "asset_yoc",
    "unit_ref",
    "unit_size",
    "unit_is_rented",
    "unit_rent",
    "unit_type",
    "unit_tenant",
    "unit_lease_start",
    "unit_lease_end",
    "data_timestamp",
];

/// Positions of the sheet columns, in `HEADER_SCHEMA` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Portfolio,
    AssetRef,
    AssetAddress,
    AssetZipcode,
    AssetCity,
    AssetIsRestricted,
    AssetYoc,
    UnitRef,
    UnitSize,
    UnitIsRented,
    UnitRent,
    UnitType,
    UnitTenant,
    UnitLeaseStart,
    UnitLeaseEnd,
    DataTimestamp,
}

impl Column {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        HEADER_SCHEMA[self.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Excel,
}

impl SheetFormat {
    pub fn from_file_name(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_lowercase().as_str() {
            "csv" => Some(SheetFormat::Csv),
            "xls" | "xlsx" => Some(SheetFormat::Excel),
            _ => None,
        }
    }
}

/// A cell as the underlying reader produced it. CSV cells are always text;
/// spreadsheet cells keep the type stored in the workbook.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{}", *f as i64),
            Cell::Float(f) => f.to_string(),
            Cell::Bool(true) => "True".to_string(),
            Cell::Bool(false) => "False".to_string(),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) if s.is_empty() => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Int(*i),
            Data::Float(f) => Cell::Float(*f),
            Data::Bool(b) => Cell::Bool(*b),
            other => Cell::Text(format!("{}", other)),
        }
    }
}

static EMPTY_CELL: Cell = Cell::Empty;

#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    cells: Vec<Cell>,
}

impl SheetRow {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn get(&self, column: Column) -> &Cell {
        self.cells.get(column.index()).unwrap_or(&EMPTY_CELL)
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }
}

const CANDIDATE_DELIMITERS: [u8; 5] = [b',', b';', b'\t', b'|', b':'];
const SNIFF_RECORDS: usize = 20;

/// Detects the field separator of delimited text. Each candidate splits the
/// first records with a quote-aware reader, so line breaks inside quoted
/// fields stay within their record. A candidate qualifies when the header
/// has at least two fields and at least half of the sampled records share
/// that width; the widest qualifying header wins, ties go to the earlier
/// entry of `CANDIDATE_DELIMITERS`.
pub fn sniff_delimiter(content: &str) -> Option<u8> {
    let content = content.trim_start_matches('\u{feff}');

    let mut best: Option<(u8, usize)> = None;
    for &delimiter in &CANDIDATE_DELIMITERS {
        let widths: Vec<usize> = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(content.as_bytes())
            .records()
            .take(SNIFF_RECORDS)
            .map_while(Result::ok)
            .map(|record| record.len())
            .collect();

        let Some(&width) = widths.first() else {
            continue;
        };
        if width < 2 {
            continue;
        }
        let consistent = widths.iter().filter(|&&w| w == width).count();
        if consistent * 2 < widths.len() {
            continue;
        }
        if best.map_or(true, |(_, w)| width > w) {
            best = Some((delimiter, width));
        }
    }
    best.map(|(d, _)| d)
}

fn decode_text(bytes: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(bytes).context("File is not valid UTF-8 text")?;
    Ok(text.trim_start_matches('\u{feff}'))
}

/// Reads only the first row of the file, for header validation.
pub fn read_header(bytes: &[u8], format: SheetFormat, delimiter: Option<u8>) -> Result<Vec<String>> {
    match format {
        SheetFormat::Csv => {
            let delimiter = delimiter.context("No delimiter available for CSV header")?;
            let text = decode_text(bytes)?;
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .delimiter(delimiter)
                .from_reader(text.as_bytes());
            let header = rdr
                .records()
                .next()
                .context("CSV file is empty")?
                .context("Failed to read CSV header row")?;
            Ok(header.iter().map(|h| h.to_string()).collect())
        }
        SheetFormat::Excel => {
            let mut rows = excel_rows(bytes)?.into_iter();
            let header = rows.next().context("Spreadsheet has no rows")?;
            Ok(header.iter().map(Cell::as_text).collect())
        }
    }
}

/// Loads every non-blank data row. The header must match `HEADER_SCHEMA`.
pub fn parse_sheet(bytes: &[u8], format: SheetFormat, delimiter: Option<u8>) -> Result<Vec<SheetRow>> {
    match format {
        SheetFormat::Csv => parse_csv(bytes, delimiter),
        SheetFormat::Excel => parse_excel(bytes),
    }
}

fn parse_csv(bytes: &[u8], delimiter: Option<u8>) -> Result<Vec<SheetRow>> {
    let text = decode_text(bytes)?;
    let delimiter = match delimiter {
        Some(d) => d,
        None => sniff_delimiter(text).context("Could not determine the CSV delimiter")?,
    };

    // Short rows are allowed; missing trailing cells read as empty.
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let headers = rdr.headers().context("Failed to read CSV header row")?;
    ensure_schema(headers.iter())?;

    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV record {}", i + 1))?;
        let row = SheetRow::new(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(field.to_string())
                    }
                })
                .collect(),
        );
        if !row.is_blank() {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn parse_excel(bytes: &[u8]) -> Result<Vec<SheetRow>> {
    let mut rows = excel_rows(bytes)?.into_iter();
    let header = rows.next().context("Spreadsheet has no rows")?;
    let header: Vec<String> = header.iter().map(Cell::as_text).collect();
    ensure_schema(header.iter().map(String::as_str))?;

    Ok(rows
        .map(SheetRow::new)
        .filter(|row| !row.is_blank())
        .collect())
}

fn excel_rows(bytes: &[u8]) -> Result<Vec<Vec<Cell>>> {
    // calamine picks xls or xlsx from the content
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .context("Failed to open spreadsheet")?;

    let sheet_names = workbook.sheet_names().to_vec();
    let first = sheet_names.first().context("Spreadsheet has no sheets")?;
    let range = workbook
        .worksheet_range(first)
        .with_context(|| format!("Failed to read sheet {}", first))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(Cell::from).collect())
        .collect())
}

fn ensure_schema<'a>(headers: impl Iterator<Item = &'a str>) -> Result<()> {
    let headers: Vec<&str> = headers.collect();
    if headers != HEADER_SCHEMA {
        bail!("Unexpected header row: {}", headers.join(", "));
    }
    Ok(())
}

pub fn header_matches_schema(headers: &[String]) -> bool {
    headers.len() == HEADER_SCHEMA.len() && headers.iter().zip(HEADER_SCHEMA.iter()).all(|(a, b)| a == b)
}
