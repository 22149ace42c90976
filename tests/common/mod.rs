#![allow(dead_code)]

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use rust_xlsxwriter::{Workbook, XlsxError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use realestate_portfolio_server_rs::notifier::{MailSender, OutgoingMail};
use realestate_portfolio_server_rs::sheet_parser::HEADER_SCHEMA;

/// Keeps every mail it is handed. A failing sender counts the attempt and
/// returns an error without recording anything.
pub struct RecordingMailSender {
    sent: Mutex<Vec<OutgoingMail>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingMailSender {
    pub fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()), attempts: AtomicUsize::new(0), fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MailSender for RecordingMailSender {
    fn send<'a>(&'a self, mail: &'a OutgoingMail) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("mail transport down"));
            }
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        })
    }
}

/// One sheet row, written as text cells in header order.
#[derive(Debug, Clone)]
pub struct FixtureRow {
    pub portfolio: &'static str,
    pub asset_ref: &'static str,
    pub asset_address: &'static str,
    pub asset_zipcode: &'static str,
    pub asset_city: &'static str,
    pub asset_is_restricted: &'static str,
    pub asset_yoc: &'static str,
    pub unit_ref: &'static str,
    pub unit_size: &'static str,
    pub unit_is_rented: &'static str,
    pub unit_rent: &'static str,
    pub unit_type: &'static str,
    pub unit_tenant: &'static str,
    pub unit_lease_start: &'static str,
    pub unit_lease_end: &'static str,
    pub data_timestamp: &'static str,
}

impl FixtureRow {
    pub fn rented(asset_ref: &'static str, unit_ref: &'static str) -> Self {
        Self {
            portfolio: "Berlin Residential Fund",
            asset_ref,
            asset_address: "Torstrasse 12",
            asset_zipcode: "10119",
            asset_city: "Berlin",
            asset_is_restricted: "False",
            asset_yoc: "1990",
            unit_ref,
            unit_size: "80",
            unit_is_rented: "True",
            unit_rent: "950.50",
            unit_type: "RESIDENTIAL",
            unit_tenant: "Jane Roe",
            unit_lease_start: "01.08.20",
            unit_lease_end: "01.08.95",
            data_timestamp: "2024-01-31",
        }
    }

    pub fn vacant(asset_ref: &'static str, unit_ref: &'static str) -> Self {
        Self {
            unit_is_rented: "False",
            unit_rent: "",
            unit_tenant: "",
            unit_lease_start: "",
            unit_lease_end: "",
            ..Self::rented(asset_ref, unit_ref)
        }
    }

    pub fn cells(&self) -> [&'static str; 16] {
        [
            self.portfolio,
            self.asset_ref,
            self.asset_address,
            self.asset_zipcode,
            self.asset_city,
            self.asset_is_restricted,
            self.asset_yoc,
            self.unit_ref,
            self.unit_size,
            self.unit_is_rented,
            self.unit_rent,
            self.unit_type,
            self.unit_tenant,
            self.unit_lease_start,
            self.unit_lease_end,
            self.data_timestamp,
        ]
    }
}

pub fn csv_with_header(header: &[&str], rows: &[FixtureRow], delimiter: char) -> Vec<u8> {
    let sep = delimiter.to_string();
    let mut out = header.join(sep.as_str());
    out.push('\n');
    for row in rows {
        out.push_str(&row.cells().join(sep.as_str()));
        out.push('\n');
    }
    out.into_bytes()
}

pub fn csv_document(rows: &[FixtureRow]) -> Vec<u8> {
    csv_with_header(&HEADER_SCHEMA, rows, ',')
}

/// Workbook with typed cells the way spreadsheet tools store them: numbers
/// for zipcode, year, size and rent, booleans for the flags. A blank row sits
/// between the rented and the vacant unit.
pub fn xlsx_document() -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in HEADER_SCHEMA.iter().enumerate() {
        sheet.write_string(0, col as u16, *name)?;
    }

    for (row, unit_ref, rented) in [(1u32, "U-1", true), (3u32, "U-2", false)] {
        sheet.write_string(row, 0, "Berlin Residential Fund")?;
        sheet.write_string(row, 1, "A-1")?;
        sheet.write_string(row, 2, "Torstrasse 12")?;
        sheet.write_number(row, 3, 10119)?;
        sheet.write_string(row, 4, "Berlin")?;
        sheet.write_boolean(row, 5, false)?;
        sheet.write_number(row, 6, 1990)?;
        sheet.write_string(row, 7, unit_ref)?;
        sheet.write_number(row, 8, 80)?;
        sheet.write_boolean(row, 9, rented)?;
        sheet.write_string(row, 11, "RESIDENTIAL")?;
        if rented {
            sheet.write_number(row, 10, 950.5)?;
            sheet.write_string(row, 12, "Jane Roe")?;
            sheet.write_string(row, 13, "01.08.20")?;
            sheet.write_string(row, 14, "01.08.95")?;
        }
        sheet.write_string(row, 15, "2024-01-31")?;
    }

    workbook.save_to_buffer()
}
