use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::database::Database;
use crate::logging::QUEUE_TASKS;
use crate::notifier::{processing_status_mail, MailSender};
use crate::reconcile::{reconcile_rows, ReconcileReport};
use crate::sheet_parser::{parse_sheet, SheetFormat};
use crate::storage::read_document;

/// Everything a worker needs to process one uploaded document.
pub struct ProcessingContext {
    pub db: Arc<Mutex<Database>>,
    pub media_root: PathBuf,
    pub mailer: Arc<dyn MailSender>,
    pub mail_sender: String,
    pub mail_receiver: String,
}

/// Parses and reconciles the document, then sends exactly one status mail.
/// Returns whether the batch passed. An `Err` only comes from the mail
/// transport.
pub async fn process_document(ctx: &ProcessingContext, document_id: i64) -> Result<bool> {
    let passed = match ingest_document(ctx, document_id).await {
        Ok(report) => {
            info!(
                target: QUEUE_TASKS,
                document_id,
                rows = report.rows,
                portfolios_created = report.portfolios_created,
                assets_created = report.assets_created,
                units_created = report.units_created,
                units_updated = report.units_updated,
                units_unchanged = report.units_unchanged,
                "[DOCUMENT PROCESSING - PASSED] Processed successfully, mail sent to {}",
                ctx.mail_receiver
            );
            true
        }
        Err(e) => {
            error!(
                target: QUEUE_TASKS,
                document_id,
                "[DOCUMENT PROCESSING - FAILED] Processing failure, mail sent to {}. Error: {:#}",
                ctx.mail_receiver,
                e
            );
            false
        }
    };

    let mail = processing_status_mail(&ctx.mail_sender, &ctx.mail_receiver, passed);
    ctx.mailer.send(&mail).await?;
    Ok(passed)
}

async fn ingest_document(ctx: &ProcessingContext, document_id: i64) -> Result<ReconcileReport> {
    // 1. Document record
    let document = {
        let db = ctx.db.lock().await;
        db.get_document(document_id)?
    }
    .with_context(|| format!("Document {} does not exist", document_id))?;

    // 2. Rows, parsed outside the DB lock
    let bytes = read_document(&ctx.media_root, &document.file).await?;
    let format = SheetFormat::from_file_name(&document.file)
        .with_context(|| format!("Unsupported document type: {}", document.file))?;
    let rows = parse_sheet(&bytes, format, document.delimiter)?;
    info!(target: QUEUE_TASKS, document_id, rows = rows.len(), "Parsed {}", document.file);

    // 3. Reconcile the batch under one lock so rows apply in order
    let db = ctx.db.lock().await;
    reconcile_rows(&db, &rows, Utc::now().year())
}
