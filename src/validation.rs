use thiserror::Error;

use crate::sheet_parser::{header_matches_schema, read_header, sniff_delimiter, SheetFormat, HEADER_SCHEMA};

pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 3] = ["csv", "xls", "xlsx"];

const ALLOWED_CONTENT_SUBTYPES: [&str; 4] = [
    "csv",
    "x-csv",
    "vnd.ms-excel",
    "vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

const FORBIDDEN_NAME_CHARS: [char; 10] = [';', ':', '>', '<', '/', '*', '%', '$', '.', '\\'];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unsupported file type '{0}', only csv, xls and xlsx sheets are accepted")]
    UnsupportedType(String),
    #[error("File name must contain exactly one extension")]
    MultipleExtensions,
    #[error("File name contains forbidden characters (; : > < / * % $ . \\)")]
    ForbiddenCharacters,
    #[error("File size {0} bytes exceeds the 5 MiB limit")]
    TooLarge(usize),
    #[error("Could not detect the CSV delimiter")]
    UndetectedDelimiter,
    #[error("Could not read the header row: {0}")]
    UnreadableHeader(String),
    #[error("Header row must be exactly: {}", HEADER_SCHEMA.join(", "))]
    HeaderMismatch,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedUpload {
    pub format: SheetFormat,
    pub delimiter: Option<u8>,
}

pub fn validate_upload(file: &UploadedFile) -> Result<ValidatedUpload, ValidationError> {
    // 1. Type: extension, declared content type, single extension segment
    let format = check_type(&file.file_name, file.content_type.as_deref())?;

    // 2. Name characters
    check_name(&file.file_name)?;

    // 3. Size
    if file.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge(file.bytes.len()));
    }

    // 4. Header schema, sniffing the delimiter first for CSV
    let delimiter = match format {
        SheetFormat::Csv => {
            let text = std::str::from_utf8(&file.bytes)
                .map_err(|_| ValidationError::UndetectedDelimiter)?;
            Some(sniff_delimiter(text).ok_or(ValidationError::UndetectedDelimiter)?)
        }
        SheetFormat::Excel => None,
    };

    let header = read_header(&file.bytes, format, delimiter)
        .map_err(|e| ValidationError::UnreadableHeader(e.to_string()))?;
    if !header_matches_schema(&header) {
        return Err(ValidationError::HeaderMismatch);
    }

    Ok(ValidatedUpload { format, delimiter })
}

fn check_type(file_name: &str, content_type: Option<&str>) -> Result<SheetFormat, ValidationError> {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ValidationError::UnsupportedType(ext));
    }

    let subtype = content_type
        .and_then(|ct| ct.split(';').next())
        .and_then(|mime| mime.trim().split_once('/'))
        .map(|(_, sub)| sub.to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_CONTENT_SUBTYPES.contains(&subtype.as_str()) {
        return Err(ValidationError::UnsupportedType(
            content_type.unwrap_or("unknown").to_string(),
        ));
    }

    if file_name.matches('.').count() != 1 {
        return Err(ValidationError::MultipleExtensions);
    }

    SheetFormat::from_file_name(file_name).ok_or(ValidationError::UnsupportedType(ext))
}

fn check_name(file_name: &str) -> Result<(), ValidationError> {
    let stem = file_name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file_name);
    if stem.contains(FORBIDDEN_NAME_CHARS) {
        return Err(ValidationError::ForbiddenCharacters);
    }
    Ok(())
}
