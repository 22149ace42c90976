use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use std::path::{Path, PathBuf};

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 10;

/// `documents/<year>/<month>/<day>/<stem>__<suffix>.<ext>`, relative to the
/// media root.
pub fn stored_file_name<R: Rng>(original: &str, now: DateTime<Utc>, rng: &mut R) -> String {
    let (stem, ext) = original.rsplit_once('.').unwrap_or((original, ""));
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    format!(
        "documents/{}/{}/{}/{}__{}.{}",
        now.year(),
        now.month(),
        now.day(),
        stem,
        suffix,
        ext
    )
}

pub async fn save_upload(media_root: &Path, original: &str, bytes: &[u8]) -> Result<String> {
    let relative = stored_file_name(original, Utc::now(), &mut rand::thread_rng());
    let full_path = media_root.join(&relative);
    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&full_path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", full_path.display()))?;
    Ok(relative)
}

pub async fn read_document(media_root: &Path, relative: &str) -> Result<Vec<u8>> {
    let full_path: PathBuf = media_root.join(relative);
    tokio::fs::read(&full_path)
        .await
        .with_context(|| format!("Failed to read {}", full_path.display()))
}
