//! Static agency directory loader.
//!
//! The directory is a headerless CSV of `id,state,country` rows. It is read
//! once at startup; an unreadable file is fatal because without agencies
//! nothing can run.

use std::path::Path;

use anyhow::{Context, Result};

use crate::model::AgencyInfo;

/// Loads the agency directory, assigning each agency its stable ordinal in
/// file order. Rows with fewer than three fields are skipped.
pub fn load_agencies(path: &Path) -> Result<Vec<AgencyInfo>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open agency directory {}", path.display()))?;

    let mut agencies = Vec::new();
    for record in reader.records() {
        let record = record.context("failed to read agency directory row")?;
        if record.len() < 3 {
            continue;
        }
        agencies.push(AgencyInfo {
            id: record[0].trim().to_string(),
            state: record[1].trim().to_string(),
            country: record[2].trim().to_string(),
            index: agencies.len(),
        });
    }

    Ok(agencies)
}
