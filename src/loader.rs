// 📂 Fund Export Loader - JSON fund exports and flat CSV share-class files

use anyhow::{bail, Context as AnyhowContext, Result};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::fs::{self, File};
use std::path::Path;
use tracing::{info, warn};

use crate::normalizer::{FundRecord, ShareClassRecord};

/// Raw fund-side input, not yet normalized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundExport {
    pub funds: Vec<FundRecord>,
    pub share_classes: Vec<ShareClassRecord>,

    /// Rows the loader skipped, with the reason
    pub rejected: Vec<String>,
}

impl FundExport {
    pub fn extend(&mut self, other: FundExport) {
        self.funds.extend(other.funds);
        self.share_classes.extend(other.share_classes);
        self.rejected.extend(other.rejected);
    }
}

/// Either a bare array of funds or an object with both lists
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonExport {
    Funds(Vec<FundRecord>),
    Document {
        #[serde(default)]
        funds: Vec<FundRecord>,
        #[serde(default)]
        share_classes: Vec<ShareClassRecord>,
    },
}

pub fn load_fund_json(path: &Path) -> Result<FundExport> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fund export: {}", path.display()))?;

    let export = match serde_json::from_str::<JsonExport>(&content)
        .with_context(|| format!("Failed to parse fund export JSON: {}", path.display()))?
    {
        JsonExport::Funds(funds) => FundExport {
            funds,
            ..Default::default()
        },
        JsonExport::Document {
            funds,
            share_classes,
        } => FundExport {
            funds,
            share_classes,
            ..Default::default()
        },
    };
    Ok(export)
}

/// Header row required: isin,name,currency,fund_identifier,distribution_type,hedged
///
/// A row that fails to deserialize is skipped and listed in `rejected`.
pub fn load_share_class_csv(path: &Path) -> Result<FundExport> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut export = FundExport::default();
    for (line_num, result) in reader.deserialize::<ShareClassRecord>().enumerate() {
        match result {
            Ok(record) => export.share_classes.push(record),
            Err(e) => {
                let reason = format!("{} line {}: {}", path.display(), line_num + 2, e);
                warn!(reason = %reason, "skipping CSV row");
                export.rejected.push(reason);
            }
        }
    }
    Ok(export)
}

/// Dispatch on file extension
pub fn load_fund_file(path: &Path) -> Result<FundExport> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    let export = match extension.as_deref() {
        Some("json") => load_fund_json(path)?,
        Some("csv") => load_share_class_csv(path)?,
        _ => bail!("Unsupported fund export format: {}", path.display()),
    };

    info!(
        path = %path.display(),
        funds = export.funds.len(),
        share_classes = export.share_classes.len(),
        rejected = export.rejected.len(),
        "fund export loaded"
    );
    Ok(export)
}

// ============================================================================
// TESTS
// ============================================================================
