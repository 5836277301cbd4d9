//! Machine-readable ledger export: JSON manifest + CSV general ledger.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::balance::{Balance, Muf};
use crate::error::{AirError, Result};
use crate::store::StoreMeta;
use crate::verify::{BalancedLedger, IntegritySummary};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const LEDGER_CSV_FILE: &str = "general_ledger.csv";

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub format: String,
    pub generated_at_utc: String,
    pub software: String,
    pub context: String,
    pub store: StoreMeta,
    pub entry_count: usize,
    pub integrity: IntegritySummary,
    pub final_balance: Balance,
    /// Present when a physical inventory was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muf: Option<Muf>,
    pub notes: Vec<String>,
}

/// One CSV line: the ledger entry, its running balance and its integrity
/// status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCsvRow {
    pub line: usize,
    pub id: i64,
    pub date: String,
    pub reference: String,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub element_weight: f64,
    pub fissile_weight: f64,
    pub items: i64,
    pub balance_element: f64,
    pub balance_fissile: f64,
    pub balance_items: i64,
    pub status: String,
}

/// Where an export landed.
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub manifest: PathBuf,
    pub ledger_csv: PathBuf,
}

pub fn csv_rows(ledger: &BalancedLedger) -> Vec<LedgerCsvRow> {
    ledger
        .rows
        .iter()
        .enumerate()
        .map(|(i, (v, bal))| {
            let f = &v.record.fields;
            LedgerCsvRow {
                line: i + 1,
                id: v.record.id,
                date: f.date.clone(),
                reference: f.reference.clone(),
                code: f.icd_code.clone(),
                kind: f.kind.label().to_string(),
                element_weight: f.element_weight,
                fissile_weight: f.fissile_weight,
                items: f.items,
                balance_element: bal.element,
                balance_fissile: bal.fissile,
                balance_items: bal.items,
                status: v.status.as_str().to_string(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub fn write_ledger_export(
    out_dir: &Path,
    store: &StoreMeta,
    context: &str,
    ledger: &BalancedLedger,
    muf: Option<Muf>,
) -> Result<ExportPaths> {
    std::fs::create_dir_all(out_dir)
        .map_err(|e| AirError::Export(format!("create out dir {}: {e}", out_dir.display())))?;

    let mut notes = vec!["Rows are in store order; balances are not clamped.".to_string()];
    if ledger.summary.has_tampered() {
        notes.push(format!(
            "{} ledger row(s) failed signature verification.",
            ledger.summary.tampered
        ));
    }

    let manifest = ExportManifest {
        format: "AIR ledger-export v1".to_string(),
        generated_at_utc: crate::util::now_utc_rfc3339(),
        software: crate::util::version_string(),
        context: context.to_string(),
        store: store.clone(),
        entry_count: ledger.rows.len(),
        integrity: ledger.summary,
        final_balance: ledger.final_balance(),
        muf,
        notes,
    };

    let manifest_path = out_dir.join(MANIFEST_FILE);
    let manifest_json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| AirError::Export(format!("serialize manifest: {e}")))?;
    std::fs::write(&manifest_path, manifest_json)
        .map_err(|e| AirError::Export(format!("write {}: {e}", manifest_path.display())))?;

    let csv_path = out_dir.join(LEDGER_CSV_FILE);
    let mut wtr = csv::Writer::from_path(&csv_path)
        .map_err(|e| AirError::Export(format!("create {}: {e}", csv_path.display())))?;
    for row in csv_rows(ledger) {
        wtr.serialize(&row)
            .map_err(|e| AirError::Export(format!("write csv row {}: {e}", row.line)))?;
    }
    wtr.flush()
        .map_err(|e| AirError::Export(format!("flush {}: {e}", csv_path.display())))?;

    Ok(ExportPaths {
        manifest: manifest_path,
        ledger_csv: csv_path,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
