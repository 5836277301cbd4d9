//! Durable SQLite store for ledger, MBR, LII, NLI, receipt and backup rows.
//!
//! Rows are append-mostly: every `append_*` inserts exactly one new row and
//! never updates an existing one; deletes are hard deletes.  Identifiers come
//! from `AUTOINCREMENT`, so a deleted id is never handed out again and
//! ascending id is the chronological transaction order.

use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, DatabaseName, OptionalExtension as _, Row,
    TransactionBehavior,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AirError, OptionExt as _, Result, ResultExt as _};
use crate::records::{
    BackupRecord, Batch, HistoryRecord, LedgerEntry, LedgerFields, LiiEntry, LiiFields,
    MbrEntry, MbrFields, NliEntry, NliFields, ReceiptInput, RecordKind, TransactionType,
    BATCH_ACTIVE,
};
use crate::signing;

pub const STORE_SCHEMA_VERSION: i64 = 1;

/// Maximum rows returned by [`LedgerStore::receipts`].
pub const RECEIPT_LIST_LIMIT: i64 = 50;

const SCHEMA: &str = r#"
    PRAGMA journal_mode=DELETE;
    PRAGMA synchronous=FULL;
    PRAGMA foreign_keys=ON;

    CREATE TABLE IF NOT EXISTS meta(
      k TEXT PRIMARY KEY,
      v TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS batches(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      batch_number TEXT NOT NULL UNIQUE,
      mba TEXT, kmp TEXT, building TEXT, room TEXT,
      physical_form TEXT, chemical_form TEXT, element TEXT, isotope TEXT,
      weight_u REAL, weight_u235 REAL, weight_pu REAL, weight_th REAL,
      unit TEXT, manufacturer TEXT, insertion_date TEXT, status TEXT
    );

    CREATE TABLE IF NOT EXISTS history(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      batch_id INTEGER NOT NULL REFERENCES batches(id),
      change_type TEXT, element_code TEXT,
      items_count INTEGER, increase_u REAL, decrease_u REAL,
      record_date TEXT, description TEXT
    );

    CREATE TABLE IF NOT EXISTS backups(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      title TEXT, description TEXT,
      filename TEXT, created_date TEXT, created_by TEXT
    );

    CREATE TABLE IF NOT EXISTS manual_ledger(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      date TEXT, ref TEXT, code TEXT, type TEXT,
      u_weight REAL, u235_weight REAL, items INTEGER, signature TEXT
    );

    CREATE TABLE IF NOT EXISTS lii_manual(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      kmp TEXT, position TEXT, batch TEXT, desc TEXT,
      weight_elem REAL, weight_fissile REAL, weight_pu REAL,
      burnup REAL, cooling REAL
    );

    CREATE TABLE IF NOT EXISTS nli_manual(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      batch TEXT, items INTEGER, code TEXT,
      u_elem_code TEXT, u_iso_code TEXT, u_weight REAL, u_iso_weight REAL,
      p_elem_code TEXT, p_weight REAL
    );

    CREATE TABLE IF NOT EXISTS mbr_entries(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      continuation TEXT, entry_name TEXT, element TEXT,
      weight REAL, unit TEXT, fissile REAL,
      isotope TEXT, report_no TEXT, signature TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_history_batch ON history(batch_id);
    CREATE INDEX IF NOT EXISTS idx_batches_mba ON batches(mba);
"#;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub store_id: Uuid,
    pub created_at: String,
    pub schema_version: i64,
}

/// Ids assigned by [`LedgerStore::register_receipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptIds {
    pub batch_id: i64,
    pub history_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRow {
    pub history_id: i64,
    pub record_date: String,
    pub change_type: String,
    pub batch_number: String,
    pub items: i64,
    pub element: String,
    pub increase: f64,
    pub fissile_weight: f64,
}

/// Inventory Change Report line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcrRow {
    pub record_date: String,
    pub change_type: String,
    pub items: i64,
    pub batch_number: String,
    pub physical_form: String,
    pub element: String,
    pub increase: f64,
    pub decrease: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralLedgerRow {
    pub record_date: String,
    pub batch_number: String,
    pub change_type: String,
    pub element_code: String,
    pub items: i64,
    pub increase: f64,
    pub decrease: f64,
    pub batch_element_weight: f64,
    pub batch_fissile_weight: f64,
}

/// Material category filter for batch-based ledger reports; matches batches
/// whose element name starts with the category prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ElementFilter {
    #[default]
    All,
    DepletedUranium,
    NaturalUranium,
    EnrichedUranium,
    Plutonium,
    Thorium,
}

impl ElementFilter {
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::DepletedUranium => Some("Depleted"),
            Self::NaturalUranium => Some("Natural"),
            Self::EnrichedUranium => Some("Enriched"),
            Self::Plutonium => Some("Plutonium"),
            Self::Thorium => Some("Thorium"),
        }
    }

    /// Labels as shown in the material selector; anything else means all.
    pub fn from_label(label: &str) -> Self {
        match label {
            "Depleted Uranium" => Self::DepletedUranium,
            "Natural Uranium" => Self::NaturalUranium,
            "Enriched Uranium" => Self::EnrichedUranium,
            "Plutonium" => Self::Plutonium,
            "Thorium" => Self::Thorium,
            _ => Self::All,
        }
    }
}

/// Summed physical inventory from the LII listing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicalTotals {
    pub element_weight: f64,
    pub fissile_weight: f64,
    pub plutonium_weight: f64,
    pub items: i64,
}

// ---------------------------------------------------------------------------
// Filter builder
// ---------------------------------------------------------------------------

/// `WHERE` clause assembled from bound parameters; values never reach the
/// SQL text.
#[derive(Debug, Default)]
struct SqlFilter {
    conditions: Vec<String>,
    params: Vec<String>,
}

impl SqlFilter {
    fn bind(&mut self, value: String) -> usize {
        self.params.push(value);
        self.params.len()
    }

    fn eq(mut self, column: &str, value: &str) -> Self {
        let n = self.bind(value.to_string());
        self.conditions.push(format!("{column} = ?{n}"));
        self
    }

    fn at_least(mut self, column: &str, value: &str) -> Self {
        let n = self.bind(value.to_string());
        self.conditions.push(format!("{column} >= ?{n}"));
        self
    }

    fn at_most(mut self, column: &str, value: &str) -> Self {
        let n = self.bind(value.to_string());
        self.conditions.push(format!("{column} <= ?{n}"));
        self
    }

    fn starts_with(mut self, column: &str, prefix: &str) -> Self {
        let n = self.bind(format!("{}%", escape_like(prefix)));
        self.conditions
            .push(format!("{column} LIKE ?{n} ESCAPE '\\'"));
        self
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Loose column readers
// ---------------------------------------------------------------------------

// Rows may have been written outside the application (seed data, tampering),
// so columns are read leniently instead of failing the whole listing.

fn text_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get::<_, Value>(idx)? {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    })
}

fn real_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<f64> {
    Ok(match row.get::<_, Value>(idx)? {
        Value::Integer(i) => i as f64,
        Value::Real(r) => r,
        Value::Text(s) => s.trim().parse().unwrap_or(0.0),
        Value::Null | Value::Blob(_) => 0.0,
    })
}

fn int_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<i64> {
    Ok(match row.get::<_, Value>(idx)? {
        Value::Integer(i) => i,
        Value::Real(r) => r as i64,
        Value::Text(s) => s.trim().parse().unwrap_or(0),
        Value::Null | Value::Blob(_) => 0,
    })
}

const LEDGER_COLUMNS: &str =
    "id, date, ref, code, type, u_weight, u235_weight, items, signature";

fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        fields: LedgerFields {
            date: text_col(row, 1)?,
            reference: text_col(row, 2)?,
            icd_code: text_col(row, 3)?,
            kind: TransactionType::from_label(&text_col(row, 4)?),
            element_weight: real_col(row, 5)?,
            fissile_weight: real_col(row, 6)?,
            items: int_col(row, 7)?,
        },
        signature: text_col(row, 8)?,
    })
}

const MBR_COLUMNS: &str =
    "id, continuation, entry_name, element, weight, unit, fissile, isotope, report_no, signature";

fn mbr_from_row(row: &Row<'_>) -> rusqlite::Result<MbrEntry> {
    Ok(MbrEntry {
        id: row.get(0)?,
        fields: MbrFields {
            continuation: text_col(row, 1)?,
            entry_name: text_col(row, 2)?,
            element_code: text_col(row, 3)?,
            weight: real_col(row, 4)?,
            unit: text_col(row, 5)?,
            fissile_weight: real_col(row, 6)?,
            isotope_code: text_col(row, 7)?,
            report_no: text_col(row, 8)?,
        },
        signature: text_col(row, 9)?,
    })
}

const BATCH_COLUMNS: &str = "id, batch_number, mba, kmp, building, room, physical_form, \
     chemical_form, element, weight_u, weight_u235, weight_pu, weight_th, unit, \
     manufacturer, insertion_date, status";

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: row.get(0)?,
        batch_number: text_col(row, 1)?,
        mba: text_col(row, 2)?,
        kmp: text_col(row, 3)?,
        building: text_col(row, 4)?,
        room: text_col(row, 5)?,
        physical_form: text_col(row, 6)?,
        chemical_form: text_col(row, 7)?,
        element: text_col(row, 8)?,
        element_weight: real_col(row, 9)?,
        fissile_weight: real_col(row, 10)?,
        plutonium_weight: real_col(row, 11)?,
        thorium_weight: real_col(row, 12)?,
        unit: text_col(row, 13)?,
        manufacturer: text_col(row, 14)?,
        insertion_date: text_col(row, 15)?,
        status: text_col(row, 16)?,
    })
}

const HISTORY_COLUMNS: &str = "id, batch_id, change_type, element_code, items_count, \
     increase_u, decrease_u, record_date, description";

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    Ok(HistoryRecord {
        id: row.get(0)?,
        batch_id: int_col(row, 1)?,
        change_type: text_col(row, 2)?,
        element_code: text_col(row, 3)?,
        items: int_col(row, 4)?,
        increase: real_col(row, 5)?,
        decrease: real_col(row, 6)?,
        record_date: text_col(row, 7)?,
        description: text_col(row, 8)?,
    })
}

const BACKUP_COLUMNS: &str = "id, title, description, filename, created_date, created_by";

fn backup_from_row(row: &Row<'_>) -> rusqlite::Result<BackupRecord> {
    Ok(BackupRecord {
        id: row.get(0)?,
        title: text_col(row, 1)?,
        description: text_col(row, 2)?,
        filename: text_col(row, 3)?,
        created_date: text_col(row, 4)?,
        created_by: text_col(row, 5)?,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct LedgerStore {
    conn: Connection,
    path: PathBuf,
    meta: StoreMeta,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl LedgerStore {
    /// Open the store at `db_path`, creating the file and schema if missing.
    pub fn open(db_path: &Path) -> Result<Self> {
        crate::util::validate_path(db_path, "store")?;
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AirError::Other(format!("create db parent dir {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        let meta = load_or_init_meta(&conn)?;
        debug!(path = %db_path.display(), store_id = %meta.store_id, "store opened");

        Ok(Self {
            conn,
            path: db_path.to_path_buf(),
            meta,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Close the underlying connection, surfacing any error from SQLite.
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| AirError::Database(e))?;
        debug!(path = %path.display(), "store closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // General ledger
    // -----------------------------------------------------------------------

    /// Sign and append one ledger line.
    pub fn append_ledger_entry(&self, fields: &LedgerFields) -> Result<LedgerEntry> {
        let signature = signing::sign(fields);
        let id = self.insert_ledger_row(fields, &signature)?;
        Ok(LedgerEntry {
            id,
            fields: fields.clone(),
            signature,
        })
    }

    /// Append with a caller-chosen signature.  Only training seed data may
    /// write unsigned (empty) or deliberately forged signatures.
    pub(crate) fn insert_ledger_row(&self, fields: &LedgerFields, signature: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO manual_ledger(date, ref, code, type, u_weight, u235_weight, items, signature) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    fields.date,
                    fields.reference,
                    fields.icd_code,
                    fields.kind.label(),
                    fields.element_weight,
                    fields.fissile_weight,
                    fields.items,
                    signature,
                ],
            )
            .map_err(|e| AirError::from_write(e, "insert ledger entry"))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn ledger_entry(&self, id: i64) -> Result<LedgerEntry> {
        self.conn
            .query_row(
                &format!("SELECT {LEDGER_COLUMNS} FROM manual_ledger WHERE id = ?1"),
                params![id],
                ledger_from_row,
            )
            .optional()?
            .required_found(&format!("ledger entry {id}"))
    }

    /// All ledger lines in insertion (= transaction) order.
    pub fn list_ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {LEDGER_COLUMNS} FROM manual_ledger ORDER BY id ASC"
            ))?;
        let rows = stmt.query_map([], ledger_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Material Balance Report
    // -----------------------------------------------------------------------

    pub fn append_mbr_entry(&self, fields: &MbrFields) -> Result<MbrEntry> {
        let signature = signing::sign(fields);
        let id = self.insert_mbr_row(fields, &signature)?;
        Ok(MbrEntry {
            id,
            fields: fields.clone(),
            signature,
        })
    }

    pub(crate) fn insert_mbr_row(&self, fields: &MbrFields, signature: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO mbr_entries(continuation, entry_name, element, weight, unit, fissile, isotope, report_no, signature) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    fields.continuation,
                    fields.entry_name,
                    fields.element_code,
                    fields.weight,
                    fields.unit,
                    fields.fissile_weight,
                    fields.isotope_code,
                    fields.report_no,
                    signature,
                ],
            )
            .map_err(|e| AirError::from_write(e, "insert MBR entry"))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn mbr_entry(&self, id: i64) -> Result<MbrEntry> {
        self.conn
            .query_row(
                &format!("SELECT {MBR_COLUMNS} FROM mbr_entries WHERE id = ?1"),
                params![id],
                mbr_from_row,
            )
            .optional()?
            .required_found(&format!("MBR entry {id}"))
    }

    /// MBR lines in ascending id order; with `limit`, only the most recent
    /// `limit` lines (still ascending).
    pub fn list_mbr_entries(&self, limit: Option<usize>) -> Result<Vec<MbrEntry>> {
        let mut out = match limit {
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT {MBR_COLUMNS} FROM mbr_entries ORDER BY id ASC"))?;
                let rows = stmt.query_map([], mbr_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some(n) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {MBR_COLUMNS} FROM mbr_entries ORDER BY id DESC LIMIT ?1"
                ))?;
                let limit = i64::try_from(n).unwrap_or(i64::MAX);
                let rows = stmt.query_map(params![limit], mbr_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        if limit.is_some() {
            out.reverse();
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // LII / NLI
    // -----------------------------------------------------------------------

    pub fn append_lii_entry(&self, fields: &LiiFields) -> Result<LiiEntry> {
        self.conn
            .execute(
                "INSERT INTO lii_manual(kmp, position, batch, desc, weight_elem, weight_fissile, weight_pu, burnup, cooling) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,0.0)",
                params![
                    fields.kmp,
                    fields.position,
                    fields.batch,
                    fields.description,
                    fields.element_weight,
                    fields.fissile_weight,
                    fields.plutonium_weight,
                    fields.burnup,
                ],
            )
            .map_err(|e| AirError::from_write(e, "insert LII entry"))?;
        Ok(LiiEntry {
            id: self.conn.last_insert_rowid(),
            fields: fields.clone(),
            cooling: 0.0,
        })
    }

    pub fn list_lii_entries(&self) -> Result<Vec<LiiEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kmp, position, batch, desc, weight_elem, weight_fissile, weight_pu, burnup, cooling \
             FROM lii_manual ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LiiEntry {
                id: row.get(0)?,
                fields: LiiFields {
                    kmp: text_col(row, 1)?,
                    position: text_col(row, 2)?,
                    batch: text_col(row, 3)?,
                    description: text_col(row, 4)?,
                    element_weight: real_col(row, 5)?,
                    fissile_weight: real_col(row, 6)?,
                    plutonium_weight: real_col(row, 7)?,
                    burnup: real_col(row, 8)?,
                },
                cooling: real_col(row, 9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Physical inventory totals over every LII line.
    pub fn lii_totals(&self) -> Result<PhysicalTotals> {
        let totals = self
            .list_lii_entries()?
            .iter()
            .fold(PhysicalTotals::default(), |mut acc, e| {
                acc.element_weight += e.fields.element_weight;
                acc.fissile_weight += e.fields.fissile_weight;
                acc.plutonium_weight += e.fields.plutonium_weight;
                acc.items += 1;
                acc
            });
        Ok(totals)
    }

    pub fn append_nli_entry(&self, fields: &NliFields) -> Result<NliEntry> {
        self.conn
            .execute(
                "INSERT INTO nli_manual(batch, items, code, u_elem_code, u_iso_code, u_weight, u_iso_weight, p_elem_code, p_weight) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    fields.batch,
                    fields.items,
                    fields.icd_code,
                    fields.u_element_code,
                    fields.u_isotope_code,
                    fields.u_weight,
                    fields.u_isotope_weight,
                    fields.pu_element_code,
                    fields.pu_weight,
                ],
            )
            .map_err(|e| AirError::from_write(e, "insert NLI entry"))?;
        Ok(NliEntry {
            id: self.conn.last_insert_rowid(),
            fields: fields.clone(),
        })
    }

    pub fn list_nli_entries(&self) -> Result<Vec<NliEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, batch, items, code, u_elem_code, u_iso_code, u_weight, u_iso_weight, p_elem_code, p_weight \
             FROM nli_manual ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(NliEntry {
                id: row.get(0)?,
                fields: NliFields {
                    batch: text_col(row, 1)?,
                    items: int_col(row, 2)?,
                    icd_code: text_col(row, 3)?,
                    u_element_code: text_col(row, 4)?,
                    u_isotope_code: text_col(row, 5)?,
                    u_weight: real_col(row, 6)?,
                    u_isotope_weight: real_col(row, 7)?,
                    pu_element_code: text_col(row, 8)?,
                    pu_weight: real_col(row, 9)?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Receipts (batch + history, all-or-nothing)
    // -----------------------------------------------------------------------

    /// Insert a batch and its receipt history row in one transaction.  A
    /// duplicate batch number is a [`AirError::WriteFailed`]; either insert
    /// failing rolls both back.
    pub fn register_receipt(&mut self, input: &ReceiptInput) -> Result<ReceiptIds> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO batches(batch_number, mba, kmp, building, room, physical_form, chemical_form, \
             element, weight_u, weight_u235, unit, manufacturer, insertion_date, status) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                input.batch_number,
                input.to_mba,
                input.kmp,
                input.building,
                input.room,
                input.physical_form,
                input.chemical_form,
                input.element,
                input.element_weight,
                input.fissile_weight,
                input.unit,
                input.manufacturer,
                input.date,
                BATCH_ACTIVE,
            ],
        )
        .map_err(|e| AirError::from_write(e, &format!("insert batch {}", input.batch_number)))?;
        let batch_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO history(batch_id, change_type, element_code, items_count, increase_u, decrease_u, record_date, description) \
             VALUES (?1,?2,'D',?3,?4,0,?5,?6)",
            params![
                batch_id,
                input.receipt_code,
                input.items,
                input.element_weight,
                input.date,
                format!("Receipt from {}", input.from_mba),
            ],
        )
        .map_err(|e| AirError::from_write(e, "insert receipt history"))?;
        let history_id = tx.last_insert_rowid();

        // Dropping `tx` on any early return above rolls back.
        tx.commit()?;
        info!(batch = %input.batch_number, batch_id, history_id, "receipt registered");
        Ok(ReceiptIds {
            batch_id,
            history_id,
        })
    }

    pub fn batch(&self, id: i64) -> Result<Batch> {
        self.conn
            .query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
                params![id],
                batch_from_row,
            )
            .optional()?
            .required_found(&format!("batch {id}"))
    }

    pub fn batch_by_number(&self, batch_number: &str) -> Result<Option<Batch>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE batch_number = ?1"),
                params![batch_number],
                batch_from_row,
            )
            .optional()?)
    }

    pub fn list_batches(&self) -> Result<Vec<Batch>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {BATCH_COLUMNS} FROM batches ORDER BY id ASC"))?;
        let rows = stmt.query_map([], batch_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Change a batch's status (e.g. `Active` to `Shipped`).
    pub fn set_batch_status(&self, id: i64, status: &str) -> Result<()> {
        let n = self
            .conn
            .execute(
                "UPDATE batches SET status = ?1 WHERE id = ?2",
                params![status, id],
            )
            .map_err(|e| AirError::from_write(e, "update batch status"))?;
        if n == 0 {
            return Err(AirError::NotFound(format!("batch {id}")));
        }
        Ok(())
    }

    pub fn list_history(&self) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {HISTORY_COLUMNS} FROM history ORDER BY id ASC"))?;
        let rows = stmt.query_map([], history_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn history_for_batch(&self, batch_id: i64) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history WHERE batch_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![batch_id], history_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Administrative delete
    // -----------------------------------------------------------------------

    /// Hard-delete one row.  Missing ids are [`AirError::NotFound`].
    pub fn delete(&self, kind: RecordKind, id: i64) -> Result<()> {
        let n = self
            .conn
            .execute(&format!("DELETE FROM {} WHERE id = ?1", kind.table()), params![id])
            .map_err(|e| AirError::from_write(e, &format!("delete {kind:?} {id}")))?;
        if n == 0 {
            return Err(AirError::NotFound(format!("{kind:?} {id}")));
        }
        info!(?kind, id, "record deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Report queries
    // -----------------------------------------------------------------------

    /// Latest receipt history rows (`RD`, `RF`, `RN`), ascending id.
    pub fn receipts(&self) -> Result<Vec<ReceiptRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT h.id, h.record_date, h.change_type, b.batch_number, h.items_count, \
             b.element, h.increase_u, b.weight_u235 \
             FROM history h JOIN batches b ON h.batch_id = b.id \
             WHERE h.change_type IN ('RD', 'RF', 'RN') \
             ORDER BY h.id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![RECEIPT_LIST_LIMIT], |row| {
            Ok(ReceiptRow {
                history_id: row.get(0)?,
                record_date: text_col(row, 1)?,
                change_type: text_col(row, 2)?,
                batch_number: text_col(row, 3)?,
                items: int_col(row, 4)?,
                element: text_col(row, 5)?,
                increase: real_col(row, 6)?,
                fissile_weight: real_col(row, 7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Inventory Change Report rows for one MBA whose record date lies in
    /// `[start, end]` (compared as text).
    pub fn icr_rows(&self, mba: &str, start: &str, end: &str) -> Result<Vec<IcrRow>> {
        let filter = SqlFilter::default()
            .eq("b.mba", mba)
            .at_least("h.record_date", start)
            .at_most("h.record_date", end);
        let sql = format!(
            "SELECT h.record_date, h.change_type, h.items_count, b.batch_number, \
             b.physical_form, b.element, h.increase_u, h.decrease_u, h.description \
             FROM history h JOIN batches b ON h.batch_id = b.id {} ORDER BY h.id ASC",
            filter.where_clause()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params.iter()), |row| {
            Ok(IcrRow {
                record_date: text_col(row, 0)?,
                change_type: text_col(row, 1)?,
                items: int_col(row, 2)?,
                batch_number: text_col(row, 3)?,
                physical_form: text_col(row, 4)?,
                element: text_col(row, 5)?,
                increase: real_col(row, 6)?,
                decrease: real_col(row, 7)?,
                description: text_col(row, 8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active batches of an MBA, ordered by KMP then batch number.
    pub fn lii_batches(&self, mba: &str) -> Result<Vec<Batch>> {
        let filter = SqlFilter::default()
            .eq("mba", mba)
            .eq("status", BATCH_ACTIVE);
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches {} ORDER BY kmp, batch_number",
            filter.where_clause()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params.iter()), batch_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Batch history for an MBA, optionally restricted to one material
    /// category by element-name prefix; ordered by record date then id.
    pub fn general_ledger_rows(
        &self,
        mba: &str,
        element: ElementFilter,
    ) -> Result<Vec<GeneralLedgerRow>> {
        let mut filter = SqlFilter::default().eq("b.mba", mba);
        if let Some(prefix) = element.prefix() {
            filter = filter.starts_with("b.element", prefix);
        }
        let sql = format!(
            "SELECT h.record_date, b.batch_number, h.change_type, h.element_code, \
             h.items_count, h.increase_u, h.decrease_u, b.weight_u, b.weight_u235 \
             FROM history h JOIN batches b ON h.batch_id = b.id {} \
             ORDER BY h.record_date ASC, h.id ASC",
            filter.where_clause()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params.iter()), |row| {
            Ok(GeneralLedgerRow {
                record_date: text_col(row, 0)?,
                batch_number: text_col(row, 1)?,
                change_type: text_col(row, 2)?,
                element_code: text_col(row, 3)?,
                items: int_col(row, 4)?,
                increase: real_col(row, 5)?,
                decrease: real_col(row, 6)?,
                batch_element_weight: real_col(row, 7)?,
                batch_fissile_weight: real_col(row, 8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Backup catalogue + snapshots
    // -----------------------------------------------------------------------

    pub fn insert_backup_record(
        &self,
        title: &str,
        description: &str,
        filename: &str,
        created_date: &str,
        created_by: &str,
    ) -> Result<BackupRecord> {
        self.conn
            .execute(
                "INSERT INTO backups(title, description, filename, created_date, created_by) \
                 VALUES (?1,?2,?3,?4,?5)",
                params![title, description, filename, created_date, created_by],
            )
            .map_err(|e| AirError::from_write(e, "insert backup record"))?;
        Ok(BackupRecord {
            id: self.conn.last_insert_rowid(),
            title: title.to_string(),
            description: description.to_string(),
            filename: filename.to_string(),
            created_date: created_date.to_string(),
            created_by: created_by.to_string(),
        })
    }

    pub fn backup_record(&self, id: i64) -> Result<BackupRecord> {
        self.conn
            .query_row(
                &format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE id = ?1"),
                params![id],
                backup_from_row,
            )
            .optional()?
            .required_found(&format!("backup {id}"))
    }

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {BACKUP_COLUMNS} FROM backups ORDER BY id ASC"))?;
        let rows = stmt.query_map([], backup_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_backup_record(&self, id: i64) -> Result<()> {
        let n = self
            .conn
            .execute("DELETE FROM backups WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(AirError::NotFound(format!("backup {id}")));
        }
        Ok(())
    }

    /// Replace the whole backup catalogue, ids preserved, in one transaction.
    pub(crate) fn replace_backup_catalogue(&mut self, records: &[BackupRecord]) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM backups", [])?;
        for r in records {
            tx.execute(
                "INSERT INTO backups(id, title, description, filename, created_date, created_by) \
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![r.id, r.title, r.description, r.filename, r.created_date, r.created_by],
            )
            .map_err(|e| AirError::from_write(e, "carry over backup record"))?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Write a transactionally consistent copy of the whole store to `dest`
    /// using SQLite's online backup API.
    pub fn snapshot_to(&self, dest: &Path) -> Result<()> {
        self.conn
            .backup(DatabaseName::Main, dest, None)
            .ctx_backup(&format!("snapshot to {}", dest.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

fn meta_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT v FROM meta WHERE k = ?1", params![key], |row| row.get(0))
        .optional()?)
}

fn load_or_init_meta(conn: &Connection) -> Result<StoreMeta> {
    if let Some(id) = meta_value(conn, "store_id")? {
        let created_at = meta_value(conn, "created_at")?.unwrap_or_default();
        let schema_version: i64 = meta_value(conn, "schema_version")?
            .unwrap_or_else(|| STORE_SCHEMA_VERSION.to_string())
            .parse()
            .ctx_store("parse schema_version")?;
        if schema_version != STORE_SCHEMA_VERSION {
            return Err(AirError::Other(format!(
                "unsupported schema_version {schema_version} (expected {STORE_SCHEMA_VERSION})"
            )));
        }
        return Ok(StoreMeta {
            store_id: Uuid::parse_str(&id).ctx_store("parse store_id uuid")?,
            created_at,
            schema_version,
        });
    }

    let meta = StoreMeta {
        store_id: Uuid::new_v4(),
        created_at: crate::util::display_timestamp(crate::util::now_local()),
        schema_version: STORE_SCHEMA_VERSION,
    };
    for (k, v) in [
        ("store_id", meta.store_id.to_string()),
        ("created_at", meta.created_at.clone()),
        ("schema_version", meta.schema_version.to_string()),
    ] {
        conn.execute("INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)", params![k, v])?;
    }
    Ok(meta)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::field_map;
    use tempfile::tempdir;

    fn entry(kind: TransactionType, u: f64, u235: f64, items: i64) -> LedgerFields {
        LedgerFields::new("260101", "ICD-1", "RD", kind, u, u235, items).unwrap()
    }

    fn receipt(batch: &str) -> ReceiptInput {
        ReceiptInput::from_fields(&field_map([
            ("batch_number", batch),
            ("to_mba", "MBA-A"),
            ("from_mba", "MBA-X"),
            ("kmp", "FFS"),
            ("element", "Enriched Uranium"),
            ("weight_u", "1000"),
            ("weight_u235", "35"),
            ("date", "260215"),
            ("receipt_code", "RD"),
            ("count", "2"),
        ]))
        .unwrap()
    }

    #[test]
    fn create_and_reopen_keeps_meta() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("store.db");
        let store = LedgerStore::open(&db).unwrap();
        let id = store.meta().store_id;
        store.close().unwrap();

        let again = LedgerStore::open(&db).unwrap();
        assert_eq!(again.meta().store_id, id);
        assert_eq!(again.meta().schema_version, STORE_SCHEMA_VERSION);
    }

    #[test]
    fn append_assigns_ascending_ids_and_signs() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        let a = store
            .append_ledger_entry(&entry(TransactionType::Receipt, 1.0, 0.1, 1))
            .unwrap();
        let b = store
            .append_ledger_entry(&entry(TransactionType::Shipment, 1.0, 0.1, 1))
            .unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.signature, signing::sign(&a.fields));

        let listed = store.list_ledger_entries().unwrap();
        assert_eq!(listed, vec![a, b]);
    }

    #[test]
    fn deleted_ids_are_gone_and_not_reused() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        let a = store
            .append_ledger_entry(&entry(TransactionType::Receipt, 1.0, 0.1, 1))
            .unwrap();
        store.delete(RecordKind::Ledger, a.id).unwrap();
        assert!(matches!(store.ledger_entry(a.id), Err(AirError::NotFound(_))));
        assert!(matches!(
            store.delete(RecordKind::Ledger, a.id),
            Err(AirError::NotFound(_))
        ));

        let b = store
            .append_ledger_entry(&entry(TransactionType::Receipt, 1.0, 0.1, 1))
            .unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.list_ledger_entries().unwrap().len(), 1);
    }

    #[test]
    fn mbr_limit_returns_latest_in_ascending_order() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        for i in 0..5 {
            let w = i.to_string();
            let f = MbrFields::from_fields(&field_map([
                ("entry_name", "RD"),
                ("element", "E"),
                ("weight", w.as_str()),
            ]))
            .unwrap();
            store.append_mbr_entry(&f).unwrap();
        }
        let last = store.list_mbr_entries(Some(2)).unwrap();
        assert_eq!(last.len(), 2);
        assert!(last[0].id < last[1].id);
        assert_eq!(last[1].fields.weight, 4.0);
        assert_eq!(store.list_mbr_entries(None).unwrap().len(), 5);
        assert_eq!(store.list_mbr_entries(Some(usize::MAX)).unwrap().len(), 5);
        assert!(store.list_mbr_entries(Some(0)).unwrap().is_empty());
    }

    #[test]
    fn receipt_inserts_batch_and_history() {
        let dir = tempdir().unwrap();
        let mut store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        let ids = store.register_receipt(&receipt("B-001")).unwrap();

        let batch = store.batch(ids.batch_id).unwrap();
        assert_eq!(batch.status, BATCH_ACTIVE);
        assert_eq!(batch.mba, "MBA-A");

        let history = store.history_for_batch(ids.batch_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, ids.history_id);
        assert_eq!(history[0].change_type, "RD");
        assert_eq!(history[0].element_code, "D");
        assert_eq!(history[0].increase, 1000.0);
        assert_eq!(history[0].decrease, 0.0);
        assert_eq!(history[0].description, "Receipt from MBA-X");

        let rows = store.receipts().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch_number, "B-001");
    }

    #[test]
    fn duplicate_batch_is_rejected_write() {
        let dir = tempdir().unwrap();
        let mut store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        store.register_receipt(&receipt("B-001")).unwrap();
        let err = store.register_receipt(&receipt("B-001")).unwrap_err();
        assert!(matches!(err, AirError::WriteFailed(_)));
        assert_eq!(store.list_batches().unwrap().len(), 1);
        assert_eq!(store.list_history().unwrap().len(), 1);
    }

    #[test]
    fn batch_status_can_change() {
        let dir = tempdir().unwrap();
        let mut store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        let ids = store.register_receipt(&receipt("B-001")).unwrap();
        store.set_batch_status(ids.batch_id, "Shipped").unwrap();
        assert!(store.lii_batches("MBA-A").unwrap().is_empty());
        assert!(matches!(
            store.set_batch_status(999, "Shipped"),
            Err(AirError::NotFound(_))
        ));
    }

    #[test]
    fn general_ledger_filters_by_element_prefix() {
        let dir = tempdir().unwrap();
        let mut store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        store.register_receipt(&receipt("B-001")).unwrap();
        let mut natural = receipt("B-002");
        natural.element = "Natural Uranium".into();
        store.register_receipt(&natural).unwrap();

        let all = store.general_ledger_rows("MBA-A", ElementFilter::All).unwrap();
        assert_eq!(all.len(), 2);
        let enriched = store
            .general_ledger_rows("MBA-A", ElementFilter::from_label("Enriched Uranium"))
            .unwrap();
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].batch_number, "B-001");
        assert!(store
            .general_ledger_rows("MBA-A", ElementFilter::Thorium)
            .unwrap()
            .is_empty());
        assert!(store
            .general_ledger_rows("MBA-B", ElementFilter::All)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn like_wildcards_in_values_are_literal() {
        assert_eq!(escape_like("50%_a\\"), "50\\%\\_a\\\\");
        let f = SqlFilter::default().eq("a", "x").starts_with("b", "Nat");
        assert_eq!(f.where_clause(), "WHERE a = ?1 AND b LIKE ?2 ESCAPE '\\'");
        assert_eq!(f.params, vec!["x".to_string(), "Nat%".to_string()]);
    }

    #[test]
    fn icr_rows_respect_date_window() {
        let dir = tempdir().unwrap();
        let mut store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        store.register_receipt(&receipt("B-001")).unwrap();
        let mut later = receipt("B-002");
        later.date = "260401".into();
        store.register_receipt(&later).unwrap();

        let rows = store.icr_rows("MBA-A", "260201", "260301").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch_number, "B-001");
    }

    #[test]
    fn lii_totals_sum_physical_inventory() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        for w in ["4000", "4000", "2900.5"] {
            let f = LiiFields::from_fields(&field_map([
                ("kmp", "FFS"),
                ("batch", "X"),
                ("weight_elem", w),
                ("weight_fissile", "10"),
            ]))
            .unwrap();
            store.append_lii_entry(&f).unwrap();
        }
        let t = store.lii_totals().unwrap();
        assert_eq!(t.items, 3);
        assert_eq!(t.element_weight, 10900.5);
        assert_eq!(t.fissile_weight, 30.0);
    }

    #[test]
    fn loosely_typed_columns_still_load() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("s.db");
        let store = LedgerStore::open(&db).unwrap();
        let raw = Connection::open(&db).unwrap();
        raw.execute(
            "INSERT INTO manual_ledger(date, ref, code, type, u_weight, u235_weight, items, signature) \
             VALUES (260101, NULL, 'PB', 'Receipt', 'abc', 2.5, 1.9, NULL)",
            [],
        )
        .unwrap();
        let rows = store.list_ledger_entries().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields.date, "260101");
        assert_eq!(rows[0].fields.element_weight, 0.0);
        assert_eq!(rows[0].fields.items, 1);
        assert!(rows[0].signature.is_empty());
    }

    #[test]
    fn backup_catalogue_crud() {
        let dir = tempdir().unwrap();
        let mut store = LedgerStore::open(&dir.path().join("s.db")).unwrap();
        let a = store
            .insert_backup_record("t", "d", "backup_1.db", "2026-01-01 00:00:00", "admin")
            .unwrap();
        assert_eq!(store.backup_record(a.id).unwrap(), a);
        store.replace_backup_catalogue(&[a.clone()]).unwrap();
        assert_eq!(store.list_backups().unwrap(), vec![a.clone()]);
        store.delete_backup_record(a.id).unwrap();
        assert!(matches!(
            store.delete_backup_record(a.id),
            Err(AirError::NotFound(_))
        ));
    }
}
