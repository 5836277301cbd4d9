//! Typed record kinds held by the ledger store.
//!
//! Collaborators hand records over as loose `field -> value` maps; every kind
//! here has a `from_fields` constructor that checks presence of required
//! fields and numeric parseability, so a malformed form is a rejected write
//! rather than a crash further down.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AirError, OptionExt as _, Result, ResultExt as _};

/// Loosely-typed collaborator input: field name to textual value.
pub type FieldMap = BTreeMap<String, String>;

/// Build a [`FieldMap`] from string pairs.
pub fn field_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> FieldMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Field reader
// ---------------------------------------------------------------------------

struct Fields<'a>(&'a FieldMap);

impl<'a> Fields<'a> {
    fn raw(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn text(&self, key: &str) -> Result<String> {
        self.raw(key).map(str::to_string).required_field(key)
    }

    fn opt_text(&self, key: &str) -> String {
        self.raw(key).unwrap_or_default().to_string()
    }

    fn weight(&self, key: &str) -> Result<f64> {
        parse_weight(key, self.raw(key).required_field(key)?)
    }

    fn opt_weight(&self, key: &str) -> Result<f64> {
        self.raw(key).map_or(Ok(0.0), |v| parse_weight(key, v))
    }

    fn count(&self, key: &str) -> Result<i64> {
        parse_count(key, self.raw(key).required_field(key)?)
    }

    fn opt_count(&self, key: &str) -> Result<i64> {
        self.raw(key).map_or(Ok(0), |v| parse_count(key, v))
    }
}

fn parse_weight(key: &str, v: &str) -> Result<f64> {
    let w: f64 = v
        .parse()
        .ctx_validation(&format!("field '{key}': '{v}' is not a number"))?;
    if !w.is_finite() {
        return Err(AirError::Validation(format!(
            "field '{key}': weight must be finite"
        )));
    }
    Ok(w)
}

fn parse_count(key: &str, v: &str) -> Result<i64> {
    v.parse()
        .ctx_validation(&format!("field '{key}': '{v}' is not an integer"))
}

fn check_weights(pairs: &[(&str, f64)]) -> Result<()> {
    for (name, w) in pairs {
        if !w.is_finite() {
            return Err(AirError::Validation(format!("{name} must be finite")));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Transaction type
// ---------------------------------------------------------------------------

/// Ledger transaction type, stored by its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TransactionType {
    Receipt,
    Shipment,
    OtherIncrease,
    OtherDecrease,
    NuclearLoss,
    /// Physical Inventory Listing used to seed the book balance.
    SetBalance,
    /// Any label the engine does not know; kept verbatim, no balance effect.
    Other(String),
}

impl TransactionType {
    pub fn label(&self) -> &str {
        match self {
            Self::Receipt => "Receipt",
            Self::Shipment => "Shipment",
            Self::OtherIncrease => "Other Increase",
            Self::OtherDecrease => "Other Decrease",
            Self::NuclearLoss => "Nuclear Loss",
            Self::SetBalance => "PIL (Set Balance)",
            Self::Other(s) => s,
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "Receipt" => Self::Receipt,
            "Shipment" => Self::Shipment,
            "Other Increase" => Self::OtherIncrease,
            "Other Decrease" => Self::OtherDecrease,
            "Nuclear Loss" => Self::NuclearLoss,
            "PIL (Set Balance)" => Self::SetBalance,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<TransactionType> for String {
    fn from(t: TransactionType) -> Self {
        t.label().to_string()
    }
}

impl From<String> for TransactionType {
    fn from(s: String) -> Self {
        Self::from_label(&s)
    }
}

// ---------------------------------------------------------------------------
// Ledger entries
// ---------------------------------------------------------------------------

/// The seven signed fields of a general-ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerFields {
    /// Facility-local calendar date as entered (often `yyMMdd`).
    pub date: String,
    /// ICD / PIL reference.
    pub reference: String,
    /// Inventory-change code (e.g. `RD`, `SD`, `PB`).
    pub icd_code: String,
    pub kind: TransactionType,
    pub element_weight: f64,
    pub fissile_weight: f64,
    pub items: i64,
}

impl LedgerFields {
    pub fn new(
        date: &str,
        reference: &str,
        icd_code: &str,
        kind: TransactionType,
        element_weight: f64,
        fissile_weight: f64,
        items: i64,
    ) -> Result<Self> {
        if date.trim().is_empty() {
            return Err(AirError::Validation("ledger date must not be empty".into()));
        }
        check_weights(&[
            ("element weight", element_weight),
            ("fissile weight", fissile_weight),
        ])?;
        Ok(Self {
            date: date.trim().to_string(),
            reference: reference.trim().to_string(),
            icd_code: icd_code.trim().to_string(),
            kind,
            element_weight,
            fissile_weight,
            items,
        })
    }

    /// Keys: `date`, `type`, `u_weight`, `u235_weight` (required);
    /// `ref`, `code`, `items` (optional).
    pub fn from_fields(map: &FieldMap) -> Result<Self> {
        let f = Fields(map);
        Ok(Self {
            date: f.text("date")?,
            reference: f.opt_text("ref"),
            icd_code: f.opt_text("code"),
            kind: TransactionType::from_label(&f.text("type")?),
            element_weight: f.weight("u_weight")?,
            fissile_weight: f.weight("u235_weight")?,
            items: f.opt_count("items")?,
        })
    }
}

/// A persisted general-ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    #[serde(flatten)]
    pub fields: LedgerFields,
    /// Lowercase hex SHA-256 of the canonical field tuple; empty when the row
    /// was written without the signer.
    pub signature: String,
}

// ---------------------------------------------------------------------------
// MBR entries
// ---------------------------------------------------------------------------

/// The eight signed fields of a Material Balance Report line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MbrFields {
    pub continuation: String,
    pub entry_name: String,
    pub element_code: String,
    pub weight: f64,
    pub unit: String,
    pub fissile_weight: f64,
    pub isotope_code: String,
    pub report_no: String,
}

impl MbrFields {
    /// Keys: `entry_name`, `element`, `weight` (required); `continuation`,
    /// `unit`, `fissile`, `isotope`, `report_no` (optional).
    pub fn from_fields(map: &FieldMap) -> Result<Self> {
        let f = Fields(map);
        Ok(Self {
            continuation: f.opt_text("continuation"),
            entry_name: f.text("entry_name")?,
            element_code: f.text("element")?,
            weight: f.weight("weight")?,
            unit: f.opt_text("unit"),
            fissile_weight: f.opt_weight("fissile")?,
            isotope_code: f.opt_text("isotope"),
            report_no: f.opt_text("report_no"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MbrEntry {
    pub id: i64,
    #[serde(flatten)]
    pub fields: MbrFields,
    pub signature: String,
}

// ---------------------------------------------------------------------------
// LII / NLI entries (physical inventory, unsigned)
// ---------------------------------------------------------------------------

/// List of Inventory Items line: one physically located item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiiFields {
    pub kmp: String,
    pub position: String,
    pub batch: String,
    pub description: String,
    pub element_weight: f64,
    pub fissile_weight: f64,
    pub plutonium_weight: f64,
    pub burnup: f64,
}

impl LiiFields {
    /// Keys: `kmp`, `batch`, `weight_elem` (required); `position`, `desc`,
    /// `weight_fissile`, `weight_pu`, `burnup` (optional).
    pub fn from_fields(map: &FieldMap) -> Result<Self> {
        let f = Fields(map);
        Ok(Self {
            kmp: f.text("kmp")?,
            position: f.opt_text("position"),
            batch: f.text("batch")?,
            description: f.opt_text("desc"),
            element_weight: f.weight("weight_elem")?,
            fissile_weight: f.opt_weight("weight_fissile")?,
            plutonium_weight: f.opt_weight("weight_pu")?,
            burnup: f.opt_weight("burnup")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiiEntry {
    pub id: i64,
    #[serde(flatten)]
    pub fields: LiiFields,
    /// Cooling time; always recorded as zero at entry.
    pub cooling: f64,
}

/// Nuclear-material List of Items line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NliFields {
    pub batch: String,
    pub items: i64,
    pub icd_code: String,
    pub u_element_code: String,
    pub u_isotope_code: String,
    pub u_weight: f64,
    pub u_isotope_weight: f64,
    pub pu_element_code: String,
    pub pu_weight: f64,
}

impl NliFields {
    /// Keys: `batch`, `items` (required); `code`, `u_elem_code`,
    /// `u_iso_code`, `u_weight`, `u_iso_weight`, `p_elem_code`, `p_weight`
    /// (optional).
    pub fn from_fields(map: &FieldMap) -> Result<Self> {
        let f = Fields(map);
        Ok(Self {
            batch: f.text("batch")?,
            items: f.count("items")?,
            icd_code: f.opt_text("code"),
            u_element_code: f.opt_text("u_elem_code"),
            u_isotope_code: f.opt_text("u_iso_code"),
            u_weight: f.opt_weight("u_weight")?,
            u_isotope_weight: f.opt_weight("u_iso_weight")?,
            pu_element_code: f.opt_text("p_elem_code"),
            pu_weight: f.opt_weight("p_weight")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NliEntry {
    pub id: i64,
    #[serde(flatten)]
    pub fields: NliFields,
}

// ---------------------------------------------------------------------------
// Receipts: batches + history
// ---------------------------------------------------------------------------

/// Everything a receipt form submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptInput {
    pub batch_number: String,
    pub to_mba: String,
    pub from_mba: String,
    pub kmp: String,
    pub building: String,
    pub room: String,
    pub physical_form: String,
    pub chemical_form: String,
    pub element: String,
    pub element_weight: f64,
    pub fissile_weight: f64,
    pub unit: String,
    pub manufacturer: String,
    pub date: String,
    /// Inventory-change code recorded on the history row (`RD`, `RF`, `RN`).
    pub receipt_code: String,
    pub items: i64,
}

impl ReceiptInput {
    /// Keys: `batch_number`, `to_mba`, `element`, `weight_u`, `date`,
    /// `receipt_code`, `count` (required); the location, form and
    /// manufacturer fields plus `from_mba`, `weight_u235`, `unit` are
    /// optional.
    pub fn from_fields(map: &FieldMap) -> Result<Self> {
        let f = Fields(map);
        let batch_number = f.text("batch_number")?;
        crate::util::validate_batch_number(&batch_number)?;
        Ok(Self {
            batch_number,
            to_mba: f.text("to_mba")?,
            from_mba: f.opt_text("from_mba"),
            kmp: f.opt_text("kmp"),
            building: f.opt_text("building"),
            room: f.opt_text("room"),
            physical_form: f.opt_text("physical_form"),
            chemical_form: f.opt_text("chemical_form"),
            element: f.text("element")?,
            element_weight: f.weight("weight_u")?,
            fissile_weight: f.opt_weight("weight_u235")?,
            unit: f.opt_text("unit"),
            manufacturer: f.opt_text("manufacturer"),
            date: f.text("date")?,
            receipt_code: f.text("receipt_code")?,
            items: f.count("count")?,
        })
    }
}

/// Status of a batch that is on inventory.
pub const BATCH_ACTIVE: &str = "Active";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub batch_number: String,
    pub mba: String,
    pub kmp: String,
    pub building: String,
    pub room: String,
    pub physical_form: String,
    pub chemical_form: String,
    pub element: String,
    pub element_weight: f64,
    pub fissile_weight: f64,
    pub plutonium_weight: f64,
    pub thorium_weight: f64,
    pub unit: String,
    pub manufacturer: String,
    pub insertion_date: String,
    pub status: String,
}

/// One inventory-changing event against a batch; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub batch_id: i64,
    pub change_type: String,
    pub element_code: String,
    pub items: i64,
    pub increase: f64,
    pub decrease: f64,
    pub record_date: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: i64,
    pub title: String,
    pub description: String,
    /// Snapshot file name inside the backups directory.
    pub filename: String,
    pub created_date: String,
    pub created_by: String,
}

// ---------------------------------------------------------------------------
// Record kinds (for administrative deletes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Ledger,
    Mbr,
    Lii,
    Nli,
    /// A receipt's history row.
    Receipt,
}

impl RecordKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Ledger => "manual_ledger",
            Self::Mbr => "mbr_entries",
            Self::Lii => "lii_manual",
            Self::Nli => "nli_manual",
            Self::Receipt => "history",
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = AirError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ledger" => Ok(Self::Ledger),
            "mbr" => Ok(Self::Mbr),
            "lii" => Ok(Self::Lii),
            "nli" => Ok(Self::Nli),
            "receipt" => Ok(Self::Receipt),
            other => Err(AirError::Validation(format!("unknown record kind '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_labels_round_trip() {
        for t in [
            TransactionType::Receipt,
            TransactionType::Shipment,
            TransactionType::OtherIncrease,
            TransactionType::OtherDecrease,
            TransactionType::NuclearLoss,
            TransactionType::SetBalance,
        ] {
            assert_eq!(TransactionType::from_label(t.label()), t);
        }
        assert_eq!(
            TransactionType::from_label("Transfer"),
            TransactionType::Other("Transfer".into())
        );
    }

    #[test]
    fn ledger_fields_from_map() {
        let map = field_map([
            ("date", "260101"),
            ("ref", "PIL-01"),
            ("code", "PB"),
            ("type", "PIL (Set Balance)"),
            ("u_weight", "15000"),
            ("u235_weight", "500.5"),
            ("items", "3"),
        ]);
        let f = LedgerFields::from_fields(&map).unwrap();
        assert_eq!(f.kind, TransactionType::SetBalance);
        assert_eq!(f.element_weight, 15000.0);
        assert_eq!(f.items, 3);
    }

    #[test]
    fn missing_required_field_rejected() {
        let map = field_map([("date", "260101"), ("type", "Receipt"), ("u_weight", "1")]);
        let err = LedgerFields::from_fields(&map).unwrap_err();
        assert!(matches!(err, AirError::Validation(_)));
        assert!(err.to_string().contains("u235_weight"));
    }

    #[test]
    fn unparseable_number_rejected() {
        let map = field_map([
            ("date", "260101"),
            ("type", "Receipt"),
            ("u_weight", "ten"),
            ("u235_weight", "1"),
        ]);
        assert!(LedgerFields::from_fields(&map).is_err());

        let map = field_map([
            ("date", "260101"),
            ("type", "Receipt"),
            ("u_weight", "NaN"),
            ("u235_weight", "1"),
        ]);
        assert!(LedgerFields::from_fields(&map).is_err());
    }

    #[test]
    fn blank_values_count_as_missing() {
        let map = field_map([
            ("date", "   "),
            ("type", "Receipt"),
            ("u_weight", "1"),
            ("u235_weight", "1"),
        ]);
        assert!(LedgerFields::from_fields(&map).is_err());
    }

    #[test]
    fn receipt_input_requires_valid_batch_number() {
        let mut map = field_map([
            ("batch_number", "B-1"),
            ("to_mba", "MBA-1"),
            ("element", "Enriched Uranium"),
            ("weight_u", "1000"),
            ("date", "260215"),
            ("receipt_code", "RD"),
            ("count", "1"),
        ]);
        assert!(ReceiptInput::from_fields(&map).is_ok());
        map.insert("batch_number".into(), "bad batch".into());
        assert!(ReceiptInput::from_fields(&map).is_err());
    }

    #[test]
    fn record_kind_parses() {
        assert_eq!("mbr".parse::<RecordKind>().unwrap(), RecordKind::Mbr);
        assert!("users".parse::<RecordKind>().is_err());
    }
}
