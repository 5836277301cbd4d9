//! Canonical serialization and tamper-evident signatures.
//!
//! A signature is the lowercase hex SHA-256 of a record's canonical string:
//! its semantic fields in a fixed order, joined by `|`, with weights written
//! to exactly four decimal places and integers in plain decimal.  The
//! formatting is part of the contract: `5` and `5.0000` must sign alike.

use crate::records::{LedgerFields, MbrFields};
use crate::util;

/// Field separator in canonical strings.
pub const FIELD_SEPARATOR: char = '|';

// ---------------------------------------------------------------------------
// Canonical writer
// ---------------------------------------------------------------------------

/// Builds a canonical string field by field.
#[derive(Debug, Default)]
pub struct Canonical {
    out: String,
    fields: usize,
}

impl Canonical {
    pub fn new() -> Self {
        Self::default()
    }

    fn sep(&mut self) {
        if self.fields > 0 {
            self.out.push(FIELD_SEPARATOR);
        }
        self.fields += 1;
    }

    pub fn text(mut self, s: &str) -> Self {
        self.sep();
        self.out.push_str(s);
        self
    }

    pub fn weight(mut self, w: f64) -> Self {
        self.sep();
        self.out.push_str(&format_weight(w));
        self
    }

    pub fn count(mut self, n: i64) -> Self {
        self.sep();
        self.out.push_str(&n.to_string());
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Four fixed decimals; negative zero is written as `0.0000`.
pub fn format_weight(w: f64) -> String {
    let w = if w == 0.0 { 0.0 } else { w };
    format!("{w:.4}")
}

// ---------------------------------------------------------------------------
// Signable records
// ---------------------------------------------------------------------------

/// A record whose semantic fields can be canonicalized and signed.
pub trait Signable {
    fn canonical_string(&self) -> String;
}

impl Signable for LedgerFields {
    fn canonical_string(&self) -> String {
        Canonical::new()
            .text(&self.date)
            .text(&self.reference)
            .text(&self.icd_code)
            .text(self.kind.label())
            .weight(self.element_weight)
            .weight(self.fissile_weight)
            .count(self.items)
            .finish()
    }
}

impl Signable for MbrFields {
    fn canonical_string(&self) -> String {
        Canonical::new()
            .text(&self.continuation)
            .text(&self.entry_name)
            .text(&self.element_code)
            .weight(self.weight)
            .text(&self.unit)
            .weight(self.fissile_weight)
            .text(&self.isotope_code)
            .text(&self.report_no)
            .finish()
    }
}

/// Sign a record: SHA-256 over the UTF-8 canonical string, lowercase hex.
pub fn sign<S: Signable + ?Sized>(record: &S) -> String {
    util::sha256_hex(record.canonical_string().as_bytes())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TransactionType;

    fn receipt() -> LedgerFields {
        LedgerFields::new("260215", "ICD-102", "RD", TransactionType::Receipt, 5000.0, 150.0, 1)
            .unwrap()
    }

    fn mbr() -> MbrFields {
        MbrFields {
            continuation: String::new(),
            entry_name: "PB".into(),
            element_code: "E".into(),
            weight: 4500.0,
            unit: "G".into(),
            fissile_weight: 90.0,
            isotope_code: "G".into(),
            report_no: "1".into(),
        }
    }

    #[test]
    fn ledger_canonical_layout() {
        assert_eq!(
            receipt().canonical_string(),
            "260215|ICD-102|RD|Receipt|5000.0000|150.0000|1"
        );
    }

    #[test]
    fn mbr_canonical_layout() {
        assert_eq!(mbr().canonical_string(), "|PB|E|4500.0000|G|90.0000|G|1");
    }

    #[test]
    fn weights_round_to_four_places() {
        assert_eq!(format_weight(5.0), "5.0000");
        assert_eq!(format_weight(24.25), "24.2500");
        assert_eq!(format_weight(0.123456), "0.1235");
        assert_eq!(format_weight(-0.0), "0.0000");
        assert_eq!(format_weight(-12.5), "-12.5000");
    }

    #[test]
    fn signing_is_deterministic() {
        let r = receipt();
        assert_eq!(sign(&r), sign(&r));
        assert_eq!(sign(&r).len(), 64);
        assert!(sign(&r).chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn numerically_equal_weights_sign_alike() {
        let a = receipt();
        let mut b = receipt();
        b.element_weight = "5000.00000".parse().unwrap();
        assert_eq!(sign(&a), sign(&b));
    }

    #[test]
    fn every_field_changes_the_signature() {
        let base = sign(&receipt());
        let mutations: Vec<Box<dyn Fn(&mut LedgerFields)>> = vec![
            Box::new(|r| r.date = "260216".into()),
            Box::new(|r| r.reference = "ICD-103".into()),
            Box::new(|r| r.icd_code = "RF".into()),
            Box::new(|r| r.kind = TransactionType::Shipment),
            Box::new(|r| r.element_weight = 5000.5),
            Box::new(|r| r.fissile_weight = 151.0),
            Box::new(|r| r.items = 2),
        ];
        for m in mutations {
            let mut r = receipt();
            m(&mut r);
            assert_ne!(sign(&r), base);
        }

        let mbr_base = sign(&mbr());
        let mut m = mbr();
        m.report_no = "2".into();
        assert_ne!(sign(&m), mbr_base);
    }
}
