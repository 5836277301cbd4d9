//! Read-time integrity verification.
//!
//! Every stored signature is recomputed from the record's current fields on
//! load.  A mismatch is reported alongside the data; tampered rows are never
//! dropped or corrected, and they still take part in balance computation.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::balance::{self, Balance, LedgerLine};
use crate::error::Result;
use crate::records::{LedgerEntry, LedgerFields, MbrEntry, MbrFields};
use crate::signing::{self, Signable};
use crate::store::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Clean,
    /// Stored signature present but does not match the fields.
    Tampered,
    /// No stored signature (legacy rows, training seed data).
    Unsigned,
}

impl Verification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Tampered => "tampered",
            Self::Unsigned => "unsigned",
        }
    }
}

impl std::fmt::Display for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `fields` against the signature found in storage.
pub fn verify<S: Signable + ?Sized>(fields: &S, stored_signature: &str) -> Verification {
    if stored_signature.is_empty() {
        Verification::Unsigned
    } else if signing::sign(fields) == stored_signature {
        Verification::Clean
    } else {
        Verification::Tampered
    }
}

// ---------------------------------------------------------------------------
// Signed record kinds
// ---------------------------------------------------------------------------

/// A persisted record carrying a signature over its own fields.
pub trait SignedRecord {
    type Fields: Signable;

    /// Short name used in log lines.
    const KIND: &'static str;

    fn id(&self) -> i64;
    fn signed_fields(&self) -> &Self::Fields;
    fn stored_signature(&self) -> &str;

    fn verification(&self) -> Verification {
        verify(self.signed_fields(), self.stored_signature())
    }
}

impl SignedRecord for LedgerEntry {
    type Fields = LedgerFields;
    const KIND: &'static str = "ledger";

    fn id(&self) -> i64 {
        self.id
    }
    fn signed_fields(&self) -> &LedgerFields {
        &self.fields
    }
    fn stored_signature(&self) -> &str {
        &self.signature
    }
}

impl SignedRecord for MbrEntry {
    type Fields = MbrFields;
    const KIND: &'static str = "mbr";

    fn id(&self) -> i64 {
        self.id
    }
    fn signed_fields(&self) -> &MbrFields {
        &self.fields
    }
    fn stored_signature(&self) -> &str {
        &self.signature
    }
}

/// A record paired with its verification outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verified<T> {
    pub record: T,
    pub status: Verification,
}

impl LedgerLine for Verified<LedgerEntry> {
    fn ledger_fields(&self) -> &LedgerFields {
        &self.record.fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntegritySummary {
    pub clean: usize,
    pub unsigned: usize,
    pub tampered: usize,
}

impl IntegritySummary {
    pub fn of<T>(rows: &[Verified<T>]) -> Self {
        rows.iter().fold(Self::default(), |mut s, r| {
            match r.status {
                Verification::Clean => s.clean += 1,
                Verification::Unsigned => s.unsigned += 1,
                Verification::Tampered => s.tampered += 1,
            }
            s
        })
    }

    pub fn total(&self) -> usize {
        self.clean + self.unsigned + self.tampered
    }

    pub fn has_tampered(&self) -> bool {
        self.tampered > 0
    }
}

/// Verify each record, logging every tampered one.
pub fn verify_all<R: SignedRecord>(records: Vec<R>) -> Vec<Verified<R>> {
    records
        .into_iter()
        .map(|record| {
            let status = record.verification();
            if status == Verification::Tampered {
                warn!(kind = R::KIND, id = record.id(), "signature mismatch: record tampered");
            }
            Verified { record, status }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Verified read paths
// ---------------------------------------------------------------------------

pub fn verified_ledger(store: &LedgerStore) -> Result<Vec<Verified<LedgerEntry>>> {
    Ok(verify_all(store.list_ledger_entries()?))
}

pub fn verified_mbr(store: &LedgerStore, limit: Option<usize>) -> Result<Vec<Verified<MbrEntry>>> {
    Ok(verify_all(store.list_mbr_entries(limit)?))
}

/// Verified ledger folded through the balance engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancedLedger {
    pub rows: Vec<(Verified<LedgerEntry>, Balance)>,
    pub summary: IntegritySummary,
}

impl BalancedLedger {
    pub fn final_balance(&self) -> Balance {
        self.rows.last().map(|(_, b)| *b).unwrap_or_default()
    }
}

pub fn ledger_with_balances(store: &LedgerStore) -> Result<BalancedLedger> {
    let verified = verified_ledger(store)?;
    let summary = IntegritySummary::of(&verified);
    Ok(BalancedLedger {
        rows: balance::compute_running_balances(verified),
        summary,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
