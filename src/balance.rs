//! Running material balance over the ordered ledger.
//!
//! The fold follows store order (ascending id), never the human-entered date.
//! Balances are not clamped: a negative running balance is reported as is.

use serde::{Deserialize, Serialize};

use crate::records::{LedgerEntry, LedgerFields, TransactionType};
use crate::store::PhysicalTotals;

/// Book balance along the three accounting axes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub element: f64,
    pub fissile: f64,
    pub items: i64,
}

impl Balance {
    /// Apply one ledger line; `first` is true for the first line replayed.
    ///
    /// A `PIL (Set Balance)` line seeds the balance with its absolute values
    /// only as the first line and only while the element accumulator is
    /// exactly zero. Anywhere else it is inert.
    ///
    /// Item counts saturate: a tampered count still folds in but cannot
    /// overflow the accumulator.
    pub fn apply(&mut self, entry: &LedgerFields, first: bool) {
        let (w, f, n) = (entry.element_weight, entry.fissile_weight, entry.items);
        match entry.kind {
            TransactionType::Receipt => {
                self.element += w;
                self.fissile += f;
                self.items = self.items.saturating_add(n);
            }
            TransactionType::Shipment => {
                self.element -= w;
                self.fissile -= f;
                self.items = self.items.saturating_sub(n);
            }
            TransactionType::OtherIncrease => {
                self.element += w;
                self.fissile += f;
            }
            TransactionType::OtherDecrease | TransactionType::NuclearLoss => {
                self.element -= w;
                self.fissile -= f;
            }
            TransactionType::SetBalance => {
                if first && self.element == 0.0 {
                    self.element = w;
                    self.fissile = f;
                    self.items = n;
                }
            }
            TransactionType::Other(_) => {}
        }
    }
}

/// Something that carries ledger fields; lets the engine fold plain entries
/// as well as verified wrappers.
pub trait LedgerLine {
    fn ledger_fields(&self) -> &LedgerFields;
}

impl LedgerLine for LedgerFields {
    fn ledger_fields(&self) -> &LedgerFields {
        self
    }
}

impl LedgerLine for LedgerEntry {
    fn ledger_fields(&self) -> &LedgerFields {
        &self.fields
    }
}

impl<T: LedgerLine + ?Sized> LedgerLine for &T {
    fn ledger_fields(&self) -> &LedgerFields {
        (**self).ledger_fields()
    }
}

/// Replay `entries` in the given order, pairing each with the balance after
/// it was applied.
pub fn compute_running_balances<T, I>(entries: I) -> Vec<(T, Balance)>
where
    T: LedgerLine,
    I: IntoIterator<Item = T>,
{
    let mut running = Balance::default();
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            running.apply(entry.ledger_fields(), i == 0);
            (entry, running)
        })
        .collect()
}

/// Final balance after replaying `entries`.
pub fn final_balance<'a, T>(entries: impl IntoIterator<Item = &'a T>) -> Balance
where
    T: LedgerLine + 'a,
{
    entries
        .into_iter()
        .enumerate()
        .fold(Balance::default(), |mut acc, (i, e)| {
            acc.apply(e.ledger_fields(), i == 0);
            acc
        })
}

/// Material Unaccounted For: book minus physical.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Muf {
    pub element: f64,
    pub fissile: f64,
}

pub fn material_unaccounted_for(book: &Balance, physical: &PhysicalTotals) -> Muf {
    Muf {
        element: book.element - physical.element_weight,
        fissile: book.fissile - physical.fissile_weight,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
