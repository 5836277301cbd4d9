//! Training scenarios and their seed data.
//!
//! Seeding is the one place allowed to write rows without going through the
//! signer: `scen_dummy` plants a forged shipment and a forged MBR line so
//! trainees see the tamper alarm fire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AirError, Result};
use crate::records::{LedgerFields, LiiFields, MbrFields, TransactionType};
use crate::store::LedgerStore;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    Baseline,
    Reactor,
    ShipperReceiverDifference,
    PhysicalInventoryTaking,
    MufEvaluation,
    ProtractedDiversion,
    SubstitutedDummy,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Self::Baseline,
        Self::Reactor,
        Self::ShipperReceiverDifference,
        Self::PhysicalInventoryTaking,
        Self::MufEvaluation,
        Self::ProtractedDiversion,
        Self::SubstitutedDummy,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::Baseline => "scen_baseline",
            Self::Reactor => "scen_reactor",
            Self::ShipperReceiverDifference => "scen_srd",
            Self::PhysicalInventoryTaking => "scen_pit",
            Self::MufEvaluation => "scen_muf",
            Self::ProtractedDiversion => "scen_protracted",
            Self::SubstitutedDummy => "scen_dummy",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Baseline => "Module 1.1: The Baseline",
            Self::Reactor => "Module 1.2: The Reactor Cycle",
            Self::ShipperReceiverDifference => "Module 2.1: Shipper/Receiver Differences (SRD)",
            Self::PhysicalInventoryTaking => "Module 2.2: Physical Inventory Taking (PIT)",
            Self::MufEvaluation => "Module 2.3: MUF Evaluation",
            Self::ProtractedDiversion => "Module 3.1: Protracted Diversion",
            Self::SubstitutedDummy => "Module 3.2: The Substituted Dummy",
        }
    }

    pub fn difficulty(self) -> &'static str {
        match self {
            Self::Baseline | Self::Reactor => "Beginner",
            Self::ShipperReceiverDifference
            | Self::PhysicalInventoryTaking
            | Self::MufEvaluation => "Intermediate",
            Self::ProtractedDiversion | Self::SubstitutedDummy => "Advanced",
        }
    }

    /// Write this scenario's seed rows into a freshly initialised store.
    pub fn seed(self, store: &LedgerStore) -> Result<()> {
        match self {
            // Trainees establish the baseline themselves.
            Self::Baseline | Self::Reactor => {}
            Self::ShipperReceiverDifference => seed_srd(store)?,
            Self::PhysicalInventoryTaking => seed_pit(store)?,
            Self::MufEvaluation => seed_muf(store)?,
            Self::ProtractedDiversion => seed_protracted(store)?,
            Self::SubstitutedDummy => seed_dummy(store)?,
        }
        info!(scenario = self.id(), "scenario data injected");
        Ok(())
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Scenario {
    type Err = AirError;

    fn from_str(s: &str) -> Result<Self> {
        util::validate_scenario_id(s)?;
        Self::ALL
            .into_iter()
            .find(|sc| sc.id() == s)
            .ok_or_else(|| AirError::Validation(format!("unknown training scenario '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Seed helpers
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn ledger(
    store: &LedgerStore,
    date: &str,
    reference: &str,
    code: &str,
    kind: TransactionType,
    u: f64,
    u235: f64,
    items: i64,
) -> Result<()> {
    let fields = LedgerFields::new(date, reference, code, kind, u, u235, items)?;
    store.append_ledger_entry(&fields)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn lii(
    store: &LedgerStore,
    kmp: &str,
    position: &str,
    batch: &str,
    description: &str,
    element_weight: f64,
    fissile_weight: f64,
    plutonium_weight: f64,
    burnup: f64,
) -> Result<()> {
    store.append_lii_entry(&LiiFields {
        kmp: kmp.into(),
        position: position.into(),
        batch: batch.into(),
        description: description.into(),
        element_weight,
        fissile_weight,
        plutonium_weight,
        burnup,
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Book says 500 g arrived; the lab scale measured 485 g.
fn seed_srd(store: &LedgerStore) -> Result<()> {
    ledger(
        store,
        &util::ledger_date_days_ago(10),
        "PIL-START",
        "PB",
        TransactionType::SetBalance,
        10000.0,
        300.0,
        5,
    )?;
    ledger(
        store,
        &util::ledger_date_days_ago(2),
        "ICD-SRD-01",
        "RF",
        TransactionType::Receipt,
        500.0,
        25.0,
        1,
    )?;
    lii(store, "FFS", "VAULT-A", "BASE-01", "LEU", 10000.0, 300.0, 0.0, 0.0)?;
    lii(store, "FFS", "LAB-B", "SRD-01", "UO2 Powder", 485.0, 24.25, 0.0, 0.0)?;
    Ok(())
}

/// 15 000 + 5 000 - 4 000 = 16 000 g on book, four 4 000 g items on hand.
fn seed_pit(store: &LedgerStore) -> Result<()> {
    ledger(store, "260101", "PIL-01", "PB", TransactionType::SetBalance, 15000.0, 500.0, 3)?;
    ledger(store, "260215", "ICD-102", "RD", TransactionType::Receipt, 5000.0, 150.0, 1)?;
    ledger(store, "260310", "SHIP-05", "SD", TransactionType::Shipment, 4000.0, 120.0, 1)?;

    let layout = [("FFS", "R1-A"), ("FFS", "R1-B"), ("RRC", "CORE-1"), ("SFS", "POOL-1")];
    for (i, (kmp, position)) in layout.into_iter().enumerate() {
        // Spent fuel carries plutonium and burnup.
        let (pu, burnup) = if kmp == "SFS" { (15.0, 2000.0) } else { (0.0, 0.0) };
        lii(
            store,
            kmp,
            position,
            &format!("BATCH-0{}", i + 1),
            "LEU Assembly",
            4000.0,
            132.5,
            pu,
            burnup,
        )?;
    }
    Ok(())
}

/// Book 75 000 g, physical 72 900 g: 2.1 kg MUF hidden in FUEL-C.
fn seed_muf(store: &LedgerStore) -> Result<()> {
    ledger(store, "260101", "PIL-01", "PB", TransactionType::SetBalance, 100000.0, 2000.0, 4)?;
    ledger(store, "260215", "SHIP-01", "SD", TransactionType::Shipment, 25000.0, 500.0, 1)?;
    lii(store, "RRC", "CORE-1", "FUEL-A", "LEU", 25000.0, 500.0, 10.0, 1200.0)?;
    lii(store, "RRC", "CORE-2", "FUEL-B", "LEU", 25000.0, 500.0, 10.0, 1200.0)?;
    lii(store, "SFS", "POOL-1", "FUEL-C", "LEU", 22900.0, 450.0, 8.0, 1500.0)?;
    Ok(())
}

/// Five receipts of 1 000 g on paper, each physically 5 g short.
fn seed_protracted(store: &LedgerStore) -> Result<()> {
    ledger(store, "250101", "PIL-START", "PB", TransactionType::SetBalance, 50000.0, 1000.0, 50)?;
    for i in 1..=5 {
        ledger(
            store,
            &format!("250{}15", i + 1),
            &format!("ICD-00{i}"),
            "RD",
            TransactionType::Receipt,
            1000.0,
            20.0,
            1,
        )?;
        lii(
            store,
            "FFS",
            &format!("SHELF-{i}"),
            &format!("BATCH-{i}"),
            "LEU",
            995.0,
            19.9,
            0.0,
            0.0,
        )?;
    }
    Ok(())
}

/// A stolen assembly replaced by a dummy, with forged rows written straight
/// into the tables to cover it up.
fn seed_dummy(store: &LedgerStore) -> Result<()> {
    ledger(store, "260101", "PIL-START", "PB", TransactionType::SetBalance, 10000.0, 200.0, 2)?;

    let fake_shipment = LedgerFields::new(
        "260220",
        "FAKE-SHIP-01",
        "SD",
        TransactionType::Shipment,
        5000.0,
        100.0,
        1,
    )?;
    store.insert_ledger_row(&fake_shipment, "INVALID_HACKER_SIGNATURE")?;

    let fake_mbr = MbrFields {
        continuation: String::new(),
        entry_name: "PB".into(),
        element_code: "E".into(),
        weight: 4500.0,
        unit: "G".into(),
        fissile_weight: 90.0,
        isotope_code: "G".into(),
        report_no: "1".into(),
    };
    store.insert_mbr_row(&fake_mbr, "BROKEN_HASH")?;

    lii(store, "SFS", "POOL-A", "DUMMY-01", "Irradiated Dummy", 0.0, 0.0, 0.0, 0.0)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance;
    use crate::verify::{self, Verification};
    use tempfile::tempdir;

    fn seeded(sc: Scenario) -> (tempfile::TempDir, LedgerStore) {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(&dir.path().join("t.db")).unwrap();
        sc.seed(&store).unwrap();
        (dir, store)
    }

    #[test]
    fn ids_parse_back() {
        for sc in Scenario::ALL {
            assert_eq!(sc.id().parse::<Scenario>().unwrap(), sc);
        }
        assert!("scen_missing".parse::<Scenario>().is_err());
        assert!("../scen_pit".parse::<Scenario>().is_err());
    }

    #[test]
    fn empty_scenarios_seed_nothing() {
        let (_d, store) = seeded(Scenario::Reactor);
        assert!(store.list_ledger_entries().unwrap().is_empty());
        assert!(store.list_lii_entries().unwrap().is_empty());
    }

    #[test]
    fn pit_book_matches_physical() {
        let (_d, store) = seeded(Scenario::PhysicalInventoryTaking);
        let book = balance::final_balance(&store.list_ledger_entries().unwrap());
        assert_eq!(book.element, 16000.0);
        assert_eq!(book.items, 3);
        let physical = store.lii_totals().unwrap();
        assert_eq!(physical.element_weight, 16000.0);
        assert_eq!(physical.plutonium_weight, 15.0);
        assert_eq!(balance::material_unaccounted_for(&book, &physical).element, 0.0);
    }

    #[test]
    fn muf_scenario_shows_2100_grams() {
        let (_d, store) = seeded(Scenario::MufEvaluation);
        let book = balance::final_balance(&store.list_ledger_entries().unwrap());
        let muf = balance::material_unaccounted_for(&book, &store.lii_totals().unwrap());
        assert_eq!(muf.element, 2100.0);
    }

    #[test]
    fn protracted_receipts_are_dated_monthly() {
        let (_d, store) = seeded(Scenario::ProtractedDiversion);
        let entries = store.list_ledger_entries().unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[1].fields.date, "250215");
        assert_eq!(entries[5].fields.date, "250615");
        assert_eq!(entries[5].fields.reference, "ICD-005");
        let muf = balance::material_unaccounted_for(
            &balance::final_balance(&entries),
            &store.lii_totals().unwrap(),
        );
        assert_eq!(muf.element, 50000.0 + 5000.0 - 4975.0);
    }

    #[test]
    fn dummy_plants_tampered_rows() {
        let (_d, store) = seeded(Scenario::SubstitutedDummy);
        let ledger = verify::verified_ledger(&store).unwrap();
        assert_eq!(ledger[0].status, Verification::Clean);
        assert_eq!(ledger[1].status, Verification::Tampered);
        let mbr = verify::verified_mbr(&store, None).unwrap();
        assert_eq!(mbr.len(), 1);
        assert_eq!(mbr[0].status, Verification::Tampered);
    }

    #[test]
    fn srd_signs_every_ledger_row() {
        let (_d, store) = seeded(Scenario::ShipperReceiverDifference);
        let ledger = verify::verified_ledger(&store).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|v| v.status == Verification::Clean));
        assert_eq!(store.lii_totals().unwrap().element_weight, 10485.0);
    }
}
