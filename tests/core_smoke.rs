use anyhow::Result;
use rusqlite::{params, Connection};
use tempfile::tempdir;

use air_core::{
    balance::{self, Balance},
    records::{field_map, LedgerFields, MbrFields, TransactionType},
    signing,
    store::LedgerStore,
    verify::{self, Verification},
};

fn ledger_fields(kind: TransactionType, u: f64, u235: f64, items: i64) -> Result<LedgerFields> {
    Ok(LedgerFields::new("260101", "ICD-1", "RD", kind, u, u235, items)?)
}

#[test]
fn appended_records_verify_clean() -> Result<()> {
    let dir = tempdir()?;
    let store = LedgerStore::open(&dir.path().join("air.db"))?;

    let e = store.append_ledger_entry(&ledger_fields(TransactionType::Receipt, 1000.0, 20.0, 1)?)?;
    let loaded = store.ledger_entry(e.id)?;
    assert_eq!(verify::verify(&loaded.fields, &loaded.signature), Verification::Clean);

    let m = store.append_mbr_entry(&MbrFields::from_fields(&field_map([
        ("entry_name", "RD"),
        ("element", "E"),
        ("weight", "5"),
        ("unit", "G"),
        ("fissile", "0.25"),
    ]))?)?;
    let loaded = store.mbr_entry(m.id)?;
    assert_eq!(loaded.signature, signing::sign(&loaded.fields));
    assert!(verify::verified_mbr(&store, None)?
        .iter()
        .all(|v| v.status == Verification::Clean));
    Ok(())
}

#[test]
fn out_of_band_edit_is_detected_as_tampered() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("air.db");
    let store = LedgerStore::open(&db)?;
    let a = store.append_ledger_entry(&ledger_fields(TransactionType::Receipt, 1000.0, 20.0, 1)?)?;
    let b = store.append_ledger_entry(&ledger_fields(TransactionType::Shipment, 400.0, 8.0, 1)?)?;

    // Privileged write that bypasses the signer.
    let raw = Connection::open(&db)?;
    raw.execute(
        "UPDATE manual_ledger SET u_weight = 40.0 WHERE id = ?1",
        params![b.id],
    )?;

    let rows = verify::verified_ledger(&store)?;
    assert_eq!(rows[0].record.id, a.id);
    assert_eq!(rows[0].status, Verification::Clean);
    assert_eq!(rows[1].status, Verification::Tampered);

    // Tampered rows are surfaced, not dropped: the balance uses the edited value.
    let balanced = verify::ledger_with_balances(&store)?;
    assert_eq!(balanced.summary.tampered, 1);
    assert_eq!(balanced.final_balance().element, 960.0);
    Ok(())
}

#[test]
fn every_signed_column_is_covered() -> Result<()> {
    let edits = [
        "date = '991231'",
        "ref = 'OTHER'",
        "code = 'SD'",
        "type = 'Shipment'",
        "u_weight = u_weight + 0.001",
        "u235_weight = 0",
        "items = items + 1",
    ];
    for edit in edits {
        let dir = tempdir()?;
        let db = dir.path().join("air.db");
        let store = LedgerStore::open(&db)?;
        let e = store.append_ledger_entry(&ledger_fields(TransactionType::Receipt, 10.0, 1.0, 1)?)?;
        Connection::open(&db)?.execute(
            &format!("UPDATE manual_ledger SET {edit} WHERE id = ?1"),
            params![e.id],
        )?;
        let v = verify::verified_ledger(&store)?;
        assert_eq!(v[0].status, Verification::Tampered, "edit not detected: {edit}");
    }
    Ok(())
}

#[test]
fn every_signed_mbr_column_is_covered() -> Result<()> {
    let edits = [
        "continuation = 'Y'",
        "entry_name = 'SD'",
        "element = 'Q'",
        "weight = weight + 0.001",
        "unit = 'KG'",
        "fissile = fissile + 1",
        "isotope = 'J'",
        "report_no = 'R-99'",
    ];
    for edit in edits {
        let dir = tempdir()?;
        let db = dir.path().join("air.db");
        let store = LedgerStore::open(&db)?;
        let m = store.append_mbr_entry(&MbrFields::from_fields(&field_map([
            ("continuation", "C"),
            ("entry_name", "RD"),
            ("element", "E"),
            ("weight", "5"),
            ("unit", "G"),
            ("fissile", "0.25"),
            ("isotope", "G"),
            ("report_no", "R-1"),
        ]))?)?;
        Connection::open(&db)?.execute(
            &format!("UPDATE mbr_entries SET {edit} WHERE id = ?1"),
            params![m.id],
        )?;
        let v = verify::verified_mbr(&store, None)?;
        assert_eq!(v[0].status, Verification::Tampered, "edit not detected: {edit}");
    }
    Ok(())
}

#[test]
fn tampered_item_count_folds_without_overflow() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("air.db");
    let store = LedgerStore::open(&db)?;
    store.append_ledger_entry(&ledger_fields(TransactionType::Receipt, 10.0, 1.0, 1)?)?;
    let b = store.append_ledger_entry(&ledger_fields(TransactionType::Receipt, 10.0, 1.0, 1)?)?;
    Connection::open(&db)?.execute(
        "UPDATE manual_ledger SET items = ?1 WHERE id = ?2",
        params![i64::MAX, b.id],
    )?;

    let balanced = verify::ledger_with_balances(&store)?;
    assert_eq!(balanced.summary.tampered, 1);
    assert_eq!(balanced.final_balance().items, i64::MAX);
    assert_eq!(balanced.final_balance().element, 20.0);
    Ok(())
}

#[test]
fn cleared_signature_reads_as_unsigned() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("air.db");
    let store = LedgerStore::open(&db)?;
    store.append_ledger_entry(&ledger_fields(TransactionType::Receipt, 10.0, 1.0, 1)?)?;
    Connection::open(&db)?.execute("UPDATE manual_ledger SET signature = ''", [])?;
    assert_eq!(verify::verified_ledger(&store)?[0].status, Verification::Unsigned);
    Ok(())
}

#[test]
fn balance_follows_store_order_not_dates() -> Result<()> {
    let dir = tempdir()?;
    let store = LedgerStore::open(&dir.path().join("air.db"))?;
    // Entered out of date order; the store id order is what counts.
    let late = LedgerFields::new("260301", "R-2", "RD", TransactionType::Receipt, 500.0, 10.0, 1)?;
    let early = LedgerFields::new("260101", "PIL", "PB", TransactionType::SetBalance, 9999.0, 0.0, 0)?;
    store.append_ledger_entry(&late)?;
    store.append_ledger_entry(&early)?;

    let rows = verify::ledger_with_balances(&store)?.rows;
    assert_eq!(
        rows[1].1,
        Balance {
            element: 500.0,
            fissile: 10.0,
            items: 1
        }
    );

    let entries = store.list_ledger_entries()?;
    assert_eq!(balance::final_balance(&entries), rows[1].1);
    Ok(())
}
