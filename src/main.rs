use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use air_core::{
    balance,
    config::AirConfig,
    context::ContextManager,
    records::{
        FieldMap, LedgerFields, LiiFields, MbrFields, NliFields, ReceiptInput, RecordKind,
    },
    report,
    scenarios::Scenario,
    users::{NewUser, UserDirectory},
    util,
    verify::{self, Verification},
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "air",
    version = util::VERSION,
    about = "Nuclear-material accountancy ledger (offline)"
)]
struct Cli {
    /// Path to the operational inventory database.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding backup snapshots.
    #[arg(long, global = true)]
    backups_dir: Option<PathBuf>,

    /// Directory for training sandboxes.
    #[arg(long, global = true)]
    training_dir: Option<PathBuf>,

    /// Path to the users database.
    #[arg(long, global = true)]
    users_db: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the operational database (and users database) if missing.
    Init,

    /// Append a signed general-ledger entry (date=, type=, u_weight=, u235_weight=, ...).
    AddEntry {
        #[arg(value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },

    /// Append a signed Material Balance Report line.
    AddMbr {
        #[arg(value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },

    /// Append a List of Inventory Items line.
    AddLii {
        #[arg(value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },

    /// Append a Nuclear-material List of Items line.
    AddNli {
        #[arg(value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },

    /// Register a receipt: new batch plus its history row, atomically.
    Receipt {
        #[arg(value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },

    /// Print the verified general ledger with running balances.
    Ledger {
        /// Emit JSON instead of a text table.
        #[arg(long)]
        json: bool,
    },

    /// Print the verified Material Balance Report.
    Mbr {
        /// Only the most recent N lines.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Verify every signed record; exits non-zero if any were tampered with.
    Verify,

    /// Administrative hard delete (kind: ledger, mbr, lii, nli, receipt).
    Delete { kind: String, id: i64 },

    /// Snapshot the operational database.
    Backup {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// List backups.
    Backups,

    /// Restore the operational database from a backup.
    Restore { id: i64 },

    /// Delete a backup and its snapshot file.
    DeleteBackup { id: i64 },

    /// Load a training scenario, show its ledger and MUF, then switch back.
    Train {
        /// Scenario id, e.g. scen_pit.  Omit to list scenarios.
        scenario: Option<String>,
    },

    /// Export the verified ledger as manifest.json + general_ledger.csv.
    Export {
        #[arg(long, default_value = "air-export")]
        out_dir: PathBuf,
    },

    /// Create a user (username=, role=, ...) with assigned MBAs.
    UserAdd {
        #[arg(value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
        #[arg(long = "mba")]
        mbas: Vec<String>,
    },

    /// Look up a user's role and MBAs.
    UserRole { username: String },

    /// Print version information.
    Version,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = AirConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env();
    if let Some(db) = cli.db {
        cfg.paths.operational_db = db;
    }
    if let Some(dir) = cli.backups_dir {
        cfg.paths.backups_dir = dir;
    }
    if let Some(dir) = cli.training_dir {
        cfg.paths.training_dir = dir;
    }
    if let Some(users) = cli.users_db {
        cfg.paths.users_db = users;
    }

    init_logging(&cfg.logging)?;
    util::validate_path(&cfg.paths.operational_db, "db")?;

    match cli.cmd {
        Commands::Init => {
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            let users = UserDirectory::open(&cfg.paths.users_db).context("open users db")?;
            info!(
                store_id = %cm.store()?.meta().store_id,
                db = %cfg.paths.operational_db.display(),
                users_db = %users.path().display(),
                "databases initialized"
            );
        }

        Commands::AddEntry { fields } => {
            let fields = LedgerFields::from_fields(&parse_fields(&fields)?)?;
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            let entry = cm.store()?.append_ledger_entry(&fields).context("append ledger entry")?;
            info!(id = entry.id, signature = %entry.signature, "ledger entry appended");
            println!("{}", entry.id);
        }

        Commands::AddMbr { fields } => {
            let fields = MbrFields::from_fields(&parse_fields(&fields)?)?;
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            let entry = cm.store()?.append_mbr_entry(&fields).context("append MBR entry")?;
            info!(id = entry.id, "MBR entry appended");
            println!("{}", entry.id);
        }

        Commands::AddLii { fields } => {
            let fields = LiiFields::from_fields(&parse_fields(&fields)?)?;
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            let entry = cm.store()?.append_lii_entry(&fields).context("append LII entry")?;
            println!("{}", entry.id);
        }

        Commands::AddNli { fields } => {
            let fields = NliFields::from_fields(&parse_fields(&fields)?)?;
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            let entry = cm.store()?.append_nli_entry(&fields).context("append NLI entry")?;
            println!("{}", entry.id);
        }

        Commands::Receipt { fields } => {
            let input = ReceiptInput::from_fields(&parse_fields(&fields)?)?;
            let mut cm = ContextManager::open(&cfg).context("open operational store")?;
            let ids = cm
                .store_mut()?
                .register_receipt(&input)
                .with_context(|| format!("register receipt for batch {}", input.batch_number))?;
            println!("batch {} history {}", ids.batch_id, ids.history_id);
        }

        Commands::Ledger { json } => {
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            let ledger = verify::ledger_with_balances(cm.store()?).context("read ledger")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ledger).context("serialize ledger")?
                );
            } else {
                print_ledger(&ledger);
            }
        }

        Commands::Mbr { limit } => {
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            for v in verify::verified_mbr(cm.store()?, limit).context("read MBR")? {
                let f = &v.record.fields;
                println!(
                    "{:>5}  {:<3} {:<6} {:<3} {:>12.4} {:<3} {:>10.4} {:<3} {:<6} [{}]",
                    v.record.id,
                    f.continuation,
                    f.entry_name,
                    f.element_code,
                    f.weight,
                    f.unit,
                    f.fissile_weight,
                    f.isotope_code,
                    f.report_no,
                    v.status
                );
            }
        }

        Commands::Verify => {
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            let store = cm.store()?;
            let ledger = verify::verified_ledger(store).context("verify ledger")?;
            let mbr = verify::verified_mbr(store, None).context("verify MBR")?;
            let ledger_summary = verify::IntegritySummary::of(&ledger);
            let mbr_summary = verify::IntegritySummary::of(&mbr);
            println!(
                "ledger: {} clean, {} unsigned, {} tampered",
                ledger_summary.clean, ledger_summary.unsigned, ledger_summary.tampered
            );
            println!(
                "mbr:    {} clean, {} unsigned, {} tampered",
                mbr_summary.clean, mbr_summary.unsigned, mbr_summary.tampered
            );
            for v in ledger.iter().filter(|v| v.status == Verification::Tampered) {
                println!("TAMPERED ledger id {}", v.record.id);
            }
            for v in mbr.iter().filter(|v| v.status == Verification::Tampered) {
                println!("TAMPERED mbr id {}", v.record.id);
            }
            if ledger_summary.has_tampered() || mbr_summary.has_tampered() {
                warn!("integrity verification found tampered records");
                std::process::exit(1);
            }
            info!("integrity verification passed");
        }

        Commands::Delete { kind, id } => {
            let kind: RecordKind = kind.parse()?;
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            cm.store()?
                .delete(kind, id)
                .with_context(|| format!("delete {kind:?} {id}"))?;
        }

        Commands::Backup { title, description } => {
            let mut cm = ContextManager::open(&cfg).context("open operational store")?;
            let rec = cm.backup(&title, &description).context("create backup")?;
            println!("{}  {}", rec.id, cm.backup_path(&rec).display());
        }

        Commands::Backups => {
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            for b in cm.list_backups().context("list backups")? {
                println!(
                    "{:>4}  {}  {:<24}  {}  ({})",
                    b.id, b.created_date, b.title, b.filename, b.created_by
                );
            }
        }

        Commands::Restore { id } => {
            let mut cm = ContextManager::open(&cfg).context("open operational store")?;
            cm.restore(id).with_context(|| format!("restore backup {id}"))?;
            info!(id, "restore complete");
        }

        Commands::DeleteBackup { id } => {
            let mut cm = ContextManager::open(&cfg).context("open operational store")?;
            cm.delete_backup(id).with_context(|| format!("delete backup {id}"))?;
        }

        Commands::Train { scenario } => {
            let Some(id) = scenario else {
                for sc in Scenario::ALL {
                    println!("{:<16} {:<13} {}", sc.id(), sc.difficulty(), sc.title());
                }
                return Ok(());
            };
            let scenario: Scenario = id.parse()?;
            let mut cm = ContextManager::open(&cfg).context("open operational store")?;
            cm.enter_training(scenario)
                .with_context(|| format!("enter training scenario {scenario}"))?;
            println!("{} ({})", scenario.title(), cm.current_database_path().display());

            let shown = (|| -> Result<()> {
                let store = cm.store()?;
                let ledger = verify::ledger_with_balances(store)?;
                print_ledger(&ledger);
                let physical = store.lii_totals()?;
                let muf = balance::material_unaccounted_for(&ledger.final_balance(), &physical);
                println!(
                    "physical: {:.4} element / {:.4} fissile over {} item(s)",
                    physical.element_weight, physical.fissile_weight, physical.items
                );
                println!("MUF: {:.4} element / {:.4} fissile", muf.element, muf.fissile);
                Ok(())
            })();

            cm.return_to_operational().context("return to operational")?;
            shown?;
        }

        Commands::Export { out_dir } => {
            let cm = ContextManager::open(&cfg).context("open operational store")?;
            let store = cm.store()?;
            let ledger = verify::ledger_with_balances(store).context("read ledger")?;
            let physical = store.lii_totals().context("sum LII")?;
            let muf = (physical.items > 0)
                .then(|| balance::material_unaccounted_for(&ledger.final_balance(), &physical));
            let paths = report::write_ledger_export(&out_dir, store.meta(), &cm.label(), &ledger, muf)
                .context("write export")?;
            info!(
                manifest = %paths.manifest.display(),
                csv = %paths.ledger_csv.display(),
                "ledger exported"
            );
        }

        Commands::UserAdd { fields, mbas } => {
            let user = NewUser::from_fields(&parse_fields(&fields)?)?;
            let mut users = UserDirectory::open(&cfg.paths.users_db).context("open users db")?;
            let id = users
                .create_user(&user, &mbas)
                .with_context(|| format!("create user {}", user.username))?;
            println!("{id}");
        }

        Commands::UserRole { username } => {
            let users = UserDirectory::open(&cfg.paths.users_db).context("open users db")?;
            match users.role_of(&username).context("look up role")? {
                Some(r) => println!("{} {} [{}]", r.username, r.role, r.mbas.join(", ")),
                None => anyhow::bail!("unknown user '{username}'"),
            }
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_fields(pairs: &[String]) -> Result<FieldMap> {
    let mut map = FieldMap::new();
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got '{pair}'"))?;
        map.insert(k.trim().to_string(), v.to_string());
    }
    Ok(map)
}

fn print_ledger(ledger: &verify::BalancedLedger) {
    println!(
        "{:>5}  {:<8} {:<14} {:<4} {:<18} {:>12} {:>10} {:>5}  {:>12} {:>10} {:>5}  status",
        "id", "date", "ref", "code", "type", "element", "fissile", "items", "bal.elem", "bal.fiss", "bal.n"
    );
    for (v, bal) in &ledger.rows {
        let f = &v.record.fields;
        println!(
            "{:>5}  {:<8} {:<14} {:<4} {:<18} {:>12.4} {:>10.4} {:>5}  {:>12.4} {:>10.4} {:>5}  {}",
            v.record.id,
            f.date,
            f.reference,
            f.icd_code,
            f.kind.label(),
            f.element_weight,
            f.fissile_weight,
            f.items,
            bal.element,
            bal.fissile,
            bal.items,
            v.status
        );
    }
    let s = ledger.summary;
    println!(
        "{} row(s): {} clean, {} unsigned, {} tampered",
        s.total(),
        s.clean,
        s.unsigned,
        s.tampered
    );
}

fn init_logging(cfg: &air_core::config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .with_context(|| format!("open json log file {}", cfg.json_log_file))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}
