//! Operational front end for the Gudang engine: master-data loading,
//! movement recording, and the opname workflow, over the SQLite backends.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use gudang_config::GudangConfig;
use gudang_ledger::{SourceKind, SqliteLedgerRepository};
use gudang_masterdata::{Location, MasterRegistry, Product};
use gudang_opname::{
    DraftLine, MovementRequest, OpnameDraft, OpnameService, OpnameStatus, SqliteOpnameRepository,
};

#[derive(Parser)]
#[command(name = "gudang", version, about = "Warehouse ledger and stock opname")]
pub struct Cli {
    /// Explicit configuration file (defaults to ./gudang.toml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Master data file with [[products]] and [[locations]].
    #[arg(long, global = true, default_value = "master.toml")]
    pub master: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database files and schemas.
    Init,
    /// Print the effective configuration.
    ConfigShow,
    /// Record a stock movement.
    Movement {
        #[arg(long)]
        product: String,
        #[arg(long)]
        location: String,
        /// RFC 3339 timestamp or YYYY-MM-DD.
        #[arg(long)]
        at: String,
        /// Signed quantity: positive in, negative out.
        #[arg(long)]
        qty: Decimal,
        #[arg(long, default_value = "manual")]
        kind: String,
        #[arg(long, default_value = "cli")]
        reference: String,
    },
    /// Submit a stock opname from counted lines.
    Submit {
        #[arg(long)]
        location: String,
        #[arg(long)]
        at: String,
        #[arg(long)]
        by: String,
        /// Count sheet CSV with product,physical,unit[,notes] columns.
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Inline counts, e.g. --count "Rice=120:kg".
        #[arg(long = "count")]
        counts: Vec<String>,
    },
    /// Approve a pending opname.
    Approve { id: String },
    /// Reject a pending opname.
    Reject { id: String },
    /// Revert an approved opname.
    Revert { id: String },
    /// Delete a pending opname.
    Delete { id: String },
    /// List opnames, optionally by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Point-in-time balance for a product at a location.
    Balance {
        #[arg(long)]
        product: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        at: Option<String>,
    },
    /// Full stock card for a product at a location.
    History {
        #[arg(long)]
        product: String,
        #[arg(long)]
        location: String,
    },
}

#[derive(Debug, Deserialize)]
struct MasterFile {
    #[serde(default)]
    products: Vec<Product>,
    #[serde(default)]
    locations: Vec<Location>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    product: String,
    physical: Decimal,
    unit: String,
    #[serde(default)]
    notes: Option<String>,
}

pub fn run(cli: Cli, config: GudangConfig) -> anyhow::Result<()> {
    if let Command::ConfigShow = cli.command {
        print!("{}", config.render()?);
        return Ok(());
    }

    let ledger = Arc::new(
        SqliteLedgerRepository::new(config.database.ledger_path())
            .context("opening the ledger database")?,
    );
    let opnames = Arc::new(
        SqliteOpnameRepository::new(config.database.opname_path())
            .context("opening the opname database")?,
    );
    let registry = Arc::new(load_master(&cli.master)?);
    let service = OpnameService::new(ledger, opnames, registry.clone(), registry);

    match cli.command {
        Command::ConfigShow => unreachable!("handled above"),
        Command::Init => {
            println!(
                "initialized {} and {}",
                config.database.ledger_path().display(),
                config.database.opname_path().display()
            );
        }
        Command::Movement {
            product,
            location,
            at,
            qty,
            kind,
            reference,
        } => {
            let kind = SourceKind::from_str(&kind).map_err(|err| anyhow!(err))?;
            let outcome = service.record_movement(MovementRequest {
                product,
                location,
                timestamp: parse_timestamp(&at)?,
                delta: qty,
                kind,
                reference,
            })?;
            println!(
                "recorded {} (balance now {})",
                outcome.entry, outcome.running_balance
            );
            for warning in &outcome.warnings {
                println!(
                    "warning: balance {} at {} went negative",
                    warning.balance, warning.timestamp
                );
            }
        }
        Command::Submit {
            location,
            at,
            by,
            csv,
            counts,
        } => {
            let mut lines = Vec::new();
            if let Some(path) = csv {
                lines.extend(read_count_sheet(&path)?);
            }
            for count in &counts {
                lines.push(parse_count(count)?);
            }
            let id = service.submit(OpnameDraft {
                location,
                timestamp: parse_timestamp(&at)?,
                responsible_party: by,
                notes: None,
                lines,
            })?;
            println!("submitted opname {id}");
        }
        Command::Approve { id } => {
            let outcome = service.approve(parse_id(&id)?)?;
            println!(
                "approved: {} adjustments, {} entries locked, {} balances rebuilt",
                outcome.adjustments, outcome.locked_entries, outcome.recalculated
            );
            for warning in &outcome.warnings {
                println!(
                    "warning: balance {} at {} went negative",
                    warning.balance, warning.timestamp
                );
            }
        }
        Command::Reject { id } => {
            service.reject(parse_id(&id)?)?;
            println!("rejected");
        }
        Command::Revert { id } => {
            let outcome = service.revert(parse_id(&id)?)?;
            println!(
                "reverted: {} entries unlocked, {} adjustments deleted",
                outcome.unlocked, outcome.deleted
            );
        }
        Command::Delete { id } => {
            service.delete(parse_id(&id)?)?;
            println!("deleted");
        }
        Command::List { status } => {
            let status = status
                .as_deref()
                .map(OpnameStatus::from_str)
                .transpose()
                .map_err(|err| anyhow!(err))?;
            for opname in service.list(status)? {
                println!(
                    "{}  {}  {}  {} line(s)  {}",
                    opname.id,
                    opname.timestamp.to_rfc3339(),
                    opname.location,
                    opname.lines.len(),
                    opname.status
                );
            }
        }
        Command::Balance {
            product,
            location,
            at,
        } => {
            let as_of = at.as_deref().map(parse_timestamp).transpose()?;
            let balance = service.balance(&product, &location, as_of)?;
            println!("{balance}");
        }
        Command::History { product, location } => {
            for entry in service.history(&product, &location)? {
                println!(
                    "{}  #{:<3} {:>12} {:>12} {:>12}  {}{}",
                    entry.timestamp.to_rfc3339(),
                    entry.sequence,
                    entry.quantity_in,
                    entry.quantity_out,
                    entry.running_balance,
                    entry.source_kind,
                    if entry.locked { "  [locked]" } else { "" }
                );
            }
        }
    }
    Ok(())
}

fn load_master(path: &Path) -> anyhow::Result<MasterRegistry> {
    let registry = MasterRegistry::new();
    if !path.exists() {
        return Ok(registry);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading master data from {}", path.display()))?;
    let master: MasterFile = toml::from_str(&raw)
        .with_context(|| format!("parsing master data in {}", path.display()))?;
    for product in master.products {
        registry.add_product(product)?;
    }
    for location in master.locations {
        registry.add_location(location)?;
    }
    Ok(registry)
}

fn read_count_sheet(path: &Path) -> anyhow::Result<Vec<DraftLine>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening count sheet {}", path.display()))?;
    let mut lines = Vec::new();
    for row in reader.deserialize() {
        let row: CountRow = row.context("reading count sheet row")?;
        lines.push(DraftLine {
            product: row.product,
            physical_stock: row.physical,
            unit: row.unit,
            notes: row.notes,
        });
    }
    Ok(lines)
}

fn parse_count(raw: &str) -> anyhow::Result<DraftLine> {
    let (product, rest) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("count must look like PRODUCT=QTY:UNIT, got {raw}"))?;
    let (qty, unit) = rest
        .split_once(':')
        .ok_or_else(|| anyhow!("count must look like PRODUCT=QTY:UNIT, got {raw}"))?;
    Ok(DraftLine {
        product: product.to_string(),
        physical_stock: Decimal::from_str(qty).with_context(|| format!("invalid quantity {qty}"))?,
        unit: unit.to_string(),
        notes: None,
    })
}

fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid opname id {raw}"))
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid timestamp {raw}; use RFC 3339 or YYYY-MM-DD"))?;
    Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_inline_counts() {
        let line = parse_count("Rice=120.5:kg").unwrap();
        assert_eq!(line.product, "Rice");
        assert_eq!(line.physical_stock, dec!(120.5));
        assert_eq!(line.unit, "kg");
        assert!(parse_count("Rice 120").is_err());
    }

    #[test]
    fn parses_dates_and_timestamps() {
        let midnight = parse_timestamp("2026-01-03").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2026-01-03T00:00:00+00:00");
        let exact = parse_timestamp("2026-01-03T09:30:00+07:00").unwrap();
        assert_eq!(exact, Utc.with_ymd_and_hms(2026, 1, 3, 2, 30, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn loads_master_data_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.toml");
        fs::write(
            &path,
            r#"
[[products]]
id = 1
name = "Rice"
sku = "RCE-25"
unit = "kg"

[[locations]]
code = "WH1"
name = "Main Warehouse"
"#,
        )
        .unwrap();
        let registry = load_master(&path).unwrap();
        assert_eq!(registry.products().len(), 1);
        assert_eq!(registry.locations().len(), 1);
    }
}
