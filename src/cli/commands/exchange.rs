//! Exchange command implementations (archive export, analysis, resolution).
//!
//! Each command is one self-contained request against the database. Nothing
//! carries over between invocations: a conflict reported by `analyze` is
//! settled by passing its entity, key, payload, and fingerprint to `resolve`.

use crate::cli::commands::open_storage;
use crate::cli::{ExchangeCommands, ResolveArgs};
use crate::error::{Error, Result};
use crate::exchange::file::{atomic_write, default_archive_name, read_archive};
use crate::exchange::{
    lookup, Analysis, ConflictRecord, EntityKind, Exchange, ExportKind, ExportScope, PendingItem,
    Record, ResolvePolicy, ResolveRequest,
};
use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Execute exchange commands.
pub fn execute(
    command: &ExchangeCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    match command {
        ExchangeCommands::Export {
            redacted,
            scope,
            output,
        } => export(*redacted, *scope, output.as_deref(), db_path, actor, json),
        ExchangeCommands::Analyze { file } => analyze(file, db_path, actor, json),
        ExchangeCommands::Execute { file } => execute_import(file, db_path, actor, json),
        ExchangeCommands::Resolve(args) => resolve(args, db_path, actor, json),
        ExchangeCommands::ExportConflicts { input, output } => {
            export_conflicts(input, output.as_deref(), json)
        }
    }
}

fn export(
    redacted: bool,
    scope: ExportScope,
    output: Option<&Path>,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let kind = if redacted {
        ExportKind::Redacted
    } else {
        ExportKind::Full
    };

    let mut storage = open_storage(db_path, actor)?;
    let bytes = Exchange::new(&mut storage).export(kind, scope)?;

    let label = if scope == ExportScope::All {
        kind.to_string()
    } else {
        format!("{kind}-{scope}")
    };
    let path = output.map_or_else(|| default_archive_name(&label), Path::to_path_buf);
    atomic_write(&path, &bytes)?;

    if json {
        let output = serde_json::json!({
            "success": true,
            "kind": kind,
            "scope": scope,
            "path": path.display().to_string(),
            "bytes": bytes.len(),
        });
        println!("{output}");
    } else {
        println!("Exported {kind} {scope} archive to {}", path.display());
        if kind == ExportKind::Full && scope.includes(EntityKind::ProviderCredential) {
            println!(
                "  {}",
                "Contains API keys. Use --redacted to share without them.".yellow()
            );
        }
    }

    Ok(())
}

fn analyze(file: &Path, db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let bytes = read_archive(file)?;
    let mut storage = open_storage(db_path, actor)?;
    let analysis = Exchange::new(&mut storage).analyze(&bytes)?;

    if json {
        println!("{}", serde_json::to_string(&analysis)?);
        return Ok(());
    }

    print_summary(&analysis);

    if !analysis.new_items.is_empty() {
        println!();
        println!("{}", "New".green().bold());
        for item in &analysis.new_items {
            println!("  {} {} {}", "+".green(), item.entity, item.key);
        }
    }

    if !analysis.conflicts.is_empty() {
        println!();
        println!("{}", "Conflicts".yellow().bold());
        for conflict in &analysis.conflicts {
            print_conflict(conflict);
        }
        println!();
        println!("Settle each with:");
        println!(
            "  tw exchange resolve --entity <entity> --key <key> --policy keep|overwrite|merge \
             [--data <json>] --expect <fingerprint>"
        );
    } else if analysis.new_items.is_empty() {
        println!();
        println!("Nothing to import: the store already matches this archive.");
    } else {
        println!();
        println!("Import the new records with: tw exchange execute {}", file.display());
    }

    Ok(())
}

fn execute_import(
    file: &Path,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let bytes = read_archive(file)?;
    let mut storage = open_storage(db_path, actor)?;
    let analysis = Exchange::new(&mut storage).execute(&bytes)?;

    if json {
        let output = serde_json::json!({
            "success": true,
            "inserted": analysis.new_items.len(),
            "unchanged": analysis.total_unchanged(),
            "stats": analysis.stats,
        });
        println!("{output}");
    } else {
        print_summary(&analysis);
        println!();
        println!(
            "Imported {} new record(s) from {}",
            analysis.new_items.len(),
            file.display()
        );
    }

    Ok(())
}

fn resolve(
    args: &ResolveArgs,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let entity = lookup(&args.entity).map_err(|e| Error::InvalidArgument(format!("entity: {e}")))?;
    if args.policy != ResolvePolicy::KeepExisting && args.expect.is_none() {
        return Err(Error::InvalidArgument(format!(
            "--policy {} needs --expect <fingerprint> from `tw exchange analyze`",
            args.policy
        )));
    }
    let data = read_payload(args)?;

    let request = ResolveRequest {
        entity,
        key: args.key.clone(),
        data,
        policy: args.policy,
        expected: args.expect.clone(),
    };

    let mut storage = open_storage(db_path, actor)?;
    let outcome = Exchange::new(&mut storage).resolve_one(&request)?;

    if json {
        let output = serde_json::json!({
            "success": true,
            "entity": entity,
            "key": request.key,
            "policy": request.policy,
            "outcome": outcome.to_string(),
        });
        println!("{output}");
    } else {
        println!("{} '{}': {outcome} ({})", entity, request.key, request.policy);
    }

    Ok(())
}

fn export_conflicts(input: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(input)?;
    let items: Vec<PendingItem> = serde_json::from_str(&content)
        .map_err(|e| Error::InvalidArgument(format!("--input must hold a JSON list: {e}")))?;

    let bytes = crate::exchange::export::export_conflicts(&items)?;
    let path = output.map_or_else(|| default_archive_name("conflicts"), Path::to_path_buf);
    atomic_write(&path, &bytes)?;

    if json {
        let output = serde_json::json!({
            "success": true,
            "items": items.len(),
            "path": path.display().to_string(),
        });
        println!("{output}");
    } else {
        println!("Saved {} pending record(s) to {}", items.len(), path.display());
        println!("Pick them up later with: tw exchange analyze {}", path.display());
    }

    Ok(())
}

/// Payload for a resolution from `--data` or `--data-file`; empty if neither.
fn read_payload(args: &ResolveArgs) -> Result<Record> {
    let raw = match (&args.data, &args.data_file) {
        (Some(data), _) => data.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => return Ok(Record::new()),
    };

    let value: Value = serde_json::from_str(&raw)?;
    match value {
        Value::Object(record) => Ok(record),
        other => Err(Error::InvalidArgument(format!(
            "payload must be a JSON object, got {other}"
        ))),
    }
}

fn print_summary(analysis: &Analysis) {
    println!("{:<22} {:>5} {:>10} {:>10}", "entity", "new", "unchanged", "conflicts");
    for (kind, stats) in &analysis.stats {
        println!(
            "{:<22} {:>5} {:>10} {:>10}",
            kind.as_str(),
            stats.new,
            stats.unchanged,
            stats.conflicts
        );
    }
}

/// Print a conflict as a field-level diff, masking sensitive values.
fn print_conflict(conflict: &ConflictRecord) {
    println!();
    println!(
        "  {} {} {}",
        "~".yellow(),
        conflict.entity,
        conflict.key.bold()
    );
    println!("    {}", format!("fingerprint {}", conflict.fingerprint).dimmed());

    let sensitive = conflict.entity.sensitive_fields();
    let fields: BTreeSet<&String> = conflict
        .existing
        .keys()
        .chain(conflict.incoming.keys())
        .collect();

    for field in fields {
        let before = conflict.existing.get(field.as_str());
        let after = conflict.incoming.get(field.as_str());
        if before == after {
            continue;
        }

        let render = |value: Option<&Value>| match value {
            None => "(absent)".to_string(),
            Some(_) if sensitive.contains(&field.as_str()) => "<redacted>".to_string(),
            Some(v) => v.to_string(),
        };
        println!(
            "    {field}: {} -> {}",
            render(before).red(),
            render(after).green()
        );
    }
}
