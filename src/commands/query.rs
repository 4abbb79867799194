//! `cadence query`: talk to a cadence daemon via its REST API.

use anyhow::{bail, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::client::CadenceClient;
use crate::config;
use crate::domain::intent::{Intent, IntentRecord, Trigger, UpdateAvailability};

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Daemon health check
    Health,
    /// Fleet-wide active count against the configured maximum
    Fleet,
    /// All nodes and their intents
    Nodes,
    /// A single node's intent
    Node {
        /// Node name
        name: String,
    },
    /// Add a node at the initial intent (no-op if already known)
    Register {
        /// Node name (defaults to this host's name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Overwrite a node's intent record (registers the node if new)
    SetIntent {
        /// Node name (defaults to this host's name)
        #[arg(long)]
        name: Option<String>,
        /// Intent as `state` or `state:availability`, e.g. `stabilized:true`
        intent: String,
    },
    /// Report a lifecycle event for a node
    Report {
        /// Node name (defaults to this host's name)
        #[arg(long)]
        name: Option<String>,
        #[arg(value_enum)]
        event: EventKind,
        /// Update availability, required for `assessed`
        #[arg(long)]
        update_available: Option<UpdateAvailability>,
    },
    /// Run one reconciliation pass now
    Reconcile,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum EventKind {
    Admit,
    Assessed,
    Updated,
    Failed,
    Resolve,
}

fn trigger(event: EventKind, update_available: Option<UpdateAvailability>) -> Result<Trigger> {
    Ok(match event {
        EventKind::Admit => Trigger::Admit,
        EventKind::Assessed => match update_available {
            Some(update_available) => Trigger::Assessed { update_available },
            None => bail!("`assessed` requires --update-available"),
        },
        EventKind::Updated => Trigger::Updated,
        EventKind::Failed => Trigger::Failed,
        EventKind::Resolve => Trigger::Resolve,
    })
}

fn node_name(name: Option<&str>) -> Result<String> {
    match name {
        Some(name) => Ok(name.to_string()),
        None => Ok(hostname::get()?.to_string_lossy().into_owned()),
    }
}

pub fn run(daemon: Option<&str>, format: &str, command: &QueryCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(daemon, format, command))
}

async fn run_async(daemon: Option<&str>, format: &str, command: &QueryCommands) -> Result<()> {
    let cfg = config::load()?;
    let client = CadenceClient::from_target(daemon, &cfg.nodes)?;

    match command {
        QueryCommands::Health => {
            let data = client.health().await?;
            print_output(format, &data)
        }
        QueryCommands::Fleet => {
            let data = client.fleet().await?;
            print_output(format, &data)
        }
        QueryCommands::Nodes => {
            let data = client.nodes().await?;
            print_output(format, &data)
        }
        QueryCommands::Node { name } => {
            let data = client.node(name).await?;
            print_output(format, &data)
        }
        QueryCommands::Register { name } => {
            let name = node_name(name.as_deref())?;
            let data = client.register(&name).await?;
            print_output(format, &data)
        }
        QueryCommands::SetIntent { name, intent } => {
            let intent: Intent = intent.parse()?;
            let name = node_name(name.as_deref())?;
            let data = client.put_intent(&name, &IntentRecord::from(intent)).await?;
            print_output(format, &data)
        }
        QueryCommands::Report {
            name,
            event,
            update_available,
        } => {
            let trigger = trigger(*event, *update_available)?;
            let name = node_name(name.as_deref())?;
            let data = client.report(&name, &trigger).await?;
            print_output(format, &data)
        }
        QueryCommands::Reconcile => {
            let data = client.reconcile().await?;
            print_output(format, &data)
        }
    }
}

fn print_output<T: Serialize>(format: &str, data: &T) -> Result<()> {
    let value = serde_json::to_value(data)?;
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    match &value {
        Value::Array(rows) => print_nodes(rows),
        Value::Object(fields) => print_fields(fields),
        other => println!("{}", cell(Some(other))),
    }
    Ok(())
}

/// One row per node, name column padded to the longest name.
fn print_nodes(rows: &[Value]) {
    if rows.is_empty() {
        println!("no nodes registered");
        return;
    }
    let width = rows
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str))
        .map(str::len)
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let header = format!(
        "{:<width$}  {:<32}  {:<6}  {:<5}  FAULT",
        "NAME", "INTENT", "ACTIVE", "GATED"
    );
    println!("{}", header.as_str().bold());
    for row in rows {
        println!("{}", node_row(row, width));
    }
}

fn node_row(row: &Value, width: usize) -> String {
    let intent = row
        .get("display")
        .filter(|v| !v.is_null())
        .or_else(|| row.get("state"));
    format!(
        "{:<width$}  {:<32}  {:<6}  {:<5}  {}",
        cell(row.get("name")),
        cell(intent),
        cell(row.get("active")),
        cell(row.get("gated")),
        cell(row.get("fault")),
    )
}

fn print_fields(fields: &Map<String, Value>) {
    let width = fields.keys().map(String::len).max().unwrap_or(0);
    for (key, value) in fields {
        println!("{:<width$}  {}", format!("{key}:"), cell(Some(value)), width = width + 1);
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) if items.is_empty() => "-".to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| cell(Some(item)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}
