//! `cadence check`: evaluate the admission policy offline.
//!
//! Exit status: 0 permitted, 1 denied, 2 the intent or the policy
//! configuration could not be evaluated.

use std::num::NonZeroUsize;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config;
use crate::domain::intent::IntentRecord;
use crate::domain::policy::{evaluate, is_cluster_active, is_gated, DefaultPolicy};

pub fn run(
    state: &str,
    update_available: Option<String>,
    cluster_active: usize,
    cluster_count: usize,
    max_cluster_active: Option<usize>,
) -> Result<()> {
    let policy = match resolve_policy(max_cluster_active) {
        Ok(policy) => policy,
        Err(e) => {
            println!("{}", "cadence check".bold());
            println!("  decision: {}", "fault".red());
            println!("  error:    {:#}", e);
            std::process::exit(2);
        }
    };

    let record = IntentRecord {
        state: state.to_string(),
        update_available,
    };

    println!("{}", "cadence check".bold());
    println!(
        "  fleet:    {}/{} active (max {})",
        cluster_active,
        cluster_count,
        policy.max_cluster_active()
    );

    match evaluate(&policy, "(local)", &record, cluster_active, cluster_count) {
        Ok(evaluation) => {
            println!("  intent:   {}", evaluation.intent);
            println!(
                "  class:    {}, {}",
                if is_cluster_active(&evaluation.intent) {
                    "active"
                } else {
                    "inactive"
                },
                if is_gated(&evaluation.intent) {
                    "gated"
                } else {
                    "ungated"
                }
            );
            if evaluation.permit {
                println!("  decision: {}", "permit".green());
                std::process::exit(0);
            } else {
                println!("  decision: {}", "deny".yellow());
                println!("  hint:     active limit reached, retry on a later pass");
                std::process::exit(1);
            }
        }
        Err(e) => {
            println!("  decision: {}", "fault".red());
            println!("  error:    {}", e);
            std::process::exit(2);
        }
    }
}

/// An explicit maximum wins and the config file is not read at all.
fn resolve_policy(max_cluster_active: Option<usize>) -> Result<DefaultPolicy> {
    let max = match max_cluster_active {
        Some(max) => NonZeroUsize::new(max).context("--max-cluster-active must be positive")?,
        None => config::load()?.policy.max_cluster_active()?,
    };
    Ok(DefaultPolicy::new(max))
}
