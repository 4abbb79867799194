//! `cadence classify`: print how every lifecycle state is classified.

use colored::Colorize;

use crate::domain::intent::Intent;
use crate::domain::policy::{is_cluster_active, is_gated};

pub fn run() -> anyhow::Result<()> {
    println!("{}", "cadence classify".bold());
    println!("  {:<28} {:<8} {}", "intent".dimmed(), "active".dimmed(), "gated".dimmed());
    for intent in Intent::all() {
        println!(
            "  {:<28} {:<8} {}",
            intent.display_string(),
            yes_no(is_cluster_active(&intent)),
            yes_no(is_gated(&intent))
        );
    }
    Ok(())
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".green()
    } else {
        "no".normal()
    }
}
