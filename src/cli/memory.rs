//! CLI `memory` commands: statistics, listing, and maintenance.

use anyhow::{bail, Result};
use std::io::Write;

use deepsearch::config::DeepSearchConfig;
use deepsearch::memory::types::{EvictionPolicy, MemoryScope};

/// Display memory statistics in the terminal.
pub fn stats(config: &DeepSearchConfig) -> Result<()> {
    let memory = super::open_memory(config)?;
    let response = memory.stats()?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total memories:      {}", response.total_memories);
    println!("  Short-term:          {}", response.short_term);
    println!("  Long-term:           {}", response.long_term);
    println!("  Pinned:              {}", response.pinned);
    println!("  Consolidated:        {}", response.consolidated);
    println!();

    if !response.sessions.is_empty() {
        println!("Open sessions:");
        let mut sessions: Vec<_> = response.sessions.iter().collect();
        sessions.sort();
        for (id, count) in sessions {
            println!("  {id:<38} {count}");
        }
        println!();
    }

    println!("Archived runs:         {}", response.archived_runs);
    println!("Database size:         {}", super::format_bytes(response.db_size_bytes));
    if let Some(ref oldest) = response.oldest_memory {
        println!("Oldest memory:         {oldest}");
    }
    if let Some(ref newest) = response.newest_memory {
        println!("Newest memory:         {newest}");
    }
    Ok(())
}

pub fn list(
    config: &DeepSearchConfig,
    scope: Option<&str>,
    key: Option<&str>,
    limit: usize,
) -> Result<()> {
    let scope: Option<MemoryScope> = scope
        .map(|s| s.parse().map_err(anyhow::Error::msg))
        .transpose()?;
    let memory = super::open_memory(config)?;
    let records = memory.list(scope, key, limit)?;

    if records.is_empty() {
        println!("No memories.");
        return Ok(());
    }
    for r in &records {
        let mut flags = Vec::new();
        if r.pinned {
            flags.push("pinned");
        }
        if r.consolidated {
            flags.push("consolidated");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "{}  {:<10}  {}  rel {:.2}{}",
            r.id, r.scope, r.key, r.relevance, flags
        );
        let preview: String = r.value.chars().take(100).collect();
        println!("    {}", preview.replace('\n', " "));
    }
    Ok(())
}

pub fn pin(config: &DeepSearchConfig, id: &str) -> Result<()> {
    let record = super::open_memory(config)?.pin(id)?;
    println!("Pinned {} ({} {})", record.id, record.scope, record.key);
    Ok(())
}

pub fn promote(config: &DeepSearchConfig, id: &str, key: &str) -> Result<()> {
    let record = super::open_memory(config)?.promote(id, key)?;
    println!("Promoted to long-term topic \"{}\" as {}", record.key, record.id);
    Ok(())
}

pub fn forget(config: &DeepSearchConfig, id: &str, reason: Option<&str>) -> Result<()> {
    let result = super::open_memory(config)?.delete(id, reason)?;
    println!("Forgot {} ({} {})", result.id, result.scope, result.key);
    Ok(())
}

pub fn consolidate(config: &DeepSearchConfig, session: &str) -> Result<()> {
    let result = super::open_memory(config)?.consolidate(session)?;
    if result.records_consolidated == 0 {
        println!("Session {session} is under the consolidation threshold.");
    } else {
        println!(
            "Folded {} records into {}.",
            result.records_consolidated,
            result.summary_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub fn evict(config: &DeepSearchConfig, key: Option<&str>) -> Result<()> {
    let memory = super::open_memory(config)?;
    let result = match key {
        Some(key) => memory.evict(&EvictionPolicy::Key(key.to_string()))?,
        None => memory.enforce_capacity()?,
    };
    println!("Evicted {} long-term records.", result.evicted.len());
    for id in &result.evicted {
        println!("  {id}");
    }
    Ok(())
}

/// Delete every record in a scope (or all memory) after confirmation.
pub fn wipe(config: &DeepSearchConfig, scope: Option<&str>, yes: bool) -> Result<()> {
    let scope: Option<MemoryScope> = scope
        .map(|s| s.parse().map_err(anyhow::Error::msg))
        .transpose()?;
    let target = scope.map_or("ALL", |s| s.as_str());

    if !yes {
        println!("This permanently deletes {target} memory records.");
        println!("Database: {}", config.resolved_db_path().display());
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if input.trim() != "YES" {
            bail!("wipe cancelled");
        }
    }

    let removed = super::open_memory(config)?.wipe(scope)?;
    println!("Wiped {removed} memory records.");
    Ok(())
}
