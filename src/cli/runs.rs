//! CLI `runs` commands: browse the run archive.

use anyhow::{bail, Result};

use deepsearch::config::DeepSearchConfig;
use deepsearch::db::archive;

pub fn list(config: &DeepSearchConfig, limit: usize) -> Result<()> {
    let memory = super::open_memory(config)?;
    let conn = memory.connection();
    let conn = conn
        .lock()
        .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
    let runs = archive::list_runs(&conn, limit)?;

    if runs.is_empty() {
        println!("No archived runs.");
        return Ok(());
    }

    for run in &runs {
        let partial = if run.partial { " (partial)" } else { "" };
        println!(
            "{}  {}  {:<8} {:<14} {} steps{}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.state.as_str(),
            run.termination.as_str(),
            run.step_count,
            partial,
        );
        println!("    {}", run.root_query);
    }
    Ok(())
}

pub fn show(config: &DeepSearchConfig, id: &str) -> Result<()> {
    let memory = super::open_memory(config)?;
    let conn = memory.connection();
    let conn = conn
        .lock()
        .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
    let Some(run) = archive::load_run(&conn, id)? else {
        bail!("run not found: {id}");
    };

    let s = &run.summary;
    println!("Run: {}", s.id);
    println!("{}", "=".repeat(50));
    println!("  Query:          {}", s.root_query);
    println!("  Session:        {}", s.session_id);
    println!("  State:          {}", s.state);
    println!("  Ended:          {}", s.termination);
    println!("  Steps:          {}", s.step_count);
    println!("  Started:        {}", s.started_at);
    println!("  Finished:       {}", s.finished_at);
    println!("  Evidence items: {}", run.evidence.len());
    if !run.degraded.is_empty() {
        println!("  Degraded:");
        for d in &run.degraded {
            println!("    {d}");
        }
    }
    println!();

    match &run.answer {
        Some(answer) => {
            if s.partial {
                println!("Answer (partial):");
            } else {
                println!("Answer:");
            }
            println!("{answer}");
            super::print_sources(run.cited_evidence());
        }
        None => println!("No answer was produced."),
    }
    Ok(())
}
