pub mod ask;
pub mod doctor;
pub mod memory;
pub mod runs;

use anyhow::{Context, Result};

use deepsearch::config::DeepSearchConfig;
use deepsearch::db;
use deepsearch::memory::MemoryManager;

/// Open the configured database behind a memory manager.
pub(crate) fn open_memory(config: &DeepSearchConfig) -> Result<MemoryManager> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    Ok(MemoryManager::new(conn, config.memory.clone()).with_db_path(db_path))
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// One line per source: `[n] title (source)`.
pub(crate) fn print_sources<'a>(items: impl IntoIterator<Item = &'a deepsearch::evidence::EvidenceItem>) {
    let mut any = false;
    for item in items {
        if !any {
            println!();
            println!("Sources:");
            any = true;
        }
        match &item.title {
            Some(title) => println!("  {} {} ({})", item.handle, title, item.source_id),
            None => println!("  {} {}", item.handle, item.source_id),
        }
    }
}
