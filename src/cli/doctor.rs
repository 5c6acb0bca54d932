//! CLI `doctor` command: database diagnostics and model reachability.

use anyhow::{Context, Result};

use deepsearch::config::DeepSearchConfig;
use deepsearch::db;
use deepsearch::model::ollama::OllamaModel;

pub async fn doctor(config: &DeepSearchConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    println!("DeepSearch Health Report");
    println!("========================");
    println!();

    if db_path.exists() {
        let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
        let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
        let report = db::check_database_health(&conn).context("failed to run health check")?;

        println!("Database:          {}", db_path.display());
        println!("File size:         {}", super::format_bytes(file_size));
        println!("Schema version:    {}", report.schema_version);
        println!();
        println!("Row counts:");
        println!("  Memories:        {}", report.memory_count);
        println!("  Runs:            {}", report.run_count);
        println!("  Evidence:        {}", report.evidence_count);
        println!("  Audit log:       {}", report.log_count);
        println!();
        if report.integrity_ok {
            println!("Integrity check:   PASSED");
        } else {
            println!("Integrity check:   FAILED ({})", report.integrity_details);
            println!();
            println!("Recovery: restore {} from a backup, or delete it", db_path.display());
            println!("to start with empty memory.");
        }
    } else {
        println!("Database:          not found at {}", db_path.display());
        println!("                   (created on the first `deepsearch ask`)");
    }
    println!();

    println!("Model:");
    println!("  Endpoint:        {}", config.model.base_url);
    println!("  Configured:      {}", config.model.model);
    match OllamaModel::new(&config.model) {
        Err(e) => println!("  Status:          INVALID ({e})"),
        Ok(model) => match model.health_check().await {
            Ok(models) if models.iter().any(|m| m == &config.model.model) => {
                println!("  Status:          OK")
            }
            Ok(models) => {
                println!("  Status:          reachable, model not pulled");
                println!("  Available:       {}", models.join(", "));
                println!("  Fix:             ollama pull {}", config.model.model);
            }
            Err(e) => println!("  Status:          UNREACHABLE ({e})"),
        },
    }
    println!();
    println!("Adapters:          {}", config.retrieval.adapters.join(", "));

    Ok(())
}
