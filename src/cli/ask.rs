//! CLI `ask` command: one live run with progress on stderr and the cited
//! answer on stdout.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use deepsearch::config::DeepSearchConfig;
use deepsearch::search::{RunEvent, RunState};
use deepsearch::{Orchestrator, RunOptions, SearchContext, Session};

pub async fn ask(
    config: DeepSearchConfig,
    query: &str,
    session_id: Option<String>,
    max_depth: Option<usize>,
    adapters: Option<Vec<String>>,
) -> Result<()> {
    let ctx = Arc::new(SearchContext::from_config(config)?);
    let keep_session = session_id.is_some();
    let session = match session_id {
        Some(id) => Session::with_id(ctx, id),
        None => Session::new(ctx),
    };

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .expect("valid template"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("planning");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress = {
        let pb = pb.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(msg) = describe(&event) {
                    pb.set_message(msg);
                }
            }
        })
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let orchestrator = Orchestrator::new(&session).with_options(RunOptions {
        max_depth,
        adapters,
        events: Some(tx),
    });
    let run = orchestrator.run(query, cancel).await;
    // Closes the event channel.
    drop(orchestrator);
    let _ = progress.await;
    pb.finish_and_clear();
    let run = run?;

    match &run.answer {
        Some(answer) => {
            println!("{}", answer.text);
            super::print_sources(&answer.evidence);
            if answer.partial {
                let reason = run.termination.map(|t| t.to_string()).unwrap_or_default();
                eprintln!();
                eprintln!("Partial answer (run ended: {reason})");
            }
        }
        None => println!("{}", run.no_answer_message()),
    }
    if run.answer.as_ref().is_some_and(|a| !a.partial) && !run.degraded.is_empty() {
        let names: Vec<String> = run.degraded.iter().map(ToString::to_string).collect();
        eprintln!("Degraded sources: {}", names.join("; "));
    }
    eprintln!("Run {} ({} steps)", run.id, run.steps.len());

    if keep_session {
        session.settle().await?;
    } else {
        session.close().await?;
    }
    Ok(())
}

fn describe(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::Retrieving { depth: 0, query } => Some(format!("searching: {query}")),
        RunEvent::Retrieving { depth, query } => Some(format!("follow-up {depth}: {query}")),
        RunEvent::Retrieved {
            new_evidence,
            degraded,
        } if degraded.is_empty() => Some(format!("{new_evidence} new sources")),
        RunEvent::Retrieved {
            new_evidence,
            degraded,
        } => Some(format!(
            "{new_evidence} new sources ({} unavailable)",
            degraded.len()
        )),
        RunEvent::StepStarted {
            forced: Some(reason),
            ..
        } => Some(format!("writing final answer: {reason}")),
        RunEvent::StepStarted { index, .. } => Some(format!("reasoning (step {})", index + 1)),
        RunEvent::StateChanged {
            state: RunState::Answering,
        } => Some("answering".into()),
        _ => None,
    }
}
