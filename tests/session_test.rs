mod helpers;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use deepsearch::evidence::CitationHandle;
use deepsearch::memory::types::MemoryScope;
use deepsearch::retrieval::RetrievalAdapter;
use deepsearch::search::RunState;
use deepsearch::{Orchestrator, Session};

use helpers::{answer, ScriptedModel, StaticAdapter};

const PARIS: (&str, &str, f64) = (
    "https://en.wikipedia.org/?curid=22989",
    "Paris is the capital and largest city of France.",
    0.9,
);

fn wiki() -> Vec<Arc<dyn RetrievalAdapter>> {
    vec![StaticAdapter::new("wikipedia", &[PARIS])]
}

#[tokio::test]
async fn finished_run_writes_session_note_seen_by_next_run() {
    let model = ScriptedModel::new(vec![
        answer("Paris [1].", &[1]),
        answer("About 2.1 million [1].", &[1]),
    ]);
    let ctx = helpers::context(helpers::test_config(), model.clone(), wiki());
    let session = Session::new(ctx.clone());

    Orchestrator::new(&session)
        .run("capital of France", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ctx.memory.short_term_count(&session.id).unwrap(), 1);

    Orchestrator::new(&session)
        .run("population of Paris", CancellationToken::new())
        .await
        .unwrap();

    let second_prompt = &model.prompts()[1].user;
    assert!(second_prompt.contains("Earlier in this session"));
    assert!(second_prompt.contains("Q: capital of France"));
}

#[tokio::test]
async fn long_term_topic_is_reinforced_by_a_matching_run() {
    let model = ScriptedModel::new(vec![answer("Paris [1].", &[1])]);
    let ctx = helpers::context(helpers::test_config(), model.clone(), wiki());
    ctx.memory
        .write(MemoryScope::LongTerm, "capital of france", None, "Paris")
        .unwrap();
    let before = ctx
        .memory
        .read(MemoryScope::LongTerm, "capital of france")
        .unwrap()
        .unwrap();
    let session = Session::new(ctx.clone());

    Orchestrator::new(&session)
        .run("Capital of France?", CancellationToken::new())
        .await
        .unwrap();

    assert!(model.prompts()[0].user.contains("Known about \"capital of france\": Paris"));
    let after = ctx
        .memory
        .read(MemoryScope::LongTerm, "capital of france")
        .unwrap()
        .unwrap();
    assert!(after.relevance > before.relevance);
    assert!(after.last_accessed_at >= before.last_accessed_at);
}

#[tokio::test]
async fn session_over_threshold_is_consolidated_in_background() {
    let model = ScriptedModel::new(vec![
        answer("one [1].", &[1]),
        answer("two [1].", &[1]),
        answer("three [1].", &[1]),
    ]);
    let mut config = helpers::test_config();
    config.memory.short_term_threshold = 2;
    let ctx = helpers::context(config, model, wiki());
    let session = Session::new(ctx.clone());

    for q in ["first question", "second question", "third question"] {
        let run = Orchestrator::new(&session)
            .run(q, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.state, RunState::Done);
    }
    session.settle().await.unwrap();

    // Two oldest notes folded into one summary; the latest note is kept.
    let records = ctx
        .memory
        .list(Some(MemoryScope::ShortTerm), Some(&session.id), 10)
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.consolidated));
    assert!(records.iter().any(|r| r.value.contains("Q: third question")));
}

#[tokio::test]
async fn close_releases_evidence_and_short_term_memory() {
    let model = ScriptedModel::new(vec![answer("Paris [1].", &[1])]);
    let ctx = helpers::context(helpers::test_config(), model, wiki());
    let session = Session::new(ctx.clone());
    let session_id = session.id.clone();

    let run = Orchestrator::new(&session)
        .run("capital of France", CancellationToken::new())
        .await
        .unwrap();
    assert!(!ctx.evidence.snapshot(&run.id).is_empty());

    session.close().await.unwrap();

    assert!(ctx.evidence.snapshot(&run.id).is_empty());
    assert_eq!(ctx.memory.short_term_count(&session_id).unwrap(), 0);
}

#[tokio::test]
async fn finished_runs_are_archived_with_their_evidence() {
    let model = ScriptedModel::new(vec![answer("The capital is Paris [1].", &[1])]);
    let ctx = helpers::context(helpers::test_config(), model, wiki());
    let session = Session::new(ctx.clone());

    let run = Orchestrator::new(&session)
        .run("capital of France", CancellationToken::new())
        .await
        .unwrap();

    let archive = ctx.archive.as_ref().unwrap();
    let stored = archive.load(&run.id).unwrap().unwrap();
    assert_eq!(stored.summary.state, RunState::Done);
    assert_eq!(stored.answer.as_deref(), Some("The capital is Paris [1]."));
    assert_eq!(stored.citations, run.citations());
    assert_eq!(stored.cited_evidence()[0].text, PARIS.1);
    assert_eq!(archive.list(10).unwrap().len(), 1);
}

#[tokio::test]
async fn query_ids_are_monotonic_across_runs() {
    let model = ScriptedModel::new(vec![answer("a [1].", &[1]), answer("b [1].", &[1])]);
    let ctx = helpers::context(helpers::test_config(), model, wiki());
    let session = Session::new(ctx);

    let first = Orchestrator::new(&session)
        .run("first", CancellationToken::new())
        .await
        .unwrap();
    let second = Orchestrator::new(&session)
        .run("second", CancellationToken::new())
        .await
        .unwrap();
    assert!(second.root.id > first.root.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_runs_share_stores_but_not_state() {
    let adapter: Arc<dyn RetrievalAdapter> = StaticAdapter::per_query(
        "wikipedia",
        &[],
        &[
            ("capital of France", &[PARIS]),
            (
                "capital of Italy",
                &[("https://en.wikipedia.org/?curid=25458", "Rome is the capital of Italy.", 0.9)],
            ),
        ],
    );
    let model = ScriptedModel::new(vec![answer("See [1].", &[1]), answer("See [1].", &[1])]);
    let ctx = helpers::context(helpers::test_config(), model, vec![adapter]);
    let france = Session::new(ctx.clone());
    let italy = Session::new(ctx.clone());

    let france_orch = Orchestrator::new(&france);
    let italy_orch = Orchestrator::new(&italy);
    let (a, b) = tokio::join!(
        france_orch.run("capital of France", CancellationToken::new()),
        italy_orch.run("capital of Italy", CancellationToken::new()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.id, b.id);
    assert_eq!(a.state, RunState::Done);
    assert_eq!(b.state, RunState::Done);

    let a_items = ctx.evidence.snapshot(&a.id);
    let b_items = ctx.evidence.snapshot(&b.id);
    assert_eq!(a_items.len(), 1);
    assert_eq!(b_items.len(), 1);
    assert_eq!(a_items[0].handle, CitationHandle(1));
    assert_eq!(b_items[0].handle, CitationHandle(1));
    assert_eq!(a_items[0].text, PARIS.1);
    assert_eq!(b_items[0].text, "Rome is the capital of Italy.");
    assert_eq!(a.answer.unwrap().evidence[0].text, PARIS.1);
    assert_eq!(b.answer.unwrap().evidence[0].text, "Rome is the capital of Italy.");

    assert_eq!(ctx.memory.short_term_count(&france.id).unwrap(), 1);
    assert_eq!(ctx.memory.short_term_count(&italy.id).unwrap(), 1);
    let notes = ctx
        .memory
        .list(Some(MemoryScope::ShortTerm), Some(&italy.id), 10)
        .unwrap();
    assert!(notes[0].value.contains("Q: capital of Italy"));
}
