use deepsearch::config::MemoryConfig;
use deepsearch::db;
use deepsearch::memory::types::{EvictionPolicy, MemoryScope};
use deepsearch::memory::MemoryManager;

fn manager(config: MemoryConfig) -> MemoryManager {
    MemoryManager::new(db::open_in_memory().unwrap(), config)
}

#[test]
fn pinned_consolidated_record_promotes_to_long_term() {
    let memory = manager(MemoryConfig {
        short_term_threshold: 2,
        ..MemoryConfig::default()
    });
    for note in ["Q: a\nA: alpha", "Q: b\nA: beta", "Q: c\nA: gamma"] {
        memory
            .write(MemoryScope::ShortTerm, "s1", Some("s1"), note)
            .unwrap();
    }
    let result = memory.consolidate("s1").unwrap();
    assert_eq!(result.records_consolidated, 2);

    let summary_id = result.summary_id.unwrap();
    let promoted = memory.promote(&summary_id, "greek letters").unwrap();
    assert_eq!(promoted.scope, MemoryScope::LongTerm);
    assert_eq!(promoted.key, "greek letters");
    assert!(promoted.value.contains("alpha"));

    // The session's records are untouched by promotion.
    assert_eq!(memory.short_term_count("s1").unwrap(), 2);
}

#[test]
fn plain_short_term_record_cannot_be_promoted() {
    let memory = manager(MemoryConfig::default());
    let note = memory
        .write(MemoryScope::ShortTerm, "s1", Some("s1"), "Q: x\nA: y")
        .unwrap();
    assert!(memory.promote(&note.id, "topic").is_err());

    memory.pin(&note.id).unwrap();
    assert!(memory.promote(&note.id, "topic").is_ok());
}

#[test]
fn capacity_eviction_drops_least_recently_accessed_and_spares_pins() {
    let memory = manager(MemoryConfig {
        long_term_capacity: 2,
        ..MemoryConfig::default()
    });
    let oldest = memory
        .write(MemoryScope::LongTerm, "oldest", None, "1")
        .unwrap();
    memory.pin(&oldest.id).unwrap();
    memory.write(MemoryScope::LongTerm, "middle", None, "2").unwrap();
    // Each new topic past capacity evicts the least recently accessed unpinned one.
    memory.write(MemoryScope::LongTerm, "newest", None, "3").unwrap();
    memory.write(MemoryScope::LongTerm, "extra", None, "4").unwrap();

    let left: Vec<String> = memory
        .list(Some(MemoryScope::LongTerm), None, 10)
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(left.len(), 2);
    assert!(left.contains(&"oldest".to_string()));
    assert!(left.contains(&"extra".to_string()));
    assert!(!left.contains(&"middle".to_string()));
    assert!(memory.enforce_capacity().unwrap().evicted.is_empty());
}

#[test]
fn key_eviction_removes_one_topic() {
    let memory = manager(MemoryConfig::default());
    memory.write(MemoryScope::LongTerm, "paris", None, "capital").unwrap();
    memory.write(MemoryScope::LongTerm, "lyon", None, "city").unwrap();

    let result = memory
        .evict(&EvictionPolicy::Key("paris".into()))
        .unwrap();
    assert_eq!(result.evicted.len(), 1);
    assert!(memory.read(MemoryScope::LongTerm, "paris").unwrap().is_none());
    assert!(memory.read(MemoryScope::LongTerm, "lyon").unwrap().is_some());
}

#[test]
fn forget_and_stats() {
    let memory = manager(MemoryConfig::default());
    let a = memory
        .write(MemoryScope::ShortTerm, "s1", Some("s1"), "note")
        .unwrap();
    memory.write(MemoryScope::LongTerm, "topic", None, "fact").unwrap();

    let stats = memory.stats().unwrap();
    assert_eq!(stats.total_memories, 2);
    assert_eq!(stats.short_term, 1);
    assert_eq!(stats.sessions.get("s1"), Some(&1));

    memory.delete(&a.id, Some("test")).unwrap();
    assert!(memory.get(&a.id).unwrap().is_none());
    assert!(memory.delete(&a.id, None).is_err());
    assert_eq!(memory.stats().unwrap().total_memories, 1);
}

#[test]
fn concurrent_consolidation_of_one_session_folds_once() {
    let memory = std::sync::Arc::new(manager(MemoryConfig {
        short_term_threshold: 2,
        ..MemoryConfig::default()
    }));
    for i in 0..6 {
        memory
            .write(MemoryScope::ShortTerm, "s1", Some("s1"), &format!("note {i}"))
            .unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let memory = std::sync::Arc::clone(&memory);
            std::thread::spawn(move || memory.consolidate("s1").unwrap())
        })
        .collect();
    let folded: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap().records_consolidated)
        .sum();

    assert_eq!(folded, 5);
    assert_eq!(memory.short_term_count("s1").unwrap(), 2);
}
