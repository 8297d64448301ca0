//! End-to-end Scout discovery scenarios (spec §8 S1, S2): regex-only
//! pattern detection over real files on disk, and degenerate-batch
//! normalization when every candidate scores identically.

use std::collections::BTreeSet;

use swarm_agents::capabilities::discover::{analyze_python_file, discover_candidate_files, normalize_entries};

use coordination::Config;

#[test]
fn regex_only_discovery_finds_patterns_without_an_llm() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("legacy.py"),
        "print \"hello\"\nd = {}\nfor k in d.iterkeys():\n    print k\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("modern.py"), "print(\"hello\")\n").unwrap();

    let config = Config::default();
    let keys = discover_candidate_files(dir.path(), &config).unwrap();
    assert_eq!(keys, vec!["legacy.py".to_string(), "modern.py".to_string()]);

    let all_python: BTreeSet<String> = keys.iter().cloned().collect();
    let legacy_content = std::fs::read_to_string(dir.path().join("legacy.py")).unwrap();
    let entry = analyze_python_file("legacy.py", &legacy_content, &all_python, None, &config.scout);

    assert_eq!(entry.analysis_source, "regex");
    assert!(entry.patterns_found.contains(&"print_statement".to_string()));
    assert!(entry.patterns_found.contains(&"dict_iterkeys".to_string()));

    let modern_content = std::fs::read_to_string(dir.path().join("modern.py")).unwrap();
    let modern_entry = analyze_python_file("modern.py", &modern_content, &all_python, None, &config.scout);
    assert!(modern_entry.patterns_found.is_empty());
}

#[test]
fn degenerate_batch_normalizes_every_entry_to_one_half() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    let mut entries = Vec::new();
    let all_python: BTreeSet<String> = BTreeSet::new();
    for name in ["a.py", "b.py", "c.py"] {
        std::fs::write(dir.path().join(name), "x = 1\n").unwrap();
        let content = std::fs::read_to_string(dir.path().join(name)).unwrap();
        entries.push(analyze_python_file(name, &content, &all_python, None, &config.scout));
    }

    // Every entry has an identical raw_score (no patterns, no deps), so
    // min-max normalization degenerates; clamp to a neutral midpoint
    // rather than dividing by zero.
    normalize_entries(&mut entries, 0.0, 1.0);
    for entry in &entries {
        assert_eq!(entry.intensity, 0.5);
    }
}
