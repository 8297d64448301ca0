//! `--review` sub-mode (spec §6): iterates `status=needs_review` entries
//! and accepts one of `{validate, retry, skip}` per file from an
//! interactive prompt, applying the corresponding store update plus
//! (for `validate`) a VCS commit.

use std::io::{self, BufRead, Write};

use serde_json::{json, Map, Value};

use coordination::store::Namespace;
use coordination::{Guardrails, PheromoneStore};

use crate::error::AgentError;
use crate::vcs::{commit_message, Vcs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Validate,
    Retry,
    Skip,
}

impl ReviewAction {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "validate" | "v" => Some(ReviewAction::Validate),
            "retry" | "r" => Some(ReviewAction::Retry),
            "skip" | "s" => Some(ReviewAction::Skip),
            _ => None,
        }
    }
}

/// Decouples the decision loop from stdin so it can be driven by a
/// fixed script in tests.
pub trait ReviewPrompter {
    fn ask(&mut self, file_key: &str) -> ReviewAction;
}

/// Reads one of `{validate, retry, skip}` (or their first-letter
/// shorthand) from stdin, reprompting on anything else.
pub struct StdinPrompter;

impl ReviewPrompter for StdinPrompter {
    fn ask(&mut self, file_key: &str) -> ReviewAction {
        let stdin = io::stdin();
        loop {
            print!("{file_key} needs review — validate/retry/skip? ");
            let _ = io::stdout().flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
                return ReviewAction::Skip;
            }
            if let Some(action) = ReviewAction::parse(&line) {
                return action;
            }
            println!("unrecognized answer {line:?}, expected validate/retry/skip");
        }
    }
}

pub struct ReviewOutcome {
    pub file_key: String,
    pub action: ReviewAction,
}

/// Iterate every `status=needs_review` entry, lexicographic order, and
/// apply the prompter's decision to the store.
pub fn run_review(
    store: &PheromoneStore,
    guardrails: &Guardrails,
    vcs: &dyn Vcs,
    prompter: &mut dyn ReviewPrompter,
) -> Result<Vec<ReviewOutcome>, AgentError> {
    let status = store.read_all(Namespace::Status)?;
    let mut keys: Vec<String> = status
        .iter()
        .filter(|(_, v)| v.get("status").and_then(Value::as_str) == Some("needs_review"))
        .map(|(k, _)| k.clone())
        .collect();
    keys.sort();

    let mut outcomes = Vec::with_capacity(keys.len());
    for file_key in keys {
        let action = prompter.ask(&file_key);
        apply_review_decision(store, guardrails, vcs, &file_key, action)?;
        outcomes.push(ReviewOutcome { file_key, action });
    }
    Ok(outcomes)
}

fn apply_review_decision(
    store: &PheromoneStore,
    guardrails: &Guardrails,
    vcs: &dyn Vcs,
    file_key: &str,
    action: ReviewAction,
) -> Result<(), AgentError> {
    match action {
        ReviewAction::Validate => {
            vcs.add(file_key)?;
            if vcs.diff_index("HEAD")? {
                let confidence = store
                    .read_one(Namespace::Quality, file_key)?
                    .and_then(|v| v.get("confidence").and_then(Value::as_f64))
                    .unwrap_or(0.0);
                vcs.commit(&commit_message(file_key, confidence))?;
            }
            let mut fields = Map::new();
            fields.insert("status".into(), json!("validated"));
            store.update(Namespace::Status, file_key, "reviewer", fields, guardrails)?;
        }
        ReviewAction::Retry => {
            let mut fields = Map::new();
            fields.insert("status".into(), json!("retry"));
            store.update(Namespace::Status, file_key, "reviewer", fields, guardrails)?;
        }
        ReviewAction::Skip => {
            let mut fields = Map::new();
            fields.insert("status".into(), json!("skipped"));
            store.update(Namespace::Status, file_key, "reviewer", fields, guardrails)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::NullVcs;
    use tempfile::tempdir;

    struct ScriptedPrompter {
        answers: std::collections::VecDeque<ReviewAction>,
    }

    impl ReviewPrompter for ScriptedPrompter {
        fn ask(&mut self, _file_key: &str) -> ReviewAction {
            self.answers.pop_front().unwrap_or(ReviewAction::Skip)
        }
    }

    fn guardrails() -> Guardrails {
        Guardrails::new(100_000, 3, 10)
    }

    #[test]
    fn review_parses_shorthand_and_full_words() {
        assert_eq!(ReviewAction::parse("v"), Some(ReviewAction::Validate));
        assert_eq!(ReviewAction::parse("retry"), Some(ReviewAction::Retry));
        assert_eq!(ReviewAction::parse("SKIP"), Some(ReviewAction::Skip));
        assert_eq!(ReviewAction::parse("huh"), None);
    }

    #[test]
    fn review_applies_chosen_actions_to_needs_review_entries() {
        let dir = tempdir().unwrap();
        let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
        let g = guardrails();

        let mut a = Map::new();
        a.insert("status".into(), json!("needs_review"));
        store.write(Namespace::Status, "a.py", a, "validator", &g).unwrap();
        let mut b = Map::new();
        b.insert("status".into(), json!("needs_review"));
        store.write(Namespace::Status, "b.py", b, "validator", &g).unwrap();

        let mut prompter = ScriptedPrompter {
            answers: vec![ReviewAction::Validate, ReviewAction::Skip].into(),
        };
        let outcomes = run_review(&store, &g, &NullVcs, &mut prompter).unwrap();
        assert_eq!(outcomes.len(), 2);

        let a_after = store.read_one(Namespace::Status, "a.py").unwrap().unwrap();
        assert_eq!(a_after.get("status").unwrap(), "validated");
        let b_after = store.read_one(Namespace::Status, "b.py").unwrap().unwrap();
        assert_eq!(b_after.get("status").unwrap(), "skipped");
    }

    #[test]
    fn review_ignores_entries_not_needing_review() {
        let dir = tempdir().unwrap();
        let store = PheromoneStore::new(dir.path().join("pheromones")).unwrap();
        let g = guardrails();
        let mut a = Map::new();
        a.insert("status".into(), json!("pending"));
        store.write(Namespace::Status, "a.py", a, "scout", &g).unwrap();

        let mut prompter = ScriptedPrompter { answers: Vec::new().into() };
        let outcomes = run_review(&store, &g, &NullVcs, &mut prompter).unwrap();
        assert!(outcomes.is_empty());
    }
}
