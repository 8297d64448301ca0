//! The stigmergic preamble (spec §4.5): prepended to every role-specific
//! agent prompt so the LLM knows it is one of several uncoordinated
//! workers communicating only through traces. Configurable per
//! `Config::prompts.stigmergic_preamble`; an empty string disables it.

use coordination::config::PromptConfig;

const DEFAULT_PREAMBLE: &str = "You are one of several autonomous workers in a stigmergic \
    colony migrating a Python 2 codebase to Python 3. You never communicate with the other \
    workers directly — all coordination happens through shared traces (pheromones) deposited \
    in a common store. Another worker may have already touched this file, or may touch it \
    after you. Do your job well and leave clear traces; do not assume you know the whole plan.";

/// Prepend the configured preamble to `role_prompt`. An explicit empty
/// string in config disables the preamble entirely.
pub fn with_preamble(config: &PromptConfig, role_prompt: &str) -> String {
    let preamble = config
        .stigmergic_preamble
        .as_deref()
        .unwrap_or(DEFAULT_PREAMBLE);
    if preamble.is_empty() {
        role_prompt.to_string()
    } else {
        format!("{preamble}\n\n{role_prompt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_preamble_is_prepended() {
        let config = PromptConfig::default();
        let out = with_preamble(&config, "role body");
        assert!(out.starts_with("You are one of several"));
        assert!(out.ends_with("role body"));
    }

    #[test]
    fn empty_override_disables_preamble() {
        let config = PromptConfig {
            stigmergic_preamble: Some(String::new()),
        };
        assert_eq!(with_preamble(&config, "role body"), "role body");
    }

    #[test]
    fn custom_override_replaces_default() {
        let config = PromptConfig {
            stigmergic_preamble: Some("custom preamble".to_string()),
        };
        assert_eq!(
            with_preamble(&config, "role body"),
            "custom preamble\n\nrole body"
        );
    }
}
