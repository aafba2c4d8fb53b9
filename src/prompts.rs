//! Persona template rendering.

use crate::error::{ConfigError, Result};
use minijinja::{Environment, context};
use std::collections::HashMap;

/// Persona template used when a preference key has no override.
const DEFAULT_PERSONA: &str = "\
You are a regular member of this group chat (persona profile: {{ preference_key }}).
Speak casually, stay on topic, and keep replies short. Never mention that you
are analyzing the conversation.";

/// Renders persona summaries from minijinja templates keyed by preference key.
pub struct PromptEngine {
    env: Environment<'static>,
    overrides: HashMap<String, String>,
}

impl PromptEngine {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self {
            env: Environment::new(),
            overrides,
        }
    }

    /// Render the persona summary for a preference key.
    ///
    /// A render failure aborts the caller's analysis cycle.
    pub fn render_persona(&self, preference_key: &str) -> Result<String> {
        let source = self
            .overrides
            .get(preference_key)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PERSONA);
        let rendered = self
            .env
            .render_str(source, context! { preference_key => preference_key })
            .map_err(|source| ConfigError::PersonaRender {
                key: preference_key.to_string(),
                source,
            })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_mentions_preference_key() {
        let engine = PromptEngine::new(HashMap::new());
        let persona = engine.render_persona("casual").expect("renders");
        assert!(persona.contains("casual"));
    }

    #[test]
    fn override_takes_precedence() {
        let overrides = HashMap::from([(
            "casual".to_string(),
            "Persona {{ preference_key }} only.".to_string(),
        )]);
        let engine = PromptEngine::new(overrides);
        assert_eq!(
            engine.render_persona("casual").expect("renders"),
            "Persona casual only."
        );
    }

    #[test]
    fn broken_template_is_an_error() {
        let overrides = HashMap::from([("bad".to_string(), "{{ unclosed".to_string())]);
        let engine = PromptEngine::new(overrides);
        assert!(engine.render_persona("bad").is_err());
    }
}
