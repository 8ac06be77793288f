//! Specialized analyses - free-text sector analyses declared per template:
//! clinical validation, regulatory pathway, scientific hypothesis, or any
//! further kind an operator registers a same-named prompt stage for.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::services::model_runtime::{ModelRuntime, RuntimeOptions};
use crate::services::prompt_registry::PromptRegistry;
use crate::utils::ApiResult;

const SPECIALIZED_TIMEOUT: Duration = Duration::from_secs(120);

/// Run exactly the kinds declared on the template, in declaration order.
///
/// A declared kind without a registered prompt stage is skipped with a
/// warning; a failed model call records an empty entry rather than aborting
/// the deck.
pub async fn run_specialized_analyses(
    runtime: &dyn ModelRuntime,
    science_model: &str,
    prompts: &PromptRegistry,
    declared_kinds: &[String],
    pitch_deck_text: &str,
    num_ctx: u32,
) -> ApiResult<BTreeMap<String, String>> {
    let mut results = BTreeMap::new();

    for kind in declared_kinds {
        let prompt_template = match prompts.get_prompt(kind).await {
            Ok(text) => text,
            Err(e) if e.kind() == "not_found" => {
                tracing::warn!("Specialized analysis '{}' has no prompt stage, skipping", kind);
                continue;
            },
            Err(e) => return Err(e),
        };

        let prompt = prompt_template.replace("{pitch_deck_text}", pitch_deck_text);
        let options = RuntimeOptions::default()
            .with_timeout(SPECIALIZED_TIMEOUT)
            .with_num_ctx(num_ctx);

        match runtime.complete(science_model, &prompt, &options).await {
            Ok(text) => {
                results.insert(kind.clone(), text.trim().to_string());
            },
            Err(e) => {
                tracing::error!("Specialized analysis '{}' failed: {}", kind, e);
                results.insert(kind.clone(), String::new());
            },
        }
    }

    Ok(results)
}
