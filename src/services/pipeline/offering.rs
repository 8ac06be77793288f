//! Offering extraction - turns ordered slide descriptions into the
//! one-paragraph company offering the classifier runs on, plus the startup
//! name surfaced as the result file's deck name.

use super::result::SlideDescription;
use super::session::slide_text;
use crate::services::model_runtime::{ModelRuntime, RuntimeOptions};
use crate::utils::ApiResult;

/// One-paragraph company one-liner; surfaced verbatim as `company_offering`.
pub async fn extract_offering(
    runtime: &dyn ModelRuntime,
    text_model: &str,
    visual_results: &[SlideDescription],
    offering_prompt: &str,
) -> ApiResult<String> {
    let prompt = offering_prompt.replace("{pitch_deck_text}", &slide_text(visual_results));
    let options = RuntimeOptions::default();

    let offering = runtime.complete(text_model, &prompt, &options).await?;
    Ok(offering.trim().to_string())
}

/// Startup name, or None when the model returns nothing usable.
pub async fn extract_startup_name(
    runtime: &dyn ModelRuntime,
    text_model: &str,
    visual_results: &[SlideDescription],
    name_prompt: &str,
) -> ApiResult<Option<String>> {
    let prompt = name_prompt.replace("{pitch_deck_text}", &slide_text(visual_results));
    let options = RuntimeOptions::default();

    let name = runtime.complete(text_model, &prompt, &options).await?;
    // Models occasionally return multi-line commentary; keep the first line.
    let name = name
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::model_runtime::{ModelInfo, RuntimeError};
    use async_trait::async_trait;

    struct EchoRuntime;

    #[async_trait]
    impl ModelRuntime for EchoRuntime {
        async fn list_models(&self) -> Result<Vec<ModelInfo>, RuntimeError> {
            Ok(vec![])
        }
        async fn pull_model(&self, _name: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn delete_model(&self, _name: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn analyze_image(
            &self,
            _model: &str,
            _prompt: &str,
            _image: &[u8],
            _options: &RuntimeOptions,
        ) -> Result<String, RuntimeError> {
            Ok(String::new())
        }
        async fn complete(
            &self,
            _model: &str,
            prompt: &str,
            _options: &RuntimeOptions,
        ) -> Result<String, RuntimeError> {
            // Echo the prompt back so tests can assert on substitution.
            Ok(prompt.to_string())
        }
    }

    fn slides() -> Vec<SlideDescription> {
        vec![
            SlideDescription {
                page_number: 1,
                slide_image_path: "analysis/d/slide_1.jpg".into(),
                description: "Acme Health title slide".into(),
            },
            SlideDescription {
                page_number: 2,
                slide_image_path: "analysis/d/slide_2.jpg".into(),
                description: "Telehealth platform for rural clinics".into(),
            },
        ]
    }

    #[tokio::test]
    async fn offering_prompt_receives_ordered_slide_text() {
        let offering = extract_offering(
            &EchoRuntime,
            "gemma3:12b",
            &slides(),
            "Summarize:\n{pitch_deck_text}",
        )
        .await
        .unwrap();

        assert_eq!(
            offering,
            "Summarize:\nAcme Health title slide\n\nTelehealth platform for rural clinics"
        );
    }

    #[tokio::test]
    async fn startup_name_keeps_first_line_only() {
        struct NameRuntime;

        #[async_trait]
        impl ModelRuntime for NameRuntime {
            async fn list_models(&self) -> Result<Vec<ModelInfo>, RuntimeError> {
                Ok(vec![])
            }
            async fn pull_model(&self, _name: &str) -> Result<(), RuntimeError> {
                Ok(())
            }
            async fn delete_model(&self, _name: &str) -> Result<(), RuntimeError> {
                Ok(())
            }
            async fn analyze_image(
                &self,
                _m: &str,
                _p: &str,
                _i: &[u8],
                _o: &RuntimeOptions,
            ) -> Result<String, RuntimeError> {
                Ok(String::new())
            }
            async fn complete(
                &self,
                _m: &str,
                _p: &str,
                _o: &RuntimeOptions,
            ) -> Result<String, RuntimeError> {
                Ok("Acme Health\nThe name appears on slide 1.".to_string())
            }
        }

        let name = extract_startup_name(&NameRuntime, "gemma3:12b", &slides(), "{pitch_deck_text}")
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("Acme Health"));
    }
}
