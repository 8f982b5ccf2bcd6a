use super::registry::{ModelRegistry, ModelSpec, PROVIDER_DRYRUN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolves `requested` for `capability`, falling back to the first
    /// registered model that has it. With `offline` set only dry-run models
    /// are eligible.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
        offline: bool,
    ) -> Result<ModelSelection, String> {
        let eligible = |model: &ModelSpec| !offline || model.provider == PROVIDER_DRYRUN;

        let (fallback_reason, requested_text) = match requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(requested_value) => {
                if let Some(model) = self
                    .registry
                    .ensure(requested_value, capability)
                    .filter(|model| eligible(model))
                {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(requested_value.to_string()),
                        fallback_reason: None,
                    });
                }
                (
                    Some(format!(
                        "Requested model '{requested_value}' unavailable for capability '{capability}'."
                    )),
                    Some(requested_value.to_string()),
                )
            }
            None => (Some("No model specified; using default.".to_string()), None),
        };

        let Some(model) = self
            .registry
            .by_capability(capability)
            .into_iter()
            .find(|model| eligible(model))
        else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}
