use indexmap::IndexMap;

pub const CAPABILITY_IMAGE_EDIT: &str = "image_edit";
pub const CAPABILITY_VIDEO: &str = "video";

pub const PROVIDER_GEMINI: &str = "gemini";
pub const PROVIDER_DRYRUN: &str = "dryrun";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub long_running: bool,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn is_dryrun(&self) -> bool {
        self.provider == PROVIDER_DRYRUN
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], long_running: bool| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                long_running,
            },
        );
    };

    // First entry per capability is the default.
    insert(
        "gemini-2.5-flash-image",
        PROVIDER_GEMINI,
        &[CAPABILITY_IMAGE_EDIT],
        false,
    );
    insert(
        "gemini-3-pro-image-preview",
        PROVIDER_GEMINI,
        &[CAPABILITY_IMAGE_EDIT],
        false,
    );
    insert(
        "veo-3.1-fast-generate-preview",
        PROVIDER_GEMINI,
        &[CAPABILITY_VIDEO],
        true,
    );
    insert(
        "veo-3.1-generate-preview",
        PROVIDER_GEMINI,
        &[CAPABILITY_VIDEO],
        true,
    );
    insert(
        "dryrun-edit-1",
        PROVIDER_DRYRUN,
        &[CAPABILITY_IMAGE_EDIT],
        false,
    );
    insert("dryrun-video-1", PROVIDER_DRYRUN, &[CAPABILITY_VIDEO], true);

    map
}
