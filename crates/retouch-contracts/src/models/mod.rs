mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, CAPABILITY_IMAGE_EDIT, CAPABILITY_VIDEO, PROVIDER_DRYRUN,
    PROVIDER_GEMINI,
};
pub use selectors::{ModelSelection, ModelSelector};
