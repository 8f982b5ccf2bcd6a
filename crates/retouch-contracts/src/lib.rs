pub mod chat;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod history;
pub mod models;
pub mod presets;
