//! Configuration module for acoustic-link.
//!
//! - `types`: Profile, Persona and serde default helpers
//! - `config_struct`: Config struct definition
//! - `io`: Config loading, saving, and environment overrides

mod config_struct;
mod io;
mod types;

pub use config_struct::Config;
pub use io::{
    apply_env_overrides, default_manuscript_path, get_config_path, load_config, load_config_from,
    mark_returning_author, save_config, API_KEY_ENV,
};
pub use types::{Persona, Profile};
