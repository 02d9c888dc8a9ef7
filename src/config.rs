//! Loader configuration.
//!
//! ## Environment Variables
//!
//! - `RUNTIME_LOADER_LOADING_LIMIT`: Maximum number of objects staged by a single
//!   `get_*` call before it is aborted (default: 1024)
//! - `RUNTIME_LOADER_POINTER_SIZE`: Storage size of reference-like types in bytes
//!   (default: the host pointer size)
//! - `RUNTIME_LOADER_CORE_ASSEMBLY`: Assembly that exports the companion types
//!   `Pointer`, `Box`, `Reference` and `Embed` (default: `"Core"`)
use std::env;

const DEFAULT_LOADING_LIMIT: usize = 1024;
const DEFAULT_CORE_ASSEMBLY: &str = "Core";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub loading_limit: usize,
    pub pointer_size: usize,
    pub core_assembly: String,
    pub pointer_type: String,
    pub box_type: String,
    pub reference_type: String,
    pub embed_type: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::for_core_assembly(DEFAULT_CORE_ASSEMBLY)
    }
}

impl LoaderConfig {
    pub fn for_core_assembly(core: &str) -> Self {
        Self {
            loading_limit: DEFAULT_LOADING_LIMIT,
            pointer_size: std::mem::size_of::<usize>(),
            core_assembly: core.to_string(),
            pointer_type: format!("{core}.Pointer"),
            box_type: format!("{core}.Box"),
            reference_type: format!("{core}.Reference"),
            embed_type: format!("{core}.Embed"),
        }
    }

    /// Defaults overlaid with the `RUNTIME_LOADER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = match env::var("RUNTIME_LOADER_CORE_ASSEMBLY") {
            Ok(core) if !core.is_empty() => Self::for_core_assembly(&core),
            _ => Self::default(),
        };
        if let Some(limit) = parse_env("RUNTIME_LOADER_LOADING_LIMIT") {
            config.loading_limit = limit;
        }
        if let Some(size) = parse_env("RUNTIME_LOADER_POINTER_SIZE") {
            if size.is_power_of_two() {
                config.pointer_size = size;
            }
        }
        config
    }

    pub fn with_loading_limit(mut self, limit: usize) -> Self {
        self.loading_limit = limit;
        self
    }

    pub fn with_pointer_size(mut self, size: usize) -> Self {
        self.pointer_size = size;
        self
    }
}

fn parse_env(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
