//! Source registry
//!
//! Maps a source identifier to its configuration schema, its defaults and the
//! factory that builds its [`Provider`]. Sources are registered explicitly at
//! process start; nothing is discovered at runtime.

use crate::config::{
    loader, source_config_path, ConfigError, FieldSpec, SourceConfig, SourceDefaults,
    COMMON_FIELDS,
};
use crate::fetcher::{demo, entsoe, icon_dream_global, Provider};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds a provider from a resolved config
pub type ProviderFactory = fn(&SourceConfig) -> Result<Arc<dyn Provider>, ConfigError>;

/// Everything the registry knows about one source
#[derive(Clone)]
pub struct SourceRegistration {
    source_id: String,
    description: String,
    defaults: SourceDefaults,
    fields: Vec<FieldSpec>,
    factory: ProviderFactory,
}

impl SourceRegistration {
    /// Create a registration; common fields are prepended to `provider_fields`
    pub fn new(
        source_id: impl Into<String>,
        description: impl Into<String>,
        defaults: SourceDefaults,
        provider_fields: &[FieldSpec],
        factory: ProviderFactory,
    ) -> Self {
        let mut fields = COMMON_FIELDS.to_vec();
        fields.extend_from_slice(provider_fields);
        Self {
            source_id: source_id.into(),
            description: description.into(),
            defaults,
            fields,
            factory,
        }
    }

    /// Source identifier
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// One-line description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Defaults applied when the document omits a setting
    pub fn defaults(&self) -> &SourceDefaults {
        &self.defaults
    }

    /// Declared fields, common ones first
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Credential keys the source requires
    pub fn required_access(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .filter_map(|f| f.path.strip_prefix("access."))
            .collect()
    }
}

impl std::fmt::Debug for SourceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistration")
            .field("source_id", &self.source_id)
            .field("description", &self.description)
            .field("defaults", &self.defaults)
            .field("fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}

/// Static registry of known sources
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    sources: BTreeMap<String, SourceRegistration>,
}

impl ConfigRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every shipped source
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtins = [
            SourceRegistration::new(
                entsoe::SOURCE_ID,
                "ENTSO-E Transparency Platform (actual generation per unit)",
                entsoe::DEFAULTS,
                entsoe::FIELDS,
                entsoe::create,
            ),
            SourceRegistration::new(
                icon_dream_global::SOURCE_ID,
                "DWD ICON-DREAM-Global hourly reanalysis (GRIB)",
                icon_dream_global::DEFAULTS,
                icon_dream_global::FIELDS,
                icon_dream_global::create,
            ),
            SourceRegistration::new(
                demo::SOURCE_ID,
                "Offline synthetic hourly series",
                demo::DEFAULTS,
                demo::FIELDS,
                demo::create,
            ),
        ];
        for registration in builtins {
            registry.insert(registration);
        }
        registry
    }

    fn insert(&mut self, registration: SourceRegistration) {
        self.sources
            .insert(registration.source_id.clone(), registration);
    }

    /// Register a source; identifiers must be unique lowercase snake_case
    pub fn register(&mut self, registration: SourceRegistration) -> Result<(), ConfigError> {
        let id = registration.source_id();
        let valid = id.chars().next().is_some_and(|c| c.is_ascii_lowercase())
            && id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(ConfigError::InvalidSourceId(id.to_string()));
        }
        if self.sources.contains_key(id) {
            return Err(ConfigError::DuplicateSource(id.to_string()));
        }
        debug!(source_id = id, fields = registration.fields.len(), "Registering source");
        self.insert(registration);
        Ok(())
    }

    /// Registration for a source
    pub fn get(&self, source_id: &str) -> Result<&SourceRegistration, ConfigError> {
        self.sources
            .get(source_id)
            .ok_or_else(|| ConfigError::UnknownSource(source_id.to_string()))
    }

    /// Registered identifiers in sorted order
    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// All registrations in identifier order
    pub fn registrations(&self) -> impl Iterator<Item = &SourceRegistration> {
        self.sources.values()
    }

    /// Resolve a parsed document plus overrides into a typed config
    ///
    /// Order: overrides, required-field check, typed construction.
    pub fn resolve(
        &self,
        source_id: &str,
        raw: Value,
        overrides: &[(String, String)],
    ) -> Result<SourceConfig, ConfigError> {
        let registration = self.get(source_id)?;
        let document = loader::resolve_document(source_id, raw, overrides, registration.fields())?;
        let config = SourceConfig::from_document(
            source_id,
            document,
            registration.defaults(),
            &registration.required_access(),
        )?;

        info!(
            source_id,
            dst_dir_raw = %config.dst_dir_raw().display(),
            granularity = %config.crawl().granularity,
            overrides = overrides.len(),
            "Resolved source config"
        );
        Ok(config)
    }

    /// Resolve from YAML text
    pub fn resolve_str(
        &self,
        source_id: &str,
        yaml: &str,
        overrides: &[(String, String)],
    ) -> Result<SourceConfig, ConfigError> {
        self.get(source_id)?;
        self.resolve(source_id, loader::parse_yaml(yaml)?, overrides)
    }

    /// Resolve from `<configs_dir>/<source_id>.yaml`
    pub fn resolve_file(
        &self,
        configs_dir: &Path,
        source_id: &str,
        overrides: &[(String, String)],
    ) -> Result<SourceConfig, ConfigError> {
        self.get(source_id)?;
        let path = source_config_path(configs_dir, source_id);
        debug!(path = %path.display(), "Loading source config");
        self.resolve(source_id, loader::load_yaml(&path)?, overrides)
    }

    /// Build the provider bound to a resolved config
    pub fn create_provider(&self, config: &SourceConfig) -> Result<Arc<dyn Provider>, ConfigError> {
        let registration = self.get(config.source_id())?;
        (registration.factory)(config)
    }
}
