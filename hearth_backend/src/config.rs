use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::composer::ComposerSettings;
use crate::lexicon::DEFAULT_POETIC_MARKERS;
use crate::persistence::ProcessingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    // Persistence (Supabase when both are set, else the local SQLite file)
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_key: Option<String>,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_persistence_timeout_secs")]
    pub persistence_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub default_persist_history: bool,

    // Composition
    #[serde(default)]
    pub default_processing_mode: ProcessingMode,
    #[serde(default)]
    pub enable_tier3_poetic: bool,
    #[serde(default = "default_poetic_markers")]
    pub poetic_markers: Vec<String>,
    #[serde(default = "default_max_reply_words")]
    pub max_reply_words: usize,
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
    #[serde(default = "default_repetition_window")]
    pub repetition_window: usize,

    // Memory
    #[serde(default = "default_rehydrate_anchor_limit")]
    pub rehydrate_anchor_limit: usize,
    #[serde(default = "default_theme_reflection_threshold")]
    pub theme_reflection_threshold: u32,

    // Subordinate responder (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default)]
    pub llm_api_url: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_responder_timeout_secs")]
    pub responder_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> String {
    "hearth_memory.db".to_string()
}

fn default_persistence_timeout_secs() -> u64 {
    8
}

fn default_poetic_markers() -> Vec<String> {
    DEFAULT_POETIC_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_max_reply_words() -> usize {
    40
}

fn default_max_reply_chars() -> usize {
    400
}

fn default_repetition_window() -> usize {
    5
}

fn default_rehydrate_anchor_limit() -> usize {
    20
}

fn default_theme_reflection_threshold() -> u32 {
    2
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_responder_timeout_secs() -> u64 {
    6
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            database_path: default_database_path(),
            persistence_timeout_secs: default_persistence_timeout_secs(),
            default_persist_history: true,
            default_processing_mode: ProcessingMode::Local,
            enable_tier3_poetic: false,
            poetic_markers: default_poetic_markers(),
            max_reply_words: default_max_reply_words(),
            max_reply_chars: default_max_reply_chars(),
            repetition_window: default_repetition_window(),
            rehydrate_anchor_limit: default_rehydrate_anchor_limit(),
            theme_reflection_threshold: default_theme_reflection_threshold(),
            llm_api_url: None,
            llm_model: default_llm_model(),
            llm_api_key: None,
            responder_timeout_secs: default_responder_timeout_secs(),
        }
    }
}

fn env_flag(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("1") || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("yes")
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl CompanionConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("hearth_config.toml")
    }

    /// Load hearth_config.toml (next to the executable) or defaults, then
    /// apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_file(&Self::config_path()).unwrap_or_else(|| {
            tracing::warn!("No config file found, using defaults + env vars");
            Self::default()
        });
        config.apply_env_overrides(|key| env::var(key).ok());
        config
    }

    fn load_file(path: &Path) -> Option<Self> {
        let contents = fs::read_to_string(path).ok()?;
        match toml::from_str::<CompanionConfig>(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::error!("Failed to parse {:?}: {}", path, e);
                None
            }
        }
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Applies the recognised environment variables. `lookup` is
    /// `std::env::var` outside of tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SUPABASE_URL").and_then(non_empty) {
            self.supabase_url = Some(url);
        }

        if let Some(key) = lookup("SUPABASE_SERVICE_ROLE_KEY")
            .and_then(non_empty)
            .or_else(|| lookup("SUPABASE_KEY").and_then(non_empty))
        {
            self.supabase_key = Some(key);
        }

        if let Some(path) = lookup("HEARTH_DATABASE_PATH").and_then(non_empty) {
            self.database_path = path;
        }

        if let Some(mode) = lookup("DEFAULT_PROCESSING_MODE").and_then(non_empty) {
            self.default_processing_mode = ProcessingMode::from_stored(&mode);
        }

        if let Some(enabled) = lookup("ENABLE_TIER3_POETIC") {
            self.enable_tier3_poetic = env_flag(enabled.trim());
        }

        if let Some(url) = lookup("LLM_API_URL").and_then(non_empty) {
            self.llm_api_url = Some(url);
        }

        if let Some(model) = lookup("LLM_MODEL").and_then(non_empty) {
            self.llm_model = model;
        }

        if let Some(key) = lookup("LLM_API_KEY").and_then(non_empty) {
            self.llm_api_key = Some(key);
        }
    }

    /// Supabase URL and key, when both are configured.
    pub fn supabase_credentials(&self) -> Option<(&str, &str)> {
        match (self.supabase_url.as_deref(), self.supabase_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Some((url, key)),
            _ => None,
        }
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_secs(self.persistence_timeout_secs.max(1))
    }

    pub fn responder_timeout(&self) -> Duration {
        Duration::from_secs(self.responder_timeout_secs.max(1))
    }

    pub fn composer_settings(&self) -> ComposerSettings {
        ComposerSettings {
            poetic_markers: self.poetic_markers.clone(),
            max_reply_words: self.max_reply_words,
            max_reply_chars: self.max_reply_chars,
            repetition_window: self.repetition_window,
            enable_tier3_poetic: self.enable_tier3_poetic,
            processing_mode: self.default_processing_mode,
            responder_timeout: self.responder_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = CompanionConfig::default();
        assert_eq!(config.database_path, "hearth_memory.db");
        assert_eq!(config.default_processing_mode, ProcessingMode::Local);
        assert!(!config.enable_tier3_poetic);
        assert_eq!(config.max_reply_words, 40);
        assert_eq!(config.max_reply_chars, 400);
        assert_eq!(config.repetition_window, 5);
        assert_eq!(config.rehydrate_anchor_limit, 20);
        assert_eq!(config.persistence_timeout(), Duration::from_secs(8));
        assert_eq!(config.responder_timeout(), Duration::from_secs(6));
        assert!(config.default_persist_history);
        assert!(config.supabase_credentials().is_none());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: CompanionConfig = toml::from_str(
            r#"
            database_path = "/tmp/other.db"
            poetic_markers = ["tapestry"]
            default_processing_mode = "ai_preferred"
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, "/tmp/other.db");
        assert_eq!(config.poetic_markers, vec!["tapestry".to_string()]);
        assert_eq!(config.default_processing_mode, ProcessingMode::Local);
        assert_eq!(config.max_reply_chars, 400);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = CompanionConfig::default();
        config.apply_env_overrides(lookup_from(&[
            ("SUPABASE_URL", "https://example.supabase.co"),
            ("SUPABASE_KEY", "anon"),
            ("DEFAULT_PROCESSING_MODE", "hybrid"),
            ("ENABLE_TIER3_POETIC", "yes"),
            ("HEARTH_DATABASE_PATH", "  "),
            ("LLM_API_URL", "http://localhost:11434/v1"),
        ]));
        assert_eq!(
            config.supabase_credentials(),
            Some(("https://example.supabase.co", "anon"))
        );
        assert_eq!(config.default_processing_mode, ProcessingMode::Hybrid);
        assert!(config.enable_tier3_poetic);
        assert_eq!(config.database_path, "hearth_memory.db");
        assert_eq!(config.llm_api_url.as_deref(), Some("http://localhost:11434/v1"));

        config.apply_env_overrides(lookup_from(&[
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
            ("SUPABASE_KEY", "anon"),
        ]));
        assert_eq!(config.supabase_key.as_deref(), Some("service"));
    }

    #[test]
    fn composer_settings_follow_config() {
        let config = CompanionConfig {
            enable_tier3_poetic: true,
            max_reply_chars: 300,
            ..CompanionConfig::default()
        };
        let settings = config.composer_settings();
        assert!(settings.enable_tier3_poetic);
        assert_eq!(settings.max_reply_chars, 300);
        assert_eq!(settings.processing_mode, ProcessingMode::Local);
    }
}
