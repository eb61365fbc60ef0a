//! Server configuration loader for scholar-chat
//!
//! Implements single-source priority loading with flag overrides:
//! 1. --config file/dir (highest priority)
//! 2. Working directory: ./scholar-chat.json or ./.scholar-chat/config.json
//! 3. User config: $XDG_CONFIG_HOME/scholar-chat/config.json
//! 4. Environment variables only (no files)
//!
//! Secrets missing from both the config file and the environment are looked
//! up in the `.secret` file of the working directory.

use super::secret::{load_secrets, SECRET_FILE_NAME};
use anyhow::{anyhow, Context, Result};
use scholar_chat_core::config::{
    ChatConfig, McpServerConfig, ModelParams, ResolvedLlmConfig, DEFAULT_BASE_URL,
    DEFAULT_MCP_PROFILE, DEFAULT_MCP_TIMEOUT_SECONDS, DEFAULT_MODEL,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Frontend origin allowed by default
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";

pub const ENV_API_KEY: &str = "DEEPSEEK_API_KEY";
pub const ENV_SMITHERY_KEY: &str = "SMITHERY_KEY";
pub const ENV_SMITHERY_PROFILE: &str = "SMITHERY_PROFILE";
pub const ENV_MODEL: &str = "SCHOLAR_CHAT_MODEL";
pub const ENV_BASE_URL: &str = "SCHOLAR_CHAT_BASE_URL";

/// Raw configuration file format
///
/// Every field is optional. Secret values can be written as `"env:VAR_NAME"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// Model API key
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Model parameters
    pub params: ModelParams,
    /// Additional request headers
    pub headers: HashMap<String, String>,
    /// Tool provider settings
    pub mcp: RawMcpConfig,
    pub system_prompt: Option<String>,
    pub max_steps: Option<usize>,
    pub forward_tool_results: Option<bool>,
    pub allowed_origins: Option<Vec<String>>,
}

/// Tool provider section of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMcpConfig {
    /// Smithery key
    pub key: Option<String>,
    /// Smithery profile
    pub profile: Option<String>,
    /// Launcher executable, `npx` by default
    pub command: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub env: HashMap<String, String>,
}

/// Fully resolved server settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub llm: ResolvedLlmConfig,
    pub mcp: McpServerConfig,
    pub chat: ChatConfig,
    pub allowed_origins: Vec<String>,
}

/// Server configuration loader
pub struct ServerConfigLoader {
    /// Override config file/directory path
    config_override: Option<PathBuf>,
    /// Directory searched for config and secret files; the process cwd if unset
    working_dir: Option<PathBuf>,
    /// User-level config directory
    user_config_dir: Option<PathBuf>,
    /// Environment snapshot replacing the process environment
    env: Option<HashMap<String, String>>,
    /// Flag overrides
    model_override: Option<String>,
    base_url_override: Option<String>,
    allowed_origins_override: Vec<String>,
    forward_tool_results_override: Option<bool>,
}

impl ServerConfigLoader {
    /// Create a new loader
    pub fn new() -> Self {
        Self {
            config_override: None,
            working_dir: None,
            user_config_dir: dirs::config_dir(),
            env: None,
            model_override: None,
            base_url_override: None,
            allowed_origins_override: Vec::new(),
            forward_tool_results_override: None,
        }
    }

    /// Set config file/directory override
    pub fn with_config_override(mut self, path: PathBuf) -> Self {
        self.config_override = Some(path);
        self
    }

    /// Search config and secret files in `dir` instead of the process cwd
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Set the user-level config directory (`None` disables that lookup)
    pub fn with_user_config_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.user_config_dir = dir;
        self
    }

    /// Read variables from `env` instead of the process environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Set model override
    pub fn with_model_override(mut self, model: String) -> Self {
        self.model_override = Some(model);
        self
    }

    /// Set base URL override
    pub fn with_base_url_override(mut self, base_url: String) -> Self {
        self.base_url_override = Some(base_url);
        self
    }

    /// Set allowed CORS origins override; an empty list keeps the configured ones
    pub fn with_allowed_origins_override(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins_override = origins;
        self
    }

    /// Force tool result forwarding on or off
    pub fn with_forward_tool_results_override(mut self, forward: bool) -> Self {
        self.forward_tool_results_override = Some(forward);
        self
    }

    /// Load and resolve configuration
    pub async fn load(&self) -> Result<ServerSettings> {
        let working_dir = self.working_dir()?;

        // Step 1: Find and load base configuration
        let config = if let Some(override_path) = &self.config_override {
            self.load_from_path(override_path).await.with_context(|| {
                format!(
                    "Failed to load config from override path: {}",
                    override_path.display()
                )
            })?
        } else {
            self.search_and_load(&working_dir).await?
        };

        // Step 2: Fallback secrets
        let secrets = load_secrets(&working_dir.join(SECRET_FILE_NAME)).await?;

        // Step 3: Resolve to final settings
        self.resolve_config(config, &secrets)
    }

    fn working_dir(&self) -> Result<PathBuf> {
        match &self.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("Failed to determine working directory"),
        }
    }

    /// Search for config in priority order
    async fn search_and_load(&self, working_dir: &Path) -> Result<RawConfig> {
        let mut candidates = vec![
            working_dir.join("scholar-chat.json"),
            working_dir.join(".scholar-chat").join("config.json"),
        ];
        if let Some(config_dir) = &self.user_config_dir {
            candidates.push(config_dir.join("scholar-chat").join("config.json"));
        }

        for candidate in candidates {
            if candidate.is_file() {
                tracing::info!("Using config file {}", candidate.display());
                return self.load_file(&candidate).await;
            }
        }

        tracing::debug!("No config file found, using environment variables only");
        Ok(RawConfig::default())
    }

    /// Load configuration from a specific path (file or directory)
    async fn load_from_path(&self, path: &Path) -> Result<RawConfig> {
        if path.is_file() {
            self.load_file(path).await
        } else if path.is_dir() {
            let config_file = path.join("config.json");
            if config_file.exists() {
                self.load_file(&config_file).await
            } else {
                Err(anyhow!(
                    "No config.json found in directory: {}",
                    path.display()
                ))
            }
        } else {
            Err(anyhow!("Config path does not exist: {}", path.display()))
        }
    }

    /// Load a single config file
    async fn load_file(&self, path: &Path) -> Result<RawConfig> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Look up a variable in the environment, then in the secret file
    fn lookup(&self, name: &str, secrets: &HashMap<String, String>) -> Option<String> {
        let from_env = match &self.env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        from_env
            .filter(|v| !v.is_empty())
            .or_else(|| secrets.get(name).filter(|v| !v.is_empty()).cloned())
    }

    /// Resolve a config file value, handling the `env:` prefix
    fn resolve_value(
        &self,
        value: &str,
        secrets: &HashMap<String, String>,
    ) -> Result<String> {
        match value.strip_prefix("env:") {
            Some(var_name) => self
                .lookup(var_name, secrets)
                .with_context(|| format!("Environment variable not found: {}", var_name)),
            None => Ok(value.to_string()),
        }
    }

    /// Resolve a setting from the config file, falling back to `var_name`
    fn resolve_setting(
        &self,
        configured: Option<&str>,
        var_name: &str,
        secrets: &HashMap<String, String>,
    ) -> Result<Option<String>> {
        match configured {
            Some(value) => self.resolve_value(value, secrets).map(Some),
            None => Ok(self.lookup(var_name, secrets)),
        }
    }

    /// Resolve raw config to server settings
    fn resolve_config(
        &self,
        config: RawConfig,
        secrets: &HashMap<String, String>,
    ) -> Result<ServerSettings> {
        let api_key = self
            .resolve_setting(config.api_key.as_deref(), ENV_API_KEY, secrets)?
            .ok_or_else(|| {
                anyhow!(
                    "Model API key not configured. Set {} in the environment or {}, or api_key in the config file",
                    ENV_API_KEY,
                    SECRET_FILE_NAME
                )
            })?;

        let base_url = match &self.base_url_override {
            Some(base_url) => base_url.clone(),
            None => self
                .resolve_setting(config.base_url.as_deref(), ENV_BASE_URL, secrets)?
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };

        let model = match &self.model_override {
            Some(model) => model.clone(),
            None => self
                .resolve_setting(config.model.as_deref(), ENV_MODEL, secrets)?
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        };

        let llm = ResolvedLlmConfig::new(base_url, api_key, model)
            .with_params(config.params)
            .with_headers(config.headers);
        llm.validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        let smithery_key = self
            .resolve_setting(config.mcp.key.as_deref(), ENV_SMITHERY_KEY, secrets)?
            .ok_or_else(|| {
                anyhow!(
                    "Tool provider key not configured. Set {} in the environment or {}, or mcp.key in the config file",
                    ENV_SMITHERY_KEY,
                    SECRET_FILE_NAME
                )
            })?;
        let profile = self
            .resolve_setting(config.mcp.profile.as_deref(), ENV_SMITHERY_PROFILE, secrets)?
            .unwrap_or_else(|| DEFAULT_MCP_PROFILE.to_string());

        let mut mcp = McpServerConfig::semantic_scholar(&smithery_key, &profile).with_timeout(
            config
                .mcp
                .timeout_seconds
                .unwrap_or(DEFAULT_MCP_TIMEOUT_SECONDS),
        );
        if let Some(command) = config.mcp.command {
            mcp.command = command;
        }
        mcp.env = config.mcp.env;
        mcp.validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        let mut chat = ChatConfig::default();
        if let Some(system_prompt) = config.system_prompt {
            chat.system_prompt = system_prompt;
        }
        if let Some(max_steps) = config.max_steps {
            if max_steps == 0 {
                return Err(anyhow!("Configuration validation failed: max_steps must be positive"));
            }
            chat.max_steps = max_steps;
        }
        chat.forward_tool_results = self
            .forward_tool_results_override
            .or(config.forward_tool_results)
            .unwrap_or(false);

        let allowed_origins = if !self.allowed_origins_override.is_empty() {
            self.allowed_origins_override.clone()
        } else {
            config
                .allowed_origins
                .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()])
        };

        Ok(ServerSettings {
            llm,
            mcp,
            chat,
            allowed_origins,
        })
    }
}

impl Default for ServerConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn loader(dir: &TempDir, vars: &[(&str, &str)]) -> ServerConfigLoader {
        ServerConfigLoader::new()
            .with_working_dir(dir.path().to_path_buf())
            .with_user_config_dir(None)
            .with_env(env(vars))
    }

    fn key_arg(mcp: &McpServerConfig) -> &str {
        let pos = mcp.args.iter().position(|a| a == "--key").unwrap();
        &mcp.args[pos + 1]
    }

    fn profile_arg(mcp: &McpServerConfig) -> &str {
        let pos = mcp.args.iter().position(|a| a == "--profile").unwrap();
        &mcp.args[pos + 1]
    }

    #[tokio::test]
    async fn test_environment_only_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = loader(&dir, &[(ENV_API_KEY, "sk-env"), (ENV_SMITHERY_KEY, "sm-env")])
            .load()
            .await
            .unwrap();

        assert_eq!(settings.llm.api_key, "sk-env");
        assert_eq!(settings.llm.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.llm.model, DEFAULT_MODEL);
        assert_eq!(key_arg(&settings.mcp), "sm-env");
        assert_eq!(profile_arg(&settings.mcp), DEFAULT_MCP_PROFILE);
        assert_eq!(settings.mcp.timeout_seconds, DEFAULT_MCP_TIMEOUT_SECONDS);
        assert_eq!(settings.allowed_origins, vec![DEFAULT_ALLOWED_ORIGIN]);
        assert!(!settings.chat.forward_tool_results);
        assert_eq!(settings.chat.max_steps, 20);
    }

    #[tokio::test]
    async fn test_secret_file_fills_missing_variables() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SECRET_FILE_NAME),
            "DEEPSEEK_API_KEY=sk-secret\nSMITHERY_KEY=sm-secret\nSMITHERY_PROFILE=owl\n",
        )
        .unwrap();

        let settings = loader(&dir, &[(ENV_SMITHERY_KEY, "sm-env")])
            .load()
            .await
            .unwrap();

        assert_eq!(settings.llm.api_key, "sk-secret");
        assert_eq!(key_arg(&settings.mcp), "sm-env");
        assert_eq!(profile_arg(&settings.mcp), "owl");
    }

    #[tokio::test]
    async fn test_missing_keys_are_errors() {
        let dir = TempDir::new().unwrap();
        let err = loader(&dir, &[(ENV_SMITHERY_KEY, "sm")]).load().await.unwrap_err();
        assert!(err.to_string().contains(ENV_API_KEY));

        let err = loader(&dir, &[(ENV_API_KEY, "sk")]).load().await.unwrap_err();
        assert!(err.to_string().contains(ENV_SMITHERY_KEY));
    }

    #[tokio::test]
    async fn test_config_file_and_flag_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("scholar-chat.json"),
            r#"{
                "api_key": "env:MY_DEEPSEEK_KEY",
                "model": "deepseek-reasoner",
                "base_url": "https://proxy.example.com",
                "params": {"temperature": 0.2},
                "mcp": {"key": "sm-file", "profile": "raven", "timeout_seconds": 30},
                "max_steps": 5,
                "forward_tool_results": true,
                "allowed_origins": ["https://scholar.example.com"]
            }"#,
        )
        .unwrap();

        let settings = loader(&dir, &[("MY_DEEPSEEK_KEY", "sk-indirect"), (ENV_MODEL, "ignored")])
            .with_model_override("deepseek-chat".to_string())
            .with_forward_tool_results_override(false)
            .load()
            .await
            .unwrap();

        assert_eq!(settings.llm.api_key, "sk-indirect");
        assert_eq!(settings.llm.model, "deepseek-chat");
        assert_eq!(settings.llm.base_url, "https://proxy.example.com");
        assert_eq!(settings.llm.params.temperature, Some(0.2));
        assert_eq!(key_arg(&settings.mcp), "sm-file");
        assert_eq!(profile_arg(&settings.mcp), "raven");
        assert_eq!(settings.mcp.timeout_seconds, 30);
        assert_eq!(settings.chat.max_steps, 5);
        assert!(!settings.chat.forward_tool_results);
        assert_eq!(settings.allowed_origins, vec!["https://scholar.example.com"]);
    }

    #[tokio::test]
    async fn test_unresolved_env_reference_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("scholar-chat.json"),
            r#"{"api_key": "env:NOT_SET_ANYWHERE"}"#,
        )
        .unwrap();

        let err = loader(&dir, &[(ENV_SMITHERY_KEY, "sm")]).load().await.unwrap_err();
        assert!(format!("{:#}", err).contains("NOT_SET_ANYWHERE"));
    }

    #[tokio::test]
    async fn test_config_directory_discovery() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".scholar-chat");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.json"), r#"{"model": "from-dir"}"#).unwrap();

        let settings = loader(&dir, &[(ENV_API_KEY, "sk"), (ENV_SMITHERY_KEY, "sm")])
            .load()
            .await
            .unwrap();
        assert_eq!(settings.llm.model, "from-dir");
    }

    #[tokio::test]
    async fn test_user_config_directory() {
        let dir = TempDir::new().unwrap();
        let user_dir = TempDir::new().unwrap();
        let app_dir = user_dir.path().join("scholar-chat");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.json"), r#"{"max_steps": 7}"#).unwrap();

        let settings = loader(&dir, &[(ENV_API_KEY, "sk"), (ENV_SMITHERY_KEY, "sm")])
            .with_user_config_dir(Some(user_dir.path().to_path_buf()))
            .load()
            .await
            .unwrap();
        assert_eq!(settings.chat.max_steps, 7);
    }

    #[tokio::test]
    async fn test_config_override_path() {
        let dir = TempDir::new().unwrap();
        let custom = dir.path().join("custom");
        std::fs::create_dir_all(&custom).unwrap();
        std::fs::write(custom.join("config.json"), r#"{"model": "from-override"}"#).unwrap();
        std::fs::write(dir.path().join("scholar-chat.json"), r#"{"model": "from-cwd"}"#).unwrap();

        let settings = loader(&dir, &[(ENV_API_KEY, "sk"), (ENV_SMITHERY_KEY, "sm")])
            .with_config_override(custom)
            .load()
            .await
            .unwrap();
        assert_eq!(settings.llm.model, "from-override");

        let err = loader(&dir, &[])
            .with_config_override(dir.path().join("missing.json"))
            .load()
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("does not exist"));
    }
}
