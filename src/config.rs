//! Configuration management for vm-compare
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::chain::ChainKind;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub app: AppConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: ChainsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Timer progress sampling interval
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_ms: u64,
    /// Finished actions kept for latency statistics
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

fn default_sampling_interval() -> u64 {
    crate::timer::DEFAULT_SAMPLING_INTERVAL_MS
}

fn default_history_limit() -> usize {
    1_000
}

fn default_notification_buffer() -> usize {
    64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: default_sampling_interval(),
            history_limit: default_history_limit(),
            notification_buffer: default_notification_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainsConfig {
    pub bvm: ChainConfig,
    pub evm: ChainConfig,
}

impl ChainsConfig {
    pub fn get(&self, kind: ChainKind) -> &ChainConfig {
        match kind {
            ChainKind::Bvm => &self.bvm,
            ChainKind::Evm => &self.evm,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub backend: Backend,
    /// Transaction explorer prefix
    pub explorer_url: String,
    /// Amount locked into a freshly deployed contract (satoshis on BVM)
    #[serde(default)]
    pub deploy_funding: u64,
    #[serde(default)]
    pub simulated: SimulatedConfig,
    pub rpc: Option<RpcConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Simulated,
    Rpc,
}

/// Knobs of the in-process ledger
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulatedConfig {
    pub latency_ms: u64,
    /// Balance credited to a wallet on first connect
    pub faucet_balance: u64,
    pub fee: u64,
    pub max_tx_bytes: usize,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            latency_ms: 250,
            faucet_balance: 100_000,
            fee: 1,
            max_tx_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    /// Expected chain id; checked against the endpoint when set
    pub chain_id: Option<u64>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    pub message_artifact: PathBuf,
    pub counter_artifact: PathBuf,
}

fn default_poll_interval() -> u64 {
    500
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("VM_COMPARE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.app.history_limit == 0 {
            anyhow::bail!("app.history_limit must be positive");
        }
        if self.app.notification_buffer == 0 {
            anyhow::bail!("app.notification_buffer must be positive");
        }

        for kind in ChainKind::ALL {
            let chain = self.chains.get(kind);
            if chain.backend == Backend::Rpc {
                if kind == ChainKind::Bvm {
                    anyhow::bail!("Chain {} does not support the rpc backend", kind);
                }
                let rpc = chain
                    .rpc
                    .as_ref()
                    .with_context(|| format!("Chain {} selects rpc without rpc settings", kind))?;
                if rpc.url.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URL configured", kind);
                }
            }
            if chain.explorer_url.is_empty() {
                tracing::warn!("Chain {} has no explorer URL - links will be bare ids", kind);
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BASE: &str = r#"
[app]
sampling_interval_ms = 10

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[chains.bvm]
backend = "simulated"
explorer_url = "https://test.whatsonchain.com/tx/"
deploy_funding = 100

[chains.bvm.simulated]
latency_ms = 0
"#;

    fn with_evm(evm: &str) -> String {
        format!(
            "{}\n[chains.evm]\nexplorer_url = \"https://testnet.bscscan.com/tx/\"\n{}\n",
            BASE, evm
        )
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("VM_COMPARE_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${VM_COMPARE_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(with_evm("backend = \"simulated\"").as_bytes())
            .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.app.history_limit, 1_000);
        assert_eq!(settings.chains.bvm.deploy_funding, 100);
        assert_eq!(settings.chains.bvm.simulated.latency_ms, 0);
        assert_eq!(settings.chains.bvm.simulated.fee, 1);
        assert_eq!(settings.chains.evm.simulated, SimulatedConfig::default());
        assert_eq!(settings.chains.get(ChainKind::Evm).backend, Backend::Simulated);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Settings::load_from(Path::new("/nonexistent/vm-compare.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_bvm_rpc_backend_rejected() {
        let raw = with_evm("backend = \"simulated\"").replacen(
            "backend = \"simulated\"",
            "backend = \"rpc\"",
            1,
        );
        let err = Settings::parse(&raw).unwrap_err();
        assert!(err.to_string().contains("BVM"));
    }

    #[test]
    fn test_evm_rpc_requires_settings() {
        let err = Settings::parse(&with_evm("backend = \"rpc\"")).unwrap_err();
        assert!(err.to_string().contains("rpc settings"));

        let raw = with_evm(
            "backend = \"rpc\"\n\n[chains.evm.rpc]\nurl = \"http://localhost:8545\"\n\
             message_artifact = \"a.json\"\ncounter_artifact = \"b.json\"",
        );
        let settings = Settings::parse(&raw).unwrap();
        let rpc = settings.chains.evm.rpc.unwrap();
        assert_eq!(rpc.poll_interval_ms, 500);
        assert!(rpc.fallback_urls.is_empty());
        assert_eq!(rpc.chain_id, None);
    }
}
