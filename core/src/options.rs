//! Scan configuration
//!
//! Options are loaded from `GRIDSCAN_*` environment variables at startup
//! and propagated (sanitized) to slaves when the grid forms.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    #[default]
    None,
    HighPerformance,
}

impl GridMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "high_performance" => Self::HighPerformance,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOptions {
    /// Address the local RPC server binds to.
    pub rpc_address: String,
    pub rpc_port: u16,
    /// Grid mode; `high_performance` enables master behavior.
    pub grid_mode: GridMode,
    /// The scan target, propagated to slaves.
    pub url: String,
    /// Plugin names to load before prepare.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// This instance's public RPC token.
    pub token: Option<String>,
    /// On a slave, the master's callback token.
    pub master_priv_token: Option<String>,
    /// URL restriction applied by workload distribution.
    #[serde(default)]
    pub restrict_paths: Vec<String>,
    /// Dispatcher endpoints the master may spawn slaves from.
    #[serde(default)]
    pub dispatcher_urls: Vec<String>,
    /// How many slave instances to spawn via dispatchers.
    #[serde(default)]
    pub spawns: usize,
}

impl ScanOptions {
    pub fn from_env() -> Self {
        Self {
            rpc_address: env_or("GRIDSCAN_RPC_ADDRESS", "127.0.0.1"),
            rpc_port: std::env::var("GRIDSCAN_RPC_PORT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(7331),
            grid_mode: GridMode::parse(&env_or("GRIDSCAN_GRID_MODE", "")),
            url: env_or("GRIDSCAN_URL", ""),
            plugins: env_list("GRIDSCAN_PLUGINS"),
            token: std::env::var("GRIDSCAN_TOKEN").ok(),
            master_priv_token: None,
            restrict_paths: Vec::new(),
            dispatcher_urls: env_list("GRIDSCAN_DISPATCHERS"),
            spawns: std::env::var("GRIDSCAN_SPAWNS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0),
        }
    }

    /// `host:port` identity of this instance inside the grid.
    pub fn self_url(&self) -> String {
        format!("{}:{}", self.rpc_address, self.rpc_port)
    }

    pub fn high_performance(&self) -> bool {
        self.grid_mode == GridMode::HighPerformance
    }

    /// Copy safe to push to a slave: target and plugin set survive, secrets
    /// and master-local keys do not.
    pub fn sanitized_for_slave(&self) -> ScanOptions {
        ScanOptions {
            rpc_address: String::new(),
            rpc_port: 0,
            grid_mode: GridMode::None,
            url: self.url.clone(),
            plugins: self.plugins.clone(),
            token: None,
            master_priv_token: None,
            restrict_paths: Vec::new(),
            dispatcher_urls: Vec::new(),
            spawns: 0,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_mode_parses_known_values() {
        assert_eq!(GridMode::parse("high_performance"), GridMode::HighPerformance);
        assert_eq!(GridMode::parse("HIGH_PERFORMANCE"), GridMode::HighPerformance);
        assert_eq!(GridMode::parse(""), GridMode::None);
        assert_eq!(GridMode::parse("weird"), GridMode::None);
    }

    #[test]
    fn self_url_joins_address_and_port() {
        let options = ScanOptions {
            rpc_address: "10.0.0.5".to_string(),
            rpc_port: 7331,
            ..Default::default()
        };
        assert_eq!(options.self_url(), "10.0.0.5:7331");
    }

    #[test]
    fn sanitized_options_strip_secrets() {
        let options = ScanOptions {
            url: "http://target".to_string(),
            plugins: vec!["autologin".to_string()],
            token: Some("public".to_string()),
            master_priv_token: Some("secret".to_string()),
            dispatcher_urls: vec!["d:1".to_string()],
            spawns: 3,
            ..Default::default()
        };
        let sanitized = options.sanitized_for_slave();
        assert_eq!(sanitized.url, "http://target");
        assert_eq!(sanitized.plugins, vec!["autologin".to_string()]);
        assert!(sanitized.token.is_none());
        assert!(sanitized.master_priv_token.is_none());
        assert!(sanitized.dispatcher_urls.is_empty());
        assert_eq!(sanitized.spawns, 0);
    }
}
