use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::RunConfig;
use crate::error::{LoadsimError, Result};
use crate::transport::{ClientSettings, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub verbose: bool,
    pub exchange: ExchangeConfig,
    pub http: ClientSettings,
    pub retry: RetryConfig,
    pub report: ReportConfig,
    pub agbot: AgbotConfig,
    pub node: NodeConfig,
    pub probe: ProbeConfig,
}

/// Where the exchange lives and who we are to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub url: String,
    pub root_password: String,
    pub iam_key: String,
    pub iam_email: String,
    /// Set for public cloud accounts; unset means a local exchange user
    pub iam_account_id: Option<String>,
    pub org: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            root_password: String::new(),
            iam_key: String::new(),
            iam_email: String::new(),
            iam_account_id: None,
            org: "performancenodeagbot".to_string(),
        }
    }
}

impl ExchangeConfig {
    /// Fail unless everything a setup phase needs is present.
    pub fn require_credentials(&self) -> Result<()> {
        for (name, value) in [
            ("HZN_EXCHANGE_URL", &self.url),
            ("EXCHANGE_ROOTPW", &self.root_password),
            ("EXCHANGE_IAM_KEY", &self.iam_key),
            ("EXCHANGE_IAM_EMAIL", &self.iam_email),
        ] {
            if value.is_empty() {
                return Err(LoadsimError::Config(format!("environment variable {} is required", name)));
            }
        }
        Ok(())
    }

    pub fn require_url(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(LoadsimError::Config("environment variable HZN_EXCHANGE_URL is required".to_string()));
        }
        Ok(())
    }

    pub fn root_auth(&self) -> String {
        format!("root/root:{}", self.root_password)
    }

    /// Credentials of the org user that owns the simulated resources.
    pub fn user_auth(&self) -> String {
        match &self.iam_account_id {
            Some(_) => format!("{}/iamapikey:{}", self.org, self.iam_key),
            None => format!("{}/{}:{}", self.org, self.iam_email, self.iam_key),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub dir: PathBuf,
    /// Overrides the derived `<dir>/<command>/<name>.summary` path
    pub file: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/exchangePerf"),
            file: None,
        }
    }
}

impl ReportConfig {
    pub fn path_for(&self, command: &str, name: &str) -> PathBuf {
        match &self.file {
            Some(file) => file.clone(),
            None => self.dir.join(command).join(format!("{}.summary", name)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgbotConfig {
    pub agreement_checks: u32,
    pub agbots: u32,
    pub msgs: u32,
    /// Seconds per agreement check
    pub new_agreement_interval: u64,
    pub heartbeat_interval: u64,
    pub version_check_interval: u64,
    pub short_circuit_check_round: u32,
    pub short_circuit_empty_rounds: u32,
    pub no_sleep: bool,
    pub create_pattern: bool,
}

impl Default for AgbotConfig {
    fn default() -> Self {
        Self {
            agreement_checks: 90,
            agbots: 1,
            msgs: 50,
            new_agreement_interval: 10,
            heartbeat_interval: 60,
            version_check_interval: 60,
            short_circuit_check_round: 10,
            short_circuit_empty_rounds: 3,
            no_sleep: false,
            create_pattern: false,
        }
    }
}

impl AgbotConfig {
    pub fn run_config(&self) -> Result<RunConfig> {
        RunConfig::new(self.agreement_checks, self.new_agreement_interval)?
            .with_short_circuit(self.short_circuit_check_round, self.short_circuit_empty_rounds)
            .map(|c| c.with_no_sleep(self.no_sleep))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub heartbeats: u32,
    pub nodes: u32,
    pub services: u32,
    pub patterns: u32,
    pub create_reg_sleep_ms: u64,
    /// Seconds per heartbeat round
    pub heartbeat_interval: u64,
    pub service_check_interval: u64,
    pub version_check_interval: u64,
    /// Nodes given an agreement per round; derived from the run length when unset
    pub node_agreements: Option<u32>,
    pub no_sleep: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeats: 15,
            nodes: 50,
            services: 3,
            patterns: 1,
            create_reg_sleep_ms: 0,
            heartbeat_interval: 60,
            service_check_interval: 300,
            version_check_interval: 720,
            node_agreements: None,
            no_sleep: false,
        }
    }
}

impl NodeConfig {
    pub fn run_config(&self) -> Result<RunConfig> {
        Ok(RunConfig::new(self.heartbeats, self.heartbeat_interval)?.with_no_sleep(self.no_sleep))
    }

    /// Spread agreements so every node has one a heartbeat or so before the end.
    pub fn agreements_per_round(&self) -> u32 {
        self.node_agreements.unwrap_or_else(|| {
            let rounds = if self.heartbeats > 1 {
                self.heartbeats - 1
            } else {
                self.heartbeats.max(1)
            };
            self.nodes / rounds + 1
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub org: String,
    pub node_id: String,
    /// `<node>:<token>`, optionally org-qualified
    pub node_auth: String,
    /// Org prepended to `node_auth` when it has none
    pub default_org: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            org: "IBM".to_string(),
            node_id: "n1".to_string(),
            node_auth: String::new(),
            default_org: None,
        }
    }
}

fn parse_int<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LoadsimError::Config(format!("could not convert {}={} to an integer number", name, value)))
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| LoadsimError::Config(format!("failed to read config file {}: {}", path.display(), e)))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| LoadsimError::Config(format!("failed to parse config file {}: {}", path.display(), e)))?;

        log::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("HZN_EXCHANGE_URL") {
            self.exchange.url = v;
        }
        if let Some(v) = get("EXCHANGE_ROOTPW") {
            self.exchange.root_password = v;
        }
        if let Some(v) = get("EXCHANGE_IAM_KEY") {
            self.exchange.iam_key = v;
        }
        if let Some(v) = get("EXCHANGE_IAM_EMAIL") {
            self.exchange.iam_email = v;
        }
        if let Some(v) = get("EXCHANGE_IAM_ACCOUNT_ID") {
            self.exchange.iam_account_id = Some(v);
        }
        if let Some(v) = get("EX_PERF_ORG") {
            self.exchange.org = v;
        }

        if let Some(v) = get("EX_PERF_REPORT_DIR") {
            self.report.dir = PathBuf::from(v);
        }
        if let Some(v) = get("EX_PERF_REPORT_FILE") {
            self.report.file = Some(PathBuf::from(v));
        }

        if get("EX_PERF_DONT_REUSE_HTTP_CLIENT").is_some() {
            self.http.reuse_client = false;
        }
        if get("HZN_SSL_SKIP_VERIFY").is_some() {
            self.http.skip_tls_verify = true;
        }
        if let Some(v) = get("CURL_CA_BUNDLE") {
            self.http.ca_bundle = Some(PathBuf::from(v));
        }

        let agbot = &mut self.agbot;
        for (name, slot) in [
            ("EX_PERF_NUM_AGR_CHECKS", &mut agbot.agreement_checks),
            ("EX_PERF_NUM_AGBOTS", &mut agbot.agbots),
            ("EX_PERF_NUM_MSGS", &mut agbot.msgs),
            ("EX_AGBOT_SHORT_CIRCUIT_CHK_INTERVAL", &mut agbot.short_circuit_check_round),
            ("EX_AGBOT_SHORT_CIRCUIT_EMPTY_INTERVALS", &mut agbot.short_circuit_empty_rounds),
        ] {
            if let Some(v) = get(name) {
                *slot = parse_int(name, &v)?;
            }
        }
        for (name, slot) in [
            ("EX_AGBOT_NEW_AGR_INTERVAL", &mut agbot.new_agreement_interval),
            ("EX_AGBOT_HB_INTERVAL", &mut agbot.heartbeat_interval),
            ("EX_AGBOT_VERSION_CHECK_INTERVAL", &mut agbot.version_check_interval),
        ] {
            if let Some(v) = get(name) {
                *slot = parse_int(name, &v)?;
            }
        }
        if get("EX_AGBOT_NO_SLEEP").is_some() {
            agbot.no_sleep = true;
        }
        if get("EX_AGBOT_CREATE_PATTERN").is_some() {
            agbot.create_pattern = true;
        }

        let node = &mut self.node;
        for (name, slot) in [
            ("EX_PERF_NUM_HEARTBEATS", &mut node.heartbeats),
            ("EX_PERF_NUM_NODES", &mut node.nodes),
            ("EX_PERF_NUM_SVCS", &mut node.services),
            ("EX_PERF_NUM_PATTERNS", &mut node.patterns),
        ] {
            if let Some(v) = get(name) {
                *slot = parse_int(name, &v)?;
            }
        }
        for (name, slot) in [
            ("EX_PERF_CREATE_REG_SLEEP_MS", &mut node.create_reg_sleep_ms),
            ("EX_NODE_HB_INTERVAL", &mut node.heartbeat_interval),
            ("EX_NODE_SVC_CHECK_INTERVAL", &mut node.service_check_interval),
            ("EX_NODE_VERSION_CHECK_INTERVAL", &mut node.version_check_interval),
        ] {
            if let Some(v) = get(name) {
                *slot = parse_int(name, &v)?;
            }
        }
        if let Some(v) = get("EX_PERF_NUM_NODE_AGREEMENTS") {
            node.node_agreements = Some(parse_int("EX_PERF_NUM_NODE_AGREEMENTS", &v)?);
        }
        if get("EX_NODE_NO_SLEEP").is_some() {
            node.no_sleep = true;
        }

        if let Some(v) = get("HZN_EXCHANGE_NODE_AUTH") {
            self.probe.node_auth = v;
        }
        if let Some(v) = get("HZN_ORG_ID") {
            self.probe.default_org = Some(v);
        }

        if let Some(v) = get("VERBOSE") {
            self.verbose = v == "true";
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.exchange.org, "performancenodeagbot");
        assert_eq!(config.agbot.agreement_checks, 90);
        assert_eq!(config.agbot.new_agreement_interval, 10);
        assert_eq!(config.node.heartbeats, 15);
        assert_eq!(config.node.nodes, 50);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.policy().backoff, Duration::from_secs(2));
        assert!(config.http.reuse_client);
        assert_eq!(config.probe.org, "IBM");
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "exchange:\n  url: http://localhost:8080/v1\n  org: perf\nagbot:\n  agbots: 4\nhttp:\n  timeout_ms: 5000\n"
        )
        .unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();

        assert_eq!(config.exchange.url, "http://localhost:8080/v1");
        assert_eq!(config.exchange.org, "perf");
        assert_eq!(config.agbot.agbots, 4);
        // untouched fields keep their defaults
        assert_eq!(config.agbot.msgs, 50);
        assert_eq!(config.http.timeout_ms, 5000);
        assert_eq!(config.http.connect_timeout_ms, 20_000);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let path = PathBuf::from("/nonexistent/loadsim.yml");
        assert!(matches!(Config::load(Some(&path)), Err(LoadsimError::Config(_))));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.exchange.org = "from-file".to_string();

        config
            .apply_env(env(&[
                ("HZN_EXCHANGE_URL", "https://ex/v1"),
                ("EX_PERF_ORG", "from-env"),
                ("EX_PERF_NUM_AGBOTS", "3"),
                ("EX_AGBOT_HB_INTERVAL", "30"),
                ("EX_NODE_NO_SLEEP", "1"),
                ("EX_PERF_DONT_REUSE_HTTP_CLIENT", "1"),
                ("CURL_CA_BUNDLE", "/etc/ca.pem"),
                ("EX_PERF_NUM_NODE_AGREEMENTS", "7"),
            ]))
            .unwrap();

        assert_eq!(config.exchange.url, "https://ex/v1");
        assert_eq!(config.exchange.org, "from-env");
        assert_eq!(config.agbot.agbots, 3);
        assert_eq!(config.agbot.heartbeat_interval, 30);
        assert!(config.node.no_sleep);
        assert!(!config.agbot.no_sleep);
        assert!(!config.http.reuse_client);
        assert_eq!(config.http.ca_bundle, Some(PathBuf::from("/etc/ca.pem")));
        assert_eq!(config.node.agreements_per_round(), 7);
    }

    #[test]
    fn test_empty_env_value_is_unset() {
        let mut config = Config::default();
        config.apply_env(env(&[("EX_AGBOT_NO_SLEEP", ""), ("EX_PERF_ORG", "")])).unwrap();
        assert!(!config.agbot.no_sleep);
        assert_eq!(config.exchange.org, "performancenodeagbot");
    }

    #[test]
    fn test_invalid_integer_is_config_error() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("EX_PERF_NUM_NODES", "lots")])).unwrap_err();
        assert!(matches!(err, LoadsimError::Config(_)));
        assert!(err.to_string().contains("EX_PERF_NUM_NODES"));
    }

    #[test]
    fn test_user_auth_depends_on_account() {
        let mut exchange = ExchangeConfig {
            iam_key: "key".to_string(),
            iam_email: "me@x.com".to_string(),
            org: "o".to_string(),
            ..Default::default()
        };
        assert_eq!(exchange.user_auth(), "o/me@x.com:key");

        exchange.iam_account_id = Some("acct".to_string());
        assert_eq!(exchange.user_auth(), "o/iamapikey:key");
    }

    #[test]
    fn test_require_credentials() {
        let mut exchange = ExchangeConfig::default();
        assert!(exchange.require_credentials().is_err());

        exchange.url = "http://ex".to_string();
        exchange.root_password = "pw".to_string();
        exchange.iam_key = "k".to_string();
        exchange.iam_email = "e".to_string();
        assert!(exchange.require_credentials().is_ok());
        assert_eq!(exchange.root_auth(), "root/root:pw");
    }

    #[test]
    fn test_report_path() {
        let mut report = ReportConfig::default();
        assert_eq!(
            report.path_for("agbot", "perf1-agbot"),
            PathBuf::from("/tmp/exchangePerf/agbot/perf1-agbot.summary")
        );
        report.file = Some(PathBuf::from("/tmp/r.txt"));
        assert_eq!(report.path_for("agbot", "x"), PathBuf::from("/tmp/r.txt"));
    }

    #[test]
    fn test_agreements_per_round_derived() {
        let node = NodeConfig::default();
        // 50 nodes over 14 rounds, rounded down plus one
        assert_eq!(node.agreements_per_round(), 4);

        let single = NodeConfig {
            heartbeats: 1,
            nodes: 5,
            ..Default::default()
        };
        assert_eq!(single.agreements_per_round(), 6);
    }

    #[test]
    fn test_agbot_run_config() {
        let agbot = AgbotConfig {
            agreement_checks: 5,
            short_circuit_check_round: 2,
            short_circuit_empty_rounds: 2,
            no_sleep: true,
            ..Default::default()
        };
        let run = agbot.run_config().unwrap();
        assert_eq!(run.total_rounds(), 5);
        assert_eq!(run.short_circuit_check_round(), 2);
        assert!(run.no_sleep());

        let bad = AgbotConfig {
            agreement_checks: 0,
            ..Default::default()
        };
        assert!(bad.run_config().is_err());
    }
}
