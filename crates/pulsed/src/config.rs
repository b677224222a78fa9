//! Layered configuration for both subcommands.
//!
//! Precedence, lowest first: built-in defaults, config file, command-line
//! flags, environment variables. The config file comes from `CONFIG` or
//! `-c`; `.toml` files are read as TOML, anything else as JSON.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{ArgAction, Args};
use pulse_agent::TransportKind;
use pulse_core::TrustedSubnet;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use tracing::info;

/// Environment lookup, injected so tests do not touch the process env.
pub type Env<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Parse a duration string like "10s", "500ms", "1m", "1h" or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration {s:?}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Secs(u64),
    Text(String),
}

fn optional_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Option::<RawDuration>::deserialize(d)?
        .map(|raw| match raw {
            RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => parse_duration(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid duration {text:?}"))),
        })
        .transpose()
}

fn parse_bool(key: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{key}: invalid boolean {raw:?}"),
    }
}

fn env_duration(env: Env<'_>, key: &str) -> anyhow::Result<Option<Duration>> {
    non_empty(env, key)
        .map(|raw| parse_duration(&raw).with_context(|| format!("{key}: invalid duration {raw:?}")))
        .transpose()
}

/// Set and non-blank environment value.
fn non_empty(env: Env<'_>, key: &str) -> Option<String> {
    env(key).filter(|v| !v.trim().is_empty())
}

fn read_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let parsed = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(anyhow::Error::from)
    } else {
        serde_json::from_str(&content).map_err(anyhow::Error::from)
    };
    parsed.with_context(|| format!("failed to parse config file {}", path.display()))
}

fn config_path(flag: Option<&PathBuf>, env: Env<'_>) -> Option<PathBuf> {
    non_empty(env, "CONFIG").map(PathBuf::from).or_else(|| flag.cloned())
}

fn parse_subnet(raw: &str) -> anyhow::Result<Option<TrustedSubnet>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(raw.parse().context("invalid trusted subnet")?))
}

struct Redacted<'a>(&'a Option<String>);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() { "<redacted>" } else { "<unset>" })
    }
}

// ── Server ─────────────────────────────────────────────────────

/// Flags for `pulsed server`.
#[derive(Debug, Clone, Default, Args)]
pub struct ServerArgs {
    /// Config file (JSON, or TOML by extension).
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// gRPC listen address; the RPC listener is off when unset.
    #[arg(long)]
    pub grpc_address: Option<String>,

    /// Backup flush interval ("300s", "0" for synchronous).
    #[arg(short = 'i', long, value_parser = duration_arg)]
    pub store_interval: Option<Duration>,

    /// Backup document path; empty disables the file backup.
    #[arg(short = 'f', long)]
    pub store_file: Option<String>,

    /// Load the backup document on startup.
    #[arg(short = 'r', long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub restore: Option<bool>,

    /// PostgreSQL connection string.
    #[arg(short = 'd', long)]
    pub database_dsn: Option<String>,

    /// Shared HMAC key for request signatures.
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// PKCS#1 private key for encrypted request bodies.
    #[arg(long)]
    pub crypto_key: Option<PathBuf>,

    /// CIDR allowed to send metrics, checked against X-Real-IP.
    #[arg(short = 't', long)]
    pub trusted_subnet: Option<String>,

    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerFile {
    address: Option<String>,
    grpc_address: Option<String>,
    #[serde(deserialize_with = "optional_duration")]
    store_interval: Option<Duration>,
    store_file: Option<String>,
    restore: Option<bool>,
    database_dsn: Option<String>,
    #[serde(alias = "request_key")]
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    trusted_subnet: Option<String>,
    log_level: Option<String>,
}

/// Effective server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub address: String,
    pub grpc_address: Option<String>,
    pub store_interval: Duration,
    pub store_file: Option<PathBuf>,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<TrustedSubnet>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            grpc_address: None,
            store_interval: Duration::from_secs(300),
            store_file: Some(PathBuf::from("/tmp/metrics-db.json")),
            restore: true,
            database_dsn: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
            log_level: "debug".to_string(),
        }
    }
}

/// Empty string clears an optional path or DSN.
fn optional_path(raw: String) -> Option<PathBuf> {
    (!raw.trim().is_empty()).then(|| PathBuf::from(raw))
}

fn optional_string(raw: String) -> Option<String> {
    (!raw.trim().is_empty()).then_some(raw)
}

impl ServerConfig {
    pub fn load(args: &ServerArgs, env: Env<'_>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path(args.config.as_ref(), env) {
            config.apply_file(read_file(&path)?)?;
        }
        config.apply_args(args)?;
        config.apply_env(env)?;
        Ok(config)
    }

    fn apply_file(&mut self, file: ServerFile) -> anyhow::Result<()> {
        if let Some(v) = file.address {
            self.address = v;
        }
        if let Some(v) = file.grpc_address {
            self.grpc_address = optional_string(v);
        }
        if let Some(v) = file.store_interval {
            self.store_interval = v;
        }
        if let Some(v) = file.store_file {
            self.store_file = optional_path(v);
        }
        if let Some(v) = file.restore {
            self.restore = v;
        }
        if let Some(v) = file.database_dsn {
            self.database_dsn = optional_string(v);
        }
        if let Some(v) = file.key {
            self.key = optional_string(v);
        }
        if let Some(v) = file.crypto_key {
            self.crypto_key = Some(v);
        }
        if let Some(v) = file.trusted_subnet {
            self.trusted_subnet = parse_subnet(&v)?;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        Ok(())
    }

    fn apply_args(&mut self, args: &ServerArgs) -> anyhow::Result<()> {
        if let Some(v) = &args.address {
            self.address = v.clone();
        }
        if let Some(v) = &args.grpc_address {
            self.grpc_address = optional_string(v.clone());
        }
        if let Some(v) = args.store_interval {
            self.store_interval = v;
        }
        if let Some(v) = &args.store_file {
            self.store_file = optional_path(v.clone());
        }
        if let Some(v) = args.restore {
            self.restore = v;
        }
        if let Some(v) = &args.database_dsn {
            self.database_dsn = optional_string(v.clone());
        }
        if let Some(v) = &args.key {
            self.key = optional_string(v.clone());
        }
        if let Some(v) = &args.crypto_key {
            self.crypto_key = Some(v.clone());
        }
        if let Some(v) = &args.trusted_subnet {
            self.trusted_subnet = parse_subnet(v)?;
        }
        if let Some(v) = &args.log_level {
            self.log_level = v.clone();
        }
        Ok(())
    }

    fn apply_env(&mut self, env: Env<'_>) -> anyhow::Result<()> {
        if let Some(v) = non_empty(env, "ADDRESS") {
            self.address = v;
        }
        if let Some(v) = non_empty(env, "GRPC_ADDRESS") {
            self.grpc_address = Some(v);
        }
        if let Some(v) = env_duration(env, "STORE_INTERVAL")? {
            self.store_interval = v;
        }
        if let Some(v) = env("FILE_STORAGE_PATH") {
            self.store_file = optional_path(v);
        }
        if let Some(v) = non_empty(env, "RESTORE") {
            self.restore = parse_bool("RESTORE", &v)?;
        }
        if let Some(v) = env("DATABASE_DSN") {
            self.database_dsn = optional_string(v);
        }
        if let Some(v) = non_empty(env, "KEY") {
            self.key = Some(v);
        }
        if let Some(v) = non_empty(env, "CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(env, "TRUSTED_SUBNET") {
            self.trusted_subnet = parse_subnet(&v)?;
        }
        if let Some(v) = non_empty(env, "LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    /// Log the effective configuration with secrets redacted.
    pub fn log_effective(&self) {
        info!(
            address = %self.address,
            grpc_address = ?self.grpc_address,
            store_interval_secs = self.store_interval.as_secs(),
            store_file = ?self.store_file,
            restore = self.restore,
            database_dsn = %Redacted(&self.database_dsn),
            key = %Redacted(&self.key),
            crypto_key = ?self.crypto_key,
            trusted_subnet = ?self.trusted_subnet.map(|s| s.to_string()),
            log_level = %self.log_level,
            "server configuration"
        );
    }
}

// ── Agent ──────────────────────────────────────────────────────

/// Flags for `pulsed agent`.
#[derive(Debug, Clone, Default, Args)]
pub struct AgentArgs {
    /// Config file (JSON, or TOML by extension).
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Server address.
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Wire protocol: http or grpc.
    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// Report interval ("10s").
    #[arg(short = 'r', long, value_parser = duration_arg)]
    pub report_interval: Option<Duration>,

    /// Poll interval ("2s").
    #[arg(short = 'p', long, value_parser = duration_arg)]
    pub poll_interval: Option<Duration>,

    /// Shared HMAC key for request signatures.
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// PKCS#1 public key used to encrypt request bodies.
    #[arg(long)]
    pub crypto_key: Option<PathBuf>,

    /// Concurrent senders; below one falls back to 3.
    #[arg(short = 'l', long, allow_negative_numbers = true)]
    pub rate_limit: Option<i64>,

    /// Gzip request bodies.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub compress: Option<bool>,

    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentFile {
    address: Option<String>,
    transport: Option<String>,
    #[serde(deserialize_with = "optional_duration")]
    report_interval: Option<Duration>,
    #[serde(deserialize_with = "optional_duration")]
    poll_interval: Option<Duration>,
    #[serde(alias = "body_hash_key")]
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    rate_limit: Option<i64>,
    compress: Option<bool>,
    log_level: Option<String>,
}

/// Effective agent configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub address: String,
    pub transport: TransportKind,
    pub report_interval: Duration,
    pub poll_interval: Duration,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub rate_limit: i64,
    pub compress: bool,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            transport: TransportKind::Http,
            report_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            key: None,
            crypto_key: None,
            rate_limit: 3,
            compress: true,
            log_level: "debug".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn load(args: &AgentArgs, env: Env<'_>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path(args.config.as_ref(), env) {
            config.apply_file(read_file(&path)?)?;
        }
        config.apply_args(args);
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: AgentFile) -> anyhow::Result<()> {
        if let Some(v) = file.address {
            self.address = v;
        }
        if let Some(v) = file.transport {
            self.transport = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = file.report_interval {
            self.report_interval = v;
        }
        if let Some(v) = file.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = file.key {
            self.key = optional_string(v);
        }
        if let Some(v) = file.crypto_key {
            self.crypto_key = Some(v);
        }
        if let Some(v) = file.rate_limit {
            self.rate_limit = v;
        }
        if let Some(v) = file.compress {
            self.compress = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        Ok(())
    }

    fn apply_args(&mut self, args: &AgentArgs) {
        if let Some(v) = &args.address {
            self.address = v.clone();
        }
        if let Some(v) = args.transport {
            self.transport = v;
        }
        if let Some(v) = args.report_interval {
            self.report_interval = v;
        }
        if let Some(v) = args.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = &args.key {
            self.key = optional_string(v.clone());
        }
        if let Some(v) = &args.crypto_key {
            self.crypto_key = Some(v.clone());
        }
        if let Some(v) = args.rate_limit {
            self.rate_limit = v;
        }
        if let Some(v) = args.compress {
            self.compress = v;
        }
        if let Some(v) = &args.log_level {
            self.log_level = v.clone();
        }
    }

    fn apply_env(&mut self, env: Env<'_>) -> anyhow::Result<()> {
        if let Some(v) = non_empty(env, "ADDRESS") {
            self.address = v;
        }
        if let Some(v) = non_empty(env, "TRANSPORT") {
            self.transport = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = env_duration(env, "REPORT_INTERVAL")? {
            self.report_interval = v;
        }
        if let Some(v) = env_duration(env, "POLL_INTERVAL")? {
            self.poll_interval = v;
        }
        if let Some(v) = non_empty(env, "KEY") {
            self.key = Some(v);
        }
        if let Some(v) = non_empty(env, "CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(env, "RATE_LIMIT") {
            self.rate_limit = v
                .trim()
                .parse()
                .with_context(|| format!("RATE_LIMIT: invalid integer {v:?}"))?;
        }
        if let Some(v) = non_empty(env, "COMPRESS") {
            self.compress = parse_bool("COMPRESS", &v)?;
        }
        if let Some(v) = non_empty(env, "LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll interval must be positive");
        }
        if self.report_interval.is_zero() {
            bail!("report interval must be positive");
        }
        Ok(())
    }

    pub fn log_effective(&self) {
        info!(
            address = %self.address,
            transport = %self.transport,
            report_interval_ms = self.report_interval.as_millis() as u64,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            key = %Redacted(&self.key),
            crypto_key = ?self.crypto_key,
            rate_limit = self.rate_limit,
            compress = self.compress,
            log_level = %self.log_level,
            "agent configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("300"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn server_defaults() {
        let config = ServerConfig::load(&ServerArgs::default(), &no_env).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.address, "0.0.0.0:8080");
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert!(config.restore);
    }

    #[test]
    fn server_precedence_file_then_flags_then_env() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"address":"file:1","store_interval":"5s","restore":false,"request_key":"from-file","log_level":"warn"}}"#
        )
        .unwrap();

        let args = ServerArgs {
            config: Some(file.path().to_path_buf()),
            address: Some("flag:2".into()),
            ..Default::default()
        };
        let env = env_of(&[("STORE_INTERVAL", "0"), ("TRUSTED_SUBNET", "10.0.0.0/8")]);
        let config = ServerConfig::load(&args, &env).unwrap();

        assert_eq!(config.address, "flag:2");
        assert_eq!(config.store_interval, Duration::ZERO);
        assert!(!config.restore);
        assert_eq!(config.key.as_deref(), Some("from-file"));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.trusted_subnet, Some("10.0.0.0/8".parse().unwrap()));

        let env = env_of(&[("ADDRESS", "env:3")]);
        assert_eq!(ServerConfig::load(&args, &env).unwrap().address, "env:3");
    }

    #[test]
    fn empty_storage_path_disables_backup() {
        let env = env_of(&[("FILE_STORAGE_PATH", "")]);
        let config = ServerConfig::load(&ServerArgs::default(), &env).unwrap();
        assert_eq!(config.store_file, None);
    }

    #[test]
    fn toml_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "address = \"toml:9\"\nstore_interval = 30\ndatabase_dsn = \"postgres://x\"").unwrap();
        let args = ServerArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = ServerConfig::load(&args, &no_env).unwrap();
        assert_eq!(config.address, "toml:9");
        assert_eq!(config.store_interval, Duration::from_secs(30));
        assert_eq!(config.database_dsn.as_deref(), Some("postgres://x"));
    }

    #[test]
    fn config_env_overrides_flag_path() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"address":"from-env-file:1"}}"#).unwrap();
        let args = ServerArgs {
            config: Some(PathBuf::from("/nonexistent/pulse.json")),
            ..Default::default()
        };
        let path = file.path().display().to_string();
        let env = env_of(&[("CONFIG", path.as_str())]);
        assert_eq!(
            ServerConfig::load(&args, &env).unwrap().address,
            "from-env-file:1"
        );
    }

    #[test]
    fn bad_values_are_configuration_errors() {
        let env = env_of(&[("TRUSTED_SUBNET", "not-a-cidr")]);
        assert!(ServerConfig::load(&ServerArgs::default(), &env).is_err());

        let env = env_of(&[("STORE_INTERVAL", "whenever")]);
        assert!(ServerConfig::load(&ServerArgs::default(), &env).is_err());

        let env = env_of(&[("RESTORE", "maybe")]);
        assert!(ServerConfig::load(&ServerArgs::default(), &env).is_err());
    }

    #[test]
    fn agent_defaults_and_overrides() {
        let config = AgentConfig::load(&AgentArgs::default(), &no_env).unwrap();
        assert_eq!(config, AgentConfig::default());

        let args = AgentArgs {
            rate_limit: Some(8),
            transport: Some(TransportKind::Grpc),
            ..Default::default()
        };
        let env = env_of(&[
            ("REPORT_INTERVAL", "20"),
            ("POLL_INTERVAL", "250ms"),
            ("COMPRESS", "false"),
            ("RATE_LIMIT", "-1"),
        ]);
        let config = AgentConfig::load(&args, &env).unwrap();
        assert_eq!(config.transport, TransportKind::Grpc);
        assert_eq!(config.report_interval, Duration::from_secs(20));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(!config.compress);
        assert_eq!(config.rate_limit, -1);
    }

    #[test]
    fn agent_file_accepts_legacy_key_name() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"body_hash_key":"k","report_interval":"1m","transport":"grpc"}}"#
        )
        .unwrap();
        let args = AgentArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = AgentConfig::load(&args, &no_env).unwrap();
        assert_eq!(config.key.as_deref(), Some("k"));
        assert_eq!(config.report_interval, Duration::from_secs(60));
        assert_eq!(config.transport, TransportKind::Grpc);
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let env = env_of(&[("POLL_INTERVAL", "0")]);
        assert!(AgentConfig::load(&AgentArgs::default(), &env).is_err());
    }
}
