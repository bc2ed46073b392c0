//! Configuration file parsing (spec §6 "Configuration (abstract)"): two
//! keyed sections, `backends` and `services`, plus the tunable durations
//! of §4.1/§4.3 and the stats listener address. Grounded on the teacher's
//! `config::parse_config` (YAML via serde, `ENV_VAR`-then-file-then-default
//! resolution, `anyhow::Context` on every fallible step).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::tunables::Tunables;

#[derive(Debug, Deserialize, Default)]
struct RawDurations {
	overload_request_duration_ms: Option<u64>,
	overload_recovery_time_ms: Option<u64>,
	online_check_timeout_ms: Option<u64>,
	online_check_interval_ms: Option<u64>,
	emergency_wait_timeout_ms: Option<u64>,
	dial_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
	backends: HashMap<String, Vec<String>>,
	services: HashMap<String, String>,
	#[serde(default)]
	stats_addr: Option<String>,
	#[serde(default)]
	durations: RawDurations,
}

/// Resolved, ready-to-use configuration: backend pools keyed by service,
/// inbound listen addresses keyed by service, the shared tunables, and the
/// stats listener address.
#[derive(Debug, Clone)]
pub struct Config {
	pub backends: HashMap<String, Vec<String>>,
	pub services: HashMap<String, SocketAddr>,
	pub tunables: Tunables,
	pub stats_addr: SocketAddr,
}

pub fn load(path: &Path, stats_addr_override: Option<&str>) -> anyhow::Result<Config> {
	let contents = std::fs::read_to_string(path)
		.with_context(|| format!("reading proxy configuration file {}", path.display()))?;
	parse(&contents, stats_addr_override)
}

/// `stats_addr_override` is the `--stats-addr` CLI flag, if given; it takes
/// precedence over the `STATS_ADDR` environment variable, which in turn
/// takes precedence over the file's `stats_addr` key and then the default.
pub fn parse(contents: &str, stats_addr_override: Option<&str>) -> anyhow::Result<Config> {
	let raw: RawConfig =
		serde_yaml::from_str(contents).context("parsing proxy configuration")?;

	let mut services = HashMap::with_capacity(raw.services.len());
	for (name, addr) in raw.services {
		let parsed: SocketAddr = addr
			.parse()
			.with_context(|| format!("service {name}: invalid inbound address {addr:?}"))?;
		services.insert(name, parsed);
	}

	let tunables = Tunables {
		overload_request_duration: resolved_duration(
			"OVERLOAD_REQUEST_DURATION",
			raw.durations.overload_request_duration_ms,
			10_000,
		),
		overload_recovery_time: resolved_duration(
			"OVERLOAD_RECOVERY_TIME",
			raw.durations.overload_recovery_time_ms,
			2_000,
		),
		online_check_timeout: resolved_duration(
			"ONLINE_CHECK_TIMEOUT",
			raw.durations.online_check_timeout_ms,
			500,
		),
		online_check_interval: resolved_duration(
			"ONLINE_CHECK_INTERVAL",
			raw.durations.online_check_interval_ms,
			500,
		),
		emergency_wait_timeout: resolved_duration(
			"EMERGENCY_WAIT_TIMEOUT",
			raw.durations.emergency_wait_timeout_ms,
			2_000,
		),
		dial_timeout: resolved_duration("DIAL_TIMEOUT", raw.durations.dial_timeout_ms, 5_000),
	};

	let stats_addr_raw = stats_addr_override
		.map(str::to_string)
		.or_else(|| std::env::var("STATS_ADDR").ok())
		.or(raw.stats_addr)
		.unwrap_or_else(|| "127.0.0.1:9090".to_string());
	let stats_addr = stats_addr_raw
		.parse()
		.with_context(|| format!("invalid stats listener address {stats_addr_raw:?}"))?;

	Ok(Config {
		backends: raw.backends,
		services,
		tunables,
		stats_addr,
	})
}

/// Environment variable, then the value from the file, then the default —
/// the same precedence the teacher's `config::parse` helper uses.
fn resolved_duration(env_var: &str, from_file: Option<u64>, default_ms: u64) -> Duration {
	let ms = std::env::var(env_var)
		.ok()
		.and_then(|v| v.parse::<u64>().ok())
		.or(from_file)
		.unwrap_or(default_ms);
	Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_minimal_config_with_defaults() {
		let yaml = r#"
backends:
  bank:
    - 127.0.0.1:9001
    - 127.0.0.1:9002
services:
  bank: 0.0.0.0:8001
"#;
		let config = parse(yaml, None).unwrap();
		assert_eq!(config.backends["bank"].len(), 2);
		assert_eq!(config.services["bank"].port(), 8001);
		assert_eq!(config.tunables.overload_request_duration, Duration::from_secs(10));
		assert_eq!(config.stats_addr.port(), 9090);
	}

	#[test]
	fn parses_custom_durations_and_stats_addr() {
		let yaml = r#"
backends:
  shop:
    - 127.0.0.1:9101
services:
  shop: 0.0.0.0:8002
stats_addr: 127.0.0.1:9999
durations:
  overload_recovery_time_ms: 500
"#;
		let config = parse(yaml, None).unwrap();
		assert_eq!(config.tunables.overload_recovery_time, Duration::from_millis(500));
		assert_eq!(config.stats_addr.port(), 9999);
	}

	#[test]
	fn rejects_invalid_inbound_address() {
		let yaml = r#"
backends:
  bank: [127.0.0.1:9001]
services:
  bank: "not an address"
"#;
		assert!(parse(yaml, None).is_err());
	}

	#[test]
	fn stats_addr_override_beats_file_value() {
		let yaml = r#"
backends:
  shop:
    - 127.0.0.1:9101
services:
  shop: 0.0.0.0:8002
stats_addr: 127.0.0.1:9999
"#;
		let config = parse(yaml, Some("127.0.0.1:7777")).unwrap();
		assert_eq!(config.stats_addr.port(), 7777);
	}
}
