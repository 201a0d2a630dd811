//! Process configuration, read from the environment per spec §6.2.
//!
//! Mirrors the teacher's explicit-config-struct approach (an acceptable
//! process-scoped "current config" per Design Notes §9) rather than a
//! global settings singleton: every component takes a `&Config` (or an
//! `Arc<Config>`) at construction time.

use std::env;
use std::time::Duration;

/// Network scale category used to pick adaptive Kademlia/health-check/
/// bootstrap parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkScale {
    Small,
    Medium,
    Large,
    XLarge,
}

impl std::fmt::Display for NetworkScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkScale::Small => "small",
            NetworkScale::Medium => "medium",
            NetworkScale::Large => "large",
            NetworkScale::XLarge => "xlarge",
        };
        write!(f, "{s}")
    }
}

/// Global process configuration. Constructed once at startup via
/// [`Config::from_env`] and threaded through every constructor.
#[derive(Debug, Clone)]
pub struct Config {
    // --- DHT ---
    pub dht_port: u16,
    pub bootstrap_nodes: Vec<(String, u16)>,
    pub node_id: Option<String>,
    pub dht_ksize: usize,

    // --- Session sizing ---
    pub key_length_multiplier: f64,
    pub required_nodes_multiplier: u32,
    pub session_id: Option<String>,

    // --- Adaptive Kademlia ---
    pub enable_adaptive_kademlia: bool,
    pub small_network_threshold: usize,
    pub medium_network_threshold: usize,
    pub large_network_threshold: usize,
    pub xlarge_network_threshold: usize,
    pub base_alpha: usize,
    pub base_k: usize,
    pub base_query_timeout: f64,
    pub alpha_scaling_factor: f64,
    pub k_scaling_factor: f64,
    pub timeout_scaling_factor: f64,
    pub max_alpha: usize,
    pub max_k: usize,
    pub max_query_timeout: f64,
    pub max_discovery_timeout: u64,
    pub max_discovery_time: u64,

    // --- Health check ---
    pub enable_health_check: bool,
    pub health_check_batch_size: usize,
    pub health_check_concurrent_batches: usize,
    pub health_check_fast_timeout: f64,
    pub health_check_medium_timeout: f64,
    pub health_check_deep_timeout: f64,
    pub health_check_fast_interval: u64,
    pub health_check_medium_interval: u64,
    pub health_check_deep_interval: u64,
    pub health_check_failure_threshold: u32,
    pub health_check_min_availability_score: f64,

    // --- Bootstrap ---
    pub bootstrap_strategy: String,
    pub bootstrap_selection_strategy: String,
    pub bootstrap_health_check_interval: u64,
    pub bootstrap_failure_threshold: u32,
    pub bootstrap_small_nodes: usize,
    pub bootstrap_medium_nodes: usize,
    pub bootstrap_large_nodes: usize,
    pub bootstrap_xlarge_nodes: usize,

    // --- Logging ---
    pub log_level: String,
    pub log_format: String,

    // --- Misc ---
    pub bob_address: Option<String>,
    /// Desired final key length in bits (`lc`), requested by Alice. Not
    /// part of spec §6.2's table; the reference implementation hardcodes
    /// this at its call site, so we expose it as `KEY_BITS` instead.
    pub key_bits: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dht_port: 5678,
            bootstrap_nodes: vec![("127.0.0.1".into(), 5678)],
            node_id: None,
            dht_ksize: 25,

            key_length_multiplier: 2.5,
            required_nodes_multiplier: 5,
            session_id: None,

            enable_adaptive_kademlia: true,
            small_network_threshold: 15,
            medium_network_threshold: 50,
            large_network_threshold: 100,
            xlarge_network_threshold: 500,
            base_alpha: 3,
            base_k: 20,
            base_query_timeout: 5.0,
            alpha_scaling_factor: 1.5,
            k_scaling_factor: 1.3,
            timeout_scaling_factor: 1.6,
            max_alpha: 8,
            max_k: 40,
            max_query_timeout: 20.0,
            max_discovery_timeout: 180,
            max_discovery_time: 60,

            enable_health_check: true,
            health_check_batch_size: 20,
            health_check_concurrent_batches: 3,
            health_check_fast_timeout: 1.0,
            health_check_medium_timeout: 2.0,
            health_check_deep_timeout: 5.0,
            health_check_fast_interval: 60,
            health_check_medium_interval: 300,
            health_check_deep_interval: 900,
            health_check_failure_threshold: 3,
            health_check_min_availability_score: 0.3,

            bootstrap_strategy: "adaptive".into(),
            bootstrap_selection_strategy: "round_robin".into(),
            bootstrap_health_check_interval: 30,
            bootstrap_failure_threshold: 3,
            bootstrap_small_nodes: 2,
            bootstrap_medium_nodes: 3,
            bootstrap_large_nodes: 4,
            bootstrap_xlarge_nodes: 6,

            log_level: "info".into(),
            log_format: "text".into(),

            bob_address: None,
            key_bits: 8,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Build configuration from the process environment, per spec §6.2.
    /// Unset variables fall back to [`Config::default`]'s values.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bootstrap_nodes = env::var("BOOTSTRAP_NODES")
            .ok()
            .map(|csv| parse_bootstrap_csv(&csv))
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.bootstrap_nodes);

        let bob_address = env::var("BOB_DHT_ADDRESS")
            .ok()
            .or_else(|| env::var("BOB_ADDRESS").ok());

        Self {
            dht_port: env_parse("DHT_PORT", defaults.dht_port),
            bootstrap_nodes,
            node_id: env::var("NODE_ID").ok(),
            dht_ksize: env_parse("DHT_KSIZE", defaults.dht_ksize),

            key_length_multiplier: env_parse("KEY_LENGTH_MULTIPLIER", defaults.key_length_multiplier),
            required_nodes_multiplier: env_parse("REQUIRED_NODES_MULTIPLIER", defaults.required_nodes_multiplier),
            session_id: env::var("SESSION_ID").ok(),

            enable_adaptive_kademlia: env_parse("ENABLE_ADAPTIVE_KADEMLIA", defaults.enable_adaptive_kademlia),
            small_network_threshold: env_parse("SMALL_NETWORK_THRESHOLD", defaults.small_network_threshold),
            medium_network_threshold: env_parse("MEDIUM_NETWORK_THRESHOLD", defaults.medium_network_threshold),
            large_network_threshold: env_parse("LARGE_NETWORK_THRESHOLD", defaults.large_network_threshold),
            xlarge_network_threshold: env_parse("XLARGE_NETWORK_THRESHOLD", defaults.xlarge_network_threshold),
            base_alpha: env_parse("BASE_ALPHA", defaults.base_alpha),
            base_k: env_parse("BASE_K", defaults.base_k),
            base_query_timeout: env_parse("BASE_QUERY_TIMEOUT", defaults.base_query_timeout),
            alpha_scaling_factor: defaults.alpha_scaling_factor,
            k_scaling_factor: defaults.k_scaling_factor,
            timeout_scaling_factor: defaults.timeout_scaling_factor,
            max_alpha: env_parse("MAX_ALPHA", defaults.max_alpha),
            max_k: env_parse("MAX_K", defaults.max_k),
            max_query_timeout: env_parse("MAX_QUERY_TIMEOUT", defaults.max_query_timeout),
            max_discovery_timeout: env_parse("MAX_DISCOVERY_TIMEOUT", defaults.max_discovery_timeout),
            max_discovery_time: defaults.max_discovery_time,

            enable_health_check: env_parse("ENABLE_HEALTH_CHECK", defaults.enable_health_check),
            health_check_batch_size: env_parse("health_check_batch_size", defaults.health_check_batch_size),
            health_check_concurrent_batches: env_parse(
                "health_check_concurrent_batches",
                defaults.health_check_concurrent_batches,
            ),
            health_check_fast_timeout: env_parse("health_check_fast_timeout", defaults.health_check_fast_timeout),
            health_check_medium_timeout: env_parse("health_check_medium_timeout", defaults.health_check_medium_timeout),
            health_check_deep_timeout: env_parse("health_check_deep_timeout", defaults.health_check_deep_timeout),
            health_check_fast_interval: env_parse("health_check_fast_interval", defaults.health_check_fast_interval),
            health_check_medium_interval: env_parse(
                "health_check_medium_interval",
                defaults.health_check_medium_interval,
            ),
            health_check_deep_interval: env_parse("health_check_deep_interval", defaults.health_check_deep_interval),
            health_check_failure_threshold: env_parse(
                "health_check_failure_threshold",
                defaults.health_check_failure_threshold,
            ),
            health_check_min_availability_score: env_parse(
                "health_check_min_score",
                defaults.health_check_min_availability_score,
            ),

            bootstrap_strategy: env::var("BOOTSTRAP_STRATEGY").unwrap_or(defaults.bootstrap_strategy),
            bootstrap_selection_strategy: env::var("BOOTSTRAP_SELECTION_STRATEGY")
                .unwrap_or(defaults.bootstrap_selection_strategy),
            bootstrap_health_check_interval: defaults.bootstrap_health_check_interval,
            bootstrap_failure_threshold: defaults.bootstrap_failure_threshold,
            bootstrap_small_nodes: defaults.bootstrap_small_nodes,
            bootstrap_medium_nodes: defaults.bootstrap_medium_nodes,
            bootstrap_large_nodes: defaults.bootstrap_large_nodes,
            bootstrap_xlarge_nodes: defaults.bootstrap_xlarge_nodes,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: env::var("LOG_FORMAT").unwrap_or(defaults.log_format),

            bob_address,
            key_bits: env_parse("KEY_BITS", defaults.key_bits),
        }
    }

    /// `lk = ceil(key_length_multiplier * lc)`.
    pub fn lk(&self, lc: usize) -> usize {
        (self.key_length_multiplier * lc as f64).ceil() as usize
    }

    /// `alpha_total = required_nodes_multiplier * lk` (total node requirement,
    /// distinct from the Kademlia parallelism factor of the same name).
    pub fn required_node_count(&self, lk: usize) -> usize {
        self.required_nodes_multiplier as usize * lk
    }

    pub fn network_scale(&self, network_size: usize) -> NetworkScale {
        if network_size <= self.small_network_threshold {
            NetworkScale::Small
        } else if network_size <= self.medium_network_threshold {
            NetworkScale::Medium
        } else if network_size <= self.large_network_threshold {
            NetworkScale::Large
        } else {
            NetworkScale::XLarge
        }
    }

    /// Adaptive Kademlia parameters for the observed network size, per
    /// spec §4.4's table (ported from `calculate_adaptive_kademlia_params`).
    pub fn adaptive_params(&self, network_size: usize) -> AdaptiveParams {
        if !self.enable_adaptive_kademlia {
            return AdaptiveParams {
                alpha: self.base_alpha,
                k: self.base_k,
                query_timeout: Duration::from_secs_f64(self.base_query_timeout),
                discovery_timeout: Duration::from_secs(self.max_discovery_time),
                network_size,
                scale: NetworkScale::Small,
            };
        }

        let scale = self.network_scale(network_size);
        let (alpha, k, query_timeout, discovery_timeout) = match scale {
            NetworkScale::Small => (self.base_alpha, self.base_k, self.base_query_timeout, 60),
            NetworkScale::Medium => (
                (self.base_alpha as f64 * self.alpha_scaling_factor) as usize,
                (self.base_k as f64 * self.k_scaling_factor) as usize,
                (self.base_query_timeout * self.timeout_scaling_factor).min(self.max_query_timeout),
                90,
            ),
            NetworkScale::Large => (
                (self.base_alpha as f64 * self.alpha_scaling_factor * 2.0) as usize,
                (self.base_k as f64 * self.k_scaling_factor * 1.5) as usize,
                (self.base_query_timeout * 2.4).min(self.max_query_timeout),
                120,
            ),
            NetworkScale::XLarge => (
                self.max_alpha,
                self.max_k,
                self.max_query_timeout,
                self.max_discovery_timeout,
            ),
        };

        AdaptiveParams {
            alpha: alpha.min(self.max_alpha),
            k: k.min(self.max_k),
            query_timeout: Duration::from_secs_f64(query_timeout.min(self.max_query_timeout)),
            discovery_timeout: Duration::from_secs(discovery_timeout),
            network_size,
            scale,
        }
    }

    /// Adaptive health-check batching/intervals for the observed network
    /// size, per spec §4.3's table.
    pub fn health_check_params(&self, network_size: usize) -> HealthCheckParams {
        if !self.enable_health_check {
            return HealthCheckParams {
                enabled: false,
                batch_size: self.health_check_batch_size,
                concurrent_batches: self.health_check_concurrent_batches,
                fast_interval: Duration::from_secs(self.health_check_fast_interval),
                medium_interval: Duration::from_secs(self.health_check_medium_interval),
                deep_interval: Duration::from_secs(self.health_check_deep_interval),
            };
        }

        let scale = self.network_scale(network_size);
        let (batch_size, concurrent_batches, fast, medium, deep) = match scale {
            NetworkScale::Small => (
                self.health_check_batch_size.min(network_size.max(1)),
                1,
                self.health_check_fast_interval,
                self.health_check_medium_interval,
                self.health_check_deep_interval,
            ),
            NetworkScale::Medium => (
                self.health_check_batch_size,
                2,
                (self.health_check_fast_interval as f64 * 1.5) as u64,
                (self.health_check_medium_interval as f64 * 1.2) as u64,
                self.health_check_deep_interval,
            ),
            NetworkScale::Large => (
                (self.health_check_batch_size as f64 * 1.5) as usize,
                self.health_check_concurrent_batches,
                self.health_check_fast_interval * 2,
                (self.health_check_medium_interval as f64 * 1.5) as u64,
                (self.health_check_deep_interval as f64 * 1.2) as u64,
            ),
            NetworkScale::XLarge => (
                self.health_check_batch_size * 2,
                self.health_check_concurrent_batches,
                self.health_check_fast_interval * 3,
                self.health_check_medium_interval * 2,
                (self.health_check_deep_interval as f64 * 1.5) as u64,
            ),
        };

        HealthCheckParams {
            enabled: true,
            batch_size,
            concurrent_batches,
            fast_interval: Duration::from_secs(fast),
            medium_interval: Duration::from_secs(medium),
            deep_interval: Duration::from_secs(deep),
        }
    }

    /// Bootstrap pool scale (§4.7) for a given worker count.
    pub fn bootstrap_scale(&self, worker_count: usize) -> (NetworkScale, usize) {
        let (scale, max_nodes) = if worker_count <= 15 {
            (NetworkScale::Small, self.bootstrap_small_nodes)
        } else if worker_count <= 50 {
            (NetworkScale::Medium, self.bootstrap_medium_nodes)
        } else if worker_count <= 200 {
            (NetworkScale::Large, self.bootstrap_large_nodes)
        } else {
            (NetworkScale::XLarge, self.bootstrap_xlarge_nodes)
        };
        (scale, max_nodes)
    }
}

fn parse_bootstrap_csv(csv: &str) -> Vec<(String, u16)> {
    csv.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (host, port) = entry.rsplit_once(':')?;
            let port: u16 = port.parse().ok()?;
            Some((host.to_string(), port))
        })
        .collect()
}

/// Adaptive Kademlia parameters derived from network size, per spec §4.4.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveParams {
    pub alpha: usize,
    pub k: usize,
    pub query_timeout: Duration,
    pub discovery_timeout: Duration,
    pub network_size: usize,
    pub scale: NetworkScale,
}

/// Adaptive health-check parameters derived from network size, per spec §4.3.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckParams {
    pub enabled: bool,
    pub batch_size: usize,
    pub concurrent_batches: usize,
    pub fast_interval: Duration,
    pub medium_interval: Duration,
    pub deep_interval: Duration,
}

/// Parses `BOOTSTRAP_NODES`-style CSV independent of a `Config` instance;
/// exposed for callers that only need address parsing (e.g. `bootstrap()`).
pub fn parse_host_port_csv(csv: &str) -> Vec<(String, u16)> {
    parse_bootstrap_csv(csv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_params_monotonic_by_scale() {
        let cfg = Config::default();
        let small = cfg.adaptive_params(10);
        let medium = cfg.adaptive_params(25);
        let large = cfg.adaptive_params(75);
        let xlarge = cfg.adaptive_params(250);

        assert_eq!(small.scale, NetworkScale::Small);
        assert_eq!(medium.scale, NetworkScale::Medium);
        assert_eq!(large.scale, NetworkScale::Large);
        assert_eq!(xlarge.scale, NetworkScale::XLarge);

        assert!(small.alpha <= medium.alpha);
        assert!(medium.alpha <= large.alpha);
        assert!(large.alpha <= xlarge.alpha);
        assert!(xlarge.k <= cfg.max_k);

        assert_eq!(small.alpha, cfg.base_alpha);
        assert_eq!(small.k, cfg.base_k);
        assert_eq!(small.query_timeout, Duration::from_secs_f64(cfg.base_query_timeout));
    }

    #[test]
    fn bootstrap_csv_parses_host_port_pairs() {
        let parsed = parse_bootstrap_csv("10.0.0.1:5678, example.com:9001");
        assert_eq!(parsed, vec![("10.0.0.1".to_string(), 5678), ("example.com".to_string(), 9001)]);
    }

    #[test]
    fn lk_and_required_nodes_match_spec_formula() {
        let cfg = Config::default();
        assert_eq!(cfg.lk(8), 20); // ceil(2.5 * 8) = 20
        assert_eq!(cfg.required_node_count(20), 100); // 5 * 20
    }
}
