//! Path-finding configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time a worker waits on any lock before retrying.
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 50;

/// Lane-change 1-in-N targets, indexed by randomization level (most random first).
const LANE_CHANGE_TARGETS: [u32; 5] = [2, 4, 10, 20, 50];

/// Errors from loading or validating a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Reading the config file failed
    #[error("failed to read config file: {message}")]
    Io { message: String },

    /// The config file is not valid JSON for this shape
    #[error("invalid config JSON: {message}")]
    Json { message: String },

    /// A numeric setting outside its allowed range
    #[error("config field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Which side of the road traffic drives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveSide {
    #[default]
    Right,
    Left,
}

/// How strongly vehicles weigh traffic against lane changes, per road class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficSensitivity {
    pub car_city: f32,
    pub truck_city: f32,
    pub car_highway: f32,
    pub truck_highway: f32,
}

impl TrafficSensitivity {
    /// Sensitivity for a vehicle class on a road class.
    pub fn for_vehicle(&self, heavy: bool, highway: bool) -> f32 {
        match (heavy, highway) {
            (false, false) => self.car_city,
            (true, false) => self.truck_city,
            (false, true) => self.car_highway,
            (true, true) => self.truck_highway,
        }
    }
}

impl Default for TrafficSensitivity {
    fn default() -> Self {
        Self {
            car_city: 0.75,
            truck_city: 0.5,
            car_highway: 0.75,
            truck_highway: 0.5,
        }
    }
}

/// Configuration for the path-finding engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathFindConfig {
    /// Density sweep accuracy, 0 (most frequent) to 4.
    pub sim_accuracy: u8,

    /// Lane-change randomization, 0 (change often) to 4 (rarely).
    pub lane_change_randomization: u8,

    pub sensitivity: TrafficSensitivity,

    /// Scales the lane-change cost terms.
    pub path_cost_multiplier: f32,

    /// Apply highway lane rules on segments that carry them.
    pub highway_rules: bool,

    /// Ignore lane arrows for every vehicle.
    pub all_relaxed: bool,

    /// Ignore lane arrows for public transport.
    pub relaxed_transit: bool,

    /// Route without lane arrows or traffic-aware lane changes.
    pub stock_mode: bool,

    pub drive_side: DriveSide,

    /// Number of worker threads.
    pub worker_count: usize,

    /// Number of path chunks in the shared pool.
    pub unit_pool_capacity: usize,

    /// Longest path reconstruction will walk.
    pub max_path_positions: usize,

    /// How long a lock wait lasts before retrying, in milliseconds.
    pub lock_timeout_ms: u64,
}

impl PathFindConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PathFindConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Json {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Json {
            message: e.to_string(),
        })?;
        std::fs::write(path.as_ref(), json).map_err(|e| ConfigError::Io {
            message: e.to_string(),
        })
    }

    /// Check every ranged field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
            if (min..=max).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange { field, value })
            }
        }

        check("sim_accuracy", f64::from(self.sim_accuracy), 0.0, 4.0)?;
        check(
            "lane_change_randomization",
            f64::from(self.lane_change_randomization),
            0.0,
            4.0,
        )?;
        let s = &self.sensitivity;
        check("sensitivity.car_city", f64::from(s.car_city), 0.0, 1.0)?;
        check("sensitivity.truck_city", f64::from(s.truck_city), 0.0, 1.0)?;
        check("sensitivity.car_highway", f64::from(s.car_highway), 0.0, 1.0)?;
        check("sensitivity.truck_highway", f64::from(s.truck_highway), 0.0, 1.0)?;
        check(
            "path_cost_multiplier",
            f64::from(self.path_cost_multiplier),
            0.0,
            f64::from(f32::MAX),
        )?;
        check("worker_count", self.worker_count as f64, 1.0, 64.0)?;
        check("unit_pool_capacity", self.unit_pool_capacity as f64, 1.0, 1e7)?;
        check("max_path_positions", self.max_path_positions as f64, 1.0, 1e7)?;
        check("lock_timeout_ms", self.lock_timeout_ms as f64, 1.0, 60_000.0)?;
        Ok(())
    }

    /// 1-in-N chance of a randomized lane change, doubled for heavy vehicles.
    pub fn lane_change_target(&self, heavy: bool) -> u32 {
        let level = usize::from(self.lane_change_randomization).min(LANE_CHANGE_TARGETS.len() - 1);
        let target = LANE_CHANGE_TARGETS[level];
        if heavy { target * 2 } else { target }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Set the number of worker threads.
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the size of the path chunk pool.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.unit_pool_capacity = capacity;
        self
    }
}

impl Default for PathFindConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(1)
            .clamp(1, 4);
        Self {
            sim_accuracy: 2,
            lane_change_randomization: 2,
            sensitivity: TrafficSensitivity::default(),
            path_cost_multiplier: 1.0,
            highway_rules: false,
            all_relaxed: false,
            relaxed_transit: false,
            stock_mode: false,
            drive_side: DriveSide::Right,
            worker_count: workers,
            unit_pool_capacity: 16_384,
            max_path_positions: 262_144,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

/// How lanes are chosen at nodes, fixed for the duration of one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Every compatible lane, stock costs, no arrows.
    Stock,
    /// Lane arrows, merge/split matching and traffic-aware lane changes.
    AdvancedLaneMatching,
    /// Every compatible lane, traffic-aware lane changes, no arrows.
    RelaxedAll,
}

impl RoutingPolicy {
    /// Pick the policy for a request.
    pub fn select(config: &PathFindConfig, transit: bool) -> Self {
        if config.stock_mode {
            RoutingPolicy::Stock
        } else if config.all_relaxed || (config.relaxed_transit && transit) {
            RoutingPolicy::RelaxedAll
        } else {
            RoutingPolicy::AdvancedLaneMatching
        }
    }

    /// Whether lane arrows restrict which lanes are entered.
    pub fn uses_lane_arrows(self) -> bool {
        matches!(self, RoutingPolicy::AdvancedLaneMatching)
    }

    /// Whether lane-change costs weigh traffic; never for public transport.
    pub fn custom_lane_changing(self, transit: bool) -> bool {
        !transit && !matches!(self, RoutingPolicy::Stock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PathFindConfig::default();
        assert!(config.validate().is_ok());
        assert!((1..=4).contains(&config.worker_count));
        assert_eq!(config.lock_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = PathFindConfig::from_json(
            r#"{"stock_mode": true, "sensitivity": {"car_city": 0.2}, "drive_side": "left"}"#,
        )
        .unwrap();
        assert!(config.stock_mode);
        assert_eq!(config.sensitivity.car_city, 0.2);
        assert_eq!(config.sensitivity.truck_city, 0.5);
        assert_eq!(config.drive_side, DriveSide::Left);
        assert_eq!(config.max_path_positions, 262_144);
    }

    #[test]
    fn out_of_range_rejected() {
        let err = PathFindConfig::from_json(r#"{"sensitivity": {"car_highway": 1.5}}"#).unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                field: "sensitivity.car_highway",
                value: 1.5
            }
        );
        assert!(matches!(
            PathFindConfig::from_json(r#"{"worker_count": 0}"#),
            Err(ConfigError::OutOfRange { field: "worker_count", .. })
        ));
        assert!(matches!(
            PathFindConfig::from_json("not json"),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pathfind.json");
        let config = PathFindConfig {
            highway_rules: true,
            lane_change_randomization: 4,
            ..PathFindConfig::default()
        }
        .with_workers(3);
        config.save_json_file(&path).unwrap();
        assert_eq!(PathFindConfig::from_json_file(&path).unwrap(), config);
        assert!(matches!(
            PathFindConfig::from_json_file(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn lane_change_target_doubles_for_heavy() {
        let config = PathFindConfig::default();
        assert_eq!(config.lane_change_target(false), 10);
        assert_eq!(config.lane_change_target(true), 20);
    }

    #[test]
    fn policy_selection() {
        let mut config = PathFindConfig::default();
        assert_eq!(
            RoutingPolicy::select(&config, false),
            RoutingPolicy::AdvancedLaneMatching
        );
        config.relaxed_transit = true;
        assert_eq!(RoutingPolicy::select(&config, true), RoutingPolicy::RelaxedAll);
        assert_eq!(
            RoutingPolicy::select(&config, false),
            RoutingPolicy::AdvancedLaneMatching
        );
        config.stock_mode = true;
        assert_eq!(RoutingPolicy::select(&config, false), RoutingPolicy::Stock);
        assert!(!RoutingPolicy::Stock.custom_lane_changing(false));
        assert!(RoutingPolicy::RelaxedAll.custom_lane_changing(false));
        assert!(!RoutingPolicy::AdvancedLaneMatching.custom_lane_changing(true));
        assert!(!RoutingPolicy::RelaxedAll.uses_lane_arrows());
    }

    #[test]
    fn sensitivity_lookup() {
        let s = TrafficSensitivity {
            car_city: 0.1,
            truck_city: 0.2,
            car_highway: 0.3,
            truck_highway: 0.4,
        };
        assert_eq!(s.for_vehicle(true, true), 0.4);
        assert_eq!(s.for_vehicle(false, true), 0.3);
        assert_eq!(s.for_vehicle(true, false), 0.2);
    }

    #[test]
    fn error_display() {
        let err = ConfigError::OutOfRange {
            field: "sim_accuracy",
            value: 7.0,
        };
        assert_eq!(err.to_string(), "config field sim_accuracy out of range: 7");
    }
}
