//! Rover configuration – reads/writes `~/.exorover/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use exorover_engine::CrashPolicy;
use exorover_types::{Cell, Heading, RoverError};
use serde::{Deserialize, Serialize};

/// How crashed or blocked moves are handled during exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashPolicyKind {
    /// Retry the cell, give up after `max_crash_attempts` failures.
    #[default]
    Tolerate,
    /// Mark the cell dangerous after the first failure.
    MarkHazard,
}

/// Where `auto_explore` lands the rover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandingConfig {
    pub x: i32,
    pub y: i32,
    pub heading: Heading,
}

impl Default for LandingConfig {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            heading: Heading::East,
        }
    }
}

impl LandingConfig {
    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }
}

/// Persisted configuration stored in `~/.exorover/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// `host:port` of the planet simulation server.
    #[serde(default = "default_planet_addr")]
    pub planet_addr: String,

    /// `host:port` of the ground station; empty to run without one.
    #[serde(default = "default_ground_addr")]
    pub ground_addr: String,

    /// Name used in orbit when no ground station assigns one.
    #[serde(default = "default_robot_name")]
    pub robot_name: String,

    #[serde(default)]
    pub landing: LandingConfig,

    #[serde(default)]
    pub crash_policy: CrashPolicyKind,

    #[serde(default = "default_max_crash_attempts")]
    pub max_crash_attempts: u32,

    /// Echo every planet response to the ground station.
    #[serde(default = "default_true")]
    pub echo_planet_responses: bool,

    /// Land at `landing` and explore right after orbit.
    #[serde(default)]
    pub auto_explore: bool,

    /// Number of rovers started side by side, each with its own planet and
    /// ground-station connection.
    #[serde(default = "default_robots")]
    pub robots: u32,
}

fn default_planet_addr() -> String {
    "localhost:8150".to_string()
}
fn default_ground_addr() -> String {
    "localhost:9000".to_string()
}
fn default_robot_name() -> String {
    "ExoRover".to_string()
}
fn default_max_crash_attempts() -> u32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_robots() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            planet_addr: default_planet_addr(),
            ground_addr: default_ground_addr(),
            robot_name: default_robot_name(),
            landing: LandingConfig::default(),
            crash_policy: CrashPolicyKind::default(),
            max_crash_attempts: default_max_crash_attempts(),
            echo_planet_responses: default_true(),
            auto_explore: false,
            robots: default_robots(),
        }
    }
}

impl Config {
    pub fn crash_policy(&self) -> CrashPolicy {
        match self.crash_policy {
            CrashPolicyKind::Tolerate => CrashPolicy::Tolerate {
                max_attempts: self.max_crash_attempts.max(1),
            },
            CrashPolicyKind::MarkHazard => CrashPolicy::MarkHazard,
        }
    }

    pub fn robot_count(&self) -> u32 {
        self.robots.max(1)
    }

    /// Orbit name of rover `index` when no ground station assigns one.
    pub fn standalone_name(&self, index: u32) -> String {
        if self.robot_count() == 1 {
            self.robot_name.clone()
        } else {
            format!("{}-{}", self.robot_name, index + 1)
        }
    }

    /// `auto_explore` landing cell of rover `index`: one column east per
    /// rover.
    pub fn landing_cell(&self, index: u32) -> Cell {
        let base = self.landing.cell();
        Cell::new(base.x + index as i32, base.y)
    }

    /// `None` when no ground station is configured.
    pub fn ground_addr(&self) -> Option<&str> {
        let addr = self.ground_addr.trim();
        (!addr.is_empty()).then_some(addr)
    }
}

/// Return the path to `~/.exorover/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".exorover").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, RoverError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, RoverError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        RoverError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| RoverError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `EXOROVER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `EXOROVER_PLANET_ADDR` | `planet_addr` |
/// | `EXOROVER_GROUND_ADDR` | `ground_addr` |
/// | `EXOROVER_ROBOT_NAME` | `robot_name` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("EXOROVER_PLANET_ADDR") {
        cfg.planet_addr = v;
    }
    if let Some(v) = lookup("EXOROVER_GROUND_ADDR") {
        cfg.ground_addr = v;
    }
    if let Some(v) = lookup("EXOROVER_ROBOT_NAME")
        && !v.trim().is_empty()
    {
        cfg.robot_name = v;
    }
}

/// Save the config to disk, creating `~/.exorover/` if necessary.
pub fn save(cfg: &Config) -> Result<(), RoverError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), RoverError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            RoverError::Config(format!("failed to create config directory: {e}"))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                RoverError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RoverError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| RoverError::Config(format!("failed to write config at {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.planet_addr, "localhost:8150");
        assert_eq!(cfg.ground_addr(), Some("localhost:9000"));
        assert_eq!(cfg.crash_policy(), CrashPolicy::Tolerate { max_attempts: 2 });
        assert!(cfg.echo_planet_responses);
        assert!(!cfg.auto_explore);
        assert_eq!(cfg.landing.cell(), Cell::new(0, 0));
        assert_eq!(cfg.robot_count(), 1);
        assert_eq!(cfg.standalone_name(0), "ExoRover");
    }

    #[test]
    fn several_robots_get_distinct_names_and_landings() {
        let cfg: Config = toml::from_str(
            "robots = 3\nrobot_name = \"Scout\"\n\n[landing]\nx = 1\ny = 2\nheading = \"NORTH\"\n",
        )
        .unwrap();
        assert_eq!(cfg.robot_count(), 3);
        let names: Vec<String> = (0..3).map(|i| cfg.standalone_name(i)).collect();
        assert_eq!(names, ["Scout-1", "Scout-2", "Scout-3"]);
        assert_eq!(cfg.landing_cell(0), Cell::new(1, 2));
        assert_eq!(cfg.landing_cell(2), Cell::new(3, 2));

        let zero: Config = toml::from_str("robots = 0\n").unwrap();
        assert_eq!(zero.robot_count(), 1);
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            robot_name: "Curiosity".to_string(),
            landing: LandingConfig {
                x: 3,
                y: 4,
                heading: Heading::South,
            },
            crash_policy: CrashPolicyKind::MarkHazard,
            auto_explore: true,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.robot_name, "Curiosity");
        assert_eq!(loaded.landing.cell(), Cell::new(3, 4));
        assert_eq!(loaded.landing.heading, Heading::South);
        assert_eq!(loaded.crash_policy(), CrashPolicy::MarkHazard);
        assert!(loaded.auto_explore);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "ground_addr = \"\"\nmax_crash_attempts = 0\n\n[landing]\nx = 1\ny = 2\nheading = \"WEST\"\n",
        )
        .unwrap();
        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.ground_addr(), None);
        assert_eq!(cfg.landing.heading, Heading::West);
        assert_eq!(cfg.crash_policy(), CrashPolicy::Tolerate { max_attempts: 1 });
        assert_eq!(cfg.planet_addr, "localhost:8150");
    }

    #[test]
    fn invalid_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "crash_policy = \"panic\"\n").unwrap();
        assert!(matches!(load_from(&path), Err(RoverError::Config(_))));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_exorover_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".exorover"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_replace_addresses_and_name() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            env(&[
                ("EXOROVER_PLANET_ADDR", "planet.example:8150"),
                ("EXOROVER_GROUND_ADDR", ""),
                ("EXOROVER_ROBOT_NAME", "Spirit"),
            ]),
        );
        assert_eq!(cfg.planet_addr, "planet.example:8150");
        assert_eq!(cfg.ground_addr(), None);
        assert_eq!(cfg.robot_name, "Spirit");
    }

    #[test]
    fn blank_robot_name_override_is_ignored() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, env(&[("EXOROVER_ROBOT_NAME", "  ")]));
        assert_eq!(cfg, Config::default());
    }
}
