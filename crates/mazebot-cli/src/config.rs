//! Robot configuration – reads/writes `~/.mazebot/config.toml`.
//!
//! `MAZEBOT_CONFIG` points at a different file.  After loading, selected
//! fields can be overridden from the environment:
//!
//! | Variable | Config field |
//! |---|---|
//! | `MAZEBOT_LINK_ADDR` | `link_addr` |
//! | `MAZEBOT_CONTROL_PERIOD_MS` | `control_period_ms` |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mazebot_runtime::ControllerConfig;
use mazebot_types::{DRIVE_LIMIT, PathFollowerParameters, RobotParameters};
use serde::{Deserialize, Serialize};

/// Persisted robot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the host link listens on.
    #[serde(default = "default_link_addr")]
    pub link_addr: String,

    #[serde(default = "default_control_period_ms")]
    pub control_period_ms: u64,

    /// How long a MAIN pose shadows ADDITIONAL poses; one control period
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_freshness_ms: Option<u64>,

    /// Fault a running follower after this long without an April-tag pose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_timeout_ms: Option<u64>,

    /// Cycles between `GetPose(MAIN)` requests; `0` disables them.
    #[serde(default = "default_pose_request_every")]
    pub pose_request_every: u32,

    /// Outbound debug packets per second; `0` disables the limit.
    #[serde(default = "default_debug_rate_limit")]
    pub debug_rate_limit: u32,

    #[serde(default = "default_drive_limit")]
    pub max_speed: i16,

    #[serde(default = "default_drive_limit")]
    pub max_steering: i16,

    /// Robot geometry; when absent the host must send it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot: Option<RobotParameters>,

    /// Follower tuning; when absent the host may send it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follower: Option<PathFollowerParameters>,
}

fn default_link_addr() -> String {
    "127.0.0.1:7770".to_string()
}
fn default_control_period_ms() -> u64 {
    20
}
fn default_pose_request_every() -> u32 {
    25
}
fn default_debug_rate_limit() -> u32 {
    20
}
fn default_drive_limit() -> i16 {
    DRIVE_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link_addr: default_link_addr(),
            control_period_ms: default_control_period_ms(),
            pose_freshness_ms: None,
            pose_timeout_ms: None,
            pose_request_every: default_pose_request_every(),
            debug_rate_limit: default_debug_rate_limit(),
            max_speed: default_drive_limit(),
            max_steering: default_drive_limit(),
            robot: Some(RobotParameters::default()),
            follower: None,
        }
    }
}

impl Config {
    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.control_period_ms == 0 {
            return Err("control_period_ms must be at least 1".to_string());
        }
        if self.pose_freshness_ms == Some(0) {
            return Err("pose_freshness_ms must be at least 1".to_string());
        }
        for (name, value) in [("max_speed", self.max_speed), ("max_steering", self.max_steering)] {
            if !(0..=DRIVE_LIMIT).contains(&value) {
                return Err(format!("{name} {value} outside 0..={DRIVE_LIMIT}"));
            }
        }
        if let Some(robot) = &self.robot {
            robot.validate().map_err(|e| e.to_string())?;
        }
        if let Some(follower) = &self.follower {
            follower.validate().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Immutable settings handed to the runtime.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            control_period: Duration::from_millis(self.control_period_ms),
            pose_freshness: self.pose_freshness_ms.map(Duration::from_millis),
            pose_timeout: self.pose_timeout_ms.map(Duration::from_millis),
            pose_request_every: self.pose_request_every,
            debug_rate_limit: self.debug_rate_limit,
            max_speed: self.max_speed,
            max_steering: self.max_steering,
            robot_params: self.robot,
            follower_params: self.follower,
        }
    }
}

/// `$MAZEBOT_CONFIG`, or `~/.mazebot/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MAZEBOT_CONFIG")
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mazebot").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let Some(mut cfg) = load_from(&config_path())? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `MAZEBOT_*` environment overrides; unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MAZEBOT_LINK_ADDR")
        && !v.trim().is_empty()
    {
        cfg.link_addr = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("MAZEBOT_CONTROL_PERIOD_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.control_period_ms = ms;
    }
}

/// Save the config, creating its directory if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
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
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
