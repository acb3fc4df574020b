//! Runtime configuration: data directory, log discovery, cloud remote.

use std::path::{Path, PathBuf};

/// Environment variables configuring the community aggregation remote.
/// Both must be present for cloud sync to be available.
pub const CLOUD_URL_ENV: &str = "EMBERTRACK_CLOUD_URL";
pub const CLOUD_KEY_ENV: &str = "EMBERTRACK_CLOUD_KEY";

/// Common install locations probed for the game log.
const INSTALL_ROOTS: &[&str] = &[
    "C:/Program Files (x86)/Steam/steamapps/common/Torchlight Infinite",
    "C:/Program Files/Steam/steamapps/common/Torchlight Infinite",
    "D:/Steam/steamapps/common/Torchlight Infinite",
    "D:/SteamLibrary/steamapps/common/Torchlight Infinite",
    "E:/SteamLibrary/steamapps/common/Torchlight Infinite",
];

/// Log file location inside the game directory.
const LOG_RELATIVE_PATH: &str = "UE_Game/Torchlight/Saved/Logs/UE_game.log";

pub const DEFAULT_PORT: u16 = 8480;

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub base_url: String,
    pub anon_key: String,
}

impl CloudConfig {
    /// Read the remote endpoint from the environment. Absent → cloud
    /// features stay disabled.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var(CLOUD_URL_ENV).ok()?;
        let anon_key = std::env::var(CLOUD_KEY_ENV).ok()?;
        if base_url.is_empty() || anon_key.is_empty() {
            return None;
        }
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the game log, if known.
    pub log_path: Option<PathBuf>,
    /// Directory holding the store, app log, icon cache, device id.
    pub data_dir: PathBuf,
    pub port: u16,
    pub cloud: Option<CloudConfig>,
}

impl AppConfig {
    pub fn new(
        log_path: Option<PathBuf>,
        data_dir: Option<PathBuf>,
        portable: bool,
        port: Option<u16>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(|| {
            if portable {
                portable_data_dir()
            } else {
                default_data_dir()
            }
        });
        Self {
            log_path: log_path.or_else(find_log_file),
            data_dir,
            port: port.unwrap_or(DEFAULT_PORT),
            cloud: CloudConfig::from_env(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tracker.db")
    }

    pub fn icon_cache_dir(&self) -> PathBuf {
        self.data_dir.join("icons")
    }

    pub fn app_log_path(&self) -> PathBuf {
        self.data_dir.join("embertrack.log")
    }

    /// Previous install layout, probed once so an upgrade keeps its data.
    pub fn legacy_db_path(&self) -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("embertrack").join("tracker.db"))
    }
}

/// Per-user data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("EmberTrack")
}

/// Portable mode keeps everything beside the executable.
pub fn portable_data_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("data")
}

/// Probe known install roots for the game log.
pub fn find_log_file() -> Option<PathBuf> {
    for root in INSTALL_ROOTS {
        let candidate = Path::new(root).join(LOG_RELATIVE_PATH);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Check that a directory looks like a game install and return its log path.
pub fn validate_game_directory(game_dir: &Path) -> Option<PathBuf> {
    let candidate = game_dir.join(LOG_RELATIVE_PATH);
    candidate.exists().then_some(candidate)
}
