use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

const CACHE_FILE_NAME: &str = "mosaic-cache.sqlite";
const DEFAULT_SEGMENTS: u32 = 40;

#[derive(Debug, Error)]
pub enum AppSettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings path unavailable")]
    MissingSettingsPath,
}

pub type Result<T> = std::result::Result<T, AppSettingsError>;

/// User-level defaults for a mosaic session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicSettings {
    /// Explicit cache database location; the platform cache dir is used when unset.
    pub cache_path: Option<PathBuf>,
    /// Tiles along each side of a mosaic.
    pub segments: u32,
    /// Whether one tile may fill several cells of the same mosaic.
    pub reuse: bool,
    /// Descend into subfolders when scanning.
    pub recursive: bool,
    pub last_folder: Option<PathBuf>,
}

impl Default for MosaicSettings {
    fn default() -> Self {
        Self {
            cache_path: None,
            segments: DEFAULT_SEGMENTS,
            reuse: true,
            recursive: false,
            last_folder: None,
        }
    }
}

impl MosaicSettings {
    pub fn load() -> Result<Self> {
        load_impl()
    }

    pub fn save(&self) -> Result<()> {
        save_impl(self)
    }

    pub fn set_last_folder(&mut self, path: PathBuf) {
        self.last_folder = Some(path);
    }

    pub fn resolved_cache_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cache_path {
            return Ok(path.clone());
        }
        let dirs = project_dirs()?;
        let mut path = dirs.cache_dir().to_path_buf();
        path.push(CACHE_FILE_NAME);
        Ok(path)
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "MosaicLoop", "MosaicLoop")
        .ok_or(AppSettingsError::MissingSettingsPath)
}

#[cfg(target_os = "windows")]
fn load_impl() -> Result<MosaicSettings> {
    use winreg::enums::{HKEY_CURRENT_USER, KEY_READ};
    use winreg::RegKey;

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let key = hkcu
        .open_subkey_with_flags("Software\\MosaicLoop", KEY_READ)
        .ok();

    if let Some(key) = key {
        if let Ok(payload) = key.get_value::<String, _>("Settings") {
            return Ok(serde_json::from_str(&payload)?);
        }
    }

    Ok(MosaicSettings::default())
}

#[cfg(target_os = "windows")]
fn save_impl(settings: &MosaicSettings) -> Result<()> {
    use winreg::enums::{HKEY_CURRENT_USER, KEY_WRITE};
    use winreg::RegKey;

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let (key, _) = hkcu.create_subkey_with_flags("Software\\MosaicLoop", KEY_WRITE)?;
    let payload = serde_json::to_string(settings)?;
    key.set_value("Settings", &payload)?;
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn load_impl() -> Result<MosaicSettings> {
    let path = settings_file_path()?;
    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let settings: MosaicSettings = serde_json::from_str(&content)?;
        Ok(settings)
    } else {
        Ok(MosaicSettings::default())
    }
}

#[cfg(not(target_os = "windows"))]
fn save_impl(settings: &MosaicSettings) -> Result<()> {
    let path = settings_file_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let payload = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, payload)?;
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn settings_file_path() -> Result<PathBuf> {
    let mut path = project_dirs()?.config_dir().to_path_buf();
    path.push("settings.json");
    Ok(path)
}
