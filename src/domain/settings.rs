use crate::domain::models::DeviceAddress;
use crate::domain::protocol::{self, UartProfile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_serial".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Which Bluetooth stack the worker talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process virtual radio
    Simulated,
    /// Operating system stack (Windows only)
    Native,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(windows) {
            BackendKind::Native
        } else {
            BackendKind::Simulated
        }
    }
}

/// A device the user connected to at least once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_splash_ms")]
    pub splash_duration_ms: u64,

    // UART profile
    #[serde(default = "default_service_uuid")]
    pub uart_service_uuid: Uuid,
    #[serde(default = "default_rx_uuid")]
    pub uart_rx_char_uuid: Uuid,
    #[serde(default = "default_tx_uuid")]
    pub uart_tx_char_uuid: Uuid,
    #[serde(default = "default_mtu")]
    pub preferred_mtu: u16,

    #[serde(default)]
    pub known_devices: Vec<KnownDevice>,
    #[serde(default)]
    pub last_connected_address: Option<DeviceAddress>,

    #[serde(default = "default_false")]
    pub dark_mode: bool,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            scan_timeout_ms: default_scan_timeout_ms(),
            splash_duration_ms: default_splash_ms(),
            uart_service_uuid: default_service_uuid(),
            uart_rx_char_uuid: default_rx_uuid(),
            uart_tx_char_uuid: default_tx_uuid(),
            preferred_mtu: default_mtu(),
            known_devices: Vec::new(),
            last_connected_address: None,
            dark_mode: false,
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn uart_profile(&self) -> UartProfile {
        UartProfile {
            service: self.uart_service_uuid,
            rx: self.uart_rx_char_uuid,
            tx: self.uart_tx_char_uuid,
        }
    }

    pub fn scan_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scan_timeout_ms)
    }
}

fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_splash_ms() -> u64 {
    1_500
}
fn default_service_uuid() -> Uuid {
    protocol::UART_SERVICE_UUID
}
fn default_rx_uuid() -> Uuid {
    protocol::UART_RX_CHAR_UUID
}
fn default_tx_uuid() -> Uuid {
    protocol::UART_TX_CHAR_UUID
}
fn default_mtu() -> u16 {
    protocol::PREFERRED_MTU
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({}): {}", settings_path.display(), e);
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleSerialConsole");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Remember a device after a successful connection and persist.
    pub fn record_connection(
        &mut self,
        address: &DeviceAddress,
        name: Option<&str>,
    ) -> anyhow::Result<()> {
        let name = name.map(str::to_string);
        match self
            .settings
            .known_devices
            .iter_mut()
            .find(|d| &d.address == address)
        {
            Some(known) => {
                if name.is_some() {
                    known.name = name;
                }
            }
            None => self.settings.known_devices.push(KnownDevice {
                address: address.clone(),
                name,
            }),
        }
        self.settings.last_connected_address = Some(address.clone());
        self.save()
    }
}
