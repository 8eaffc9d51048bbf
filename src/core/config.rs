use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::form::VersionFormData;

pub const APP_DIR_NAME: &str = "gestor-versiones";
pub const CONFIG_FILE: &str = "config.json";
/// Fixed key under which the last used form paths are remembered.
pub const FORM_PREFERENCES_FILE: &str = "form-preferences.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(alias = "versiones_root")]
    pub versiones_root: Option<String>,
    pub mail_to: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub reply_poll_minutes: Option<u64>,
    pub reply_lookback_minutes: Option<u32>,
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.filter(|secs| *secs > 0).unwrap_or(3))
    }

    pub fn reply_poll_interval(&self) -> Duration {
        Duration::from_secs(60 * self.reply_poll_minutes.filter(|min| *min > 0).unwrap_or(5))
    }

    pub fn reply_lookback_minutes(&self) -> u32 {
        self.reply_lookback_minutes.unwrap_or(1440)
    }

    /// Historial root: configured value, else `~/OneDrive/Versiones` when the
    /// OneDrive folder exists, else `~/Documents/Versiones`.
    pub fn versiones_root(&self) -> String {
        if let Some(root) = self
            .versiones_root
            .as_deref()
            .map(str::trim)
            .filter(|root| !root.is_empty())
        {
            return root.to_string();
        }
        default_versiones_root()
            .to_string_lossy()
            .to_string()
    }
}

fn default_versiones_root() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    let onedrive = home.join("OneDrive");
    if onedrive.is_dir() {
        return onedrive.join("Versiones");
    }
    home.join("Documents").join("Versiones")
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FormPreferences {
    pub ruta_proyecto: Option<String>,
    pub ruta_compilacion: Option<String>,
    pub nombre_archivo_bin: Option<String>,
    pub archivo_version: Option<String>,
    pub comando_compilacion: Option<String>,
}

impl FormPreferences {
    pub fn capture(form: &VersionFormData) -> Self {
        let keep = |value: &str| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        Self {
            ruta_proyecto: keep(&form.ruta_proyecto),
            ruta_compilacion: keep(&form.ruta_compilacion),
            nombre_archivo_bin: keep(&form.nombre_archivo_bin),
            archivo_version: keep(&form.archivo_version),
            comando_compilacion: keep(&form.comando_compilacion),
        }
    }

    /// Fills only the fields the operator left empty.
    pub fn apply(&self, form: &mut VersionFormData) {
        let fill = |target: &mut String, value: &Option<String>| {
            if target.trim().is_empty() {
                if let Some(value) = value {
                    *target = value.clone();
                }
            }
        };
        fill(&mut form.ruta_proyecto, &self.ruta_proyecto);
        fill(&mut form.ruta_compilacion, &self.ruta_compilacion);
        fill(&mut form.nombre_archivo_bin, &self.nombre_archivo_bin);
        fill(&mut form.archivo_version, &self.archivo_version);
        fill(&mut form.comando_compilacion, &self.comando_compilacion);
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn read_json_or_default<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> T {
    let Ok(raw) = fs::read_to_string(path) else {
        return T::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|error| {
        warn!("Archivo {} inválido, se usan valores por defecto: {error}", path.display());
        T::default()
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| format!("No se pudo crear carpeta de configuración: {error}"))?;
    }
    let serialized = serde_json::to_string_pretty(value)
        .map_err(|error| format!("No se pudo serializar configuración: {error}"))?;
    fs::write(path, serialized)
        .map_err(|error| format!("No se pudo guardar {}: {error}", path.display()))
}

pub fn load_config(dir: &Path) -> AppConfig {
    read_json_or_default(&dir.join(CONFIG_FILE))
}

pub fn save_config(dir: &Path, config: &AppConfig) -> Result<(), String> {
    write_json(&dir.join(CONFIG_FILE), config)
}

pub fn load_form_preferences(dir: &Path) -> FormPreferences {
    read_json_or_default(&dir.join(FORM_PREFERENCES_FILE))
}

pub fn save_form_preferences(dir: &Path, preferences: &FormPreferences) -> Result<(), String> {
    write_json(&dir.join(FORM_PREFERENCES_FILE), preferences)
}
