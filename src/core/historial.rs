use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::form::VersionFormData;
use crate::core::host::{HostApi, ZipRequest};
use crate::core::paths;

pub const BASE_DIR: &str = "BASE";
pub const AUMENTO_DIR: &str = "AUMENTO";
pub const CHECKSUMS_FILE: &str = "Checksums.txt";
pub const NOTES_FILE: &str = "Notas.txt";
pub const PENDING: &str = "PENDIENTE";

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\-]").expect("regex unsafe chars"));

pub fn sanitize_segment(value: &str) -> String {
    UNSAFE_CHARS.replace_all(value.trim(), "_").into_owned()
}

/// `VERSION_<client><base>_<build>`
pub fn historial_folder_name(form: &VersionFormData) -> String {
    let client = if form.nombre_version_cliente.trim().is_empty() {
        form.cliente.trim()
    } else {
        form.nombre_version_cliente.trim()
    };
    format!(
        "VERSION_{}{}_{}",
        sanitize_segment(client),
        form.version_base.trim(),
        form.build.trim()
    )
}

pub fn checksums_text(base: Option<&str>, aumento: Option<&str>) -> String {
    let value = |checksum: Option<&str>| {
        checksum
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(PENDING)
            .to_string()
    };
    format!(
        "CHECKSUM BASE: {}\r\nCHECKSUM AUMENTO: {}\r\n",
        value(base),
        value(aumento)
    )
}

pub fn release_notes_text(form: &VersionFormData, base: Option<&str>, aumento: Option<&str>) -> String {
    let mut lines = vec![
        format!("Cliente: {}", form.cliente.trim()),
        format!("Terminal: {}", form.terminal.trim()),
        format!("Versión BASE: {}", form.base_version_string()),
    ];
    if form.incluir_version_aumento {
        lines.push(format!("Versión AUMENTO: {}", form.aumento_version_string()));
    }
    lines.push(format!("Build: {}", form.build.trim()));
    lines.push(format!("Archivo: {}", form.nombre_archivo_bin.trim()));
    lines.push(checksums_text(base, aumento).trim_end().to_string());
    if !form.descripcion_breve.trim().is_empty() {
        lines.push(String::new());
        lines.push(form.descripcion_breve.trim().to_string());
    }
    lines.join("\r\n") + "\r\n"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Base,
    Aumento,
}

impl Slot {
    fn dir(self) -> &'static str {
        match self {
            Self::Base => BASE_DIR,
            Self::Aumento => AUMENTO_DIR,
        }
    }
}

/// Per-version archive of binaries and checksums under the versiones root.
pub struct HistorialArchiver<'a> {
    host: &'a dyn HostApi,
    root: String,
}

impl<'a> HistorialArchiver<'a> {
    pub fn new(host: &'a dyn HostApi, root: impl Into<String>) -> Self {
        Self {
            host,
            root: root.into(),
        }
    }

    /// Creates `<root>\<name>` with its `BASE` and `AUMENTO` folders.
    pub async fn ensure_folder(&self, name: &str) -> Result<String, String> {
        let folder = paths::join(&self.root, name);
        for path in [
            folder.clone(),
            paths::join(&folder, BASE_DIR),
            paths::join(&folder, AUMENTO_DIR),
        ] {
            self.host.create_directory(&path).await.map_err(|error| {
                format!("No se pudo crear carpeta de historial {path}: {error}")
            })?;
        }
        debug!("Historial listo en {folder}");
        Ok(folder)
    }

    pub fn slot_path(folder: &str, slot: Slot, bin_name: &str) -> String {
        paths::join(&paths::join(folder, slot.dir()), bin_name)
    }

    pub async fn store_binary(
        &self,
        folder: &str,
        slot: Slot,
        source: &str,
        bin_name: &str,
    ) -> Result<String, String> {
        let dest = Self::slot_path(folder, slot, bin_name);
        self.host
            .copy_file(source, &dest)
            .await
            .map_err(|error| format!("No se pudo copiar {source} a {dest}: {error}"))?;
        Ok(dest)
    }

    /// Always writes both lines, missing values become `PENDIENTE`.
    pub async fn write_checksums(
        &self,
        folder: &str,
        base: Option<&str>,
        aumento: Option<&str>,
    ) -> Result<String, String> {
        let path = paths::join(folder, CHECKSUMS_FILE);
        self.host
            .write_text_file(&path, &checksums_text(base, aumento))
            .await
            .map_err(|error| format!("No se pudo escribir {CHECKSUMS_FILE}: {error}"))?;
        Ok(path)
    }

    pub async fn write_release_notes(
        &self,
        folder: &str,
        form: &VersionFormData,
        base: Option<&str>,
        aumento: Option<&str>,
    ) -> Result<String, String> {
        let path = paths::join(folder, NOTES_FILE);
        self.host
            .write_text_file(&path, &release_notes_text(form, base, aumento))
            .await
            .map_err(|error| format!("No se pudo escribir {NOTES_FILE}: {error}"))?;
        Ok(path)
    }

    /// Zips the whole folder. Failure is logged and reported as `None`.
    pub async fn zip(&self, folder: &str, subfolder: Option<&str>) -> Option<String> {
        let name = paths::file_name(folder).to_string();
        let request = ZipRequest {
            files: vec![folder.to_string()],
            zip_name: Some(format!("{name}.zip")),
            subfolder: subfolder.map(sanitize_segment),
        };
        match self.host.zip_artifacts(&request).await {
            Ok(path) => {
                info!("Historial comprimido en {path}");
                Some(path)
            }
            Err(error) => {
                warn!("No se pudo comprimir el historial {folder}: {error}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_name_uses_sanitized_client() {
        let form = VersionFormData {
            cliente: "ATC".to_string(),
            nombre_version_cliente: "ENLACE AV".to_string(),
            version_base: "2.0.0".to_string(),
            build: "251201".to_string(),
            ..VersionFormData::default()
        };
        assert_eq!(historial_folder_name(&form), "VERSION_ENLACE_AV2.0.0_251201");
    }

    #[test]
    fn checksums_fill_pending_values() {
        assert_eq!(
            checksums_text(Some("abc"), None),
            "CHECKSUM BASE: abc\r\nCHECKSUM AUMENTO: PENDIENTE\r\n"
        );
        assert_eq!(
            checksums_text(Some(" "), Some("def")),
            "CHECKSUM BASE: PENDIENTE\r\nCHECKSUM AUMENTO: def\r\n"
        );
    }

    #[test]
    fn slot_paths_nest_under_folder() {
        assert_eq!(
            HistorialArchiver::slot_path("D:\\Versiones\\V", Slot::Aumento, "fw.bin"),
            "D:\\Versiones\\V\\AUMENTO\\fw.bin"
        );
    }
}
