use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to the operator as a titled dialog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("{0}")]
    MissingInput(String),
    #[error("No se encontró el archivo de versión en {project_root} (indicado: {specified}, pista: {hint})")]
    VersionFileNotFound {
        project_root: String,
        specified: String,
        hint: String,
    },
    #[error("No se pudo leer {path}: {reason}")]
    VersionFileUnreadable { path: String, reason: String },
    #[error("No se encontró un patrón de versión conocido en {path}")]
    VersionPatternNotFound { path: String },
    #[error("No se pudo escribir {path}: {reason}")]
    VersionFileWrite { path: String, reason: String },
    #[error("{output}")]
    CompileFailed { stage: BuildStage, output: String },
    #[error("No se encontró el binario {bin_name}. Rutas revisadas: {}", .tried.join(", "))]
    BinaryNotFound {
        stage: BuildStage,
        bin_name: String,
        tried: Vec<String>,
    },
    #[error("No se pudo crear el borrador de correo: {0}")]
    DraftFailed(String),
    #[error("Ya hay una creación de versión en curso")]
    AlreadyRunning,
    #[error("{0}")]
    InvalidState(String),
    #[error("Proceso interrumpido, se restauró la versión BASE")]
    Interrupted,
    #[error("Error inesperado: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStage {
    Base,
    Aumento,
}

impl BuildStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Base => "BASE",
            Self::Aumento => "AUMENTO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDialog {
    pub title: String,
    pub message: String,
}

impl FlowError {
    pub fn title(&self) -> String {
        match self {
            Self::MissingInput(_) => "Datos incompletos".to_string(),
            Self::VersionFileNotFound { .. } => "Archivo de versión no encontrado".to_string(),
            Self::VersionFileUnreadable { .. } => "No se pudo leer el archivo de versión".to_string(),
            Self::VersionPatternNotFound { .. } => "Patrón de versión no encontrado".to_string(),
            Self::VersionFileWrite { .. } => "No se pudo actualizar la versión".to_string(),
            Self::CompileFailed { stage, .. } => format!("Error al compilar {}", stage.label()),
            Self::BinaryNotFound { stage, .. } => {
                format!("Binario {} no encontrado", stage.label())
            }
            Self::DraftFailed(_) => "Error al crear el correo".to_string(),
            Self::AlreadyRunning => "Proceso en curso".to_string(),
            Self::InvalidState(_) => "Acción no disponible".to_string(),
            Self::Interrupted => "Proceso interrumpido".to_string(),
            Self::Unexpected(_) => "Error inesperado".to_string(),
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn dialog(&self) -> ErrorDialog {
        ErrorDialog {
            title: self.title(),
            message: self.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_not_found_lists_every_tried_path() {
        let error = FlowError::BinaryNotFound {
            stage: BuildStage::Aumento,
            bin_name: "fw.bin".to_string(),
            tried: vec!["C:\\a\\fw.bin".to_string(), "C:\\b".to_string()],
        };
        let dialog = error.dialog();
        assert_eq!(dialog.title, "Binario AUMENTO no encontrado");
        assert!(dialog.message.contains("C:\\a\\fw.bin, C:\\b"));
    }

    #[test]
    fn compile_errors_surface_raw_output() {
        let error = FlowError::CompileFailed {
            stage: BuildStage::Base,
            output: "make: *** [all] Error 2".to_string(),
        };
        assert_eq!(error.title(), "Error al compilar BASE");
        assert_eq!(error.message(), "make: *** [all] Error 2");
    }
}
