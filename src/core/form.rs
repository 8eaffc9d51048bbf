use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SEMVER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("regex semver"));
static BUILD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{6}$").expect("regex build"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TipoFirma {
    #[default]
    Generica,
    Personalizada,
}

impl TipoFirma {
    pub fn label(self) -> &'static str {
        match self {
            Self::Generica => "Genérica",
            Self::Personalizada => "Personalizada",
        }
    }
}

fn default_cid() -> String {
    "0".to_string()
}

fn default_compile_py_choice() -> String {
    "2".to_string()
}

/// Version record as filled in by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionFormData {
    #[serde(default)]
    pub cliente: String,
    #[serde(default)]
    pub terminal: String,
    #[serde(default)]
    pub nombre_version_cliente: String,
    #[serde(default)]
    pub version_base: String,
    #[serde(default)]
    pub version_aumento: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub incluir_version_aumento: bool,
    #[serde(default)]
    pub demo: bool,
    #[serde(default)]
    pub tipo_firma: TipoFirma,
    #[serde(default = "default_cid")]
    pub cid: String,
    #[serde(default)]
    pub descripcion_breve: String,
    #[serde(default)]
    pub ruta_proyecto: String,
    #[serde(default)]
    pub ruta_compilacion: String,
    #[serde(default)]
    pub nombre_archivo_bin: String,
    #[serde(default)]
    pub archivo_version: String,
    /// Header path detected earlier by the UI, tried after `archivo_version`.
    #[serde(default)]
    pub header_hint: Option<String>,
    #[serde(default)]
    pub comando_compilacion: String,
    #[serde(default = "default_compile_py_choice")]
    pub compile_py_mode: String,
    #[serde(default = "default_compile_py_choice")]
    pub compile_py_target: String,
    #[serde(default)]
    pub checksum_base: String,
    #[serde(default)]
    pub checksum_aumento: String,
    #[serde(default)]
    pub outlook_subject: String,
}

impl Default for VersionFormData {
    fn default() -> Self {
        Self {
            cliente: String::new(),
            terminal: String::new(),
            nombre_version_cliente: String::new(),
            version_base: String::new(),
            version_aumento: String::new(),
            build: String::new(),
            incluir_version_aumento: false,
            demo: false,
            tipo_firma: TipoFirma::Generica,
            cid: default_cid(),
            descripcion_breve: String::new(),
            ruta_proyecto: String::new(),
            ruta_compilacion: String::new(),
            nombre_archivo_bin: String::new(),
            archivo_version: String::new(),
            header_hint: None,
            comando_compilacion: String::new(),
            compile_py_mode: default_compile_py_choice(),
            compile_py_target: default_compile_py_choice(),
            checksum_base: String::new(),
            checksum_aumento: String::new(),
            outlook_subject: String::new(),
        }
    }
}

impl VersionFormData {
    pub fn base_version_string(&self) -> String {
        format!("{}{}", self.nombre_version_cliente.trim(), self.version_base.trim())
    }

    pub fn aumento_version_string(&self) -> String {
        format!("{}{}", self.nombre_version_cliente.trim(), self.version_aumento.trim())
    }

    /// Root used for discovery: the project folder, else the build folder.
    pub fn project_root(&self) -> &str {
        let project = self.ruta_proyecto.trim();
        if project.is_empty() {
            self.ruta_compilacion.trim()
        } else {
            project
        }
    }

    /// Folder holding the binary (and the build script).
    pub fn build_dir(&self) -> &str {
        let build = self.ruta_compilacion.trim();
        if build.is_empty() {
            self.ruta_proyecto.trim()
        } else {
            build
        }
    }

    pub fn wants_compilation(&self) -> bool {
        !self.comando_compilacion.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormValidation {
    pub ok: bool,
    pub errors: Vec<String>,
}

pub fn validate_form(form: &VersionFormData) -> FormValidation {
    let mut errors = Vec::new();

    let required = [
        ("cliente", &form.cliente),
        ("nombreVersionCliente", &form.nombre_version_cliente),
        ("terminal", &form.terminal),
        ("versionBase", &form.version_base),
        ("build", &form.build),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            errors.push(format!("{field}: Este campo es requerido"));
        }
    }
    if form.incluir_version_aumento && form.version_aumento.trim().is_empty() {
        errors.push("versionAumento: Este campo es requerido".to_string());
    }

    if !form.version_base.trim().is_empty() && !SEMVER.is_match(form.version_base.trim()) {
        errors.push("versionBase: Formato debe ser X.Y.Z (ej: 1.0.0)".to_string());
    }
    if !form.version_aumento.trim().is_empty() && !SEMVER.is_match(form.version_aumento.trim()) {
        errors.push("versionAumento: Formato debe ser X.Y.Z (ej: 1.0.0)".to_string());
    }
    if !form.build.trim().is_empty() && !BUILD.is_match(form.build.trim()) {
        errors.push("build: Formato debe ser AAMMDD (6 dígitos)".to_string());
    }

    FormValidation {
        ok: errors.is_empty(),
        errors,
    }
}

/// Checks the flow needs before touching anything on disk.
pub fn check_flow_inputs(form: &VersionFormData) -> Result<(), String> {
    if form.project_root().is_empty() {
        return Err("Debes indicar la ruta del proyecto o la ruta de compilación.".to_string());
    }
    if form.nombre_archivo_bin.trim().is_empty() {
        return Err("Debes indicar el nombre del archivo .bin.".to_string());
    }
    if form.incluir_version_aumento {
        if form.version_aumento.trim().is_empty() {
            return Err("Debes indicar la versión de AUMENTO.".to_string());
        }
        if !form.wants_compilation() {
            return Err(
                "Debes indicar el comando de compilación para generar la versión de AUMENTO."
                    .to_string(),
            );
        }
    }
    Ok(())
}

pub fn today_build() -> String {
    chrono::Local::now().format("%y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> VersionFormData {
        VersionFormData {
            cliente: "ATC".to_string(),
            terminal: "NEW6260".to_string(),
            nombre_version_cliente: "ENLACEAV".to_string(),
            version_base: "2.0.0".to_string(),
            build: "251201".to_string(),
            ruta_proyecto: "C:\\proj".to_string(),
            nombre_archivo_bin: "fw.bin".to_string(),
            ..VersionFormData::default()
        }
    }

    #[test]
    fn accepts_complete_form() {
        let validation = validate_form(&filled());
        assert!(validation.ok, "{:?}", validation.errors);
        assert!(check_flow_inputs(&filled()).is_ok());
    }

    #[test]
    fn flags_bad_formats() {
        let form = VersionFormData {
            version_base: "2.0".to_string(),
            build: "2512011".to_string(),
            ..filled()
        };
        let validation = validate_form(&form);
        assert!(!validation.ok);
        assert_eq!(validation.errors.len(), 2);
    }

    #[test]
    fn aumento_requires_compile_command() {
        let form = VersionFormData {
            incluir_version_aumento: true,
            version_aumento: "2.0.1".to_string(),
            ..filled()
        };
        assert!(check_flow_inputs(&form)
            .unwrap_err()
            .contains("comando de compilación"));
    }

    #[test]
    fn deserializes_camel_case_with_defaults() {
        let form: VersionFormData = serde_json::from_str(
            r#"{"cliente":"X","versionBase":"1.0.0","incluirVersionAumento":true,"tipoFirma":"personalizada"}"#,
        )
        .unwrap();
        assert_eq!(form.cid, "0");
        assert_eq!(form.compile_py_mode, "2");
        assert!(form.incluir_version_aumento);
        assert_eq!(form.tipo_firma, TipoFirma::Personalizada);
    }
}
