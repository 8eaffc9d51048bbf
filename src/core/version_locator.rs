use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::tokens::normalize;

pub const IGNORED_DIRS: [&str; 14] = [
    ".git",
    ".svn",
    ".hg",
    ".idea",
    "node_modules",
    "dist",
    "build",
    "out",
    "target",
    "bin",
    "obj",
    "vendor",
    "coverage",
    ".gradle",
];

pub const PREFERRED_NAMES: [&str; 17] = [
    "appdef.h",
    "appdefs.h",
    "appdef.hpp",
    "version.h",
    "version.hpp",
    "version.hh",
    "versioninfo.h",
    "versions.h",
    "versions.hpp",
    "config_version.h",
    "mainver.h",
    "ver.h",
    "app_version.h",
    "build.h",
    "version.txt",
    "version.ini",
    "version.cfg",
];

pub const ALLOWED_EXTENSIONS: [&str; 13] = [
    "h", "hpp", "hh", "hxx", "c", "cpp", "cxx", "ino", "txt", "cfg", "ini", "json", "rc",
];

pub const MAX_VERSION_FILE_BYTES: u64 = 512 * 1024;
pub const VERSION_FILE_READ_BYTES: usize = 64 * 1024;
pub const MAX_SCANNED_ENTRIES: usize = 20_000;

const SPECIAL_PHRASES: [&str; 3] = [
    "nombre version cliente",
    "nombre versión cliente",
    "nombre de la version cliente",
];

static DEFINE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#define\s+VERSION\b").expect("regex define version"));
static DEFINE_TRIAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)#define\s+\w*(?:MAJOR|MINOR|PATCH)\b").expect("regex define triad")
});
static QUOTED_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)VERSION[_A-Z0-9]*\s+"[^"]+""#).expect("regex quoted version"));
static DATE_DEFINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"#define\s+\w+\s+"\d{8}""#).expect("regex date define"));
static ANY_DEFINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#define[ \t]+([A-Za-z0-9_]+)[ \t]+([^\r\n]+)").expect("regex any define")
});
static VER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|_)(?:ver|vers|version|vrs)(?:_|$)").expect("regex ver name"));
static VER_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ver").expect("regex ver text"));
static DOTTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+(?:\.\d+)?").expect("regex dotted"));
static UNDERSCORED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+_\d+(?:_\d+)?").expect("regex underscored"));
static DATE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)fecha|date").expect("regex date name"));
static NON_ALNUM_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionFileQuery {
    pub hint_file: Option<String>,
    pub version_base: Option<String>,
    pub nombre_version_cliente: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionFileMatch {
    pub path: String,
    pub score: i32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentScore {
    pub score: i32,
    pub reasons: Vec<String>,
}

pub fn is_candidate_name(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    if PREFERRED_NAMES.contains(&lower.as_str()) {
        return true;
    }
    lower
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext))
}

pub fn is_preferred_name(file_name: &str) -> bool {
    PREFERRED_NAMES.contains(&file_name.to_lowercase().as_str())
}

fn client_variants(value: Option<&str>) -> Vec<String> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Vec::new();
    };
    let normalized = normalize(value);
    let collapsed = NON_ALNUM_RUN.replace_all(&normalized, " ").trim().to_string();
    let mut variants = vec![
        normalized,
        collapsed.replace(' ', ""),
        collapsed.replace(' ', "_"),
        collapsed.replace(' ', "-"),
        collapsed,
    ];
    variants.retain(|v| !v.is_empty());
    variants.dedup();
    variants
}

fn version_variants(value: Option<&str>) -> Vec<String> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Vec::new();
    };
    let mut variants = vec![
        value.to_lowercase(),
        value.replace('.', "_").to_lowercase(),
        value.replace('.', "-").to_lowercase(),
        value.replace('.', "").to_lowercase(),
    ];
    variants.dedup();
    variants
}

/// Scores header text for how likely it is to hold the product version.
/// `None` means nothing version-like was found.
pub fn score_version_content(content: &str, query: &VersionFileQuery) -> Option<ContentScore> {
    if content.is_empty() {
        return None;
    }
    let clients = client_variants(query.nombre_version_cliente.as_deref());
    let versions = version_variants(query.version_base.as_deref());
    let normalized = normalize(content);

    let mut score = 0;
    let mut reasons = Vec::new();

    if SPECIAL_PHRASES.iter().any(|phrase| normalized.contains(&normalize(phrase))) {
        score += 1;
        reasons.push("Incluye texto \"Nombre versión cliente\"".to_string());
    }
    if clients.iter().any(|token| normalized.contains(token.as_str())) {
        score += 3;
        reasons.push("Coincide con nombre de cliente/versión".to_string());
    }
    if versions.iter().any(|token| normalized.contains(token.as_str())) {
        score += 2;
        reasons.push("Incluye número de versión detectado".to_string());
    }
    if DEFINE_VERSION.is_match(content) {
        score += 6;
        reasons.push("#define VERSION".to_string());
    }
    if DEFINE_TRIAD.is_match(content) {
        score += 3;
        reasons.push("Define MAJOR/MINOR/PATCH".to_string());
    }
    if QUOTED_VERSION.is_match(content) {
        score += 2;
        reasons.push("Constante VERSION en string".to_string());
    }
    if DATE_DEFINE.is_match(content) {
        score += 1;
        reasons.push("Fecha en #define".to_string());
    }

    let mut best_define: Option<(i32, String)> = None;
    for caps in ANY_DEFINE.captures_iter(content) {
        let name = &caps[1];
        let value = caps[2].trim();
        let name_lower = normalize(name);
        let value_lower = normalize(value);
        let mut local = 0;
        let mut local_reasons = Vec::new();

        if VER_NAME.is_match(name) {
            local += 3;
            local_reasons.push(format!("Variable {name} contiene prefijo VER"));
        }
        if VER_TEXT.is_match(value) {
            local += 1;
            local_reasons.push("Valor textual menciona version/ver".to_string());
        }
        if DOTTED.is_match(value) {
            local += 3;
            local_reasons.push("Valor con formato X.Y.Z".to_string());
        }
        if UNDERSCORED.is_match(value) {
            local += 2;
            local_reasons.push("Valor con formato X_Y_Z".to_string());
        }
        if versions.iter().any(|token| value.to_lowercase().contains(token.as_str())) {
            local += 2;
            local_reasons.push("Coincide con número de versión ingresado".to_string());
        }
        if clients
            .iter()
            .any(|token| name_lower.contains(token.as_str()) || value_lower.contains(token.as_str()))
        {
            local += 2;
            local_reasons.push("Relacionada con nombre de cliente/versión".to_string());
        }
        if DATE_NAME.is_match(name) {
            local += 1;
            local_reasons.push("Marca de fecha de build".to_string());
        }

        let better = best_define.as_ref().map_or(true, |(best, _)| local > *best);
        if local > 0 && better {
            best_define = Some((local, format!("#define {name}: {}", local_reasons.join(" · "))));
        }
    }
    if let Some((local, reason)) = best_define {
        score += local;
        reasons.push(reason);
    }

    (score > 0).then_some(ContentScore { score, reasons })
}
