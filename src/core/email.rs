use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::core::form::VersionFormData;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("regex whitespace"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn build_subject(form: &VersionFormData, md5_aumento: Option<&str>) -> String {
    let has_aumento = md5_aumento.is_some_and(|md5| !md5.trim().is_empty());
    let version = if has_aumento && !form.demo {
        form.aumento_version_string()
    } else {
        let base = form.base_version_string();
        if base.is_empty() {
            "DEMO".to_string()
        } else {
            base
        }
    };
    let demo = if form.demo { " DEMO" } else { "" };
    let raw = format!(
        "SOLICITUD DE FIRMA{demo} {version}_{} {} | {}",
        form.build, form.terminal, form.cliente
    );
    WHITESPACE.replace_all(&raw, " ").trim().to_string()
}

fn version_block(lines: &mut Vec<String>, heading: &str, form: &VersionFormData, checksum: &str) {
    lines.push(format!(
        "<li style=\"margin: 0 0 5px 0;\"><strong>{}</strong></li>",
        escape_html(heading)
    ));
    lines.push(
        "<ul style=\"margin: 0 0 10px 0; padding-left: 20px; list-style-type: circle;\">"
            .to_string(),
    );
    lines.push(format!(
        "<li><strong>Terminal:</strong> {}</li>",
        escape_html(&form.terminal)
    ));
    lines.push(format!(
        "<li><strong>Tipo de firma:</strong> {}</li>",
        form.tipo_firma.label()
    ));
    let cid = if form.cid.trim().is_empty() { "0" } else { form.cid.trim() };
    lines.push(format!("<li><strong>CID:</strong> {}</li>", escape_html(cid)));
    lines.push(format!(
        "<li><strong>Nombre del archivo:</strong> {}</li>",
        escape_html(&form.nombre_archivo_bin)
    ));
    lines.push(format!(
        "<li><strong>Checksum (MD5):</strong> {}</li>",
        escape_html(checksum)
    ));
    lines.push("</ul>".to_string());
}

/// Subject and HTML body for the signature request. Pure, no I/O.
pub fn build_email(
    form: &VersionFormData,
    md5_aumento: Option<&str>,
    onedrive_folder: Option<&str>,
) -> EmailContent {
    let subject = build_subject(form, md5_aumento);
    let aumento = md5_aumento.map(str::trim).filter(|md5| !md5.is_empty());

    let mut lines = Vec::new();
    lines.push(
        "<div style=\"font-family: Calibri, Arial, sans-serif; font-size: 11pt; color: #000;\">"
            .to_string(),
    );
    lines.push("<p style=\"margin: 0 0 10px 0;\">Cordial saludo,</p>".to_string());
    lines.push(format!(
        "<p style=\"margin: 0 0 10px 0;\">Espero que te encuentres muy bien. Mediante el presente, realizo la entrega formal de la versión <strong>{}_{}</strong> para su respectiva firma.</p>",
        escape_html(&form.base_version_string()),
        escape_html(&form.build)
    ));
    if !form.descripcion_breve.trim().is_empty() {
        lines.push(format!(
            "<p style=\"margin: 0 0 10px 0;\">{}</p>",
            escape_html(form.descripcion_breve.trim())
        ));
    }
    lines.push("<p style=\"margin: 0 0 5px 0;\"><strong>Detalles:</strong></p>".to_string());
    lines.push("<ul style=\"margin: 0 0 10px 0; padding-left: 20px;\">".to_string());

    version_block(
        &mut lines,
        &format!("VERSIÓN - {}", form.base_version_string()),
        form,
        form.checksum_base.trim(),
    );
    if let Some(aumento) = aumento {
        version_block(
            &mut lines,
            &format!("VERSIÓN DE AUMENTO - {}", form.aumento_version_string()),
            form,
            aumento,
        );
    }

    lines.push("</ul>".to_string());
    if let Some(folder) = onedrive_folder.filter(|folder| !folder.trim().is_empty()) {
        lines.push(format!(
            "<p style=\"margin: 0 0 10px 0;\"><strong>Carpeta OneDrive:</strong> {}</p>",
            escape_html(folder.trim())
        ));
    }
    lines.push("</div>".to_string());

    EmailContent {
        subject,
        body: lines.concat(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> VersionFormData {
        VersionFormData {
            cliente: "X".to_string(),
            terminal: "T".to_string(),
            nombre_version_cliente: "V".to_string(),
            version_base: "1.0.0".to_string(),
            build: "240101".to_string(),
            ..VersionFormData::default()
        }
    }

    #[test]
    fn base_only_subject_and_body() {
        let email = build_email(&form(), None, None);
        assert_eq!(email.subject, "SOLICITUD DE FIRMA V1.0.0_240101 T | X");
        assert!(!email.body.contains("VERSIÓN DE AUMENTO"));
        assert!(email.body.contains("VERSIÓN - V1.0.0"));
    }

    #[test]
    fn aumento_checksum_switches_subject_and_adds_block() {
        let form = VersionFormData {
            version_aumento: "1.0.1".to_string(),
            checksum_base: "a".repeat(32),
            ..form()
        };
        let md5 = "b".repeat(32);
        let email = build_email(&form, Some(&md5), Some("C:\\OneDrive\\Versiones\\V"));
        assert_eq!(email.subject, "SOLICITUD DE FIRMA V1.0.1_240101 T | X");
        assert!(email.body.contains("VERSIÓN DE AUMENTO - V1.0.1"));
        assert!(email.body.contains(&md5));
        assert!(email.body.contains("Carpeta OneDrive"));
    }

    #[test]
    fn demo_records_keep_base_version() {
        let form = VersionFormData {
            demo: true,
            version_aumento: "1.0.1".to_string(),
            ..form()
        };
        let email = build_email(&form, Some("c0ffee"), None);
        assert_eq!(email.subject, "SOLICITUD DE FIRMA DEMO V1.0.0_240101 T | X");

        let empty = VersionFormData {
            demo: true,
            nombre_version_cliente: String::new(),
            version_base: String::new(),
            ..form
        };
        assert_eq!(
            build_subject(&empty, None),
            "SOLICITUD DE FIRMA DEMO DEMO_240101 T | X"
        );
    }

    #[test]
    fn collapses_whitespace_in_subject() {
        let form = VersionFormData {
            terminal: "  NEW  6260 ".to_string(),
            ..form()
        };
        assert_eq!(
            build_subject(&form, None),
            "SOLICITUD DE FIRMA V1.0.0_240101 NEW 6260 | X"
        );
    }
}
