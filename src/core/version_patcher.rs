use chrono::Local;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LITERAL_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(#define[ \t]+VERSION[ \t]+")(\d+\.\d+\.\d+)(")"#).expect("regex literal version")
});
static VERSION_MAJOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(#define[ \t]+VERSION_MAJOR[ \t]+)(\d+)").expect("regex major"));
static VERSION_MINOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(#define[ \t]+VERSION_MINOR[ \t]+)(\d+)").expect("regex minor"));
static VERSION_PATCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(#define[ \t]+VERSION_PATCH[ \t]+)(\d+)").expect("regex patch"));
// The `_` separator keeps plain and lettered 8-digit dates out of this pattern.
static PREFIXED_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"#define[ \t]+[A-Za-z0-9_]+[ \t]+"([A-Za-z]*)(\d+_\d+(?:_\d+)?)""#)
        .expect("regex prefixed version")
});
static DATE_MACRO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"#define[ \t]+[A-Za-z0-9_]+[ \t]+"(\d{8})""#).expect("regex date macro")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPatch {
    pub content: String,
    pub updated: bool,
}

/// Build-date stamp written into date macros, `YYYYMMDD` in local time.
pub fn today_stamp() -> String {
    Local::now().format("%Y%m%d").to_string()
}

pub fn update_version(contents: &str, new_version: &str) -> VersionPatch {
    update_version_with_stamp(contents, new_version, &today_stamp())
}

/// Patterns run in order and are not exclusive. The prefixed and date patterns
/// only touch their first match.
pub fn update_version_with_stamp(contents: &str, new_version: &str, date_stamp: &str) -> VersionPatch {
    let mut content = contents.to_string();
    let mut updated = false;

    if LITERAL_VERSION.is_match(&content) {
        content = LITERAL_VERSION
            .replace_all(&content, |caps: &Captures| {
                format!("{}{}{}", &caps[1], new_version, &caps[3])
            })
            .into_owned();
        updated = true;
    }

    let mut components = new_version.split('.');
    for pattern in [&*VERSION_MAJOR, &*VERSION_MINOR, &*VERSION_PATCH] {
        let component = components.next().unwrap_or("0");
        if pattern.is_match(&content) {
            content = pattern
                .replace_all(&content, |caps: &Captures| format!("{}{}", &caps[1], component))
                .into_owned();
            updated = true;
        }
    }

    let prefixed = PREFIXED_VERSION.captures(&content).and_then(|caps| {
        let prefix = caps.get(1)?;
        let digits = caps.get(2)?;
        Some((prefix.start(), digits.end(), prefix.as_str().to_string()))
    });
    if let Some((start, end, prefix)) = prefixed {
        content.replace_range(start..end, &format!("{prefix}{new_version}"));
        updated = true;
    }

    let date = DATE_MACRO
        .captures(&content)
        .and_then(|caps| caps.get(1))
        .map(|value| value.range());
    if let Some(range) = date {
        content.replace_range(range, date_stamp);
        updated = true;
    }

    VersionPatch { content, updated }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAMP: &str = "20240115";

    #[test]
    fn rewrites_literal_version() {
        let patch = update_version_with_stamp("#define VERSION \"1.0.0\"\nint x;\n", "1.1.0", STAMP);
        assert!(patch.updated);
        assert_eq!(patch.content, "#define VERSION \"1.1.0\"\nint x;\n");
    }

    #[test]
    fn rewrites_major_minor_patch_triad() {
        let header = "#define VERSION_MAJOR 1\n#define VERSION_MINOR 0\n#define VERSION_PATCH 7\n";
        let patch = update_version_with_stamp(header, "2.3.4", STAMP);
        assert!(patch.updated);
        assert_eq!(
            patch.content,
            "#define VERSION_MAJOR 2\n#define VERSION_MINOR 3\n#define VERSION_PATCH 4\n"
        );
    }

    #[test]
    fn rewrites_first_prefixed_macro_only() {
        let header = "#define APP_VER \"ENLACEAV2_0_0\"\n#define OTHER_VER \"X1_2\"\n";
        let patch = update_version_with_stamp(header, "2.0.1", STAMP);
        assert!(patch.updated);
        assert_eq!(
            patch.content,
            "#define APP_VER \"ENLACEAV2.0.1\"\n#define OTHER_VER \"X1_2\"\n"
        );
    }

    #[test]
    fn lettered_dates_are_left_to_the_date_pattern() {
        let header = "#define REL_TAG \"REL20200101\"\n#define APP_VER \"APP1_2\"\n";
        let patch = update_version_with_stamp(header, "3.0.0", STAMP);
        assert!(patch.updated);
        assert_eq!(
            patch.content,
            "#define REL_TAG \"REL20200101\"\n#define APP_VER \"APP3.0.0\"\n"
        );
    }

    #[test]
    fn stamps_first_date_macro() {
        let header = "#define BUILD_DATE \"20200101\"\n#define OTHER \"19990101\"\n";
        let patch = update_version_with_stamp(header, "1.0.0", STAMP);
        assert!(patch.updated);
        assert_eq!(
            patch.content,
            "#define BUILD_DATE \"20240115\"\n#define OTHER \"19990101\"\n"
        );
    }

    #[test]
    fn reports_missing_patterns() {
        let header = "#define NAME \"terminal\"\nint main() { return 0; }\n";
        let patch = update_version_with_stamp(header, "1.0.0", STAMP);
        assert!(!patch.updated);
        assert_eq!(patch.content, header);
    }

    #[test]
    fn patching_twice_is_idempotent() {
        let header = "#define VERSION \"1.0.0\"\n#define VERSION_MAJOR 1\n#define VERSION_MINOR 0\n#define VERSION_PATCH 0\n#define APP \"V1_0_0\"\n#define FECHA \"20200101\"\n";
        let once = update_version_with_stamp(header, "1.1.0", STAMP);
        let twice = update_version_with_stamp(&once.content, "1.1.0", STAMP);
        assert_eq!(once.content, twice.content);
    }

    #[test]
    fn date_stamp_is_stable_within_a_run() {
        let header = "#define FECHA \"20200101\"\n";
        let first = update_version(header, "1.0.0");
        let second = update_version(header, "1.0.0");
        assert_eq!(first.content, second.content);
        assert_eq!(today_stamp().len(), 8);
    }
}
