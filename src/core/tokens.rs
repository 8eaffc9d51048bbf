use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static NON_ALNUM_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("regex"));

/// Matching tokens derived from free-text identifiers (client, terminal,
/// version strings).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenContext {
    pub raw_tokens: Vec<String>,
    pub sanitized_tokens: Vec<String>,
}

pub fn normalize(raw: &str) -> String {
    raw.nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

pub fn sanitize(value: &str) -> String {
    NON_ALNUM_RUN.replace_all(&value.to_lowercase(), "").into_owned()
}

pub fn build_token_context<S: AsRef<str>>(values: &[S]) -> TokenContext {
    let mut raw_tokens: Vec<String> = Vec::new();
    for value in values {
        let normalized = normalize(value.as_ref());
        if normalized.is_empty() {
            continue;
        }
        for variant in [
            normalized.clone(),
            WHITESPACE.replace_all(&normalized, "").into_owned(),
            NON_ALNUM_RUN.replace_all(&normalized, "_").into_owned(),
            NON_ALNUM_RUN.replace_all(&normalized, "-").into_owned(),
            NON_ALNUM_RUN.replace_all(&normalized, "").into_owned(),
        ] {
            push_unique(&mut raw_tokens, variant);
        }
    }

    let mut sanitized_tokens = Vec::new();
    for token in &raw_tokens {
        push_unique(&mut sanitized_tokens, sanitize(token));
    }

    TokenContext {
        raw_tokens,
        sanitized_tokens,
    }
}

fn push_unique(target: &mut Vec<String>, value: String) {
    if !value.is_empty() && !target.contains(&value) {
        target.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize("  Térm-Ñandú "), "term-nandu");
    }

    #[test]
    fn sanitized_tokens_ignore_accents_and_punctuation() {
        let context = build_token_context(&["Banco ABC", "Térm-1"]);
        assert!(context.sanitized_tokens.contains(&"bancoabc".to_string()));
        assert!(context.sanitized_tokens.contains(&"term1".to_string()));
        assert!(context.raw_tokens.contains(&"banco_abc".to_string()));
        assert!(context.raw_tokens.contains(&"banco-abc".to_string()));
        assert!(context.raw_tokens.contains(&"term-1".to_string()));
    }

    #[test]
    fn skips_empty_inputs() {
        let context = build_token_context(&["", "   ", "X"]);
        assert_eq!(context.raw_tokens, vec!["x".to_string()]);
        assert_eq!(context.sanitized_tokens, vec!["x".to_string()]);
    }
}
