use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::core::paths;
use crate::core::tokens::{sanitize, TokenContext};

/// Candidates past this index are ignored, pathological trees can report
/// thousands of copies of the same binary.
pub const MAX_SCORED_CANDIDATES: usize = 150;

const FAVORED_DIRS: [(&str, f64); 8] = [
    ("release", 4.0),
    ("dist", 3.0),
    ("output", 3.0),
    ("telecarga", 3.0),
    ("firmware", 3.0),
    ("deploy", 2.0),
    ("bin", 2.0),
    ("build", 2.0),
];

const PENALIZED_DIRS: [(&str, f64); 9] = [
    ("backup", -5.0),
    ("respaldo", -5.0),
    ("respald", -4.0),
    ("old", -4.0),
    ("tmp", -3.0),
    ("temp", -3.0),
    ("cache", -2.0),
    ("log", -1.0),
    ("~", -1.0),
];

static FAVORED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)aumento|release|prod").expect("regex favored name"));
static PENALIZED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)debug|test|old").expect("regex penalized name"));

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinCandidateScore {
    pub path: String,
    pub score: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreContext<'a> {
    pub tokens: TokenContext,
    pub preferred_dir: Option<&'a str>,
    pub project_root: Option<&'a str>,
    pub current_bin_name: Option<&'a str>,
}

pub fn select_best(candidates: &[String], context: &ScoreContext<'_>) -> Option<BinCandidateScore> {
    let mut best: Option<BinCandidateScore> = None;
    for candidate in candidates.iter().take(MAX_SCORED_CANDIDATES) {
        let scored = score_candidate(candidate, context);
        let replace = match &best {
            Some(current) => scored.score > current.score,
            None => true,
        };
        if replace {
            best = Some(scored);
        }
    }
    best
}

pub fn score_candidate(path: &str, context: &ScoreContext<'_>) -> BinCandidateScore {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if let Some(preferred) = context.preferred_dir.filter(|dir| !dir.trim().is_empty()) {
        if paths::is_under(path, preferred) {
            score += 6.0;
            reasons.push("Dentro de la carpeta preferida".to_string());
        }
    }
    let project_root = context
        .project_root
        .filter(|root| !root.trim().is_empty());
    if let Some(root) = project_root {
        if paths::is_under(path, root) {
            score += 4.0;
            reasons.push("Dentro del proyecto".to_string());
        }
    }

    let segments = paths::dir_segments(path, project_root);
    let depth_bonus = (12.0 - segments.len() as f64).max(0.0) * 0.5;
    if depth_bonus > 0.0 {
        score += depth_bonus;
        reasons.push(format!("Profundidad {}", segments.len()));
    }

    for (keyword, bonus) in FAVORED_DIRS {
        if segments.iter().any(|segment| segment == keyword) {
            score += bonus;
            reasons.push(format!("Carpeta favorable: {keyword}"));
        }
    }

    let dir_path = segments.join("\\");
    for (keyword, penalty) in PENALIZED_DIRS {
        let matched = dir_path.contains(keyword) || segments.iter().any(|segment| segment == keyword);
        if matched {
            score += penalty;
            reasons.push(format!("Carpeta penalizada: {keyword}"));
        }
    }

    let file_name = paths::file_name(path).to_lowercase();
    let lower_path = paths::comparable(path);

    let raw_tokens = context.tokens.raw_tokens.iter().filter(|token| !token.is_empty());
    let mut raw_in_path = false;
    let mut raw_in_name = false;
    for token in raw_tokens {
        let token = token.to_lowercase();
        if file_name.contains(&token) {
            raw_in_name = true;
            break;
        }
        if lower_path.contains(&token) {
            raw_in_path = true;
        }
    }
    if raw_in_name {
        score += 6.0;
        reasons.push("Nombre coincide con cliente/terminal".to_string());
    } else if raw_in_path {
        score += 2.0;
        reasons.push("Ruta coincide con cliente/terminal".to_string());
    }

    let sanitized_name = sanitize(&file_name);
    let sanitized_path = sanitize(&lower_path);
    let sanitized_tokens = context
        .tokens
        .sanitized_tokens
        .iter()
        .filter(|token| !token.is_empty());
    let mut sanitized_in_path = false;
    let mut sanitized_in_name = false;
    for token in sanitized_tokens {
        if sanitized_name.contains(token.as_str()) {
            sanitized_in_name = true;
            break;
        }
        if sanitized_path.contains(token.as_str()) {
            sanitized_in_path = true;
        }
    }
    if sanitized_in_name {
        score += 4.0;
        reasons.push("Nombre normalizado coincide".to_string());
    } else if sanitized_in_path {
        score += 1.0;
        reasons.push("Ruta normalizada coincide".to_string());
    }

    if let Some(current) = context.current_bin_name.filter(|name| !name.trim().is_empty()) {
        if file_name.eq_ignore_ascii_case(current.trim()) {
            score += 8.0;
            reasons.push("Mismo binario seleccionado previamente".to_string());
        }
    }

    if FAVORED_NAME.is_match(&file_name) {
        score += 1.5;
        reasons.push("Nombre sugiere release/aumento".to_string());
    }
    if PENALIZED_NAME.is_match(&file_name) {
        score -= 2.0;
        reasons.push("Nombre sugiere debug/test".to_string());
    }

    BinCandidateScore {
        path: path.to_string(),
        score,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tokens::build_token_context;

    fn context<'a>(root: &'a str, current: Option<&'a str>) -> ScoreContext<'a> {
        ScoreContext {
            tokens: build_token_context(&["Banco ABC", "NEW6260"]),
            preferred_dir: None,
            project_root: Some(root),
            current_bin_name: current,
        }
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert!(select_best(&[], &context("C:\\proj", None)).is_none());
    }

    #[test]
    fn release_folder_beats_backup_copy() {
        let candidates = vec![
            "C:\\proj\\backup\\release\\fw.bin".to_string(),
            "C:\\proj\\release\\fw.bin".to_string(),
        ];
        let best = select_best(&candidates, &context("C:\\proj", None)).unwrap();
        assert_eq!(best.path, "C:\\proj\\release\\fw.bin");
    }

    #[test]
    fn penalized_copy_of_winner_never_wins() {
        let mut candidates = vec![
            "C:\\proj\\out\\app.bin".to_string(),
            "C:\\proj\\firmware\\bancoabc_new6260.bin".to_string(),
            "C:\\proj\\tmp\\build\\bancoabc.bin".to_string(),
        ];
        let ctx = context("C:\\proj", None);
        let winner = select_best(&candidates, &ctx).unwrap();
        let copy = winner.path.replace("C:\\proj\\", "C:\\proj\\backup\\");
        candidates.insert(0, copy);
        assert_eq!(select_best(&candidates, &ctx).unwrap().path, winner.path);
    }

    #[test]
    fn penalties_stack() {
        let ctx = ScoreContext::default();
        let plain = score_candidate("proj\\a\\fw.bin", &ctx);
        let stacked = score_candidate("proj\\respaldo\\fw.bin", &ctx);
        assert!((plain.score - stacked.score - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sticky_name_and_token_matches_score() {
        let ctx = context("C:\\proj", Some("APP.BIN"));
        let sticky = score_candidate("C:\\proj\\out\\app.bin", &ctx);
        let other = score_candidate("C:\\proj\\out\\other.bin", &ctx);
        assert!((sticky.score - other.score - 8.0).abs() < f64::EPSILON);

        let token = score_candidate("C:\\proj\\out\\banco_abc.bin", &ctx);
        assert!(token.reasons.iter().any(|r| r.contains("Nombre coincide")));
    }

    #[test]
    fn ties_keep_first_candidate() {
        let candidates = vec![
            "C:\\proj\\a\\fw.bin".to_string(),
            "C:\\proj\\b\\fw.bin".to_string(),
        ];
        let best = select_best(&candidates, &context("C:\\proj", None)).unwrap();
        assert_eq!(best.path, "C:\\proj\\a\\fw.bin");
    }

    #[test]
    fn only_first_candidates_are_scored() {
        let mut candidates = vec!["C:\\other\\deep\\x\\y\\z\\fw.bin".to_string(); MAX_SCORED_CANDIDATES];
        candidates.push("C:\\proj\\release\\fw.bin".to_string());
        let best = select_best(&candidates, &context("C:\\proj", None)).unwrap();
        assert_eq!(best.path, "C:\\other\\deep\\x\\y\\z\\fw.bin");
    }
}
