// Built paths use `\`; readers accept both separators.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches(['\\', '/']);
    let name = name.trim_start_matches(['\\', '/']);
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{dir}\\{name}")
}

pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['\\', '/']);
    trimmed
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(trimmed)
}

pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches(['\\', '/']);
    let index = trimmed.rfind(['\\', '/'])?;
    Some(&trimmed[..index])
}

pub fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    if path.starts_with('\\') || path.starts_with('/') {
        return true;
    }
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

pub fn comparable(path: &str) -> String {
    path.trim()
        .replace('/', "\\")
        .trim_end_matches('\\')
        .to_lowercase()
}

pub fn is_under(path: &str, dir: &str) -> bool {
    let dir = comparable(dir);
    if dir.is_empty() {
        return false;
    }
    let path = comparable(path);
    path == dir || path.starts_with(&format!("{dir}\\"))
}

/// Directory segments of `path` (file name excluded), relative to `root` when
/// the path lives under it.
pub fn dir_segments(path: &str, root: Option<&str>) -> Vec<String> {
    let full = comparable(path);
    let relative = match root.map(comparable) {
        Some(root) if !root.is_empty() && full.starts_with(&format!("{root}\\")) => {
            full[root.len() + 1..].to_string()
        }
        _ => full,
    };
    let mut segments = relative
        .split('\\')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    segments.pop();
    segments
}
