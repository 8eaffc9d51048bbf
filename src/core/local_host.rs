use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{debug, warn};
use notify::{EventKind, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::host::{
    CompileOutput, DraftReceipt, FileWatch, HostApi, MailReply, OutlookDraft, ReplyQuery,
    VersionFileMatch, VersionFileQuery, ZipRequest,
};
use crate::core::version_locator::{
    is_candidate_name, is_preferred_name, score_version_content, IGNORED_DIRS,
    MAX_SCANNED_ENTRIES, MAX_VERSION_FILE_BYTES, VERSION_FILE_READ_BYTES,
};

/// Folders `find_files` never descends into.
const SKIPPED_SEARCH_DIRS: [&str; 5] = ["node_modules", ".git", "dist", "build", "out"];
const TEMP_DIR_NAME: &str = "versiones-app";
const MAX_REPLIES: usize = 25;

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("regex unsafe file chars"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("regex whitespace"));

/// Host backed by the local filesystem, the system shell and Outlook over
/// PowerShell.
#[derive(Debug, Clone)]
pub struct LocalHost {
    temp_root: PathBuf,
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHost {
    pub fn new() -> Self {
        Self {
            temp_root: std::env::temp_dir().join(TEMP_DIR_NAME),
        }
    }

    /// Zips land under `temp_root` instead of the system temp folder.
    pub fn with_temp_root(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }
}

/// Paths arrive backslash-joined. Outside Windows they are rewritten with the
/// native separator before touching the filesystem.
fn native(path: &str) -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(path)
    } else {
        PathBuf::from(path.replace('\\', std::path::MAIN_SEPARATOR_STR))
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn sanitize_filename(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return fallback.to_string();
    }
    let cleaned = UNSAFE_FILE_CHARS.replace_all(value, "_");
    WHITESPACE.replace_all(&cleaned, "_").chars().take(180).collect()
}

fn matches_pattern(name: &str, patterns: &[String]) -> bool {
    let lower = name.to_lowercase();
    patterns
        .iter()
        .filter(|pattern| !pattern.is_empty())
        .any(|pattern| {
            let pattern = pattern.to_lowercase();
            if pattern.starts_with('.') {
                lower.ends_with(&pattern)
            } else {
                lower == pattern
            }
        })
}

/// Breadth-first search by exact name or `.ext` suffix. Past `limit` entries the
/// walk stops and keeps what it already matched.
fn search_files(root: &Path, patterns: &[String], limit: usize) -> Vec<String> {
    let mut matches = Vec::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);
    let mut scanned = 0usize;

    while let Some(current) = queue.pop_front() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            scanned += 1;
            if scanned > limit {
                warn!(
                    "Límite de búsqueda alcanzado ({limit} entradas) en {}, {} coincidencia(s) parciales",
                    display(root),
                    matches.len()
                );
                return matches;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() {
                if !SKIPPED_SEARCH_DIRS.contains(&name.as_str()) {
                    queue.push_back(entry.path());
                }
            } else if file_type.is_file() && matches_pattern(&name, patterns) {
                matches.push(display(&entry.path()));
            }
        }
    }
    matches
}

fn read_head(path: &Path) -> Option<String> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() || metadata.len() > MAX_VERSION_FILE_BYTES {
        return None;
    }
    let mut buffer = Vec::with_capacity(VERSION_FILE_READ_BYTES);
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(error) => {
            debug!("No se pudo leer {} para análisis: {error}", display(path));
            return None;
        }
    };
    file.take(VERSION_FILE_READ_BYTES as u64)
        .read_to_end(&mut buffer)
        .ok()?;
    Some(String::from_utf8_lossy(&buffer).to_string())
}

struct VersionSearch<'q> {
    query: &'q VersionFileQuery,
    best: Option<VersionFileMatch>,
}

impl VersionSearch<'_> {
    fn evaluate(&mut self, path: &Path, prefix: Option<&str>) {
        let Some(content) = read_head(path) else {
            return;
        };
        let Some(scored) = score_version_content(&content, self.query) else {
            return;
        };
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let prefix = prefix.or_else(|| {
            is_preferred_name(&name).then_some("Nombre coincide con patrón común")
        });
        let reason = prefix
            .into_iter()
            .map(str::to_string)
            .chain(scored.reasons)
            .collect::<Vec<_>>()
            .join(" · ");
        let better = self
            .best
            .as_ref()
            .map_or(true, |best| scored.score > best.score);
        if better {
            self.best = Some(VersionFileMatch {
                path: display(path),
                score: scored.score,
                reason: if reason.is_empty() {
                    "Coincidencia genérica".to_string()
                } else {
                    reason
                },
            });
        }
    }
}

fn search_version_file(
    root: &Path,
    query: &VersionFileQuery,
) -> Result<Option<VersionFileMatch>, String> {
    if !root.is_dir() {
        return Err(format!("La ruta {} no es una carpeta existente", display(root)));
    }
    let mut search = VersionSearch { query, best: None };

    let hint = query
        .hint_file
        .as_deref()
        .map(str::trim)
        .filter(|hint| !hint.is_empty());
    let hint_name = hint.map(|hint| crate::core::paths::file_name(hint).to_lowercase());

    if let Some(hint) = hint {
        let hinted = native(hint);
        let mut candidates = Vec::new();
        if hinted.is_absolute() {
            candidates.push(hinted.clone());
        }
        candidates.push(root.join(&hinted));
        if let Some(name) = hinted.file_name() {
            candidates.push(root.join(name));
        }
        for candidate in candidates {
            if candidate.is_file() {
                search.evaluate(&candidate, Some("Coincide con pista proporcionada"));
                if search.best.is_some() {
                    return Ok(search.best);
                }
            }
        }
    }

    let mut queue = VecDeque::from([root.to_path_buf()]);
    let mut scanned = 0usize;
    while let Some(current) = queue.pop_front() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            scanned += 1;
            if scanned > MAX_SCANNED_ENTRIES {
                return Err(format!(
                    "Límite de búsqueda alcanzado: se analizaron más de {MAX_SCANNED_ENTRIES} entradas"
                ));
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() {
                if !IGNORED_DIRS.contains(&name.as_str()) {
                    queue.push_back(entry.path());
                }
                continue;
            }
            let path = entry.path();
            if hint_name.as_deref() == Some(name.to_lowercase().as_str()) {
                search.evaluate(&path, Some("Coincide exactamente con el nombre indicado"));
                if search.best.is_some() {
                    return Ok(search.best);
                }
            }
            if is_candidate_name(&name) {
                search.evaluate(&path, None);
            }
        }
    }
    Ok(search.best)
}

fn write_zip(target: &Path, inputs: &[PathBuf]) -> Result<(), String> {
    let file = fs::File::create(target)
        .map_err(|error| format!("No se pudo crear {}: {error}", display(target)))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for input in inputs {
        let Some(base) = input.file_name().map(|name| name.to_string_lossy().to_string()) else {
            continue;
        };
        if input.is_dir() {
            for entry in WalkDir::new(input).min_depth(1).into_iter().flatten() {
                let Ok(relative) = entry.path().strip_prefix(input) else {
                    continue;
                };
                let relative = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                let name = format!("{base}/{relative}");
                if entry.file_type().is_dir() {
                    writer
                        .add_directory(name, options)
                        .map_err(|error| format!("No se pudo agregar carpeta al zip: {error}"))?;
                } else if entry.file_type().is_file() {
                    append_file(&mut writer, entry.path(), &name, options)?;
                }
            }
        } else if input.is_file() {
            append_file(&mut writer, input, &base, options)?;
        }
    }

    writer
        .finish()
        .map_err(|error| format!("No se pudo cerrar el zip: {error}"))?;
    Ok(())
}

fn append_file(
    writer: &mut ZipWriter<fs::File>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<(), String> {
    let bytes = fs::read(path)
        .map_err(|error| format!("No se pudo leer {}: {error}", display(path)))?;
    writer
        .start_file(name, options)
        .map_err(|error| format!("No se pudo agregar {name} al zip: {error}"))?;
    writer
        .write_all(&bytes)
        .map_err(|error| format!("No se pudo escribir {name} en el zip: {error}"))
}

fn build_zip(temp_root: &Path, request: &ZipRequest) -> Result<String, String> {
    let existing = request
        .files
        .iter()
        .filter(|file| !file.trim().is_empty())
        .map(|file| native(file))
        .filter(|path| path.exists())
        .collect::<Vec<_>>();
    if request.files.is_empty() {
        return Err("No se proporcionaron archivos a comprimir".to_string());
    }
    let Some(first) = existing.first() else {
        return Err("Ninguna de las rutas existe físicamente".to_string());
    };

    let mut dir = temp_root.to_path_buf();
    if let Some(subfolder) = request.subfolder.as_deref().filter(|s| !s.trim().is_empty()) {
        dir = dir.join(sanitize_filename(subfolder, "archivo"));
    }
    fs::create_dir_all(&dir)
        .map_err(|error| format!("No se pudo crear carpeta temporal {}: {error}", display(&dir)))?;

    let fallback = first
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "artefactos".to_string());
    let mut name = sanitize_filename(request.zip_name.as_deref().unwrap_or(&fallback), &fallback);
    if !name.to_lowercase().ends_with(".zip") {
        name.push_str(".zip");
    }
    let target = dir.join(name);
    write_zip(&target, &existing)?;
    Ok(display(&target))
}

fn payload_path(temp_root: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    temp_root.join(format!("outlook-{}-{nanos}.json", std::process::id()))
}

/// Runs `body` in PowerShell with `$data` bound to `payload`, and parses the
/// JSON the script prints. Only available on Windows.
async fn run_powershell_json<P, T>(temp_root: &Path, payload: &P, body: &str) -> Result<Option<T>, String>
where
    P: Serialize,
    T: DeserializeOwned,
{
    if !cfg!(windows) {
        return Err("La automatización de Outlook solo está disponible en Windows.".to_string());
    }
    fs::create_dir_all(temp_root)
        .map_err(|error| format!("No se pudo crear carpeta temporal: {error}"))?;
    let data_path = payload_path(temp_root);
    let raw = serde_json::to_string(payload)
        .map_err(|error| format!("No se pudo serializar datos para Outlook: {error}"))?;
    fs::write(&data_path, raw)
        .map_err(|error| format!("No se pudo preparar datos para Outlook: {error}"))?;

    let script = format!(
        "$ErrorActionPreference = 'Stop'\n\
         [Console]::OutputEncoding = [System.Text.Encoding]::UTF8\n\
         $data = Get-Content -Raw -Encoding UTF8 -LiteralPath '{}' | ConvertFrom-Json\n\
         {body}\n",
        display(&data_path).replace('\'', "''")
    );
    let output = run_powershell(&script).await;
    let _ = fs::remove_file(&data_path);
    let stdout = output?;

    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|error| format!("No se pudo interpretar la respuesta de PowerShell: {error}. Respuesta: {trimmed}"))
}

async fn run_powershell(script: &str) -> Result<String, String> {
    let mut command = Command::new("powershell.exe");
    command
        .args([
            "-NoLogo",
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Bypass",
            "-Command",
            "-",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    hide_window(&mut command);

    let mut child = command
        .spawn()
        .map_err(|error| format!("No se pudo iniciar PowerShell: {error}"))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|error| format!("No se pudo enviar el script a PowerShell: {error}"))?;
    }
    let output = child
        .wait_with_output()
        .await
        .map_err(|error| format!("PowerShell falló: {error}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(if stderr.is_empty() {
            format!("PowerShell salió con código {:?}", output.status.code())
        } else {
            stderr
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(windows)]
fn hide_window(command: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_window(_command: &mut Command) {}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut shell = Command::new("cmd");
        shell.args(["/C", command]);
        shell
    } else {
        let mut shell = Command::new("sh");
        shell.args(["-c", command]);
        shell
    }
}

const DRAFT_SCRIPT: &str = r#"
$outlook = New-Object -ComObject Outlook.Application
$namespace = $outlook.GetNamespace("MAPI")
$mail = $outlook.CreateItem(0)
if ($data.subject) { $mail.Subject = $data.subject }
if ($data.body) { $mail.HTMLBody = $data.body }
if ($data.to) { $mail.To = $data.to }
if ($data.saveToSent -eq $true) {
  $mail.SaveSentMessageFolder = $namespace.GetDefaultFolder(5)
}
$attachedCount = 0
foreach ($att in @($data.attachments)) {
  if ($att -and (Test-Path -LiteralPath $att)) {
    $mail.Attachments.Add($att) | Out-Null
    $attachedCount++
  }
}
if ($data.send -eq $true) {
  $mail.Send() | Out-Null
  $sent = $true
} else {
  $mail.Display() | Out-Null
  $mail.Save() | Out-Null
  $sent = $false
}
[PSCustomObject]@{
  subject = [string]$mail.Subject
  sent = $sent
  entryId = [string]$mail.EntryID
  attachedCount = $attachedCount
} | ConvertTo-Json -Compress
"#;

const REPLIES_SCRIPT: &str = r#"
$outlook = New-Object -ComObject Outlook.Application
$namespace = $outlook.GetNamespace("MAPI")
$inbox = $namespace.GetDefaultFolder(6)
$items = $inbox.Items
$items.Sort("[ReceivedTime]", $true)
$minutes = if ($data.sinceMinutes) { [int]$data.sinceMinutes } else { 1440 }
$cutoff = (Get-Date).AddMinutes(-1 * $minutes)
$found = @()
foreach ($item in $items) {
  if ($null -eq $item) { continue }
  if ($item.ReceivedTime -lt $cutoff) { break }
  $keyword = [string]$data.subjectKeyword
  if ($keyword -and ($item.Subject -notlike "*$keyword*")) { continue }
  $found += [PSCustomObject]@{
    subject = [string]$item.Subject
    body = [string]$item.Body
    from = [string]$item.SenderName
    receivedTime = ($item.ReceivedTime).ToString('s')
  }
  if ($found.Count -ge __MAX_REPLIES__) { break }
}
[PSCustomObject]@{ replies = @($found) } | ConvertTo-Json -Compress -Depth 4
"#;

#[derive(Debug, Default, Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    replies: Vec<MailReply>,
}

#[async_trait]
impl HostApi for LocalHost {
    async fn file_exists(&self, path: &str) -> bool {
        !path.trim().is_empty() && native(path).exists()
    }

    async fn read_text_file(&self, path: &str) -> Result<String, String> {
        fs::read_to_string(native(path)).map_err(|error| format!("No se pudo leer {path}: {error}"))
    }

    async fn write_text_file(&self, path: &str, content: &str) -> Result<(), String> {
        let target = native(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| format!("No se pudo crear carpeta para {path}: {error}"))?;
        }
        fs::write(&target, content).map_err(|error| format!("No se pudo escribir {path}: {error}"))
    }

    async fn create_directory(&self, path: &str) -> Result<(), String> {
        fs::create_dir_all(native(path))
            .map_err(|error| format!("No se pudo crear carpeta {path}: {error}"))
    }

    async fn copy_file(&self, src: &str, dest: &str) -> Result<(), String> {
        let target = native(dest);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| format!("No se pudo crear carpeta para {dest}: {error}"))?;
        }
        fs::copy(native(src), &target)
            .map(|_| ())
            .map_err(|error| format!("No se pudo copiar {src}: {error}"))
    }

    async fn compute_md5(&self, path: &str) -> Option<String> {
        let target = native(path);
        let bytes = tokio::task::spawn_blocking(move || fs::read(target))
            .await
            .ok()?
            .ok()?;
        Some(format!("{:x}", md5::compute(bytes)))
    }

    async fn find_files(&self, root: &str, patterns: &[String]) -> Result<Vec<String>, String> {
        let root = native(root);
        let patterns = patterns.to_vec();
        tokio::task::spawn_blocking(move || search_files(&root, &patterns, MAX_SCANNED_ENTRIES))
            .await
            .map_err(|error| format!("Búsqueda interrumpida: {error}"))
    }

    async fn find_version_file(
        &self,
        root: &str,
        query: &VersionFileQuery,
    ) -> Result<Option<VersionFileMatch>, String> {
        let root = native(root);
        let query = query.clone();
        tokio::task::spawn_blocking(move || search_version_file(&root, &query))
            .await
            .map_err(|error| format!("Búsqueda interrumpida: {error}"))?
    }

    async fn run_compilation(
        &self,
        command: &str,
        cwd: &str,
        stdin: Option<&str>,
    ) -> Result<CompileOutput, String> {
        if command.trim().is_empty() {
            return Err("Comando no proporcionado".to_string());
        }
        let mut process = shell_command(command);
        if !cwd.trim().is_empty() {
            process.current_dir(native(cwd));
        }
        process
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        hide_window(&mut process);

        let mut child = process
            .spawn()
            .map_err(|error| format!("No se pudo ejecutar \"{command}\": {error}"))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            if let Err(error) = pipe.write_all(input.as_bytes()).await {
                warn!("No se pudo enviar la entrada al compilador: {error}");
            }
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|error| format!("La compilación falló: {error}"))?;

        let result = CompileOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        if result.code == Some(0) {
            return Ok(result);
        }
        let combined = result.combined();
        Err(if combined.is_empty() {
            format!("El comando terminó con código {:?}", result.code)
        } else {
            combined
        })
    }

    async fn zip_artifacts(&self, request: &ZipRequest) -> Result<String, String> {
        let temp_root = self.temp_root.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || build_zip(&temp_root, &request))
            .await
            .map_err(|error| format!("Compresión interrumpida: {error}"))?
    }

    async fn create_outlook_draft(&self, draft: &OutlookDraft) -> Result<DraftReceipt, String> {
        run_powershell_json::<_, DraftReceipt>(&self.temp_root, draft, DRAFT_SCRIPT)
            .await?
            .ok_or_else(|| "Sin respuesta de Outlook".to_string())
    }

    async fn check_outlook_replies(&self, query: &ReplyQuery) -> Result<Vec<MailReply>, String> {
        let script = REPLIES_SCRIPT.replace("__MAX_REPLIES__", &MAX_REPLIES.to_string());
        let response =
            run_powershell_json::<_, RepliesResponse>(&self.temp_root, query, &script).await?;
        Ok(response.unwrap_or_default().replies)
    }

    async fn start_file_watch(&self, path: &str) -> Option<FileWatch> {
        let target = native(path);
        let file_name = target.file_name()?.to_os_string();
        let dir = target
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            if event
                .paths
                .iter()
                .any(|changed| changed.file_name() == Some(file_name.as_os_str()))
            {
                let _ = tx.send(());
            }
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(error) => {
                warn!("No se pudo vigilar {path}: {error}");
                return None;
            }
        };
        if let Err(error) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            warn!("No se pudo vigilar {}: {error}", display(&dir));
            return None;
        }
        Some(FileWatch::new(rx, Box::new(watcher)))
    }
}
