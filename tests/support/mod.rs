#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::future;
use std::sync::Mutex;

use async_trait::async_trait;

use gestor_versiones_lib::core::form::VersionFormData;
use gestor_versiones_lib::core::host::{
    CompileOutput, DraftReceipt, HostApi, MailReply, OutlookDraft, ReplyQuery, VersionFileMatch,
    VersionFileQuery, ZipRequest,
};
use gestor_versiones_lib::core::paths;
use gestor_versiones_lib::core::version_locator::{is_candidate_name, score_version_content};

pub const PROJECT: &str = "C:\\proj";
pub const HEADER: &str = "C:\\proj\\src\\version.h";
pub const OUT_DIR: &str = "C:\\proj\\out";
pub const BIN: &str = "C:\\proj\\out\\fw.bin";
pub const HISTORIAL_ROOT: &str = "D:\\Versiones";
pub const TEMP: &str = "C:\\tmp\\versiones-app";

/// What the fake compiler writes into the binary.
#[derive(Debug, Clone)]
pub enum CompileMode {
    /// Binary content derived from the current header text.
    FromHeader { header: String, bin: String },
    /// Same bytes every time, as with a stale incremental build.
    Constant { bin: String, content: String },
    /// Like `FromHeader`, but call `n` writes `bins[n]` and removes the others,
    /// as when a clean build renames its output.
    Renaming { header: String, bins: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCall {
    pub command: String,
    pub cwd: String,
    pub stdin: Option<String>,
}

#[derive(Debug)]
pub struct FakeState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub compile_mode: CompileMode,
    pub fail_compile_call: Option<usize>,
    pub panic_compile_call: Option<usize>,
    pub hang_compile_call: Option<usize>,
    pub compile_calls: Vec<CompileCall>,
    pub write_counts: BTreeMap<String, usize>,
    pub failing_writes: BTreeMap<String, BTreeSet<usize>>,
    pub zip_fails: bool,
    pub zips: Vec<ZipRequest>,
    pub draft_fails: bool,
    pub drafts: Vec<OutlookDraft>,
    pub replies: Vec<MailReply>,
}

#[derive(Debug)]
pub struct FakeHost {
    pub state: Mutex<FakeState>,
}

fn key(path: &str) -> String {
    path.trim().replace('/', "\\")
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

impl FakeHost {
    pub fn new(compile_mode: CompileMode) -> Self {
        Self {
            state: Mutex::new(FakeState {
                files: BTreeMap::new(),
                dirs: BTreeSet::new(),
                compile_mode,
                fail_compile_call: None,
                panic_compile_call: None,
                hang_compile_call: None,
                compile_calls: Vec::new(),
                write_counts: BTreeMap::new(),
                failing_writes: BTreeMap::new(),
                zip_fails: false,
                zips: Vec::new(),
                draft_fails: false,
                drafts: Vec::new(),
                replies: Vec::new(),
            }),
        }
    }

    /// Project with `src\version.h` and a compiler that bakes the header into
    /// `out\fw.bin`.
    pub fn project(header: &str) -> Self {
        let host = Self::new(CompileMode::FromHeader {
            header: HEADER.to_string(),
            bin: BIN.to_string(),
        });
        host.put(HEADER, header);
        host
    }

    pub fn put(&self, path: &str, content: impl AsRef<[u8]>) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(key(path), content.as_ref().to_vec());
    }

    pub fn text(&self, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(&key(path))
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().files.contains_key(&key(path))
    }

    pub fn md5(&self, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.files.get(&key(path)).map(|bytes| md5_hex(bytes))
    }

    pub fn compile_calls(&self) -> Vec<CompileCall> {
        self.state.lock().unwrap().compile_calls.clone()
    }

    pub fn drafts(&self) -> Vec<OutlookDraft> {
        self.state.lock().unwrap().drafts.clone()
    }

    pub fn set_zip_fails(&self, fails: bool) {
        self.state.lock().unwrap().zip_fails = fails;
    }

    pub fn fail_compile_call(&self, index: usize) {
        self.state.lock().unwrap().fail_compile_call = Some(index);
    }

    pub fn panic_compile_call(&self, index: usize) {
        self.state.lock().unwrap().panic_compile_call = Some(index);
    }

    pub fn hang_compile_call(&self, index: usize) {
        self.state.lock().unwrap().hang_compile_call = Some(index);
    }

    /// Makes the given writes to `path` fail, counting from 0.
    pub fn fail_writes(&self, path: &str, indices: &[usize]) {
        let mut state = self.state.lock().unwrap();
        state
            .failing_writes
            .entry(key(path))
            .or_default()
            .extend(indices.iter().copied());
    }
}

#[async_trait]
impl HostApi for FakeHost {
    async fn file_exists(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.files.contains_key(&key(path)) || state.dirs.contains(&key(path))
    }

    async fn read_text_file(&self, path: &str) -> Result<String, String> {
        self.text(path).ok_or_else(|| format!("ENOENT: {path}"))
    }

    async fn write_text_file(&self, path: &str, content: &str) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        let count = state.write_counts.entry(key(path)).or_insert(0);
        let index = *count;
        *count += 1;
        let fails = state
            .failing_writes
            .get(&key(path))
            .is_some_and(|indices| indices.contains(&index));
        if fails {
            return Err(format!("EBUSY: {path}"));
        }
        state.files.insert(key(path), content.as_bytes().to_vec());
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<(), String> {
        self.state.lock().unwrap().dirs.insert(key(path));
        Ok(())
    }

    async fn copy_file(&self, src: &str, dest: &str) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        let bytes = state
            .files
            .get(&key(src))
            .cloned()
            .ok_or_else(|| format!("ENOENT: {src}"))?;
        state.files.insert(key(dest), bytes);
        Ok(())
    }

    async fn compute_md5(&self, path: &str) -> Option<String> {
        self.md5(path)
    }

    async fn find_files(&self, root: &str, patterns: &[String]) -> Result<Vec<String>, String> {
        let prefix = format!("{}\\", key(root).to_lowercase());
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .keys()
            .filter(|path| path.to_lowercase().starts_with(&prefix))
            .filter(|path| {
                let name = paths::file_name(path).to_lowercase();
                patterns.iter().any(|pattern| {
                    let pattern = pattern.to_lowercase();
                    if pattern.starts_with('.') {
                        name.ends_with(&pattern)
                    } else {
                        name == pattern
                    }
                })
            })
            .cloned()
            .collect())
    }

    async fn find_version_file(
        &self,
        root: &str,
        query: &VersionFileQuery,
    ) -> Result<Option<VersionFileMatch>, String> {
        let prefix = format!("{}\\", key(root).to_lowercase());
        let state = self.state.lock().unwrap();
        let mut best: Option<VersionFileMatch> = None;
        for (path, bytes) in &state.files {
            if !path.to_lowercase().starts_with(&prefix) || !is_candidate_name(paths::file_name(path))
            {
                continue;
            }
            let content = String::from_utf8_lossy(bytes);
            let Some(scored) = score_version_content(&content, query) else {
                continue;
            };
            if best.as_ref().map_or(true, |current| scored.score > current.score) {
                best = Some(VersionFileMatch {
                    path: path.clone(),
                    score: scored.score,
                    reason: scored.reasons.join(" · "),
                });
            }
        }
        Ok(best)
    }

    async fn run_compilation(
        &self,
        command: &str,
        cwd: &str,
        stdin: Option<&str>,
    ) -> Result<CompileOutput, String> {
        let (index, panics, hangs) = {
            let mut state = self.state.lock().unwrap();
            let index = state.compile_calls.len();
            state.compile_calls.push(CompileCall {
                command: command.to_string(),
                cwd: cwd.to_string(),
                stdin: stdin.map(str::to_string),
            });
            (
                index,
                state.panic_compile_call == Some(index),
                state.hang_compile_call == Some(index),
            )
        };
        if panics {
            panic!("el compilador se cerró inesperadamente");
        }
        if hangs {
            future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_compile_call == Some(index) {
            return Err("error: undefined reference to `main'".to_string());
        }
        let header_text = |state: &FakeState, header: &str| {
            state
                .files
                .get(&key(header))
                .map(|bytes| String::from_utf8_lossy(bytes).to_string())
                .unwrap_or_default()
        };
        let (bin, content) = match state.compile_mode.clone() {
            CompileMode::FromHeader { header, bin } => {
                (bin, format!("FIRMWARE\n{}", header_text(&*state, &header)))
            }
            CompileMode::Constant { bin, content } => (bin, content),
            CompileMode::Renaming { header, bins } => {
                let bin = bins[index.min(bins.len() - 1)].clone();
                for other in bins.iter().filter(|other| **other != bin) {
                    state.files.remove(&key(other));
                }
                (bin, format!("FIRMWARE\n{}", header_text(&*state, &header)))
            }
        };
        state.files.insert(key(&bin), content.into_bytes());
        Ok(CompileOutput {
            code: Some(0),
            stdout: "ok".to_string(),
            stderr: String::new(),
        })
    }

    async fn zip_artifacts(&self, request: &ZipRequest) -> Result<String, String> {
        let mut state = self.state.lock().unwrap();
        if state.zip_fails {
            return Err("zip: acceso denegado".to_string());
        }
        state.zips.push(request.clone());
        let name = request
            .zip_name
            .clone()
            .unwrap_or_else(|| "artefactos.zip".to_string());
        let path = paths::join(TEMP, &name);
        state.files.insert(key(&path), b"PK".to_vec());
        Ok(path)
    }

    async fn create_outlook_draft(&self, draft: &OutlookDraft) -> Result<DraftReceipt, String> {
        let mut state = self.state.lock().unwrap();
        if state.draft_fails {
            return Err("Outlook no disponible".to_string());
        }
        state.drafts.push(draft.clone());
        Ok(DraftReceipt {
            subject: draft.subject.clone(),
            sent: draft.send,
            entry_id: Some(format!("entry-{}", state.drafts.len())),
            attached_count: draft.attachments.len(),
        })
    }

    async fn check_outlook_replies(&self, query: &ReplyQuery) -> Result<Vec<MailReply>, String> {
        let state = self.state.lock().unwrap();
        Ok(state
            .replies
            .iter()
            .filter(|reply| reply.subject.contains(&query.subject_keyword))
            .cloned()
            .collect())
    }
}

/// Complete dual-build form pointing at the fake project.
pub fn dual_form() -> VersionFormData {
    VersionFormData {
        cliente: "X".to_string(),
        terminal: "T".to_string(),
        nombre_version_cliente: "V".to_string(),
        version_base: "1.0.0".to_string(),
        version_aumento: "1.1.0".to_string(),
        build: "240101".to_string(),
        incluir_version_aumento: true,
        ruta_proyecto: PROJECT.to_string(),
        ruta_compilacion: OUT_DIR.to_string(),
        nombre_archivo_bin: "fw.bin".to_string(),
        archivo_version: "src\\version.h".to_string(),
        comando_compilacion: "make all".to_string(),
        ..VersionFormData::default()
    }
}

/// BASE only, using the binary already on disk.
pub fn manual_form() -> VersionFormData {
    VersionFormData {
        incluir_version_aumento: false,
        version_aumento: String::new(),
        comando_compilacion: String::new(),
        ..dual_form()
    }
}
