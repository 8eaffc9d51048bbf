use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::core::bin_scorer::{select_best, ScoreContext};
use crate::core::email::build_email;
use crate::core::errors::{BuildStage, FlowError};
use crate::core::file_watch::{self, WaitOutcome};
use crate::core::form::{check_flow_inputs, VersionFormData};
use crate::core::historial::{historial_folder_name, HistorialArchiver, Slot};
use crate::core::host::{DraftReceipt, HostApi, OutlookDraft, VersionFileQuery};
use crate::core::paths;
use crate::core::tokens::build_token_context;
use crate::core::version_patcher::update_version;

static COMPILE_PY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)compile\.py").expect("regex compile.py"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconcileState {
    Idle,
    LocatingVersionFile,
    CompilingBase,
    ChecksumBase,
    PatchingToAumento,
    CompilingAumento,
    ChecksumAumento,
    ValidatingDivergence,
    RestoringBase,
    Archiving,
    EmailDrafting,
    Done,
    ChecksumCollision,
    WaitingManualCompile,
    Error,
}

impl ReconcileState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Listo",
            Self::LocatingVersionFile => "Buscando archivo de versión...",
            Self::CompilingBase => "Compilando versión BASE...",
            Self::ChecksumBase => "Calculando checksum BASE...",
            Self::PatchingToAumento => "Actualizando archivo de versión a AUMENTO...",
            Self::CompilingAumento => "Compilando versión AUMENTO...",
            Self::ChecksumAumento => "Calculando checksum AUMENTO...",
            Self::ValidatingDivergence => "Validando checksums...",
            Self::RestoringBase => "Restaurando versión BASE...",
            Self::Archiving => "Guardando historial...",
            Self::EmailDrafting => "Creando borrador de correo...",
            Self::Done => "Versión creada",
            Self::ChecksumCollision => "Checksums BASE y AUMENTO iguales",
            Self::WaitingManualCompile => "Esperando compilación manual de AUMENTO...",
            Self::Error => "Error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStep {
    pub state: ReconcileState,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub historial_root: String,
    pub mail_to: Option<String>,
    pub poll_interval: Duration,
}

impl RunOptions {
    pub fn new(historial_root: impl Into<String>) -> Self {
        Self {
            historial_root: historial_root.into(),
            mail_to: None,
            poll_interval: file_watch::DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub form: VersionFormData,
    pub checksum_base: String,
    pub checksum_aumento: Option<String>,
    pub version_file: Option<String>,
    pub historial_folder: Option<String>,
    pub historial_zip: Option<String>,
    pub subject: String,
    pub attachments: Vec<String>,
    pub draft: DraftReceipt,
    pub progress: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionNotice {
    pub title: String,
    pub message: String,
    pub binary_path: String,
    pub last_known_md5: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum RunOutcome {
    Completed(RunReport),
    ChecksumCollision(CollisionNotice),
}

pub struct ReconciliationRun<'a> {
    host: &'a dyn HostApi,
    options: RunOptions,
    form: VersionFormData,
    state: ReconcileState,
    compile_dir: String,
    version_file: Option<String>,
    original_version_content: Option<String>,
    historial_folder: Option<String>,
    historial_zip: Option<String>,
    checksum_base: Option<String>,
    checksum_aumento: Option<String>,
    bin_path: Option<String>,
    base_slot: Option<String>,
    aumento_slot: Option<String>,
    progress: Vec<String>,
    progress_tx: Option<mpsc::UnboundedSender<ProgressStep>>,
}

impl<'a> ReconciliationRun<'a> {
    pub fn new(host: &'a dyn HostApi, form: VersionFormData, options: RunOptions) -> Self {
        let compile_dir = form.build_dir().to_string();
        Self {
            host,
            options,
            form,
            state: ReconcileState::Idle,
            compile_dir,
            version_file: None,
            original_version_content: None,
            historial_folder: None,
            historial_zip: None,
            checksum_base: None,
            checksum_aumento: None,
            bin_path: None,
            base_slot: None,
            aumento_slot: None,
            progress: Vec::new(),
            progress_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressStep>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }

    pub fn form(&self) -> &VersionFormData {
        &self.form
    }

    pub fn progress(&self) -> &[String] {
        &self.progress
    }

    pub fn checksum_base(&self) -> Option<&str> {
        self.checksum_base.as_deref()
    }

    pub fn checksum_aumento(&self) -> Option<&str> {
        self.checksum_aumento.as_deref()
    }

    pub fn historial_folder(&self) -> Option<&str> {
        self.historial_folder.as_deref()
    }

    fn enter(&mut self, state: ReconcileState) {
        self.state = state;
        let message = state.label().to_string();
        info!("{message}");
        self.progress.push(message.clone());
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(ProgressStep { state, message });
        }
    }

    pub async fn run(&mut self) -> Result<RunOutcome, FlowError> {
        if self.state != ReconcileState::Idle {
            return Err(FlowError::InvalidState(
                "Esta ejecución ya fue iniciada.".to_string(),
            ));
        }
        let result = AssertUnwindSafe(self.drive()).catch_unwind().await;
        self.settle(unwound(result)).await
    }

    pub async fn resume_after_manual_compile(&mut self) -> Result<RunOutcome, FlowError> {
        if self.state != ReconcileState::WaitingManualCompile {
            return Err(FlowError::InvalidState(
                "No hay una compilación manual de AUMENTO pendiente.".to_string(),
            ));
        }
        let result = AssertUnwindSafe(self.from_aumento_checksum())
            .catch_unwind()
            .await;
        self.settle(unwound(result)).await
    }

    /// Stops the run after an interrupt, putting the header back first.
    pub async fn abort(&mut self) -> FlowError {
        if self.state.is_terminal() {
            return FlowError::Interrupted;
        }
        self.fail(FlowError::Interrupted).await
    }

    /// Blocks until the binary no longer hashes like BASE, or `cancel` fires.
    pub async fn wait_for_manual_compile(
        &self,
        cancel: oneshot::Receiver<()>,
    ) -> Result<WaitOutcome, FlowError> {
        let (Some(path), Some(base)) = (self.bin_path.as_deref(), self.checksum_base.as_deref())
        else {
            return Err(FlowError::InvalidState(
                "No hay una compilación manual de AUMENTO pendiente.".to_string(),
            ));
        };
        if self.state != ReconcileState::WaitingManualCompile {
            return Err(FlowError::InvalidState(
                "No hay una compilación manual de AUMENTO pendiente.".to_string(),
            ));
        }
        Ok(file_watch::wait_for_binary_change(
            self.host,
            path,
            base,
            self.options.poll_interval,
            cancel,
        )
        .await)
    }

    async fn settle(
        &mut self,
        result: Result<RunOutcome, FlowError>,
    ) -> Result<RunOutcome, FlowError> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(flow_error) => Err(self.fail(flow_error).await),
        }
    }

    async fn fail(&mut self, flow_error: FlowError) -> FlowError {
        self.restore_base().await;
        self.enter(ReconcileState::Error);
        error!("{}: {}", flow_error.title(), flow_error.message());
        flow_error
    }

    async fn drive(&mut self) -> Result<RunOutcome, FlowError> {
        check_flow_inputs(&self.form).map_err(FlowError::MissingInput)?;
        let with_aumento = self.form.incluir_version_aumento;

        if with_aumento {
            self.enter(ReconcileState::LocatingVersionFile);
            let path = self.locate_version_file().await?;
            let content = self.host.read_text_file(&path).await.map_err(|reason| {
                FlowError::VersionFileUnreadable {
                    path: path.clone(),
                    reason,
                }
            })?;
            info!("Archivo de versión: {path}");
            self.version_file = Some(path);
            self.original_version_content = Some(content);
        }

        if self.form.wants_compilation() {
            self.enter(ReconcileState::CompilingBase);
            self.compile(BuildStage::Base).await?;
        }

        self.enter(ReconcileState::ChecksumBase);
        let (bin_path, md5) = self.checksum(BuildStage::Base).await?;
        info!("Checksum BASE {md5} ({bin_path})");
        self.form.checksum_base = md5.clone();
        self.checksum_base = Some(md5);
        self.bin_path = Some(bin_path.clone());
        self.archive_base_binary(&bin_path).await;

        if !with_aumento {
            return self.finish().await;
        }

        self.enter(ReconcileState::PatchingToAumento);
        self.patch_to_aumento().await?;

        self.enter(ReconcileState::CompilingAumento);
        self.compile(BuildStage::Aumento).await?;

        self.from_aumento_checksum().await
    }

    async fn from_aumento_checksum(&mut self) -> Result<RunOutcome, FlowError> {
        self.enter(ReconcileState::ChecksumAumento);
        let (bin_path, md5) = self.checksum(BuildStage::Aumento).await?;
        info!("Checksum AUMENTO {md5} ({bin_path})");
        self.bin_path = Some(bin_path.clone());

        self.enter(ReconcileState::ValidatingDivergence);
        let base = self.checksum_base.clone().unwrap_or_default();
        if md5.eq_ignore_ascii_case(&base) {
            self.checksum_aumento = None;
            self.form.checksum_aumento.clear();
            self.restore_base().await;
            self.enter(ReconcileState::ChecksumCollision);
            warn!("Checksum AUMENTO igual a BASE ({md5}), se requiere recompilar");
            let notice = CollisionNotice {
                title: "Checksums idénticos".to_string(),
                message: format!(
                    "El binario AUMENTO tiene el mismo checksum que BASE ({md5}). \
                     Limpia el proyecto (clean), vuelve a compilar la versión AUMENTO \
                     manualmente y luego finaliza."
                ),
                binary_path: bin_path,
                last_known_md5: base,
            };
            self.enter(ReconcileState::WaitingManualCompile);
            return Ok(RunOutcome::ChecksumCollision(notice));
        }

        self.form.checksum_aumento = md5.clone();
        self.checksum_aumento = Some(md5);
        self.restore_base().await;
        self.finish().await
    }

    async fn locate_version_file(&self) -> Result<String, FlowError> {
        let project_root = self.form.project_root().to_string();
        let specified = self.form.archivo_version.trim();

        if !specified.is_empty() {
            let direct = if paths::is_absolute(specified) {
                specified.to_string()
            } else {
                paths::join(&project_root, specified)
            };
            if self.host.file_exists(&direct).await {
                return Ok(direct);
            }
            let name = paths::file_name(specified).to_string();
            match self.host.find_files(&project_root, &[name]).await {
                Ok(matches) => {
                    for candidate in matches {
                        if self.host.file_exists(&candidate).await {
                            return Ok(candidate);
                        }
                    }
                }
                Err(error) => warn!("Búsqueda de {specified} falló: {error}"),
            }
        }

        let hint = self
            .form
            .header_hint
            .as_deref()
            .map(str::trim)
            .filter(|hint| !hint.is_empty());
        if let Some(hint) = hint {
            if self.host.file_exists(hint).await {
                return Ok(hint.to_string());
            }
        }

        let query = VersionFileQuery {
            hint_file: (!specified.is_empty()).then(|| paths::file_name(specified).to_string()),
            version_base: Some(self.form.version_base.trim().to_string()),
            nombre_version_cliente: Some(self.form.nombre_version_cliente.trim().to_string())
                .filter(|name| !name.is_empty()),
        };
        match self.host.find_version_file(&project_root, &query).await {
            Ok(Some(found)) => {
                if self.host.file_exists(&found.path).await {
                    debug!(
                        "Archivo de versión detectado {} (puntaje {}: {})",
                        found.path, found.score, found.reason
                    );
                    return Ok(found.path);
                }
            }
            Ok(None) => {}
            Err(error) => warn!("Búsqueda heurística del archivo de versión falló: {error}"),
        }

        Err(FlowError::VersionFileNotFound {
            project_root,
            specified: if specified.is_empty() {
                "(sin indicar)".to_string()
            } else {
                specified.to_string()
            },
            hint: hint.unwrap_or("(sin pista)").to_string(),
        })
    }

    async fn compile(&self, stage: BuildStage) -> Result<(), FlowError> {
        let command = self.form.comando_compilacion.trim();
        let stdin = COMPILE_PY.is_match(command).then(|| {
            format!(
                "{}\n{}\n",
                self.form.compile_py_mode.trim(),
                self.form.compile_py_target.trim()
            )
        });
        debug!("Compilando {} en {}: {command}", stage.label(), self.compile_dir);
        let output = self
            .host
            .run_compilation(command, &self.compile_dir, stdin.as_deref())
            .await
            .map_err(|output| FlowError::CompileFailed { stage, output })?;
        debug!("Compilación {} terminada: {}", stage.label(), output.combined());
        Ok(())
    }

    /// MD5 of `<rutaCompilacion>\<bin>`. When missing, the project tree is
    /// searched and the best scored candidate replaces the form paths.
    async fn checksum(&mut self, stage: BuildStage) -> Result<(String, String), FlowError> {
        let bin_name = self.form.nombre_archivo_bin.trim().to_string();
        let direct = paths::join(self.form.build_dir(), &bin_name);
        let mut tried = vec![direct.clone()];
        if let Some(md5) = self.host.compute_md5(&direct).await {
            return Ok((direct, md5));
        }

        if let Some(found) = self.discover_binary(&bin_name).await {
            if !tried.contains(&found) {
                tried.push(found.clone());
            }
            if let Some(md5) = self.host.compute_md5(&found).await {
                let dir = paths::parent(&found).unwrap_or_default().to_string();
                info!("Binario detectado automáticamente: {found}");
                self.form.ruta_compilacion = dir;
                self.form.nombre_archivo_bin = paths::file_name(&found).to_string();
                return Ok((found, md5));
            }
        }

        Err(FlowError::BinaryNotFound {
            stage,
            bin_name,
            tried,
        })
    }

    async fn discover_binary(&self, bin_name: &str) -> Option<String> {
        let root = self.form.project_root();
        let mut patterns = vec![bin_name.to_string()];
        let mut candidates = self.search(root, &patterns).await;
        if candidates.is_empty() {
            if let Some((_, extension)) = bin_name.rsplit_once('.') {
                patterns = vec![format!(".{extension}")];
                candidates = self.search(root, &patterns).await;
            }
        }
        if candidates.is_empty() {
            return None;
        }

        let tokens = build_token_context(&[
            self.form.cliente.as_str(),
            self.form.terminal.as_str(),
            self.form.nombre_version_cliente.as_str(),
            self.form.version_base.as_str(),
            self.form.version_aumento.as_str(),
        ]);
        let preferred_dir = Some(self.form.ruta_compilacion.trim()).filter(|dir| !dir.is_empty());
        let context = ScoreContext {
            tokens,
            preferred_dir,
            project_root: Some(root),
            current_bin_name: Some(bin_name),
        };
        let best = select_best(&candidates, &context)?;
        debug!(
            "Mejor candidato {} ({:.1}): {}",
            best.path,
            best.score,
            best.reasons.join(", ")
        );
        Some(best.path)
    }

    async fn search(&self, root: &str, patterns: &[String]) -> Vec<String> {
        match self.host.find_files(root, patterns).await {
            Ok(found) => found,
            Err(error) => {
                warn!("Búsqueda de binarios en {root} falló: {error}");
                Vec::new()
            }
        }
    }

    async fn patch_to_aumento(&self) -> Result<(), FlowError> {
        let (Some(path), Some(original)) = (
            self.version_file.as_deref(),
            self.original_version_content.as_deref(),
        ) else {
            return Err(FlowError::InvalidState(
                "No se cargó el archivo de versión.".to_string(),
            ));
        };
        let patch = update_version(original, self.form.version_aumento.trim());
        if !patch.updated {
            return Err(FlowError::VersionPatternNotFound {
                path: path.to_string(),
            });
        }
        self.host
            .write_text_file(path, &patch.content)
            .await
            .map_err(|reason| FlowError::VersionFileWrite {
                path: path.to_string(),
                reason,
            })
    }

    /// Puts the captured header back. Never fails the run.
    async fn restore_base(&mut self) {
        let (Some(path), Some(original)) = (
            self.version_file.clone(),
            self.original_version_content.clone(),
        ) else {
            return;
        };
        if matches!(self.host.read_text_file(&path).await, Ok(current) if current == original) {
            return;
        }
        self.enter(ReconcileState::RestoringBase);
        let Err(error) = self.host.write_text_file(&path, &original).await else {
            return;
        };
        warn!("No se pudo restaurar {path}, se reintenta con la versión BASE: {error}");

        let current = self
            .host
            .read_text_file(&path)
            .await
            .unwrap_or_else(|_| original.clone());
        let patch = update_version(&current, self.form.version_base.trim());
        if !patch.updated {
            warn!("No se encontró patrón de versión al restaurar {path}");
            return;
        }
        if let Err(error) = self.host.write_text_file(&path, &patch.content).await {
            warn!("No se pudo restaurar la versión BASE en {path}: {error}");
        }
    }

    async fn ensure_historial(&mut self) -> Option<String> {
        if let Some(folder) = &self.historial_folder {
            return Some(folder.clone());
        }
        let archiver = HistorialArchiver::new(self.host, self.options.historial_root.clone());
        match archiver.ensure_folder(&historial_folder_name(&self.form)).await {
            Ok(folder) => {
                self.historial_folder = Some(folder.clone());
                Some(folder)
            }
            Err(error) => {
                warn!("{error}");
                None
            }
        }
    }

    async fn archive_base_binary(&mut self, bin_path: &str) {
        let Some(folder) = self.ensure_historial().await else {
            return;
        };
        let archiver = HistorialArchiver::new(self.host, self.options.historial_root.clone());
        let bin_name = self.form.nombre_archivo_bin.trim().to_string();
        match archiver
            .store_binary(&folder, Slot::Base, bin_path, &bin_name)
            .await
        {
            Ok(slot) => self.base_slot = Some(slot),
            Err(error) => warn!("{error}"),
        }
        if let Err(error) = archiver
            .write_checksums(&folder, self.checksum_base.as_deref(), None)
            .await
        {
            warn!("{error}");
        }
    }

    async fn archive(&mut self) {
        let Some(folder) = self.ensure_historial().await else {
            return;
        };
        let archiver = HistorialArchiver::new(self.host, self.options.historial_root.clone());
        let bin_name = self.form.nombre_archivo_bin.trim().to_string();

        if let (Some(_), Some(bin_path)) = (&self.checksum_aumento, &self.bin_path) {
            match archiver
                .store_binary(&folder, Slot::Aumento, bin_path, &bin_name)
                .await
            {
                Ok(slot) => self.aumento_slot = Some(slot),
                Err(error) => warn!("{error}"),
            }
        }
        if let Err(error) = archiver
            .write_checksums(
                &folder,
                self.checksum_base.as_deref(),
                self.checksum_aumento.as_deref(),
            )
            .await
        {
            warn!("{error}");
        }
        if let Err(error) = archiver
            .write_release_notes(
                &folder,
                &self.form,
                self.checksum_base.as_deref(),
                self.checksum_aumento.as_deref(),
            )
            .await
        {
            warn!("{error}");
        }
        let subfolder = Some(self.form.cliente.trim()).filter(|client| !client.is_empty());
        self.historial_zip = archiver.zip(&folder, subfolder).await;
    }

    async fn attachments(&self) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(zip) = &self.historial_zip {
            candidates.push(zip.clone());
        }
        candidates.extend(self.base_slot.clone());
        if self.checksum_aumento.is_some() {
            candidates.extend(self.aumento_slot.clone());
        }

        let mut attachments = Vec::new();
        for path in candidates {
            if self.host.file_exists(&path).await {
                attachments.push(path);
            } else {
                debug!("Adjunto omitido, no existe: {path}");
            }
        }
        attachments
    }

    async fn finish(&mut self) -> Result<RunOutcome, FlowError> {
        self.enter(ReconcileState::Archiving);
        self.archive().await;

        self.enter(ReconcileState::EmailDrafting);
        let email = build_email(
            &self.form,
            self.checksum_aumento.as_deref(),
            self.historial_folder.as_deref(),
        );
        let attachments = self.attachments().await;
        let draft = OutlookDraft {
            subject: email.subject.clone(),
            body: email.body,
            to: self.options.mail_to.clone(),
            send: false,
            save_to_sent: false,
            attachments: attachments.clone(),
        };
        let receipt = self
            .host
            .create_outlook_draft(&draft)
            .await
            .map_err(FlowError::DraftFailed)?;
        self.form.outlook_subject = email.subject.clone();

        self.enter(ReconcileState::Done);
        Ok(RunOutcome::Completed(RunReport {
            form: self.form.clone(),
            checksum_base: self.checksum_base.clone().unwrap_or_default(),
            checksum_aumento: self.checksum_aumento.clone(),
            version_file: self.version_file.clone(),
            historial_folder: self.historial_folder.clone(),
            historial_zip: self.historial_zip.clone(),
            subject: email.subject,
            attachments,
            draft: receipt,
            progress: self.progress.clone(),
        }))
    }
}

/// Single-flight guard against a second submit while a run is in flight.
#[derive(Debug, Default)]
pub struct FlowGate {
    busy: AtomicBool,
}

pub struct FlowTicket<'g> {
    gate: &'g FlowGate,
}

impl Drop for FlowTicket<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

impl FlowGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn try_enter(&self) -> Result<FlowTicket<'_>, FlowError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FlowError::AlreadyRunning)?;
        Ok(FlowTicket { gate: self })
    }

    /// Runs `flow` holding the gate. A panic inside it becomes
    /// [`FlowError::Unexpected`] and the gate is released either way.
    pub async fn guard<F, T>(&self, flow: F) -> Result<T, FlowError>
    where
        F: Future<Output = Result<T, FlowError>>,
    {
        let _ticket = self.try_enter()?;
        match AssertUnwindSafe(flow).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Pánico durante la creación de versión: {message}");
                Err(FlowError::Unexpected(message))
            }
        }
    }
}

fn unwound(
    result: Result<Result<RunOutcome, FlowError>, Box<dyn Any + Send>>,
) -> Result<RunOutcome, FlowError> {
    result.unwrap_or_else(|panic| Err(FlowError::Unexpected(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "pánico sin mensaje".to_string()
}
