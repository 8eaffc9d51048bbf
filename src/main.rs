use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::{mpsc, oneshot};

use gestor_versiones_lib::core::config::{
    config_dir, load_config, load_form_preferences, save_form_preferences, AppConfig,
    FormPreferences,
};
use gestor_versiones_lib::core::email::build_email;
use gestor_versiones_lib::core::file_watch::WaitOutcome;
use gestor_versiones_lib::core::form::{today_build, validate_form};
use gestor_versiones_lib::core::local_host::LocalHost;
use gestor_versiones_lib::core::reconcile::{ProgressStep, RunReport};
use gestor_versiones_lib::core::reply_monitor::ReplyMonitor;
use gestor_versiones_lib::core::{
    FlowError, FlowGate, ReconciliationRun, RunOptions, RunOutcome, VersionFormData,
};

#[derive(Parser, Debug)]
#[command(name = "gestor-versiones", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compila BASE (y AUMENTO), guarda el historial y deja el correo en borrador.
    Crear {
        /// JSON con los datos de la versión.
        #[arg(long)]
        form: PathBuf,

        /// Solo BASE, sin ciclo de AUMENTO.
        #[arg(long)]
        sin_aumento: bool,

        /// Usa el binario existente sin compilar BASE.
        #[arg(long)]
        sin_compilar: bool,

        /// Carpeta raíz del historial (por defecto la configurada).
        #[arg(long)]
        historial: Option<String>,

        /// Destinatario del borrador.
        #[arg(long)]
        para: Option<String>,
    },
    /// Revisa el formulario sin tocar el proyecto.
    Validar {
        #[arg(long)]
        form: PathBuf,
    },
    /// Muestra asunto y cuerpo del correo de solicitud de firma.
    Correo {
        #[arg(long)]
        form: PathBuf,

        #[arg(long)]
        md5_aumento: Option<String>,

        #[arg(long)]
        carpeta: Option<String>,
    },
    /// Busca respuestas de aprobación en Outlook.
    Respuestas {
        #[arg(long)]
        asunto: String,

        /// Sigue revisando hasta encontrar una aprobación.
        #[arg(long)]
        esperar: bool,
    },
}

fn read_form(path: &PathBuf) -> Result<VersionFormData, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|error| format!("No se pudo leer {}: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("Formulario inválido {}: {error}", path.display()))
}

fn print_flow_error(error: &FlowError) {
    let dialog = error.dialog();
    eprintln!("{}\n{}", dialog.title, dialog.message);
}

async fn confirm(prompt: &str) -> bool {
    println!("{prompt}");
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).is_ok()
    })
    .await
    .unwrap_or(false)
}

fn print_report(report: &RunReport) {
    println!("Checksum BASE: {}", report.checksum_base);
    if let Some(aumento) = &report.checksum_aumento {
        println!("Checksum AUMENTO: {aumento}");
    }
    if let Some(folder) = &report.historial_folder {
        println!("Historial: {folder}");
    }
    if let Some(zip) = &report.historial_zip {
        println!("Zip: {zip}");
    }
    println!(
        "Borrador \"{}\" con {} adjunto(s)",
        report.subject,
        report.attachments.len()
    );
}

async fn drive_run(run: &mut ReconciliationRun<'_>) -> Result<RunReport, FlowError> {
    let mut outcome = run.run().await?;
    loop {
        match outcome {
            RunOutcome::Completed(report) => return Ok(report),
            RunOutcome::ChecksumCollision(notice) => {
                eprintln!("{}\n{}", notice.title, notice.message);
                println!("Esperando cambios en {}...", notice.binary_path);
                let (_cancel_tx, cancel_rx) = oneshot::channel();
                match run.wait_for_manual_compile(cancel_rx).await? {
                    WaitOutcome::Changed(md5) => info!("Nuevo checksum detectado: {md5}"),
                    WaitOutcome::Cancelled => {
                        return Err(FlowError::InvalidState(
                            "Espera de compilación cancelada.".to_string(),
                        ))
                    }
                }
                if !confirm("Binario actualizado. Presiona Enter para finalizar.").await {
                    return Err(FlowError::InvalidState(
                        "No se confirmó la finalización.".to_string(),
                    ));
                }
                outcome = run.resume_after_manual_compile().await?;
            }
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
async fn interrupted() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("No se pudo escuchar Ctrl-C: {error}");
        std::future::pending::<()>().await;
    }
}

async fn crear(
    config: &AppConfig,
    mut form: VersionFormData,
    historial: Option<String>,
    para: Option<String>,
) -> Result<RunReport, FlowError> {
    let dir = config_dir();
    load_form_preferences(&dir).apply(&mut form);
    if form.build.trim().is_empty() {
        form.build = today_build();
    }
    let validation = validate_form(&form);
    if !validation.ok {
        return Err(FlowError::MissingInput(validation.errors.join("\n")));
    }
    if let Err(error) = save_form_preferences(&dir, &FormPreferences::capture(&form)) {
        warn!("{error}");
    }

    let host = LocalHost::new();
    let options = RunOptions {
        historial_root: historial.unwrap_or_else(|| config.versiones_root()),
        mail_to: para.or_else(|| config.mail_to.clone()),
        poll_interval: config.poll_interval(),
    };
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressStep>();
    let printer = tokio::spawn(async move {
        while let Some(step) = rx.recv().await {
            println!("- {}", step.message);
        }
    });

    let gate = FlowGate::new();
    let mut run = ReconciliationRun::new(&host, form, options).with_progress(tx);
    let result = gate
        .guard(async {
            let finished = tokio::select! {
                result = drive_run(&mut run) => Some(result),
                () = interrupted() => None,
            };
            match finished {
                Some(result) => result,
                None => {
                    warn!("Interrupción recibida, restaurando versión BASE");
                    Err(run.abort().await)
                }
            }
        })
        .await;
    drop(run);
    let _ = printer.await;
    result
}

async fn respuestas(config: &AppConfig, asunto: String, esperar: bool) -> Result<(), String> {
    let host = LocalHost::new();
    let monitor = ReplyMonitor::new(&host, asunto)
        .with_interval(config.reply_poll_interval())
        .with_lookback(config.reply_lookback_minutes());
    if esperar {
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        if let Some(reply) = monitor.run(cancel_rx).await {
            println!("Aprobada: {} ({})", reply.subject, reply.from.unwrap_or_default());
        }
        return Ok(());
    }
    match monitor.check_once().await? {
        Some(reply) => println!("Aprobada: {} ({})", reply.subject, reply.from.unwrap_or_default()),
        None => println!("Sin aprobación todavía"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(&config_dir());

    match cli.command {
        Command::Crear {
            form,
            sin_aumento,
            sin_compilar,
            historial,
            para,
        } => {
            let mut data = match read_form(&form) {
                Ok(data) => data,
                Err(error) => {
                    eprintln!("{error}");
                    return ExitCode::FAILURE;
                }
            };
            if sin_aumento {
                data.incluir_version_aumento = false;
            }
            if sin_compilar {
                data.comando_compilacion.clear();
            }
            match crear(&config, data, historial, para).await {
                Ok(report) => {
                    print_report(&report);
                    ExitCode::SUCCESS
                }
                Err(error) => {
                    print_flow_error(&error);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Validar { form } => {
            let data = match read_form(&form) {
                Ok(data) => data,
                Err(error) => {
                    eprintln!("{error}");
                    return ExitCode::FAILURE;
                }
            };
            let validation = validate_form(&data);
            for error in &validation.errors {
                eprintln!("{error}");
            }
            if validation.ok {
                println!("Formulario válido");
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Correo {
            form,
            md5_aumento,
            carpeta,
        } => match read_form(&form) {
            Ok(data) => {
                let email = build_email(&data, md5_aumento.as_deref(), carpeta.as_deref());
                println!("{}\n\n{}", email.subject, email.body);
                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("{error}");
                ExitCode::FAILURE
            }
        },
        Command::Respuestas { asunto, esperar } => match respuestas(&config, asunto, esperar).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                eprintln!("{error}");
                ExitCode::FAILURE
            }
        },
    }
}
