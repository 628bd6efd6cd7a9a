use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meetbot::audio;
use meetbot::browser::FileCredentialStore;
use meetbot::capabilities::{store_from_config, TranscriptPipeline, WhisperCliTranscriber};
use meetbot::driver::web::PlaywrightFactory;
use meetbot::locator::table::LocatorTable;
use meetbot::platform::{self, Classification};
use meetbot::report::notifier_from_config;
use meetbot::server::{self, AppState};
use meetbot::session::{Collaborators, ConsoleEventListener, SessionController, SessionState};
use meetbot::utils::{config::AppConfig, system};

#[derive(Parser)]
#[command(name = "meetbot")]
#[command(version = "0.1.0")]
#[command(about = "Joins web meetings, records what is said and transcribes it", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join one meeting and record it until it ends (Ctrl+C to leave)
    Join {
        /// Meeting URL (Google Meet, Zoom, Telemost, Kontur Talk, Teams)
        url: String,

        /// Who the session belongs to; one active session per identity
        #[arg(short, long, default_value = "cli")]
        identity: String,

        /// Keep the recording but skip transcription
        #[arg(long, default_value = "false")]
        no_transcribe: bool,
    },

    /// Start the HTTP command surface
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Print which platform a meeting URL belongs to
    Classify { url: String },

    /// Transcribe an existing recording
    Transcribe {
        /// WAV file
        file: PathBuf,

        /// Overrides the configured language
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Check the external tools a session needs
    Doctor,
}

async fn build_controller(config: &AppConfig) -> anyhow::Result<Arc<SessionController>> {
    let locators = LocatorTable::load(config.join.locators_path.as_deref())
        .context("Failed to load locator table")?;
    let audio_sources = audio::default_sources(&config.audio).await;

    Ok(SessionController::new(
        config,
        Collaborators {
            factory: Arc::new(PlaywrightFactory::new(config.browser.clone())),
            credentials: Arc::new(FileCredentialStore::new(
                config.credentials.cookies_path.clone(),
                config.credentials.storage_path.clone(),
            )),
            notifier: notifier_from_config(&config.notification),
            locators: Arc::new(locators),
            audio_sources,
        },
    ))
}

fn build_pipeline(config: &AppConfig, language: Option<&str>) -> Arc<TranscriptPipeline> {
    Arc::new(TranscriptPipeline::new(
        Arc::new(WhisperCliTranscriber::new(&config.transcription)),
        store_from_config(&config.persistence),
        language.unwrap_or(&config.transcription.language),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Join {
            url,
            identity,
            no_transcribe,
        } => {
            let controller = build_controller(&config).await?;
            let listener = tokio::spawn(ConsoleEventListener::listen(controller.subscribe()));

            let session_id = controller.submit(&identity, &url)?;
            println!(
                "{} Session {} for {}",
                "▶".green().bold(),
                session_id.cyan(),
                url
            );
            println!("   Press Ctrl+C to leave the meeting.\n");

            let stopping = Arc::new(AtomicBool::new(false));
            let handler_controller = controller.clone();
            let handler_id = session_id.clone();
            ctrlc::set_handler(move || {
                if stopping.swap(true, Ordering::SeqCst) {
                    eprintln!("\n{} Forced exit", "✗".red());
                    std::process::exit(130);
                }
                println!("\n{} Leaving the meeting...", "⏹".yellow());
                let _ = handler_controller.stop(&handler_id);
            })?;

            let record = controller.wait(&session_id).await?;

            if record.state == SessionState::Done && !no_transcribe {
                println!("\n{} Transcribing...", "✎".cyan());
                let pipeline = build_pipeline(&config, None);
                if let Some(report) = pipeline.process_session(&controller, &session_id).await? {
                    match &report.outcome {
                        Ok(outcome) => println!("\n{}", outcome.render()),
                        Err(e) => eprintln!("{} {}", "Transcription failed:".red(), e.user_message()),
                    }
                    if let Some(location) = &report.location {
                        println!("\n{} {}", "Transcript saved to".green(), location);
                    }
                }
            }

            controller.shutdown().await;
            listener.abort();

            match record.state {
                SessionState::Done => {
                    if let Some(path) = &record.recording_path {
                        println!("{} {}", "Recording:".green(), path.display());
                    }
                }
                _ => {
                    eprintln!(
                        "{} {}",
                        "Session failed:".red().bold(),
                        record.failure_message.as_deref().unwrap_or("unknown error")
                    );
                    std::process::exit(1);
                }
            }
        }
        Commands::Serve { host, port } => {
            let controller = build_controller(&config).await?;
            let pipeline = build_pipeline(&config, None);
            let listener = tokio::spawn(ConsoleEventListener::listen(controller.subscribe()));

            let state = Arc::new(AppState {
                controller: controller.clone(),
                pipeline,
            });
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            server::serve(state, &host, port, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;

            println!("{} Stopping active sessions...", "⏹".yellow());
            controller.shutdown().await;
            listener.abort();
        }
        Commands::Classify { url } => match platform::classify(&url) {
            Classification::Known(kind) => println!("{}", kind.display_name().green()),
            Classification::Unknown => {
                eprintln!("{}", "unknown".red());
                std::process::exit(2);
            }
        },
        Commands::Transcribe { file, language } => {
            if !file.is_file() {
                anyhow::bail!("{} is not a file", file.display());
            }
            let pipeline = build_pipeline(&config, language.as_deref());
            let report = pipeline.process(&file).await;
            match report.outcome {
                Ok(outcome) => println!("{}", outcome.render()),
                Err(e) => {
                    eprintln!("{} {}", "✗".red(), e.user_message());
                    std::process::exit(1);
                }
            }
            if let Some(location) = report.location {
                println!("\n{} {}", "Transcript saved to".green(), location);
            }
        }
        Commands::Doctor => {
            let checks = system::run_checks(&config).await;
            if !system::print_report(&checks) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
