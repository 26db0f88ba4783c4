//! voxterm CLI — voice assistant daemon and its remote control.
//!
//! ```text
//! voxterm serve [--config voxterm.json] [--listen 127.0.0.1:2004] [--language ru]
//! voxterm process "включи свет" [--target system.shutdown] [--server http://127.0.0.1:2004]
//! voxterm status / modules / conflicts [--debug] [--server ...]
//! voxterm enable <module> / disable <module> / mode <module> <normal|debug|any>
//! voxterm language <ru|en> / say "text" / shutdown [--reload]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::error;

use voxterm_lib::config::AssistantConfig;
use voxterm_lib::voxterm_core::locale::Language;
use voxterm_lib::voxterm_core::types::RunMode;

const DEFAULT_SERVER: &str = "http://127.0.0.1:2004";

/// voxterm — phrase-driven voice assistant
#[derive(Parser)]
#[command(name = "voxterm", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assistant daemon with its HTTP API
    Serve {
        /// JSON config file
        #[arg(long, default_value = "voxterm.json")]
        config: PathBuf,
        /// Listen address
        #[arg(long)]
        listen: Option<String>,
        /// Built-in module language (ru, en)
        #[arg(long)]
        language: Option<Language>,
        /// Kokoro TTS server URL; speech is only logged without it
        #[arg(long)]
        kokoro_url: Option<String>,
        /// TTS voice
        #[arg(long)]
        voice: Option<String>,
        /// TTS playback speed
        #[arg(long)]
        speed: Option<f32>,
        /// Home-automation endpoint for unmatched commands
        #[arg(long)]
        forward_url: Option<String>,
        /// Module override file
        #[arg(long)]
        overrides: Option<PathBuf>,
    },
    /// Send an utterance to the running daemon
    Process {
        text: String,
        /// Module to resume directly
        #[arg(long)]
        target: Option<String>,
        /// Wake-word model that triggered this utterance
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Engine status
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// List modules
    Modules {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Show overlapping trigger phrases
    Conflicts {
        /// Check debug mode instead of normal mode
        #[arg(long)]
        debug: bool,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Enable a module by name or id
    Enable {
        module: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Disable a module by name or id
    Disable {
        module: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Change a module's run mode
    Mode {
        module: String,
        mode: RunMode,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Switch the language of built-in modules
    Language {
        language: Language,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Speak text through the daemon
    Say {
        text: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Drop phrases the daemon has not spoken yet
    Hush {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Stop (or restart) the daemon
    Shutdown {
        #[arg(long)]
        reload: bool,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxterm_lib=debug,voxterm_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Serve {
            config,
            listen,
            language,
            kokoro_url,
            voice,
            speed,
            forward_url,
            overrides,
        } => {
            let load = move || {
                let mut cfg = AssistantConfig::load(&config).map_err(|e| e.to_string())?;
                if let Some(listen) = &listen {
                    cfg.listen = listen.clone();
                }
                if let Some(language) = language {
                    cfg.language = language;
                }
                if kokoro_url.is_some() {
                    cfg.kokoro_url = kokoro_url.clone();
                }
                if let Some(voice) = &voice {
                    cfg.voice = voice.clone();
                }
                if let Some(speed) = speed {
                    cfg.speed = speed;
                }
                if forward_url.is_some() {
                    cfg.forward_url = forward_url.clone();
                }
                if let Some(path) = &overrides {
                    cfg.overrides_path = path.clone();
                }
                cfg.validate().map_err(|e| e.to_string())?;
                Ok(cfg)
            };
            voxterm_lib::daemon::run(load).await
        }

        Command::Process {
            text,
            target,
            model,
            server,
        } => {
            let body = json!({ "text": text, "target": target, "model": model });
            post(&server, "process", body).await
        }
        Command::Status { server } => get(&server, "status").await,
        Command::Modules { server } => get(&server, "modules").await,
        Command::Conflicts { debug, server } => {
            get(&server, &format!("conflicts?debug={debug}")).await
        }
        Command::Enable { module, server } => {
            post(&server, &format!("modules/{module}/enabled"), json!({ "enabled": true })).await
        }
        Command::Disable { module, server } => {
            post(&server, &format!("modules/{module}/enabled"), json!({ "enabled": false })).await
        }
        Command::Mode {
            module,
            mode,
            server,
        } => {
            post(&server, &format!("modules/{module}/mode"), json!({ "mode": mode })).await
        }
        Command::Language { language, server } => {
            post(&server, "language", json!({ "language": language })).await
        }
        Command::Say { text, server } => post(&server, "say", json!({ "text": text })).await,
        Command::Hush { server } => post(&server, "speech/clear", json!({})).await,
        Command::Shutdown { reload, server } => {
            post(&server, "shutdown", json!({ "reload": reload })).await
        }
    }
}

async fn get(server: &str, endpoint: &str) -> Result<(), String> {
    let resp = reqwest::Client::new()
        .get(format!("{server}/{endpoint}"))
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    print_response(resp).await
}

async fn post(server: &str, endpoint: &str, body: Value) -> Result<(), String> {
    let resp = reqwest::Client::new()
        .post(format!("{server}/{endpoint}"))
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    print_response(resp).await
}

async fn print_response(resp: reqwest::Response) -> Result<(), String> {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let pretty = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or(text);
    println!("{pretty}");
    if status.is_success() {
        Ok(())
    } else {
        Err(format!("server answered {status}"))
    }
}
