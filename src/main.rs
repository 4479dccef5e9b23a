//! voice-mcp - voice interaction MCP server
//!
//! Run with `voice-mcp` or `voice-mcp serve` to serve MCP on stdio.
//! Use `voice-mcp test --tts` or `voice-mcp test --stt` to try the engines.
//! Use `voice-mcp config` to print the resolved configuration.

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voice_mcp::cli::{Cli, Commands};
use voice_mcp::config::{self, Config};
use voice_mcp::server::VoiceServer;
use voice_mcp::transcribe::recognizer::WhisperRecognizer;
use voice_mcp::transcribe::{ListenObserver, ListenRequest, SpeechRecognizer};
use voice_mcp::tts::{CommandSynthesizer, SpeakOptions, SpeechSynthesizer};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(hotkey) = cli.hotkey.clone() {
        config.hotkey.name = hotkey;
    }
    if let Some(model) = cli.model.clone() {
        config.stt.model = model;
    }

    let command = cli.command.unwrap_or(Commands::Serve {
        log_level: None,
        debug: false,
        no_hotkey: false,
    });

    // Logs go to stderr: stdout carries the JSON-RPC stream
    let log_level = match &command {
        _ if cli.quiet => "error".to_string(),
        _ if cli.verbose == 1 => "debug".to_string(),
        _ if cli.verbose > 1 => "trace".to_string(),
        Commands::Serve { debug: true, .. } => "debug".to_string(),
        Commands::Serve {
            log_level: Some(level),
            ..
        } => level.to_lowercase(),
        _ => config.log_level.clone(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voice_mcp={},warn", log_level))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let config_path = cli.config.clone();
    let result = runtime.block_on(async move {
        match command {
            Commands::Serve { no_hotkey, .. } => {
                VoiceServer::new(config).run(!no_hotkey).await?;
            }
            Commands::Test { tts, stt, text } => {
                run_engine_test(&config, tts, stt, &text).await?;
            }
            Commands::Config => show_config(&config, config_path.as_deref())?,
            Commands::Version => {
                println!("voice-mcp {}", env!("CARGO_PKG_VERSION"));
            }
        }
        anyhow::Ok(())
    });

    // A blocking stdin read cannot be cancelled; do not wait on it forever
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

struct PrintPartial;

impl ListenObserver for PrintPartial {
    fn on_capture_finished(&self) {
        eprintln!("Transcribing...");
    }
}

/// Exercise the engines directly, without an MCP client
async fn run_engine_test(config: &Config, tts: bool, stt: bool, text: &str) -> anyhow::Result<()> {
    let (tts, stt) = if tts || stt { (tts, stt) } else { (true, false) };

    if tts {
        let synth = CommandSynthesizer::new(&config.tts);
        let (engine, path) = synth.resolve()?;
        println!("Speech engine: {} ({})", engine, path.display());
        synth.speak(text, &SpeakOptions::default()).await?;
        println!("Spoke: {}", text);
    }

    if stt {
        let recognizer = Arc::new(WhisperRecognizer::new(&config.stt));
        println!("Loading model '{}'...", config.stt.model);
        let preloading = recognizer.clone();
        tokio::task::spawn_blocking(move || preloading.preload()).await??;

        let request = ListenRequest {
            language: config.stt.language.clone(),
            silence_threshold: config.stt.silence_threshold(),
            max_duration: config.stt.max_duration(),
            model: None,
        };
        println!(
            "Listening; stop speaking for {:.1}s to finish...",
            config.stt.silence_threshold_secs
        );
        let text = recognizer
            .transcribe_until_silence(&request, &PrintPartial)
            .await?;
        println!("Transcript: {}", text);
    }

    Ok(())
}

fn show_config(config: &Config, explicit: Option<&Path>) -> anyhow::Result<()> {
    match explicit.map(Path::to_path_buf).or_else(Config::default_path) {
        Some(path) if path.exists() => println!("# Loaded from {}", path.display()),
        Some(path) => println!("# No config file at {} (defaults + environment)", path.display()),
        None => println!("# No config directory available (defaults + environment)"),
    }
    println!(
        "# Hotkey lock directory: {}",
        config.hotkey.lock.resolve_directory().display()
    );
    println!("# Models directory: {}\n", Config::models_dir().display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
