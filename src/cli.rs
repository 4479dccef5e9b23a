// Command-line interface definitions for voice-mcp
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "voice-mcp")]
#[command(author, version, about = "Voice interaction MCP server for AI assistants")]
#[command(long_about = "
voice-mcp exposes text-to-speech, speech-to-text and hotkey dictation to an
AI assistant over the Model Context Protocol (JSON-RPC on stdio).

Several instances may run at once (one per assistant session). They share the
global dictation hotkey through a host-wide lock: exactly one instance handles
each press, the others silently forfeit it.

USAGE:
  Register `voice-mcp serve` as a stdio MCP server in your assistant.
  Press the Menu key (default) to dictate; text is typed at the cursor.
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override dictation hotkey (e.g., menu, f12, ctrl+alt+s)
    #[arg(long, value_name = "KEY")]
    pub hotkey: Option<String>,

    /// Override whisper model (tiny, base, small, medium, large-v3, large-v3-turbo)
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP server on stdio (default if no command specified)
    Serve {
        /// Log level (error, warn, info, debug, trace)
        #[arg(long, value_name = "LEVEL")]
        log_level: Option<String>,

        /// Shorthand for --log-level debug
        #[arg(long)]
        debug: bool,

        /// Do not start hotkey monitoring automatically
        #[arg(long)]
        no_hotkey: bool,
    },

    /// Exercise the speech engines without an MCP client
    Test {
        /// Speak a test phrase
        #[arg(long)]
        tts: bool,

        /// Listen until silence and print the transcript
        #[arg(long)]
        stt: bool,

        /// Phrase used by --tts
        #[arg(long, default_value = "Hello, this is a test of the voice MCP server.")]
        text: String,
    },

    /// Show the resolved configuration
    Config,

    /// Print version information
    Version,
}
