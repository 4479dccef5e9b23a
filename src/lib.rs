//! voice-mcp: voice interaction for AI assistants over MCP
//!
//! This library provides:
//! - Text-to-speech through the system speech command (espeak-ng, spd-say, say)
//! - Speech-to-text with whisper.cpp, captured until the speaker goes quiet
//! - A system-wide dictation hotkey shared safely between several running
//!   instances through a host-wide lock
//! - Background warm-up of the engines with per-component readiness
//!
//! # Architecture
//!
//! ```text
//!            MCP client (stdin/stdout, JSON-RPC)
//!                           │
//!                           ▼
//!                  ┌─────────────────┐
//!                  │   mcp::server   │
//!                  └─────────────────┘
//!                           │ tools/call
//!                           ▼
//!                  ┌─────────────────┐        ┌──────────────────┐
//!                  │   VoiceTools    │───────▶│ ReadinessTracker │◀── BackgroundLoader
//!                  └─────────────────┘        └──────────────────┘     (tts, stt warm-up)
//!                     │           │
//!               speak │           │ start/stop/status
//!                     ▼           ▼
//!           ┌──────────────┐  ┌─────────────────┐   press   ┌──────────────┐
//!           │ SpeechSynth- │  │  HotkeyMonitor  │◀──────────│ HotkeyHook   │
//!           │    esizer    │  └─────────────────┘           │ (evdev/rdev) │
//!           └──────────────┘     │         │                └──────────────┘
//!                      try lock  │         │ session
//!                                ▼         ▼
//!                     ┌──────────────┐  ┌──────────────────────────────────┐
//!                     │  HotkeyLock  │  │ cue → capture until silence →    │
//!                     │ (file / sem) │  │ whisper → type / clipboard / ret │
//!                     └──────────────┘  └──────────────────────────────────┘
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod hotkey;
pub mod loader;
pub mod lock;
pub mod mcp;
pub mod monitor;
pub mod output;
pub mod readiness;
pub mod server;
pub mod session;
pub mod tools;
pub mod transcribe;
pub mod tts;

pub use config::Config;
pub use error::{Result, VoiceMcpError};
pub use server::VoiceServer;
