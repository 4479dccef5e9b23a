//! Text output for dictated text
//!
//! Fallback chain for typing:
//! 1. wtype - Wayland-native, best Unicode/CJK support, no daemon needed
//! 2. ydotool - Works on X11/Wayland/TTY, requires daemon
//! 3. xdotool - X11
//!
//! Clipboard chain: wl-copy, xclip, pbcopy. Typing falls back to the
//! clipboard chain when `output.fallback_to_clipboard` is set. Return mode
//! delivers nothing; the monitor keeps the transcript for status reports.

pub mod clipboard;
pub mod wtype;
pub mod xdotool;
pub mod ydotool;

use crate::config::{OutputConfig, OutputMode};
use crate::error::OutputError;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Trait for text output implementations
#[async_trait::async_trait]
pub trait TextOutput: Send + Sync {
    /// Output text (type it or copy to clipboard)
    async fn output(&self, text: &str) -> Result<(), OutputError>;

    /// Check if this output method is available
    async fn is_available(&self) -> bool;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Where a finished transcript is delivered
#[async_trait::async_trait]
pub trait TextSink: Send + Sync {
    /// Deliver `text` per `mode`; returns the method that delivered it
    async fn output(&self, text: &str, mode: OutputMode) -> Result<String, OutputError>;
}

/// Whether a program is in PATH
pub fn tool_in_path(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Run an output tool to completion, optionally feeding it text on stdin
pub async fn run_tool(
    program: &'static str,
    args: &[&str],
    stdin_text: Option<&str>,
) -> Result<(), OutputError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin_text.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OutputError::ToolNotFound(program)
            } else {
                OutputError::InjectionFailed(format!("{}: {}", program, e))
            }
        })?;

    if let (Some(text), Some(mut stdin)) = (stdin_text, child.stdin.take()) {
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| OutputError::InjectionFailed(e.to_string()))?;
        // Dropping stdin signals EOF
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| OutputError::InjectionFailed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OutputError::InjectionFailed(format!(
            "{} failed: {}",
            program,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Keyboard simulation methods, best first
pub fn create_typing_chain(config: &OutputConfig) -> Vec<Box<dyn TextOutput>> {
    vec![
        Box::new(wtype::WtypeOutput::new()),
        Box::new(ydotool::YdotoolOutput::new(config.type_delay_ms)),
        Box::new(xdotool::XdotoolOutput::new(config.type_delay_ms)),
    ]
}

/// Clipboard methods, best first
pub fn create_clipboard_chain() -> Vec<Box<dyn TextOutput>> {
    clipboard::ClipboardTool::ALL
        .into_iter()
        .map(|tool| Box::new(clipboard::ClipboardOutput::new(tool)) as Box<dyn TextOutput>)
        .collect()
}

/// Try each output method in the chain until one succeeds
pub async fn output_with_fallback(
    chain: &[Box<dyn TextOutput>],
    text: &str,
) -> Result<&'static str, OutputError> {
    for output in chain {
        if !output.is_available().await {
            tracing::debug!("{} not available, trying next", output.name());
            continue;
        }

        match output.output(text).await {
            Ok(()) => {
                tracing::debug!("Text output via {}", output.name());
                return Ok(output.name());
            }
            Err(e) => {
                tracing::warn!("{} failed: {}, trying next", output.name(), e);
            }
        }
    }

    Err(OutputError::AllMethodsFailed)
}

/// [`TextSink`] backed by the external typing and clipboard tools
pub struct CommandTextSink {
    typing: Vec<Box<dyn TextOutput>>,
    clipboard: Vec<Box<dyn TextOutput>>,
    debounce: Duration,
    fallback_to_clipboard: bool,
    last_typed: Mutex<Option<(String, Instant)>>,
}

impl CommandTextSink {
    pub fn new(config: &OutputConfig) -> Self {
        Self::with_chains(config, create_typing_chain(config), create_clipboard_chain())
    }

    pub fn with_chains(
        config: &OutputConfig,
        typing: Vec<Box<dyn TextOutput>>,
        clipboard: Vec<Box<dyn TextOutput>>,
    ) -> Self {
        Self {
            typing,
            clipboard,
            debounce: config.typing_debounce(),
            fallback_to_clipboard: config.fallback_to_clipboard,
            last_typed: Mutex::new(None),
        }
    }

    async fn type_text(&self, text: &str) -> Result<String, OutputError> {
        let mut last_typed = self.last_typed.lock().await;
        if let Some((previous, at)) = last_typed.as_ref() {
            if previous == text && at.elapsed() < self.debounce {
                tracing::debug!("Skipping repeated text within the typing debounce");
                return Ok("typing (duplicate skipped)".to_string());
            }
        }

        // Let the hotkey release settle before synthesizing keys
        tokio::time::sleep(self.debounce).await;

        match output_with_fallback(&self.typing, text).await {
            Ok(method) => {
                *last_typed = Some((text.to_string(), Instant::now()));
                Ok(method.to_string())
            }
            Err(e) if self.fallback_to_clipboard => {
                tracing::warn!("Typing failed ({}), copying to clipboard instead", e);
                self.copy_text(text).await
            }
            Err(e) => Err(e),
        }
    }

    async fn copy_text(&self, text: &str) -> Result<String, OutputError> {
        let method = output_with_fallback(&self.clipboard, text).await?;
        tracing::info!("Text copied to clipboard ({} chars)", text.chars().count());
        Ok(method.to_string())
    }
}

#[async_trait::async_trait]
impl TextSink for CommandTextSink {
    async fn output(&self, text: &str, mode: OutputMode) -> Result<String, OutputError> {
        let text = text.trim();
        match mode {
            OutputMode::Return => Ok("return".to_string()),
            _ if text.is_empty() => Ok("none".to_string()),
            OutputMode::Typing => self.type_text(text).await,
            OutputMode::Clipboard => self.copy_text(text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeOutput {
        name: &'static str,
        available: bool,
        fails: bool,
        calls: Arc<AtomicUsize>,
    }

    impl FakeOutput {
        fn boxed(name: &'static str, available: bool, fails: bool) -> (Box<dyn TextOutput>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let output = Box::new(Self {
                name,
                available,
                fails,
                calls: calls.clone(),
            });
            (output, calls)
        }
    }

    #[async_trait::async_trait]
    impl TextOutput for FakeOutput {
        async fn output(&self, _text: &str) -> Result<(), OutputError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                Err(OutputError::InjectionFailed("boom".to_string()))
            } else {
                Ok(())
            }
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn quick_config() -> OutputConfig {
        OutputConfig {
            typing_debounce_secs: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fallback_skips_unavailable_and_failing() {
        let (missing, missing_calls) = FakeOutput::boxed("missing", false, false);
        let (broken, broken_calls) = FakeOutput::boxed("broken", true, true);
        let (good, good_calls) = FakeOutput::boxed("good", true, false);

        let method = output_with_fallback(&[missing, broken, good], "hi").await.unwrap();
        assert_eq!(method, "good");
        assert_eq!(missing_calls.load(Ordering::SeqCst), 0);
        assert_eq!(broken_calls.load(Ordering::SeqCst), 1);
        assert_eq!(good_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failing_is_an_error() {
        let (broken, _) = FakeOutput::boxed("broken", true, true);
        assert!(matches!(
            output_with_fallback(&[broken], "hi").await,
            Err(OutputError::AllMethodsFailed)
        ));
    }

    #[tokio::test]
    async fn test_typing_falls_back_to_clipboard() {
        let (broken, _) = FakeOutput::boxed("wtype", true, true);
        let (clip, clip_calls) = FakeOutput::boxed("wl-copy", true, false);
        let sink = CommandTextSink::with_chains(&quick_config(), vec![broken], vec![clip]);

        let method = sink.output("hello", OutputMode::Typing).await.unwrap();
        assert_eq!(method, "wl-copy");
        assert_eq!(clip_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_typing_without_fallback_fails() {
        let (broken, _) = FakeOutput::boxed("wtype", true, true);
        let (clip, clip_calls) = FakeOutput::boxed("wl-copy", true, false);
        let config = OutputConfig {
            fallback_to_clipboard: false,
            ..quick_config()
        };
        let sink = CommandTextSink::with_chains(&config, vec![broken], vec![clip]);

        assert!(sink.output("hello", OutputMode::Typing).await.is_err());
        assert_eq!(clip_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_return_mode_delivers_nothing() {
        let (typer, typer_calls) = FakeOutput::boxed("wtype", true, false);
        let sink = CommandTextSink::with_chains(&quick_config(), vec![typer], vec![]);

        assert_eq!(sink.output("hello", OutputMode::Return).await.unwrap(), "return");
        assert_eq!(typer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeat_within_debounce_is_skipped() {
        let (typer, typer_calls) = FakeOutput::boxed("wtype", true, false);
        let config = OutputConfig {
            typing_debounce_secs: 5.0,
            ..Default::default()
        };
        let sink = CommandTextSink::with_chains(&config, vec![typer], vec![]);
        *sink.last_typed.lock().await = Some(("hello".to_string(), Instant::now()));

        let method = sink.output("hello", OutputMode::Typing).await.unwrap();
        assert_eq!(method, "typing (duplicate skipped)");
        assert_eq!(typer_calls.load(Ordering::SeqCst), 0);
    }
}
