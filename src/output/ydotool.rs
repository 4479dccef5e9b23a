//! ydotool-based text output
//!
//! Uses ydotool to simulate keyboard input. This works on all Wayland
//! compositors because ydotool uses the uinput kernel interface.
//!
//! Requires:
//! - ydotool installed
//! - ydotoold daemon running (systemctl --user start ydotool)
//! - User in 'input' group

use super::{run_tool, tool_in_path, TextOutput};
use crate::error::OutputError;

pub struct YdotoolOutput {
    /// Delay between keypresses in milliseconds
    delay_ms: u32,
}

impl YdotoolOutput {
    pub fn new(delay_ms: u32) -> Self {
        Self { delay_ms }
    }

    fn args<'a>(&self, delay: &'a str, text: &'a str) -> Vec<&'a str> {
        let mut args = vec!["type"];
        if self.delay_ms > 0 {
            args.extend(["--key-delay", delay, "--key-hold", delay]);
        }
        args.extend(["--", text]);
        args
    }
}

#[async_trait::async_trait]
impl TextOutput for YdotoolOutput {
    async fn output(&self, text: &str) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }

        let delay = self.delay_ms.to_string();
        match run_tool("ydotool", &self.args(&delay, text), None).await {
            Err(OutputError::InjectionFailed(stderr))
                if stderr.contains("socket") || stderr.contains("connect") || stderr.contains("daemon") =>
            {
                Err(OutputError::YdotoolNotRunning)
            }
            other => other,
        }
    }

    async fn is_available(&self) -> bool {
        if !tool_in_path("ydotool") {
            return false;
        }
        // An empty type succeeds quickly only when ydotoold is running
        run_tool("ydotool", &["type", ""], None).await.is_ok()
    }

    fn name(&self) -> &'static str {
        "ydotool"
    }
}
