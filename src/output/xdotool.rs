//! xdotool-based text output for X11 sessions

use super::{run_tool, tool_in_path, TextOutput};
use crate::error::OutputError;

pub struct XdotoolOutput {
    /// Delay between keypresses in milliseconds
    delay_ms: u32,
}

impl XdotoolOutput {
    pub fn new(delay_ms: u32) -> Self {
        Self { delay_ms }
    }
}

#[async_trait::async_trait]
impl TextOutput for XdotoolOutput {
    async fn output(&self, text: &str) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        let delay = self.delay_ms.to_string();
        run_tool(
            "xdotool",
            &["type", "--clearmodifiers", "--delay", &delay, "--", text],
            None,
        )
        .await
    }

    async fn is_available(&self) -> bool {
        // xdotool needs an X display
        std::env::var_os("DISPLAY").is_some() && tool_in_path("xdotool")
    }

    fn name(&self) -> &'static str {
        "xdotool"
    }
}
