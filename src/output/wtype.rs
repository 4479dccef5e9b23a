//! wtype-based text output
//!
//! Uses wtype to simulate keyboard input on Wayland. This is the preferred
//! method on Wayland because:
//! - No daemon required (unlike ydotool)
//! - Better Unicode/CJK support
//!
//! Requires:
//! - wtype installed
//! - Running on Wayland (WAYLAND_DISPLAY set)

use super::{run_tool, tool_in_path, TextOutput};
use crate::error::OutputError;

pub struct WtypeOutput;

impl WtypeOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WtypeOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TextOutput for WtypeOutput {
    async fn output(&self, text: &str) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        // The -- ensures text starting with - isn't treated as an option
        run_tool("wtype", &["--", text], None).await
    }

    async fn is_available(&self) -> bool {
        // Don't check WAYLAND_DISPLAY; wtype fails on its own without Wayland
        tool_in_path("wtype")
    }

    fn name(&self) -> &'static str {
        "wtype"
    }
}
