//! Clipboard-based text output
//!
//! Text is piped to the platform clipboard tool:
//! - wl-copy (wl-clipboard) on Wayland
//! - xclip on X11, using the CLIPBOARD selection
//! - pbcopy on macOS

use super::{run_tool, tool_in_path, TextOutput};
use crate::error::OutputError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardTool {
    WlCopy,
    Xclip,
    Pbcopy,
}

impl ClipboardTool {
    pub const ALL: [ClipboardTool; 3] = [ClipboardTool::WlCopy, ClipboardTool::Xclip, ClipboardTool::Pbcopy];

    fn program(&self) -> &'static str {
        match self {
            ClipboardTool::WlCopy => "wl-copy",
            ClipboardTool::Xclip => "xclip",
            ClipboardTool::Pbcopy => "pbcopy",
        }
    }

    fn args(&self) -> &'static [&'static str] {
        match self {
            ClipboardTool::Xclip => &["-selection", "clipboard"],
            ClipboardTool::WlCopy | ClipboardTool::Pbcopy => &[],
        }
    }
}

pub struct ClipboardOutput {
    tool: ClipboardTool,
}

impl ClipboardOutput {
    pub fn new(tool: ClipboardTool) -> Self {
        Self { tool }
    }
}

#[async_trait::async_trait]
impl TextOutput for ClipboardOutput {
    async fn output(&self, text: &str) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        run_tool(self.tool.program(), self.tool.args(), Some(text)).await
    }

    async fn is_available(&self) -> bool {
        match self.tool {
            ClipboardTool::WlCopy if std::env::var_os("WAYLAND_DISPLAY").is_none() => false,
            ClipboardTool::Xclip if std::env::var_os("DISPLAY").is_none() => false,
            tool => tool_in_path(tool.program()),
        }
    }

    fn name(&self) -> &'static str {
        self.tool.program()
    }
}
