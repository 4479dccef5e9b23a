//! Build script for voice-mcp
//!
//! Generates man pages from CLI definitions using clap_mangen.

use clap::CommandFactory;
use clap_mangen::Man;
use std::env;
use std::fs::{self, File};
use std::io::Error;
use std::path::PathBuf;

// Include the CLI module
include!("src/cli.rs");

fn main() -> Result<(), Error> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    // Only generate man pages for release builds or when explicitly requested
    let profile = env::var("PROFILE").unwrap_or_default();
    if env::var("VOICE_MCP_GEN_MANPAGES").is_err() && profile != "release" {
        return Ok(());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap_or_else(|_| "target".to_string()));
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let cmd = Cli::command();
    Man::new(cmd.clone()).render(&mut File::create(man_dir.join("voice-mcp.1"))?)?;

    for subcommand in cmd.get_subcommands().filter(|c| c.get_name() != "help") {
        let path = man_dir.join(format!("voice-mcp-{}.1", subcommand.get_name()));
        Man::new(subcommand.clone()).render(&mut File::create(path)?)?;
    }

    Ok(())
}
