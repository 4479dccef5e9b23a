//! Tool catalog: definitions for `tools/list` and routing for `tools/call`

use super::ToolResult;
use crate::tools::VoiceTools;
use crate::tts::SpeakOptions;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// A `tools/call` that cannot be dispatched at all
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
}

#[derive(Debug, Deserialize)]
struct SpeakArgs {
    text: String,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    rate: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct StopArgs {
    #[serde(default)]
    force_abort: bool,
}

/// Every tool, as listed by `tools/list`
pub fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "speak",
            "description": "Convert text to speech using the configured TTS engine. \
                Returns a status message indicating success or failure.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "The text to speak" },
                    "voice": { "type": "string", "description": "Voice to use (engine specific)" },
                    "rate": { "type": "number", "description": "Speech rate in words per minute" },
                    "volume": { "type": "number", "description": "Volume from 0.0 to 1.0" }
                },
                "required": ["text"]
            }
        }),
        json!({
            "name": "start_hotkey_monitoring",
            "description": "Start global hotkey monitoring for voice dictation.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "stop_hotkey_monitoring",
            "description": "Stop global hotkey monitoring. A dictation in progress finishes \
                unless force_abort is set.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "force_abort": {
                        "type": "boolean",
                        "description": "Abort the dictation in progress and release the hotkey lock"
                    }
                }
            }
        }),
        json!({
            "name": "get_hotkey_status",
            "description": "Get hotkey monitoring state, the current dictation session, \
                cross-instance lock ownership and the hotkey configuration.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "get_loading_status",
            "description": "Get the background loading status of the speech engines.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
    ]
}

/// Run one tool. Tool-level failures are in the returned [`ToolResult`].
pub async fn call(tools: &VoiceTools, name: &str, args: Value) -> Result<ToolResult, CallError> {
    match name {
        "speak" => {
            let args: SpeakArgs = parse_args(name, args)?;
            let options = match speak_options(&args) {
                Ok(options) => options,
                Err(message) => return Ok(ToolResult::error(message)),
            };
            Ok(status_result(tools.speak(&args.text, options).await))
        }
        "start_hotkey_monitoring" => Ok(status_result(tools.start_hotkey_monitoring().await)),
        "stop_hotkey_monitoring" => {
            let args: StopArgs = parse_args(name, args)?;
            Ok(status_result(tools.stop_hotkey_monitoring(args.force_abort).await))
        }
        "get_hotkey_status" => Ok(json_result(&tools.get_hotkey_status())),
        "get_loading_status" => Ok(json_result(&tools.get_loading_status())),
        _ => Err(CallError::UnknownTool(name.to_string())),
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, CallError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| CallError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

fn speak_options(args: &SpeakArgs) -> Result<SpeakOptions, String> {
    let rate = match args.rate {
        Some(rate) if !(rate.is_finite() && rate >= 1.0) => {
            return Err(format!("❌ Invalid rate {}: use words per minute, e.g. 180", rate));
        }
        Some(rate) => Some(rate.round() as u32),
        None => None,
    };
    let volume = match args.volume {
        Some(volume) if !(0.0..=1.0).contains(&volume) => {
            return Err(format!("❌ Invalid volume {}: use a value from 0.0 to 1.0", volume));
        }
        Some(volume) => Some(volume as f32),
        None => None,
    };

    Ok(SpeakOptions {
        voice: args.voice.clone().filter(|v| !v.trim().is_empty()),
        rate,
        volume,
    })
}

/// Status strings that start with the failure mark are tool errors
fn status_result(status: String) -> ToolResult {
    if status.starts_with('❌') {
        ToolResult::error(status)
    } else {
        ToolResult::text(status)
    }
}

fn json_result<T: Serialize>(report: &T) -> ToolResult {
    match serde_json::to_string_pretty(report) {
        Ok(text) => ToolResult::text(text),
        Err(e) => ToolResult::error(format!("❌ Failed to encode status: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speak_args(value: Value) -> SpeakArgs {
        parse_args("speak", value).unwrap()
    }

    #[test]
    fn test_every_tool_has_a_schema() {
        let defs = definitions();
        let names: Vec<&str> = defs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            [
                "speak",
                "start_hotkey_monitoring",
                "stop_hotkey_monitoring",
                "get_hotkey_status",
                "get_loading_status"
            ]
        );
        assert!(defs.iter().all(|d| d["inputSchema"]["type"] == "object"));
    }

    #[test]
    fn test_speak_requires_text() {
        let err = parse_args::<SpeakArgs>("speak", json!({"rate": 150})).unwrap_err();
        assert!(matches!(err, CallError::InvalidArguments { .. }));
    }

    #[test]
    fn test_stop_args_default_when_missing() {
        let args: StopArgs = parse_args("stop_hotkey_monitoring", Value::Null).unwrap();
        assert!(!args.force_abort);
    }

    #[test]
    fn test_speak_options_conversion() {
        let options = speak_options(&speak_args(json!({
            "text": "hi", "rate": 149.6, "volume": 0.8, "voice": " "
        })))
        .unwrap();
        assert_eq!(options.rate, Some(150));
        assert_eq!(options.volume, Some(0.8));
        assert!(options.voice.is_none());
    }

    #[test]
    fn test_out_of_range_volume_is_rejected() {
        let err = speak_options(&speak_args(json!({"text": "hi", "volume": 1.5}))).unwrap_err();
        assert!(err.contains("Invalid volume"));

        let err = speak_options(&speak_args(json!({"text": "hi", "rate": 0}))).unwrap_err();
        assert!(err.contains("Invalid rate"));
    }

    #[test]
    fn test_status_result_marks_failures() {
        assert!(status_result("❌ TTS error: x".to_string()).is_error);
        assert!(!status_result("✅ Spoke: x".to_string()).is_error);
        assert!(!status_result("⚠️  disabled".to_string()).is_error);
    }
}
