//! Prompts offered through `prompts/list` and `prompts/get`

use serde_json::{json, Value};

pub struct PromptDef {
    pub name: &'static str,
    pub description: &'static str,
    pub text: &'static str,
}

const SPEAK_GUIDE: &str = "\
You can talk to the user out loud with the 'speak' tool. Use it to keep them \
informed while they are away from the screen:

1. **Before a long or noticeable action**: say what you are about to do \
(\"Running the test suite now\").
2. **When a task is finished**: confirm it and give the headline result \
(\"The build passed\" or \"Three tests are failing\").
3. **When you need the user**: speak the question so they notice you are waiting.
4. **For anything urgent**: warnings, failures or results they should hear about immediately.
5. **When everything is done**: tell them you have finished and summarize what changed.

Keep each message to one or two short, natural sentences. Put details, code and \
long explanations in text, not speech.

Do not speak every reply, and do not narrate progress of a long-running step \
over and over.

Optional parameters:
- voice: engine-specific voice name
- rate: speaking rate in words per minute
- volume: 0.0 to 1.0

Examples:
- speak(\"Build completed successfully\")
- speak(\"Found 3 errors to fix\", rate=150)
- speak(\"Task finished\", volume=0.8)

Whenever you stop and wait for the user, say so out loud and say what you need. \
Start by greeting the user briefly.";

pub fn all() -> &'static [PromptDef] {
    &[PromptDef {
        name: "speak",
        description: "Guide for using the speak tool effectively",
        text: SPEAK_GUIDE,
    }]
}

pub fn find(name: &str) -> Option<&'static PromptDef> {
    all().iter().find(|p| p.name == name)
}

/// Entry for `prompts/list`
pub fn listing(prompt: &PromptDef) -> Value {
    json!({
        "name": prompt.name,
        "description": prompt.description,
        "arguments": [],
    })
}

/// Result of `prompts/get`
pub fn messages(prompt: &PromptDef) -> Value {
    json!({
        "description": prompt.description,
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": prompt.text },
        }],
    })
}
