//! Prompt templates for the inference pipeline.
//!
//! Each call type owns a system prompt and a user-message builder. Variables
//! are never sent to the model: prompts only name the `<|KEY|>` placeholders,
//! and [`substitute_variables`] swaps real values in after the model answers.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::llm::{ChatMessage, ToolSpec};

pub const ACT_TOOL: &str = "doAction";
pub const SKIP_TOOL: &str = "skipSection";

const ACT_SYSTEM_PROMPT: &str = r#"You are a browser automation assistant. You receive:
1. the user's overall goal,
2. the steps completed so far,
3. the interactive elements of the current page as an accessibility tree.

Each tree line looks like `[id] role: name`. Pick the single element and method that
moves the goal forward and call the `doAction` tool. Use `element` for the bracketed id.

Methods: click, fill, type, press, scrollTo, nextChunk, prevChunk, selectOption.
For `fill`/`type` pass the text as the first argument. For `press` pass the key
(Enter, Tab, ArrowDown...). For `scrollTo` pass a percentage such as "50%".

Set `completed` to true only when this action finishes the goal.
If nothing on the page helps with the goal, call `skipSection` instead."#;

const OBSERVE_SYSTEM_PROMPT: &str = r#"You are helping the user find elements on a web page.
You receive an instruction and the page's accessibility tree (`[id] role: name`).
Return every element that matches the instruction as
{"elements": [{"elementId": "<id>", "description": "<what it is>"}]}.
Only use ids that appear in the tree. Return an empty list when nothing matches."#;

const OBSERVE_ACTION_SUFFIX: &str = r#"
For each element also return `method` (click, fill, type, press, scrollTo,
nextChunk, prevChunk, selectOption) and `arguments` (a list of strings) describing
how to perform the instruction on it."#;

const EXTRACT_SYSTEM_PROMPT: &str = r#"You are extracting structured data from a web page.
You receive an instruction, the data extracted so far from earlier chunks, and the
content of the current chunk. Return JSON matching the provided schema. Merge new
findings with the previous data; never drop information that is still valid.
Leave fields empty rather than inventing values."#;

const REFINE_SYSTEM_PROMPT: &str = r#"You are refining extracted data.
You receive the previous extraction and a newly extracted version. Combine them
into one document matching the schema: remove duplicates, keep the most complete
value for each field, and do not add anything that is in neither input."#;

const METADATA_SYSTEM_PROMPT: &str = r#"You are judging extraction progress.
Given the instruction, the extracted data and how many page chunks have been seen,
return {"progress": "<short summary>", "completed": <true|false>}.
Mark completed only when the instruction is fully satisfied or every chunk was seen."#;

const VERIFY_SYSTEM_PROMPT: &str = r#"You verify whether a browser task is finished.
You receive the goal, the steps taken and the current page's accessibility tree.
Return {"completed": true} only when the page shows the goal has been achieved,
otherwise {"completed": false}."#;

pub fn act_messages(
    goal: &str,
    steps: &str,
    dom_elements: &str,
    variables: &BTreeMap<String, String>,
) -> Vec<ChatMessage> {
    let mut user = format!("# Goal\n{goal}\n\n# Previous steps\n");
    if steps.trim().is_empty() {
        user.push_str("None\n");
    } else {
        user.push_str(steps.trim_end());
        user.push('\n');
    }
    user.push_str("\n# Current page\n");
    user.push_str(dom_elements);
    if !variables.is_empty() {
        let names = variables
            .keys()
            .map(|key| format!("<|{key}|>"))
            .collect::<Vec<_>>()
            .join(", ");
        user.push_str(&format!(
            "\n\n# Variables\nUse these placeholders verbatim as arguments when needed: {names}"
        ));
    }
    vec![ChatMessage::system(ACT_SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Follow-up turn telling the model why its previous answer was rejected.
pub fn act_retry_message(attempt: u32, reason: &str) -> ChatMessage {
    ChatMessage::user(format!(
        "Attempt {attempt} was rejected ({reason}). Answer again by calling \
         {ACT_TOOL} with every required argument, or {SKIP_TOOL}."
    ))
}

pub fn act_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: ACT_TOOL.to_string(),
            description: "Perform one action on an element of the current page".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "method": { "type": "string" },
                    "element": { "type": "string", "description": "bracketed id from the tree" },
                    "arguments": { "type": "array", "items": { "type": "string" } },
                    "step": { "type": "string", "description": "what this action does" },
                    "why": { "type": "string" },
                    "completed": { "type": "boolean" }
                },
                "required": ["method", "element", "arguments", "step", "completed"]
            }),
        },
        ToolSpec {
            name: SKIP_TOOL.to_string(),
            description: "Nothing on this page helps with the goal".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "reason": { "type": "string" } },
                "required": ["reason"]
            }),
        },
    ]
}

pub fn observe_messages(instruction: &str, dom_elements: &str, return_action: bool) -> Vec<ChatMessage> {
    let mut system = OBSERVE_SYSTEM_PROMPT.to_string();
    if return_action {
        system.push_str(OBSERVE_ACTION_SUFFIX);
    }
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!(
            "# Instruction\n{instruction}\n\n# Accessibility tree\n{dom_elements}"
        )),
    ]
}

pub fn observe_schema(return_action: bool) -> Value {
    let mut item = json!({
        "type": "object",
        "properties": {
            "elementId": { "type": "string" },
            "description": { "type": "string" }
        },
        "required": ["elementId", "description"]
    });
    if return_action {
        item["properties"]["method"] = json!({ "type": "string" });
        item["properties"]["arguments"] = json!({ "type": "array", "items": { "type": "string" } });
        item["required"] = json!(["elementId", "description", "method", "arguments"]);
    }
    json!({
        "type": "object",
        "properties": { "elements": { "type": "array", "items": item } },
        "required": ["elements"]
    })
}

pub fn extract_messages(instruction: &str, previous: &Value, dom_elements: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(EXTRACT_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "# Instruction\n{instruction}\n\n# Previously extracted\n{previous}\n\n# Content\n{dom_elements}"
        )),
    ]
}

pub fn refine_messages(instruction: &str, previous: &Value, extracted: &Value) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REFINE_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "# Instruction\n{instruction}\n\n# Previous\n{previous}\n\n# New\n{extracted}"
        )),
    ]
}

pub fn metadata_messages(
    instruction: &str,
    extracted: &Value,
    chunks_seen: usize,
    chunks_total: usize,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(METADATA_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "# Instruction\n{instruction}\n\n# Extracted\n{extracted}\n\n# Chunks seen\n{chunks_seen} of {chunks_total}"
        )),
    ]
}

pub fn metadata_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "progress": { "type": "string" },
            "completed": { "type": "boolean" }
        },
        "required": ["progress", "completed"]
    })
}

pub fn verify_messages(goal: &str, steps: &str, dom_elements: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(VERIFY_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "# Goal\n{goal}\n\n# Steps taken\n{steps}\n\n# Current page\n{dom_elements}"
        )),
    ]
}

pub fn verify_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "completed": { "type": "boolean" } },
        "required": ["completed"]
    })
}

/// Replace every `<|KEY|>` placeholder with its value. Unknown placeholders stay.
pub fn substitute_variables(text: &str, variables: &BTreeMap<String, String>) -> String {
    variables.iter().fold(text.to_string(), |acc, (key, value)| {
        acc.replace(&format!("<|{key}|>"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("EMAIL".to_string(), "ada@example.com".to_string()),
            ("PASSWORD".to_string(), "hunter2".to_string()),
        ])
    }

    #[test]
    fn act_prompt_names_placeholders_without_values() {
        let messages = act_messages("log in", "", "[1] textbox: Email", &vars());
        let user = &messages[1].content;
        assert!(user.contains("<|EMAIL|>, <|PASSWORD|>"));
        assert!(!user.contains("hunter2"));
        assert!(user.contains("# Previous steps\nNone"));
    }

    #[test]
    fn substitutes_known_placeholders_only() {
        let text = "<|EMAIL|> / <|PASSWORD|> / <|OTHER|>";
        assert_eq!(
            substitute_variables(text, &vars()),
            "ada@example.com / hunter2 / <|OTHER|>"
        );
    }

    #[test]
    fn observe_schema_adds_action_fields_on_request() {
        assert!(observe_schema(false)["properties"]["elements"]["items"]["properties"]
            .get("method")
            .is_none());
        let with_action = observe_schema(true);
        assert_eq!(
            with_action["properties"]["elements"]["items"]["required"]
                .as_array()
                .map(|r| r.len()),
            Some(4)
        );
    }
}
