use crate::errors::ToolError;
use crate::utils::suggest::suggest;
use serde_json::Value;

fn with_suggestions(err: ToolError, given: &str, known: &[&str]) -> ToolError {
    let close = suggest(given, known, 3);
    let mut hint = format!("Use one of: {}.", known.join(", "));
    if !close.is_empty() {
        hint = format!("Did you mean: {}? {}", close.join(", "), hint);
    }
    err.with_hint(hint).with_details(serde_json::json!({
        "known": known,
        "did_you_mean": close,
    }))
}

pub fn unknown_action_error(tool: &str, action: Option<&Value>, known_actions: &[&str]) -> ToolError {
    let given = action.and_then(Value::as_str).unwrap_or("");
    with_suggestions(
        ToolError::invalid_field(format!("unknown {} action: {}", tool, given)),
        given,
        known_actions,
    )
}

pub fn unknown_tool_error(tool: &str, known_tools: &[&str]) -> ToolError {
    with_suggestions(
        ToolError::invalid_field(format!("unknown tool: {}", tool)),
        tool,
        known_tools,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_lists_alternatives() {
        let err = unknown_action_error(
            "servers",
            Some(&serde_json::json!("lst")),
            &["create", "list"],
        );
        assert_eq!(err.code, "INVALID_FIELD");
        assert!(err.hint.unwrap_or_default().contains("list"));
        assert_eq!(err.details.unwrap()["did_you_mean"][0], "list");
    }
}
