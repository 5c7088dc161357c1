use crate::provider::AgentError;
use serde_json::Value;

/// Extracts the reply text from `agent --json` stdout. Leading non-JSON noise (CLI
/// warnings) is skipped; stdout without a JSON document is taken as plain text.
pub fn parse_agent_output(stdout: &str) -> Result<String, AgentError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(AgentError::ParseFailure {
            reason: "stdout was empty".to_string(),
        });
    }

    let Some(json_start) = trimmed.find(['{', '[']) else {
        return Ok(trimmed.to_string());
    };
    let Ok(value) = serde_json::from_str::<Value>(&trimmed[json_start..]) else {
        return Ok(trimmed.to_string());
    };

    if let Some(status) = value.get("status").and_then(Value::as_str) {
        if status != "ok" {
            let message = value
                .get("error")
                .or_else(|| value.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or("no error detail")
                .to_string();
            return Err(AgentError::Rejected {
                status: status.to_string(),
                message,
            });
        }
    }

    extract_reply_text(&value).ok_or_else(|| AgentError::ParseFailure {
        reason: "json output carried no reply text".to_string(),
    })
}

fn extract_reply_text(value: &Value) -> Option<String> {
    if let Some(payloads) = value
        .get("result")
        .and_then(|result| result.get("payloads"))
        .and_then(Value::as_array)
    {
        return payloads
            .iter()
            .filter_map(|payload| payload.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .last()
            .map(str::to_string);
    }

    for key in ["reply", "output"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_last_non_empty_payload_text() {
        let stdout = r#"(node) DeprecationWarning: something
{"status":"ok","result":{"payloads":[{"text":"draft"},{"text":"final answer"},{"text":"  "}]}}"#;
        assert_eq!(parse_agent_output(stdout).expect("parse"), "final answer");
    }

    #[test]
    fn falls_back_to_reply_then_output_fields() {
        assert_eq!(
            parse_agent_output(r#"{"reply":"hello"}"#).expect("parse"),
            "hello"
        );
        assert_eq!(
            parse_agent_output(r#"{"output":"world"}"#).expect("parse"),
            "world"
        );
    }

    #[test]
    fn non_ok_status_is_rejected() {
        let err = parse_agent_output(r#"{"status":"error","error":"session busy"}"#)
            .expect_err("status error");
        match err {
            AgentError::Rejected { status, message } => {
                assert_eq!(status, "error");
                assert_eq!(message, "session busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plain_text_and_broken_json_pass_through() {
        assert_eq!(
            parse_agent_output("just text\n").expect("parse"),
            "just text"
        );
        assert_eq!(
            parse_agent_output("prefix {not json").expect("parse"),
            "prefix {not json"
        );
    }

    #[test]
    fn empty_stdout_is_a_parse_failure() {
        assert!(matches!(
            parse_agent_output("   \n"),
            Err(AgentError::ParseFailure { .. })
        ));
    }
}
