use crate::state::FailureRecord;

/// Characters of dev-server output quoted back into a revision prompt.
const DEV_SERVER_DETAIL_CHARS: usize = 500;

const DEFAULT_GENERATION_PROMPT: &str = r#"You are an expert LangGraph engineer. Write a complete, runnable Python module that implements the workflow described by the JSON specification below.

## Specification
```json
{{INPUT_JSON}}
```

## Reference template
Follow the structure, state model and action helpers of this template:
```python
{{TEMPLATE_CODE}}
```

## Requirements
- Point every remote-control action at OS_URL = "{{OS_URL}}".
- Export the compiled graph at module level as `graph = ...`.
- Use only the action helpers from the template; keep node numbering sequential.
- Return ONLY the Python code, without explanations."#;

/// Render the generation prompt. `template` may carry the
/// `{{INPUT_JSON}}`, `{{TEMPLATE_CODE}}` and `{{OS_URL}}` placeholders;
/// the built-in prompt is used when it is `None`.
pub fn generation_prompt(
    template: Option<&str>,
    spec: &serde_json::Value,
    template_code: &str,
    os_url: Option<&str>,
) -> String {
    let spec_json = serde_json::to_string_pretty(spec).unwrap_or_else(|_| spec.to_string());
    template
        .unwrap_or(DEFAULT_GENERATION_PROMPT)
        .replace("{{INPUT_JSON}}", &spec_json)
        .replace("{{TEMPLATE_CODE}}", template_code)
        .replace("{{OS_URL}}", os_url.unwrap_or("None"))
}

/// Prompt for a first-phase (plain execution) failure.
pub fn execution_revision_prompt(artifact: &str, failure: &FailureRecord) -> String {
    format!(
        r#"You are a Python expert helping to fix a LangGraph workflow that failed during basic execution.

ORIGINAL CODE:
```python
{artifact}
```

EXECUTION ERROR:
Error Type: {name}
Error Message: {detail}

TASK:
Fix the above code to resolve the execution error. Focus specifically on:
1. The {name} error that occurred
2. Making sure the LangGraph workflow is properly structured
3. Ensuring all required imports are present
4. Fixing syntax errors, missing variables, or import issues

REQUIREMENTS:
- Return ONLY the corrected Python code
- Do not include explanations or markdown formatting
- Maintain the same general structure and functionality

CORRECTED CODE:"#,
        name = failure.name,
        detail = failure.detail,
    )
}

/// Prompt for a second-phase (dev server) failure.
pub fn dev_server_revision_prompt(artifact: &str, failure: &FailureRecord) -> String {
    format!(
        r#"You are a LangGraph expert helping to fix a LangGraph workflow that failed during `langgraph dev` startup.

ORIGINAL CODE:
```python
{artifact}
```

LANGGRAPH DEV ERROR:
Error Type: {name}
Full Error Details: {detail}

TASK:
Fix the above code to resolve the development server error. Focus on:
1. Graph compilation issues (StateGraph, nodes, edges)
2. Graph export requirements (MUST have top-level 'graph = ...')
3. State schema validation and proper Pydantic models
4. Correct imports for langgraph components

REQUIREMENTS:
- Return ONLY the corrected Python code
- MUST include "graph = ..." export at module level
- Do not include explanations or markdown formatting

CORRECTED CODE:"#,
        name = failure.name,
        detail = tail_chars(&failure.detail, DEV_SERVER_DETAIL_CHARS),
    )
}

pub fn commit_message_prompt(
    spec: &serde_json::Value,
    files: &[String],
    artifact: &str,
    execution_output: &str,
) -> String {
    let spec_json = serde_json::to_string_pretty(spec).unwrap_or_else(|_| spec.to_string());
    format!(
        r#"Generate a concise, professional git commit message for an automatically generated LangGraph agent with deployment configuration.

Context:
- Target specification: {spec_json}
- Generated files: {files}
- Generated code: {artifact}
- Execution result: {output}

Requirements:
- Use conventional commit format (e.g., "feat:", "fix:", "chore:")
- Keep the subject at 60 characters or less
- Focus on what the agent does, not how it was created

Generate only the commit message, nothing else:"#,
        files = files.join(", "),
        output = head_chars(execution_output, 200),
    )
}

/// The last `n` characters of `s`, on a character boundary.
pub fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let skip = count - n;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// The first `n` characters of `s`, on a character boundary.
pub fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DevServerFailure, ErrorKind};

    #[test]
    fn test_generation_prompt_substitutes_placeholders() {
        let spec = serde_json::json!({"workflow": "invoice"});
        let prompt = generation_prompt(
            Some("spec={{INPUT_JSON}} tpl={{TEMPLATE_CODE}} os={{OS_URL}}"),
            &spec,
            "TEMPLATE",
            Some("https://os.example"),
        );
        assert!(prompt.contains("\"workflow\": \"invoice\""));
        assert!(prompt.contains("tpl=TEMPLATE"));
        assert!(prompt.contains("os=https://os.example"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_generation_prompt_without_os_url() {
        let prompt = generation_prompt(None, &serde_json::json!({}), "", None);
        assert!(prompt.contains("OS_URL = \"None\""));
    }

    #[test]
    fn test_dev_server_prompt_truncates_detail() {
        let failure = FailureRecord {
            kind: ErrorKind::DevServer(DevServerFailure::Startup),
            name: "Dev server startup failed".to_string(),
            detail: format!("{}END", "x".repeat(2000)),
        };
        let prompt = dev_server_revision_prompt("graph = None", &failure);
        assert!(prompt.contains("END"));
        assert!(!prompt.contains(&"x".repeat(600)));
    }

    #[test]
    fn test_char_helpers_respect_boundaries() {
        assert_eq!(tail_chars("héllo", 3), "llo");
        assert_eq!(tail_chars("hi", 10), "hi");
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(head_chars("hi", 10), "hi");
    }
}
