use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Outcome of a single repair stage. A stage either produced a parsed value
/// or passed text along to the next stage; it never drops the payload.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Parsed(Value),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct RepairStageResult {
    pub stage: &'static str,
    pub changed: bool,
    pub outcome: StageOutcome,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RepairOutcome {
    Parsed {
        value: Value,
        stage: &'static str,
        trail: Vec<RepairStageResult>,
    },
    Unrepaired {
        original: String,
        trail: Vec<RepairStageResult>,
    },
}

impl RepairOutcome {
    pub fn diagnostics(&self) -> Vec<String> {
        let trail = match self {
            RepairOutcome::Parsed { trail, .. } => trail,
            RepairOutcome::Unrepaired { trail, .. } => trail,
        };
        trail
            .iter()
            .filter_map(|result| result.note.clone())
            .collect()
    }
}

type StageFn = fn(&str) -> RepairStageResult;

const STAGES: &[StageFn] = &[
    direct,
    strip_fences,
    balanced_span,
    normalize_syntax,
    close_truncation,
];

/// Runs the repair stages in fixed order. Each stage receives the previous
/// stage's text output; the first stage to parse wins. Valid input parses in
/// stage one untouched, so the pipeline is idempotent.
pub fn repair(raw: &str) -> RepairOutcome {
    let mut trail: Vec<RepairStageResult> = Vec::new();
    let mut text = raw.to_string();

    for stage in STAGES {
        let result = stage(&text);
        let parsed = match &result.outcome {
            StageOutcome::Parsed(value) => Some(value.clone()),
            StageOutcome::Text(next) => {
                text = next.clone();
                None
            }
        };
        let stage_name = result.stage;
        trail.push(result);
        if let Some(value) = parsed {
            return RepairOutcome::Parsed {
                value,
                stage: stage_name,
                trail,
            };
        }
    }

    RepairOutcome::Unrepaired {
        original: raw.to_string(),
        trail,
    }
}

fn passthrough(stage: &'static str, text: &str, note: Option<String>) -> RepairStageResult {
    RepairStageResult {
        stage,
        changed: false,
        outcome: StageOutcome::Text(text.to_string()),
        note,
    }
}

fn direct(text: &str) -> RepairStageResult {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => RepairStageResult {
            stage: "direct",
            changed: false,
            outcome: StageOutcome::Parsed(value),
            note: None,
        },
        Err(err) => passthrough("direct", text, Some(format!("direct parse failed: {err}"))),
    }
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)\r?\n?[ \t]*```\s*$")
            .expect("fence pattern")
    })
}

fn strip_fences(text: &str) -> RepairStageResult {
    let Some(captures) = fence_regex().captures(text) else {
        return passthrough("strip_fences", text, None);
    };
    let body = captures
        .get(1)
        .map(|body| body.as_str())
        .unwrap_or("")
        .to_string();

    match serde_json::from_str::<Value>(&body) {
        Ok(value) => RepairStageResult {
            stage: "strip_fences",
            changed: true,
            outcome: StageOutcome::Parsed(value),
            note: None,
        },
        Err(err) => RepairStageResult {
            stage: "strip_fences",
            changed: true,
            outcome: StageOutcome::Text(body),
            note: Some(format!("fence stripped but parse failed: {err}")),
        },
    }
}

fn balanced_span(text: &str) -> RepairStageResult {
    let Some(span) = longest_balanced_span(text) else {
        return passthrough(
            "balanced_span",
            text,
            Some("no balanced object or array span found".to_string()),
        );
    };
    if span == text.trim() {
        return passthrough("balanced_span", text, None);
    }

    match serde_json::from_str::<Value>(span) {
        Ok(value) => RepairStageResult {
            stage: "balanced_span",
            changed: true,
            outcome: StageOutcome::Parsed(value),
            note: None,
        },
        // Narrowing without a successful parse would drop surrounding
        // content, so the stage hands its input on unchanged.
        Err(err) => passthrough(
            "balanced_span",
            text,
            Some(format!("balanced span did not parse: {err}")),
        ),
    }
}

fn longest_balanced_span(text: &str) -> Option<&str> {
    let mut in_string = false;
    let mut escape = false;
    let mut depth: u32 = 0;
    let mut start: Option<usize> = None;
    let mut best: Option<(usize, usize)> = None;

    for (index, c) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    start = Some(index);
                }
                depth += 1;
            }
            '}' | ']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0
                        && let Some(span_start) = start
                    {
                        let span_end = index + c.len_utf8();
                        let longer = best
                            .map(|(best_start, best_end)| {
                                span_end - span_start > best_end - best_start
                            })
                            .unwrap_or(true);
                        if longer {
                            best = Some((span_start, span_end));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    best.map(|(span_start, span_end)| &text[span_start..span_end])
}

fn normalize_syntax(text: &str) -> RepairStageResult {
    // json5 accepts most generative defects outright: trailing commas,
    // single quotes, unquoted keys.
    if let Ok(value) = json5::from_str::<Value>(text) {
        return RepairStageResult {
            stage: "normalize_syntax",
            changed: false,
            outcome: StageOutcome::Parsed(value),
            note: None,
        };
    }

    let normalized = normalize_text(text);
    if normalized == text {
        return passthrough(
            "normalize_syntax",
            text,
            Some("no syntactic fixes applied".to_string()),
        );
    }

    match serde_json::from_str::<Value>(&normalized) {
        Ok(value) => RepairStageResult {
            stage: "normalize_syntax",
            changed: true,
            outcome: StageOutcome::Parsed(value),
            note: None,
        },
        Err(err) => RepairStageResult {
            stage: "normalize_syntax",
            changed: true,
            outcome: StageOutcome::Text(normalized),
            note: Some(format!("normalized text did not parse: {err}")),
        },
    }
}

/// Textual normalization outside of string contexts: trailing commas
/// dropped, unquoted keys quoted, single-quoted strings converted,
/// Python-style literals mapped, and missing separators inserted between
/// adjacent values.
fn normalize_text(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    // Tracks whether the previous significant character ended a value that
    // may legally be followed by a separator.
    let mut value_ended = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                if value_ended {
                    out.push(',');
                }
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    out.push(d);
                    i += 1;
                    if d == '\\' {
                        if i < chars.len() {
                            out.push(chars[i]);
                            i += 1;
                        }
                    } else if d == '"' {
                        break;
                    }
                }
                value_ended = true;
            }
            '\'' => {
                if value_ended {
                    out.push(',');
                }
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    i += 1;
                    if d == '\\' {
                        if i < chars.len() {
                            let escaped = chars[i];
                            i += 1;
                            if escaped == '\'' {
                                out.push('\'');
                            } else {
                                out.push('\\');
                                out.push(escaped);
                            }
                        }
                    } else if d == '\'' {
                        break;
                    } else if d == '"' {
                        out.push('\\');
                        out.push('"');
                    } else {
                        out.push(d);
                    }
                }
                out.push('"');
                value_ended = true;
            }
            ',' => {
                let mut next = i + 1;
                while next < chars.len() && chars[next].is_whitespace() {
                    next += 1;
                }
                let trailing = next < chars.len() && (chars[next] == '}' || chars[next] == ']');
                if !trailing {
                    out.push(',');
                }
                i += 1;
                value_ended = false;
            }
            '{' | '[' => {
                if value_ended {
                    out.push(',');
                }
                out.push(c);
                i += 1;
                value_ended = false;
            }
            '}' | ']' => {
                out.push(c);
                i += 1;
                value_ended = true;
            }
            ':' => {
                out.push(c);
                i += 1;
                value_ended = false;
            }
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let word_start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[word_start..i].iter().collect();
                let mut next = i;
                while next < chars.len() && chars[next].is_whitespace() {
                    next += 1;
                }
                let is_key = next < chars.len() && chars[next] == ':';
                if is_key {
                    if value_ended {
                        out.push(',');
                    }
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    match word.as_str() {
                        "True" => out.push_str("true"),
                        "False" => out.push_str("false"),
                        "None" => out.push_str("null"),
                        _ => out.push_str(&word),
                    }
                }
                value_ended = false;
            }
            _ => {
                out.push(c);
                i += 1;
                value_ended = false;
            }
        }
    }

    out
}

struct BalanceScan {
    open_stack: Vec<char>,
    in_string: bool,
}

fn scan_balance(text: &str) -> BalanceScan {
    let mut open_stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for c in text.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => open_stack.push(c),
            '}' | ']' => {
                open_stack.pop();
            }
            _ => {}
        }
    }

    BalanceScan {
        open_stack,
        in_string,
    }
}

/// Targeted fix for output cut off mid-value. Only fires when the tail is
/// provably truncated (an open string or unclosed brackets); balanced text
/// is never touched.
fn close_truncation(text: &str) -> RepairStageResult {
    let trimmed = text.trim_end();
    let scan = scan_balance(trimmed);
    if scan.open_stack.is_empty() && !scan.in_string {
        return passthrough("close_truncation", text, None);
    }

    let mut repaired = trimmed.to_string();
    if scan.in_string {
        repaired.push('"');
    }
    let tail_trimmed = repaired.trim_end().to_string();
    repaired = tail_trimmed;
    if repaired.ends_with(',') {
        repaired.pop();
    } else if repaired.ends_with(':') {
        repaired.push_str(" null");
    }
    for opener in scan.open_stack.iter().rev() {
        repaired.push(if *opener == '{' { '}' } else { ']' });
    }

    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => RepairStageResult {
            stage: "close_truncation",
            changed: true,
            outcome: StageOutcome::Parsed(value),
            note: None,
        },
        Err(err) => passthrough(
            "close_truncation",
            text,
            Some(format!("truncation closure did not parse: {err}")),
        ),
    }
}
