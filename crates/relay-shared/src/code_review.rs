use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::Turn;

pub const DEFAULT_LANGUAGE: &str = "javascript";
pub const NO_CODE_MESSAGE: &str = "No code provided";
const CONSOLE_LOG_LIMIT: usize = 5;

static VAR_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bvar\b").expect("var keyword pattern"));
static EQUALITY_OPERATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!==?|={2,}").expect("equality operator pattern"));
static CONSOLE_LOG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"console\.log").expect("console.log pattern"));
static MUTABLE_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"def\s+\w+\([^)]*=\s*[\[{]").expect("mutable default pattern")
});

const REVIEWER_INSTRUCTION: &str = "You are an expert code mentor reviewing a learner's code. \
     Be encouraging and educational. Reply with JSON only, no prose and no code fences.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warning" => Self::Warning,
            _ => Self::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub line: Option<u32>,
    pub severity: Severity,
    pub message: String,
    pub explanation: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReview {
    pub feedback: Vec<ReviewFinding>,
    pub overall: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReviewParseError {
    #[error("reply contains no JSON object")]
    MissingObject,
    #[error("reply object does not match the review contract: {0}")]
    InvalidContract(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LanguageRules {
    JavaScript,
    Python,
    Other,
}

impl LanguageRules {
    fn for_language(language: &str) -> Self {
        match language {
            "javascript" | "js" | "typescript" | "ts" | "jsx" | "tsx" => Self::JavaScript,
            "python" | "py" => Self::Python,
            _ => Self::Other,
        }
    }
}

pub fn normalize_language(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|language| !language.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

pub fn detect_common_issues(code: &str, language: &str) -> Vec<ReviewFinding> {
    let mut findings = Vec::new();

    match LanguageRules::for_language(language) {
        LanguageRules::JavaScript => {
            for found in VAR_KEYWORD_RE.find_iter(code) {
                findings.push(finding(
                    Some(line_of(code, found.start())),
                    Severity::Warning,
                    "Using 'var' instead of 'let' or 'const'",
                    "'var' is function scoped and hoisted, which leads to surprising behavior. \
                     Use 'let' for variables that change and 'const' for ones that do not.",
                    "Replace 'var' with 'let' or 'const'.",
                ));
            }

            for found in EQUALITY_OPERATOR_RE
                .find_iter(code)
                .filter(|found| found.as_str() == "==")
            {
                findings.push(finding(
                    Some(line_of(code, found.start())),
                    Severity::Info,
                    "Using loose equality (==) instead of strict (===)",
                    "Loose equality coerces types before comparing. Strict equality compares \
                     both value and type.",
                    "Use === for safer comparisons.",
                ));
            }

            let log_count = CONSOLE_LOG_RE.find_iter(code).count();
            if log_count > CONSOLE_LOG_LIMIT {
                findings.push(finding(
                    None,
                    Severity::Info,
                    &format!("Found {log_count} console.log statements"),
                    "Logging is fine while developing, but a debugger is easier for tracking \
                     down complex issues.",
                    "Try the breakpoints in your browser's developer tools.",
                ));
            }
        }
        LanguageRules::Python => {
            if let Some(found) = MUTABLE_DEFAULT_RE.find(code) {
                findings.push(finding(
                    Some(line_of(code, found.start())),
                    Severity::Warning,
                    "Mutable default argument detected",
                    "Default values are created once, so a list or dict default is shared by \
                     every call that relies on it.",
                    "Default to None and create the collection inside the function.",
                ));
            }
        }
        LanguageRules::Other => {}
    }

    findings
}

pub fn overall_assessment(finding_count: usize) -> &'static str {
    match finding_count {
        0 => {
            "Great job! Your code looks clean. Keep following best practices and add comments \
             where the logic gets tricky."
        }
        1..=2 => {
            "Good work! A few small suggestions below would improve your code. These are common \
             patterns worth watching for."
        }
        _ => {
            "Your code works, but there are several places where quality and best practices can \
             improve. Review the suggestions below."
        }
    }
}

pub fn rule_based_review(code: &str, language: &str) -> CodeReview {
    let feedback = detect_common_issues(code, language);
    CodeReview {
        overall: overall_assessment(feedback.len()).to_string(),
        feedback,
    }
}

pub fn review_messages(code: &str, language: &str) -> Vec<Turn> {
    let prompt = format!(
        "Analyze this {language} code and give constructive feedback.\n\n\
         ```{language}\n{code}\n```\n\n\
         Reply with a JSON object of this shape:\n\
         {{\n  \"feedback\": [\n    {{\n      \"line\": <line number or null>,\n      \
         \"severity\": \"error|warning|info\",\n      \"message\": \"brief description\",\n      \
         \"explanation\": \"detailed explanation\",\n      \"suggestion\": \"how to fix or improve\"\n    \
         }}\n  ],\n  \"overall\": \"overall assessment and encouragement\"\n}}\n\n\
         Focus on:\n1. Common mistakes and bugs\n2. Best practices\n\
         3. Code quality and readability\n4. Performance considerations\n5. Security issues"
    );

    vec![Turn::system(REVIEWER_INSTRUCTION), Turn::user(prompt)]
}

#[derive(Debug, Deserialize)]
struct ReplyReview {
    #[serde(default)]
    feedback: Vec<ReplyFinding>,
    #[serde(default)]
    overall: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyFinding {
    #[serde(default)]
    line: Option<Value>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    suggestion: String,
}

/// Reads the provider's reply against the review contract. Surrounding prose
/// or fences around the object are tolerated; findings without a message are
/// dropped.
pub fn parse_review_reply(reply: &str) -> Result<CodeReview, ReviewParseError> {
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        return Err(ReviewParseError::MissingObject);
    };
    if end < start {
        return Err(ReviewParseError::MissingObject);
    }

    let parsed: ReplyReview = serde_json::from_str(&reply[start..=end])
        .map_err(|err| ReviewParseError::InvalidContract(err.to_string()))?;

    let feedback: Vec<ReviewFinding> = parsed
        .feedback
        .into_iter()
        .filter(|item| !item.message.trim().is_empty())
        .map(|item| ReviewFinding {
            line: item.line.as_ref().and_then(line_number),
            severity: Severity::from_label(item.severity.as_deref().unwrap_or_default()),
            message: item.message.trim().to_string(),
            explanation: item.explanation.trim().to_string(),
            suggestion: item.suggestion.trim().to_string(),
        })
        .collect();

    let overall = parsed
        .overall
        .map(|overall| overall.trim().to_string())
        .filter(|overall| !overall.is_empty())
        .unwrap_or_else(|| overall_assessment(feedback.len()).to_string());

    Ok(CodeReview { feedback, overall })
}

fn line_number(value: &Value) -> Option<u32> {
    let line = match value {
        Value::Number(number) => number.as_u64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(line).ok().filter(|line| *line > 0)
}

fn line_of(code: &str, byte_offset: usize) -> u32 {
    let newlines = code[..byte_offset].matches('\n').count();
    u32::try_from(newlines + 1).unwrap_or(u32::MAX)
}

fn finding(
    line: Option<u32>,
    severity: Severity,
    message: &str,
    explanation: &str,
    suggestion: &str,
) -> ReviewFinding {
    ReviewFinding {
        line,
        severity,
        message: message.to_string(),
        explanation: explanation.to_string(),
        suggestion: suggestion.to_string(),
    }
}
