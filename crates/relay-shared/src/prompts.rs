use serde::{Deserialize, Serialize};

use crate::conversation::{DEFAULT_HISTORY_WINDOW, history_tail};
use crate::models::{ContentPart, Role, Turn, TurnContent};

const ATTACHED_MATERIAL_SUBJECT: &str = "the attached material";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureMode {
    Explainer,
    Code,
    Roadmap,
    Summary,
    Ideas,
}

impl FeatureMode {
    pub const ALL: [Self; 5] = [
        Self::Explainer,
        Self::Code,
        Self::Roadmap,
        Self::Summary,
        Self::Ideas,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explainer => "explainer",
            Self::Code => "code",
            Self::Roadmap => "roadmap",
            Self::Summary => "summary",
            Self::Ideas => "ideas",
        }
    }

    pub fn resolve(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Explainer;
        };
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .unwrap_or(Self::Explainer)
    }

    pub const fn system_instruction(self) -> &'static str {
        match self {
            Self::Explainer => {
                "You are a patient tutor for beginners. Explain ideas in plain language, build \
                 from first principles, and use concrete analogies and short examples. Use \
                 Markdown headings and lists where they help."
            }
            Self::Code => {
                "You are a senior software engineer mentoring a learner. Walk through code line \
                 by line where useful, explain intent before mechanics, point out bugs and risky \
                 patterns, and suggest idiomatic improvements. Use fenced code blocks."
            }
            Self::Roadmap => {
                "You are a learning-path planner. You produce structured, checkable study \
                 roadmaps whose milestones are numbered by day, step, or phase, each with a \
                 short list of concrete tasks written as Markdown bullets."
            }
            Self::Summary => {
                "You are a precise note-taker. Condense material into concise bullet points, \
                 keep every key fact, and never invent details that are not in the source."
            }
            Self::Ideas => {
                "You are a creative project mentor. Suggest portfolio projects that are \
                 original, feasible for a learner, and clearly scoped, with the skills each one \
                 demonstrates."
            }
        }
    }

    pub fn user_instruction(self, raw_input: &str) -> String {
        let input = raw_input.trim();
        let subject = if input.is_empty() {
            ATTACHED_MATERIAL_SUBJECT
        } else {
            input
        };

        match self {
            Self::Explainer => format!(
                "Explain the concept of \"{subject}\" in simple terms suitable for a beginner. \
                 Use analogies if possible."
            ),
            Self::Code => format!("Explain the following code snippet in detail:\n\n{subject}"),
            Self::Roadmap => format!(
                "Create a step-by-step learning roadmap for \"{subject}\".\n\n\
                 Structure requirements:\n\
                 - Organize the roadmap into at least 5 milestones.\n\
                 - Start every milestone with a numbered Markdown heading such as \
                 \"### Day 1: ...\", \"### Step 1: ...\" or \"### Phase 1: ...\", numbered \
                 consecutively.\n\
                 - Under each milestone list 3 to 5 tasks as Markdown bullets (\"- \"), each a \
                 single concrete, checkable action.\n\
                 - Include key topics and recommended resources inside the tasks."
            ),
            Self::Summary => format!(
                "Summarize the following notes into concise bullet points:\n\n{subject}"
            ),
            Self::Ideas => format!(
                "Suggest 3 unique project ideas related to \"{subject}\" for a portfolio."
            ),
        }
    }
}

/// Builds the provider message list for one request. Performs no I/O.
///
/// With images there is no system message: the system instruction becomes the
/// leading text part of a single multimodal user message.
pub fn assemble_messages(
    mode: FeatureMode,
    raw_input: &str,
    history: &[Turn],
    image_refs: &[String],
) -> Vec<Turn> {
    let system_instruction = mode.system_instruction();
    let user_instruction = mode.user_instruction(raw_input);
    let history = history_tail(history, DEFAULT_HISTORY_WINDOW);

    let mut messages = Vec::with_capacity(history.len() + 2);

    if image_refs.is_empty() {
        messages.push(Turn::system(system_instruction));
        messages.extend(history);
        messages.push(Turn::user(user_instruction));
        return messages;
    }

    let mut parts = Vec::with_capacity(image_refs.len() + 1);
    parts.push(ContentPart::text(format!(
        "{system_instruction}\n\n{user_instruction}"
    )));
    parts.extend(image_refs.iter().map(|image_ref| ContentPart::image(image_ref.as_str())));

    messages.extend(history);
    messages.push(Turn {
        role: Role::User,
        content: TurnContent::Parts(parts),
    });
    messages
}
