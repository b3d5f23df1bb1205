use crate::llm::types::ChatMessage;
use crate::rules::serialize::serialize_rule;

use super::session::{EmailMessage, SessionContext};

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_body_length: usize,
    max_subject_length: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilderConfig {
    pub max_body_length: Option<usize>,
    pub max_subject_length: Option<usize>,
}

const DEFAULT_MAX_BODY_LENGTH: usize = 8_000;
const DEFAULT_MAX_SUBJECT_LENGTH: usize = 500;

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            max_body_length: DEFAULT_MAX_BODY_LENGTH,
            max_subject_length: DEFAULT_MAX_SUBJECT_LENGTH,
        }
    }

    pub fn with_config(config: PromptBuilderConfig) -> Self {
        Self {
            max_body_length: config.max_body_length.unwrap_or(DEFAULT_MAX_BODY_LENGTH),
            max_subject_length: config
                .max_subject_length
                .unwrap_or(DEFAULT_MAX_SUBJECT_LENGTH),
        }
    }

    /// Build the opening conversation for a repair session: one system
    /// message with the working rules, one user message with the session
    /// context. Tool results are appended by the orchestrator as the loop
    /// progresses.
    pub fn build(&self, session: &SessionContext) -> Vec<ChatMessage> {
        let system = build_system_message();

        let mut sections = Vec::new();
        sections.push(build_user_profile_section(session));

        if let Some(categories) = session.categories.as_deref() {
            sections.push(build_category_section(
                categories,
                session.sender_category.as_deref(),
                &session.original.from_email,
            ));
        }

        sections.push(build_rules_section(session));
        sections.push(self.build_email_section("ORIGINAL EMAIL", &session.original));
        sections.push(self.build_email_section("CORRECTION REQUEST", &session.correction));
        sections.push(build_task_directive());

        vec![
            system,
            ChatMessage::user(sections.join("\n\n")),
        ]
    }

    fn build_email_section(&self, title: &str, email: &EmailMessage) -> String {
        let mut lines = Vec::new();
        lines.push(format!("{title}:"));
        lines.push(format!("From: {}", email.from_email));
        if let Some(subject) = email.subject.as_ref() {
            lines.push(format!(
                "Subject: {}",
                truncate_text(subject, self.max_subject_length)
            ));
        }
        if let Some(body) = get_body_text(email, self.max_body_length) {
            lines.push("Body:".to_string());
            lines.push(body);
        }
        lines.join("\n")
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_system_message() -> ChatMessage {
    // The tool-preference ordering below is advisory only: nothing in the
    // orchestrator checks it.
    let content = [
        "You repair a user's email-handling rules based on their complaint about how one email was handled.",
        "Inspect the rules you are given, then fix them by calling the available tools.",
        "Prefer editing an existing rule over creating a new one.",
        "When a rule has a group, prefer adding or removing group items over broadening its AI instructions.",
        "Only add recurring subject patterns to a group, never one-off values.",
        "Make the smallest change that fixes the complaint.",
        "A tool result of {\"error\": ...} means that call did not change anything; adjust and try again.",
        "When you are done, or if no change is needed, call the `reply` tool with a short message for the user.",
    ]
    .join("\n");

    ChatMessage::system(content)
}

fn build_user_profile_section(session: &SessionContext) -> String {
    let mut lines = Vec::new();
    lines.push("USER PROFILE:".to_string());
    lines.push(format!("Email: {}", session.user.email));
    if let Some(about) = session.user.about.as_ref() {
        if !about.trim().is_empty() {
            lines.push(format!("About: {about}"));
        }
    }
    lines.join("\n")
}

fn build_category_section(
    categories: &[String],
    sender_category: Option<&str>,
    sender: &str,
) -> String {
    let mut lines = Vec::new();
    lines.push("SENDER CATEGORIES:".to_string());
    lines.push(format!("Known categories: {}", categories.join(", ")));
    match sender_category {
        Some(category) => lines.push(format!("{sender} is currently categorized as: {category}")),
        None => lines.push(format!("{sender} has no category assigned")),
    }
    lines.join("\n")
}

/// When a rule matched the original email only that rule is shown; otherwise
/// the whole rule set is, so the model can pick a target or decide none fits.
fn build_rules_section(session: &SessionContext) -> String {
    if let Some(matched) = session.matched_rule() {
        return format!("MATCHED RULE:\n{}", serialize_rule(matched));
    }

    if session.rules.is_empty() {
        return "USER'S RULES:\n(none)".to_string();
    }

    let rendered = session
        .rules
        .iter()
        .map(serialize_rule)
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("USER'S RULES (no rule matched this email):\n{rendered}")
}

fn build_task_directive() -> String {
    [
        "TASK:",
        "The user says the original email was handled wrongly.",
        "Use the tools to repair the rules so that this kind of email is handled the way the correction asks.",
        "Finish with the `reply` tool.",
    ]
    .join("\n")
}

pub fn truncate_text(text: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }

    let char_count = text.chars().count();
    if char_count <= max_len {
        return text.to_string();
    }

    let ellipsis = "...";
    if max_len <= ellipsis.len() {
        return ellipsis[..max_len].to_string();
    }

    let target = max_len - ellipsis.len();
    let mut truncated: String = text.chars().take(target).collect();

    if let Some((idx, _)) = truncated.char_indices().rfind(|(_, ch)| ch.is_whitespace()) {
        truncated.truncate(idx);
    }

    truncated.push_str(ellipsis);
    truncated
}

pub fn strip_html(html: &str) -> String {
    let mut bytes = std::io::Cursor::new(html.as_bytes());
    html2text::from_read(&mut bytes, 80)
        .trim()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn get_body_text(email: &EmailMessage, max_len: usize) -> Option<String> {
    if let Some(plain) = email.body_plain.as_ref() {
        return Some(truncate_text(plain, max_len));
    }

    email
        .body_html
        .as_ref()
        .map(|html| truncate_text(&strip_html(html), max_len))
}
