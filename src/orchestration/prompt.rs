use crate::store::KnowledgeFile;
use crate::tools::ToolDefinition;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const TOOLS_CLAUSE: &str = "You have access to tools that perform real actions. \
Use them proactively whenever the user's request needs one. \
Never claim that an action succeeded unless a tool result in this conversation confirms it. \
If a tool fails, say so plainly and share the error.";

const NO_TOOLS_CLAUSE: &str = "You have no tools and cannot perform any external action \
such as sending messages, calling APIs or changing records. \
If the user asks for one, say clearly that you cannot do it. \
Never pretend an action was completed.";

fn knowledge_section(files: &[KnowledgeFile]) -> Option<String> {
    let sections = files
        .iter()
        .filter(|file| !file.content.trim().is_empty())
        .map(|file| format!("### {}\n{}", file.name, file.content.trim()))
        .collect::<Vec<_>>();
    if sections.is_empty() {
        return None;
    }
    Some(format!(
        "## Knowledge Base\nAnswer using the following reference material when relevant.\n\n{}",
        sections.join("\n\n")
    ))
}

fn tools_section(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return NO_TOOLS_CLAUSE.to_string();
    }
    let listing = tools
        .iter()
        .map(|tool| format!("- {}: {}", tool.name, tool.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{TOOLS_CLAUSE}\n\nAvailable tools:\n{listing}")
}

/// Agent prompt, then knowledge base files, then the capability clause.
pub fn build_system_prompt(
    configured: Option<&str>,
    knowledge: &[KnowledgeFile],
    tools: &[ToolDefinition],
) -> String {
    let mut parts = vec![configured
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .to_string()];
    if let Some(section) = knowledge_section(knowledge) {
        parts.push(section);
    }
    parts.push(tools_section(tools));
    parts.join("\n\n")
}
