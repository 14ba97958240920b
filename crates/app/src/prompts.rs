//! Prompt templates and structured-output schemas for enrichment calls.

use serde_json::{json, Value};

/// Cap the conversation text quoted into a prompt.
const EXCERPT_CHARS: usize = 600;

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}

pub fn conversation_title(user_text: &str, model_text: &str) -> String {
    format!(
        "Write a short title (five words or fewer) for a conversation that \
         starts like this. Reply with the title only, no quotes.\n\n\
         User: {}\nAssistant: {}",
        excerpt(user_text),
        excerpt(model_text)
    )
}

pub fn task_suggestion(user_text: &str, model_text: &str) -> String {
    format!(
        "Here is the latest exchange of a conversation. Decide whether it \
         implies a concrete follow-up task the user might want to track. \
         Only suggest a task for actionable follow-ups, not for questions \
         that were fully answered.\n\n\
         User: {}\nAssistant: {}",
        excerpt(user_text),
        excerpt(model_text)
    )
}

pub fn task_suggestion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "taskSuggested": { "type": "boolean" },
            "taskTitle": { "type": "string" },
            "taskNotes": { "type": "string" }
        },
        "required": ["taskSuggested"]
    })
}

pub fn subtask_expansion(title: &str, notes: &str) -> String {
    format!(
        "Break this task into between three and seven short, actionable \
         subtasks. Reply with the subtasks only.\n\n\
         Task: {}\nNotes: {}",
        excerpt(title),
        excerpt(notes)
    )
}

pub fn subtask_list_schema() -> Value {
    json!({
        "type": "array",
        "items": { "type": "string" }
    })
}

pub fn task_title(text: &str) -> String {
    format!(
        "Condense the following into a short task title (eight words or \
         fewer). Reply with the title only, no quotes.\n\n{}",
        excerpt(text)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_text_is_excerpted() {
        let long = "x".repeat(1000);
        let prompt = task_title(&long);
        assert!(prompt.len() < 800);
        assert!(prompt.ends_with("..."));
    }
}
