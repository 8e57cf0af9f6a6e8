use crate::error::ModelError;
use crate::llm::ChatModel;
use crate::models::ChatMessage;

/// Head budget applied before summarization. Keeps a single document under
/// the completion provider's token-rate ceiling; everything past the budget
/// is silently dropped, so only the head of a very long document is
/// summarized.
pub const SUMMARY_CHAR_BUDGET: usize = 12_000;

const SUMMARY_TEMPERATURE: f32 = 0.0;

const SUMMARIZE_PROMPT: &str = "Summarize the following document concisely, highlighting key \
points, dates, decisions, and action items:\n\n{text}\n\nProvide a clear, structured summary.";

const MERGE_PROMPT: &str = "You are summarizing uploaded documents incrementally. Integrate the \
new information into the existing summary:\n\nEXISTING SUMMARY:\n{old_summary}\n\nNEW \
INFORMATION:\n{new_summary}\n\nRECENT USER QUESTIONS (Context):\n{context}\n\nTask:\n1. \
Integrate new information seamlessly\n2. Resolve any conflicts or contradictions\n3. Keep a \
consistent tone and structure\n4. Highlight details relevant to the user's recent questions\n5. \
Remove redundancies\n6. Maintain chronological order where applicable\n\nReturn the refined, \
integrated summary.";

pub const EMPTY_CONTEXT: &str = "No recent context.";

/// Formats the given messages (expected oldest-first) as `ROLE: content`
/// lines for use as merge context.
pub fn recent_context(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.as_str().to_uppercase(), message.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Two-stage summary reduction: summarize the new document alone, then fold
/// it into the session's running summary weighted by recent chat context.
pub struct Summarizer<M: ChatModel> {
    model: M,
}

impl<M: ChatModel> Summarizer<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// One model call over the head of the document.
    pub async fn summarize_new(&self, text: &str) -> Result<String, ModelError> {
        let trimmed = truncate_chars(text, SUMMARY_CHAR_BUDGET);
        let prompt = SUMMARIZE_PROMPT.replace("{text}", trimmed);
        self.model.complete(&prompt, SUMMARY_TEMPERATURE).await
    }

    /// With no prior summary this is the identity on `new_summary` and makes
    /// no model call. Otherwise one call integrates old and new, weighted
    /// toward `context`.
    pub async fn merge(
        &self,
        new_summary: &str,
        old_summary: Option<&str>,
        context: &str,
    ) -> Result<String, ModelError> {
        let old_summary = match old_summary {
            Some(existing) => existing,
            None => return Ok(new_summary.to_string()),
        };

        let prompt = MERGE_PROMPT
            .replace("{old_summary}", old_summary)
            .replace("{new_summary}", new_summary)
            .replace("{context}", context);
        self.model.complete(&prompt, SUMMARY_TEMPERATURE).await
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use crate::error::ModelError;
    use crate::llm::ChatModel;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Test double that records every prompt and answers from a fixed script
    /// (the last reply repeats once the script runs out).
    pub struct ScriptedModel {
        pub prompts: Mutex<Vec<String>>,
        replies: Vec<String>,
        pub fail: bool,
    }

    impl ScriptedModel {
        pub fn replying(replies: &[&str]) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                replies: replies.iter().map(|reply| reply.to_string()).collect(),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                replies: Vec::new(),
                fail: true,
            }
        }

        pub fn call_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String, ModelError> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if self.fail {
                return Err(ModelError::Response("scripted failure".to_string()));
            }
            let position = (prompts.len() - 1).min(self.replies.len().saturating_sub(1));
            self.replies
                .get(position)
                .cloned()
                .ok_or_else(|| ModelError::Response("script exhausted".to_string()))
        }
    }
}
