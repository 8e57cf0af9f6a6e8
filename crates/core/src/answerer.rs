use crate::error::ModelError;
use crate::llm::ChatModel;
use crate::models::RetrievedChunk;
use regex::Regex;

pub const NO_DOCUMENTS_REPLY: &str = "No documents uploaded yet. Please upload PDFs first.";
pub const INDEX_UNAVAILABLE_REPLY: &str = "Vector store not found. Please re-upload documents.";
pub const NO_MATCH_REPLY: &str =
    "I couldn't find relevant information in the documents to answer your question.";

const ANSWER_TEMPERATURE: f32 = 0.0;

const TABLE_DIRECTIVE: &str = "\n\nIMPORTANT: Format your answer as a proper markdown table. Use \
this exact format:\n| Column Header 1 | Column Header 2 | Column Header 3 |\n|---|---|---|\n| \
Row 1 Col 1 | Row 1 Col 2 | Row 1 Col 3 |\n| Row 2 Col 1 | Row 2 Col 2 | Row 2 Col 3 |\n\n\
Requirements:\n- First row must be headers with | separators\n- Second row must have \
|---|---|---| (dashes for alignment)\n- Each subsequent row must have values separated by |\n- \
Use | at the start and end of each row\n- Do NOT add any text before or after the table";

const BULLET_DIRECTIVE: &str = "\n\nIMPORTANT: Format your answer as a bullet-point list.";
const PARAGRAPH_DIRECTIVE: &str = "\n\nIMPORTANT: Format your answer as one cohesive paragraph.";
const DETAILED_DIRECTIVE: &str = "\n\nIMPORTANT: Provide a detailed and comprehensive answer \
with explanations, examples, and nuances.";
const BRIEF_DIRECTIVE: &str =
    "\n\nIMPORTANT: Keep your answer brief and concise, maximum 2-3 sentences.";

/// Maps a query onto an output-format directive by scanning for trigger
/// keywords. First match wins; the priority order below is load-bearing
/// ("detailed table" gets the table directive, not the detailed one).
pub fn classify_format(query: &str) -> Option<String> {
    let lowered = query.to_lowercase();

    if lowered.contains("table") {
        return Some(TABLE_DIRECTIVE.to_string());
    }
    if lowered.contains("bullet") || lowered.contains("list") {
        return Some(BULLET_DIRECTIVE.to_string());
    }
    if lowered.contains("paragraph") || lowered.contains("prose") {
        return Some(PARAGRAPH_DIRECTIVE.to_string());
    }
    if lowered.contains("detail") || lowered.contains("comprehensive") {
        return Some(DETAILED_DIRECTIVE.to_string());
    }
    if lowered.contains("brief") || lowered.contains("concise") || lowered.contains("short") {
        return Some(BRIEF_DIRECTIVE.to_string());
    }
    if lowered.contains("lines") {
        let pattern = Regex::new(r"(\d+)\s+lines?").ok()?;
        let count = pattern.captures(&lowered)?.get(1)?.as_str().to_string();
        return Some(format!(
            "\n\nIMPORTANT: Provide your answer in exactly {count} lines or fewer."
        ));
    }

    None
}

fn build_prompt(context: &str, query: &str, directive: Option<&str>) -> String {
    format!(
        "Based on the following context from documents, answer the question. If the answer is \
         not in the context, say so.\n\nContext:\n{context}\n\nQuestion: {query}{}\n\nAnswer:",
        directive.unwrap_or_default()
    )
}

/// Turns retrieved chunks plus a query into one format-aware model call.
pub struct Answerer<M: ChatModel> {
    model: M,
}

impl<M: ChatModel> Answerer<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Empty retrieval short-circuits to the fixed not-found reply without a
    /// model call; otherwise exactly one call per query.
    pub async fn answer(
        &self,
        retrieved: &[RetrievedChunk],
        query: &str,
    ) -> Result<String, ModelError> {
        if retrieved.is_empty() {
            return Ok(NO_MATCH_REPLY.to_string());
        }

        let context = retrieved
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let directive = classify_format(query);
        let prompt = build_prompt(&context, query, directive.as_deref());
        self.model.complete(&prompt, ANSWER_TEMPERATURE).await
    }
}
