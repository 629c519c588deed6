//! Retrieval-augmented answer synthesis.
//!
//! One call to [`answer_query`] is one conversation turn: the user message
//! is logged, the closest fragments are retrieved, a grounded prompt is
//! sent to the chat model, and the reply is logged. Collaborator failures
//! become the answer text so the turn always completes; only registry
//! failures escape.

use crate::error::{EngineError, Result};
use crate::index::VectorIndex;
use crate::llm::ChatModel;
use crate::models::{PromptMessage, QueryResult, Role};
use crate::registry::Registry;

/// Context sent when retrieval finds nothing.
pub const NO_CONTEXT: &str = "No relevant context found in documents.";

/// Everything one turn needs besides the query.
pub struct AnswerContext<'a> {
    pub registry: &'a Registry,
    pub index: &'a mut VectorIndex,
    pub chat: &'a dyn ChatModel,
    pub system_prompt: &'a str,
    pub top_k: usize,
}

pub fn answer_query(ctx: AnswerContext<'_>, query: &str) -> Result<String> {
    ctx.registry.append_message(Role::User, query)?;

    let answer = match ctx.index.query(query, ctx.top_k) {
        Ok(results) => {
            let messages = build_prompt(ctx.system_prompt, &join_context(&results), query);
            match ctx.chat.complete(&messages) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, model = ctx.chat.model_name(), "generation failed");
                    failure_answer(&e)
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "retrieval failed");
            failure_answer(&e)
        }
    };

    ctx.registry.append_message(Role::Assistant, &answer)?;
    Ok(answer)
}

/// Joins retrieved texts with blank lines, or returns [`NO_CONTEXT`].
pub fn join_context(results: &[QueryResult]) -> String {
    let context = results
        .iter()
        .map(|r| r.metadata.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if context.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        context
    }
}

pub fn build_prompt(system_prompt: &str, context: &str, query: &str) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(system_prompt),
        PromptMessage::user(format!("Context:\n{}\n\nQuery: {}", context, query)),
    ]
}

fn failure_answer(e: &EngineError) -> String {
    format!("Error generating response: {}", e)
}
