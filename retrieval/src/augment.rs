//! Prompt augmentation with retrieved context.

use crate::service::RetrievedDocument;

/// Join retrieved documents, one per line, nearest first.
pub fn context_block(results: &[RetrievedDocument]) -> String {
    results
        .iter()
        .map(|r| r.document.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap `user_message` with the retrieved context for a generation backend.
///
/// With nothing retrieved the message is passed through unchanged.
pub fn augmented_message(results: &[RetrievedDocument], user_message: &str) -> String {
    if results.is_empty() {
        return user_message.to_string();
    }

    let context = context_block(results);
    format!(
        "Use the following context to answer the user.\n\nContext:\n{context}\n\nUser: {user_message}"
    )
}
