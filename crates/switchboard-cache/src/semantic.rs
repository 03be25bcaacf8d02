//! Prompt-prefix clustering for near-duplicate lookups
//!
//! Two requests land in the same cluster when the first few words of their
//! last user message match and everything else that shapes the answer is
//! identical: system instructions and sampling parameters. This is a cheap
//! heuristic, not embedding search.

use switchboard_core::{GenerationParams, Message, Role, normalize_content};

/// Words of the normalized prompt that form the cluster key
const KEY_WORDS: usize = 10;

/// Hex characters of the digest kept as the key
const KEY_LEN: usize = 16;

/// Separates key parts so adjacent parts cannot run together
const SEPARATOR: char = '\u{1f}';

/// Cluster key for a request
///
/// `None` when there is no non-blank user prompt, or when earlier assistant
/// turns mean the last user message alone does not determine the answer.
pub fn semantic_key(messages: &[Message], params: &GenerationParams) -> Option<String> {
    if messages.iter().any(|m| m.role == Role::Assistant) {
        return None;
    }

    let prompt = messages.iter().rev().find(|m| m.role == Role::User)?;
    let normalized = normalize_content(&prompt.content);
    let head = normalized.split(' ').take(KEY_WORDS).collect::<Vec<_>>().join(" ");
    if head.is_empty() {
        return None;
    }

    let mut material = String::new();
    for system in messages.iter().filter(|m| m.role == Role::System) {
        material.push_str(&normalize_content(&system.content));
        material.push(SEPARATOR);
    }
    match params.temperature {
        // Adding positive zero folds -0.0 into 0.0
        Some(t) => material.push_str(&(t + 0.0).to_bits().to_string()),
        None => material.push('-'),
    }
    material.push(SEPARATOR);
    match params.max_tokens {
        Some(n) => material.push_str(&n.to_string()),
        None => material.push('-'),
    }
    material.push(SEPARATOR);
    material.push_str(&head);

    let mut digest = format!("{:x}", md5::compute(material.as_bytes()));
    digest.truncate(KEY_LEN);
    Some(digest)
}
