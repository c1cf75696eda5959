//! Subject validation and durable consumer naming

use crate::config::InstanceIdentity;
use crate::plan::variable_placeholder_regex;
use sha2::{Digest, Sha256};

const WHITESPACE: [char; 5] = ['\t', '\n', '\u{000C}', '\r', ' '];

/// Whether `subject` is a valid NATS subject
///
/// Tokens are dot-separated and non-empty, may not contain whitespace, and
/// nothing may follow a `>` token.
pub fn is_valid_subject(subject: &str) -> bool {
    if subject.is_empty() {
        return false;
    }

    let mut saw_full_wildcard = false;
    for token in subject.split('.') {
        if saw_full_wildcard || token.is_empty() {
            return false;
        }
        if token.contains(WHITESPACE) {
            return false;
        }
        if token == ">" {
            saw_full_wildcard = true;
        }
    }
    true
}

/// Validate a subject that may still hold `$$N$$` placeholders
pub fn is_valid_subject_template(subject: &str) -> bool {
    let Ok(placeholder) = variable_placeholder_regex() else {
        return false;
    };
    is_valid_subject(&placeholder.replace_all(subject, "a"))
}

/// Durable consumer name unique to this instance and subject set
///
/// `<consumer>-<hash>`, where the hash covers the instance identifier and
/// every subject in order.
pub fn durable_consumer_name(
    consumer: &str,
    instance: &InstanceIdentity,
    subjects: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instance.identifier().as_bytes());
    for subject in subjects {
        hasher.update(subject.as_bytes());
    }
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    format!("{}-{:016x}", consumer, u64::from_be_bytes(prefix))
}
