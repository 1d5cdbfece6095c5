//! Replaces the variable parts of an error so recurrences group together.

use regex::Regex;
use std::sync::LazyLock;

struct Patterns {
    address: Regex,
    uuid: Regex,
    number: Regex,
    email: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Patterns {
            address: Regex::new(r"0x[0-9a-fA-F]+")?,
            // Lowercase hex only, matched anywhere inside a token
            uuid: Regex::new(r"[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}")?,
            number: Regex::new(r"\b\d+(?:\.\d+)?\b")?,
            email: Regex::new(r"\S+@\S+")?,
        })
    }
}

static PATTERNS: LazyLock<Option<Patterns>> = LazyLock::new(|| match Patterns::compile() {
    Ok(patterns) => Some(patterns),
    Err(e) => {
        tracing::error!(error = %e, "Failed to compile sanitization patterns");
        None
    }
});

/// Applies the substitutions in order: memory addresses, UUIDs, numbers,
/// then email addresses.
///
/// Returns `None` when the patterns are unavailable, leaving the caller to
/// fall back to a coarser key.
pub fn sanitize(input: &str) -> Option<String> {
    let patterns = PATTERNS.as_ref()?;
    let text = patterns.address.replace_all(input, "0xADDRESS");
    let text = patterns.uuid.replace_all(&text, "[UUID]");
    let text = patterns.number.replace_all(&text, "[NUMBER]");
    let text = patterns.email.replace_all(&text, "[EMAIL]");
    Some(text.into_owned())
}
