//! Config templating collaborator.
//!
//! Rendering of variable references is owned by a separate component; the
//! notification path only needs to know which variables a config references
//! and how to turn a stored config into the bytes sent to the module.

use bytes::Bytes;
use confmesh_store::Config;
use thiserror::Error;

/// Errors raised while inspecting or rendering a config.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The config document is not valid UTF-8.
    #[error("config is not valid utf-8")]
    InvalidEncoding,

    /// A `{{` was opened and never closed.
    #[error("unterminated variable reference at byte {offset}")]
    Unterminated {
        /// Byte offset of the opening braces.
        offset: usize,
    },
}

/// Extracts variable references from and renders config documents.
pub trait ConfigTemplating: Send + Sync {
    /// Names of the variables `data` references, in first-seen order, deduplicated.
    fn variables(&self, data: &[u8]) -> Result<Vec<String>, TemplateError>;

    /// Produces the effective config sent to the module.
    fn render(&self, config: &Config) -> Result<Bytes, TemplateError>;
}

/// Recognizes `{{ var:NAME }}` references and sends configs unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTemplating;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const VAR_PREFIX: &str = "var:";

impl ConfigTemplating for PlainTemplating {
    fn variables(&self, data: &[u8]) -> Result<Vec<String>, TemplateError> {
        let text = std::str::from_utf8(data).map_err(|_| TemplateError::InvalidEncoding)?;
        let mut names: Vec<String> = Vec::new();
        let mut rest = text;
        let mut base = 0;
        while let Some(start) = rest.find(OPEN) {
            let after = &rest[start + OPEN.len()..];
            let end = after.find(CLOSE).ok_or(TemplateError::Unterminated {
                offset: base + start,
            })?;
            let inner = after[..end].trim();
            if let Some(name) = inner.strip_prefix(VAR_PREFIX) {
                let name = name.trim();
                if !name.is_empty() && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            let consumed = start + OPEN.len() + end + CLOSE.len();
            base += consumed;
            rest = &rest[consumed..];
        }
        Ok(names)
    }

    fn render(&self, config: &Config) -> Result<Bytes, TemplateError> {
        Ok(config.data.clone())
    }
}
