//! Diagnostic messages produced by constraint validation

use crate::identity::Identity;
use serde::{Deserialize, Serialize};

/// Severity of a diagnostic message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Blocks the commit unless silenced
    Error,
    /// Informational, never blocks
    Warning,
}

/// One violation (or warning) reported by a constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    /// Severity
    pub kind: MessageKind,
    /// Human-readable text
    pub message: String,
    /// Offending element, if any
    pub element_id: Option<Identity>,
    /// Offending property, if any
    pub property_name: Option<String>,
    /// Set by an error subscriber to stop the message from aborting
    pub silent: bool,
}

impl DiagnosticMessage {
    /// Error-level message
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, message)
    }

    /// Warning-level message
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(MessageKind::Warning, message)
    }

    fn new(kind: MessageKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            element_id: None,
            property_name: None,
            silent: false,
        }
    }

    /// Tag with the offending element
    pub fn for_element(mut self, id: Identity) -> Self {
        self.element_id = Some(id);
        self
    }

    /// Tag with the offending property
    pub fn for_property(mut self, name: impl Into<String>) -> Self {
        self.property_name = Some(name.into());
        self
    }

    /// Check if this is an error-level message
    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }

    /// Check if this message still blocks a commit
    pub fn is_blocking(&self) -> bool {
        self.is_error() && !self.silent
    }
}

impl std::fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.kind {
            MessageKind::Error => "error",
            MessageKind::Warning => "warning",
        };
        write!(f, "{}: {}", level, self.message)?;
        if let Some(id) = &self.element_id {
            write!(f, " ({}", id)?;
            if let Some(p) = &self.property_name {
                write!(f, ".{}", p)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
