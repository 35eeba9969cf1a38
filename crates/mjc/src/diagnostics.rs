//! User-facing compile errors.
//!
//! Unlike [`crate::Error`], these are accumulated rather than returned, so one
//! run can surface every problem it finds before the image is suppressed.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Diagnostic {
    #[error("no entry routine `{name}` found (expected `public static void {name}(String[] args)`)")]
    NoEntryPoint { name: String },

    #[error("multiple entry routines named `{name}`: {}", .candidates.join(", "))]
    MultipleEntryPoints {
        name: String,
        candidates: Vec<String>,
    },

    #[error("call to undefined routine `{routine}` ({sites} call site(s))")]
    UnresolvedCall { routine: String, sites: usize },
}

/// Shared error sink for one compilation.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        tracing::warn!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Takes every recorded diagnostic, leaving the reporter empty.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}
