// Licensed under the Apache-2.0 license

//! Diagnostic kinds, severities, and source locations.
//!
//! Elaboration never aborts on the first problem: diagnostics are collected
//! on the elaborator and surfaced together once the run completes. Each
//! diagnostic carries the source position inherited from the parse tree node
//! that triggered it.

use std::fmt;
use thiserror::Error;

/// A line/column position in the source text. Lines are 1-based, columns
/// 0-based (matching what the lexer reports for each token).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Span { line, column }
    }
}

/// Diagnostic severity. Warnings never abort elaboration; a single error
/// makes the final root `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// The closed set of diagnostic kinds the toolkit reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum DiagnosticKind {
    #[error("SyntaxError")]
    SyntaxError,
    #[error("UnresolvedName")]
    UnresolvedName,
    #[error("UnresolvedType")]
    UnresolvedType,
    #[error("DuplicateName")]
    DuplicateName,
    #[error("DuplicateType")]
    DuplicateType,
    #[error("TypeMismatch")]
    TypeMismatch,
    #[error("BadParameter")]
    BadParameter,
    #[error("DivisionByZero")]
    DivisionByZero,
    #[error("BadShift")]
    BadShift,
    #[error("OverflowInWidth")]
    OverflowInWidth,
    #[error("IllegalChild")]
    IllegalChild,
    #[error("ForwardReference")]
    ForwardReference,
    #[error("BitRangeInconsistent")]
    BitRangeInconsistent,
    #[error("FieldOverlap")]
    FieldOverlap,
    #[error("FieldOutOfRange")]
    FieldOutOfRange,
    #[error("InstanceOverlap")]
    InstanceOverlap,
    #[error("AddressOverlap")]
    AddressOverlap,
    #[error("MisalignedAddress")]
    MisalignedAddress,
    #[error("Unsupported")]
    Unsupported,
}

impl DiagnosticKind {
    /// Default severity for this kind. Only misaligned addresses are
    /// non-fatal.
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticKind::MisalignedAddress => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// One reported problem, tied to a source position.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    /// Source path; filled in by whoever accumulates the diagnostic.
    pub file: String,
    pub span: Span,
    /// Dotted path of the elaborated node the problem relates to, when one
    /// exists.
    pub related: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            severity: kind.severity(),
            message: message.into(),
            file: String::new(),
            span,
            related: None,
        }
    }

    pub fn with_related(mut self, path: impl Into<String>) -> Self {
        self.related = Some(path.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = if self.file.is_empty() {
            "<input>"
        } else {
            &self.file
        };
        write!(
            f,
            "{}:{}:{}: {}: {}",
            file, self.span.line, self.span.column, self.kind, self.message
        )?;
        if let Some(related) = &self.related {
            write!(f, " ({})", related)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the list is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}
