//! Diagnostics collected while preparing and running a study.
//!
//! Not every problem in a contingency study is an error. Switching rows that
//! name elements absent from the case, elements without a thermal rating and
//! contingencies that could not be set up are recorded here so they travel
//! with the report instead of living only in the log.
//!
//! # Example
//!
//! ```
//! use gridcheck_core::diagnostics::Diagnostics;
//!
//! let mut diag = Diagnostics::new();
//! diag.add_warning_with_entity("rating", "no rating, excluded from loading checks", "Circuit 1-2 '1'");
//! diag.add_error_with_entity("switching", "element not found", "Outage-A");
//!
//! assert_eq!(diag.warning_count(), 1);
//! assert_eq!(diag.error_count(), 1);
//! assert_eq!(diag.summary(), "1 warning, 1 error");
//! ```

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unusual but processing continued
    Warning,
    /// An element or contingency could not be processed
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub severity: Severity,
    /// Grouping such as "switching", "rating", "input", "scope"
    pub category: String,
    pub message: String,
    /// Contingency or element the issue is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl DiagnosticIssue {
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            entity: None,
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.severity.as_str(), self.category, self.message)?;
        if let Some(entity) = &self.entity {
            write!(f, " ({entity})")?;
        }
        Ok(())
    }
}

/// Issues of one study, in the order they were raised.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: DiagnosticIssue) {
        self.issues.push(issue);
    }

    pub fn add_warning_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.add(DiagnosticIssue::new(Severity::Warning, category, message).with_entity(entity));
    }

    pub fn add_error_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.add(DiagnosticIssue::new(Severity::Error, category, message).with_entity(entity));
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Issues about one contingency or element.
    pub fn for_entity<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a DiagnosticIssue> {
        self.issues
            .iter()
            .filter(move |i| i.entity.as_deref() == Some(entity))
    }

    pub fn summary(&self) -> String {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        match (self.warning_count(), self.error_count()) {
            (0, 0) => "No issues".to_string(),
            (w, 0) => format!("{w} warning{}", plural(w)),
            (0, e) => format!("{e} error{}", plural(e)),
            (w, e) => format!("{w} warning{}, {e} error{}", plural(w), plural(e)),
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Diagnostics: {}", self.summary())?;
        for issue in &self.issues {
            writeln!(f, "  {issue}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_pluralises() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.summary(), "No issues");
        diag.add_warning_with_entity("rating", "unrated", "Circuit 1-2 '1'");
        assert_eq!(diag.summary(), "1 warning");
        diag.add_warning_with_entity("rating", "unrated", "Circuit 1-2 '2'");
        diag.add_error_with_entity("switching", "failed", "Outage-A");
        assert_eq!(diag.summary(), "2 warnings, 1 error");
    }

    #[test]
    fn issue_display_includes_entity() {
        let issue = DiagnosticIssue::new(Severity::Warning, "input", "unknown element")
            .with_entity("Bus 99");
        assert_eq!(issue.to_string(), "[warning:input] unknown element (Bus 99)");
    }

    #[test]
    fn filters_by_entity() {
        let mut diag = Diagnostics::new();
        diag.add_error_with_entity("switching", "element not found", "Outage-A");
        diag.add_warning_with_entity("input", "unknown element", "Outage-A");
        diag.add_warning_with_entity("input", "unknown element", "Outage-B");
        assert_eq!(diag.for_entity("Outage-A").count(), 2);
        assert_eq!(diag.for_entity("Shunt-C").count(), 0);
    }
}
