//! Rule engine seam.
//!
//! Rules themselves are external: they receive a parsed file with its
//! configuration and return issues. The pipeline only prepares the context.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{FileType, RuleConfig};
use crate::error::AnalysisError;
use crate::language::Language;
use crate::parser::ParsedSource;
use crate::program::AnalysisProgram;
use crate::request::Issue;

/// Everything a rule engine sees about one file.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub file: &'a Path,
    pub source: &'a str,
    pub parsed: &'a ParsedSource,
    pub language: Language,
    pub file_type: FileType,
    /// Rules enabled for this file type and language.
    pub rules: &'a [&'a RuleConfig],
    /// Package dependencies visible from the file.
    pub dependencies: &'a BTreeSet<String>,
    pub program: Option<&'a AnalysisProgram>,
    pub environments: &'a [String],
    pub globals: &'a [String],
}

/// Evaluates rules over a parsed file.
pub trait RuleEngine: Send {
    /// Loads an additional rule bundle.
    fn load_bundle(&mut self, bundle: &Path) -> Result<(), AnalysisError>;

    /// Returns the issues found in the file described by `ctx`.
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<Vec<Issue>, AnalysisError>;
}

/// Engine used when no rule implementation is plugged in.
///
/// Bundles are validated and remembered; evaluation reports no issues.
#[derive(Debug, Default)]
pub struct NoopRuleEngine {
    bundles: Vec<PathBuf>,
}

impl NoopRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bundles(&self) -> &[PathBuf] {
        &self.bundles
    }
}

impl RuleEngine for NoopRuleEngine {
    fn load_bundle(&mut self, bundle: &Path) -> Result<(), AnalysisError> {
        if !bundle.exists() {
            warn!("Rule bundle not found: {}", bundle.display());
            return Err(AnalysisError::linter(format!(
                "Rule bundle not found: {}",
                bundle.display()
            )));
        }
        debug!("Registered rule bundle {}", bundle.display());
        self.bundles.push(bundle.to_path_buf());
        Ok(())
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<Vec<Issue>, AnalysisError> {
        debug!(
            "No rule implementation for {} ({} rules enabled)",
            ctx.file.display(),
            ctx.rules.len()
        );
        Ok(Vec::new())
    }
}
