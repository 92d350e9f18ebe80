//! Line metrics computed from a parsed source.

use std::collections::BTreeSet;

use crate::parser::ParsedSource;
use crate::request::Metrics;

const NOSONAR: &str = "NOSONAR";

/// Options affecting metric computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsOptions {
    /// Only report `nosonarLines`.
    pub lightweight: bool,
    /// Do not count comments preceding the first line of code.
    pub ignore_header_comments: bool,
}

/// Computes the metrics of a parsed source.
pub fn compute(parsed: &ParsedSource, options: MetricsOptions) -> Metrics {
    let nosonar_lines = nosonar_lines(parsed);
    if options.lightweight {
        return Metrics {
            nosonar_lines,
            ..Metrics::default()
        };
    }

    Metrics {
        lines: Some(parsed.line_count),
        ncloc: Some(parsed.code_lines.iter().copied().collect()),
        comment_lines: Some(comment_lines(parsed, options.ignore_header_comments)),
        nosonar_lines,
    }
}

/// Lines with a comment starting with `NOSONAR`.
pub fn nosonar_lines(parsed: &ParsedSource) -> Vec<u32> {
    let lines: BTreeSet<u32> = parsed
        .comments
        .iter()
        .filter(|c| c.text.trim_start().starts_with(NOSONAR))
        .map(|c| c.line)
        .collect();
    lines.into_iter().collect()
}

fn comment_lines(parsed: &ParsedSource, ignore_header_comments: bool) -> Vec<u32> {
    let first_code = parsed.code_lines.first().copied().unwrap_or(u32::MAX);
    let mut lines = BTreeSet::new();

    for comment in &parsed.comments {
        if ignore_header_comments && comment.end_line < first_code {
            continue;
        }
        for (offset, segment) in comment.text.split('\n').enumerate() {
            let content = segment.trim().trim_start_matches('*').trim();
            if !content.is_empty() {
                lines.insert(comment.line + offset as u32);
            }
        }
    }
    lines.into_iter().collect()
}
