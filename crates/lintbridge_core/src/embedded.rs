//! Extraction of script snippets embedded in markup and YAML files.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::language::Language;

/// A script snippet and its position in the enclosing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedScript {
    pub code: String,
    /// Number of lines preceding the snippet in the enclosing file.
    pub line_offset: u32,
    pub language: Language,
}

static SCRIPT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("script tag regex is valid")
});

static TYPE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\btype\s*=\s*["']?([^"'\s>]+)"#).expect("type attribute regex is valid")
});

static LANG_TS_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\blang\s*=\s*["']?(ts|typescript)\b"#).expect("lang attribute regex is valid")
});

static SRC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsrc\s*=").expect("src attribute regex is valid"));

static INLINE_CODE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(?:ZipFile|InlineCode):\s*[|>][-+]?\s*$").expect("inline code regex is valid")
});

static NODE_RUNTIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*Runtime:\s*["']?nodejs"#).expect("runtime regex is valid")
});

/// Extracts inline `<script>` blocks from HTML or Vue single-file components.
///
/// External scripts (`src=`) and non-JavaScript types are skipped.
pub fn extract_scripts(source: &str) -> Vec<EmbeddedScript> {
    SCRIPT_TAG
        .captures_iter(source)
        .filter_map(|caps| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2)?;
            if SRC_ATTR.is_match(attrs) || !is_javascript_type(attrs) {
                return None;
            }
            let language = if LANG_TS_ATTR.is_match(attrs) {
                Language::Ts
            } else {
                Language::Js
            };
            Some(EmbeddedScript {
                code: body.as_str().to_string(),
                line_offset: source[..body.start()].matches('\n').count() as u32,
                language,
            })
        })
        .collect()
}

fn is_javascript_type(attrs: &str) -> bool {
    let Some(caps) = TYPE_ATTR.captures(attrs) else {
        return true;
    };
    let ty = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
    ty == "module" || ty.contains("javascript") || ty.contains("ecmascript") || ty.contains("babel")
}

/// Extracts inline Lambda code from CloudFormation/SAM templates.
///
/// Only templates declaring a `nodejs` runtime are considered. Each
/// `ZipFile:` or `InlineCode:` block scalar becomes one snippet.
pub fn extract_yaml_lambdas(source: &str) -> Vec<EmbeddedScript> {
    if !NODE_RUNTIME.is_match(source) {
        return Vec::new();
    }

    let lines: Vec<&str> = source.lines().collect();
    let mut scripts = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let Some(caps) = INLINE_CODE_KEY.captures(lines[index]) else {
            index += 1;
            continue;
        };
        let key_indent = caps.get(1).map_or(0, |m| m.as_str().len());
        let start = index + 1;
        let mut end = start;
        while end < lines.len() && (lines[end].trim().is_empty() || indent(lines[end]) > key_indent) {
            end += 1;
        }
        // Trailing blank lines belong to whatever follows the block.
        while end > start && lines[end - 1].trim().is_empty() {
            end -= 1;
        }

        let block = &lines[start..end];
        let block_indent = block
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| indent(l))
            .min()
            .unwrap_or(0);
        let code = block
            .iter()
            .map(|l| l.get(block_indent..).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n");

        if !code.trim().is_empty() {
            scripts.push(EmbeddedScript {
                code,
                line_offset: start as u32,
                language: Language::Js,
            });
        }
        index = end.max(start);
    }
    scripts
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_html_scripts_with_offsets() {
        let html = "<html>\n<head>\n<script>\nvar a = 1;\n</script>\n<script src=\"x.js\"></script>\n<script type=\"text/template\"><div/></script>\n<script type=\"module\">import x from 'y';</script>\n</head>\n</html>";
        let scripts = extract_scripts(html);
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[0].code, "\nvar a = 1;\n");
        assert_eq!(scripts[0].line_offset, 2);
        assert_eq!(scripts[1].code, "import x from 'y';");
        assert_eq!(scripts[1].line_offset, 7);
    }

    #[test]
    fn test_vue_script_language() {
        let vue = "<template><div/></template>\n<script lang=\"ts\">\nlet a: number;\n</script>";
        let scripts = extract_scripts(vue);
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].language, Language::Ts);
    }

    #[test]
    fn test_yaml_lambda_block() {
        let yaml = "\
Resources:
  Fn:
    Type: AWS::Lambda::Function
    Properties:
      Runtime: nodejs18.x
      Code:
        ZipFile: |
          exports.handler = async () => {
            return 1;
          };

      Handler: index.handler
";
        let scripts = extract_yaml_lambdas(yaml);
        assert_eq!(
            scripts,
            vec![EmbeddedScript {
                code: "exports.handler = async () => {\n  return 1;\n};".to_string(),
                line_offset: 7,
                language: Language::Js,
            }]
        );
    }

    #[test]
    fn test_yaml_without_node_runtime() {
        let yaml = "Runtime: python3.9\nCode:\n  ZipFile: |\n    print('x')\n";
        assert!(extract_yaml_lambdas(yaml).is_empty());
    }
}
