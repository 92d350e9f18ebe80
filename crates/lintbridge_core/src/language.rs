//! Language classification by file suffix.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfiguration;

/// Languages understood by the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Js,
    Ts,
    Css,
    Html,
    Yaml,
}

impl Language {
    /// Whether the language goes through the script pipeline.
    pub fn is_script(self) -> bool {
        matches!(self, Self::Js | Self::Ts)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Ts => "ts",
            Self::Css => "css",
            Self::Html => "html",
            Self::Yaml => "yaml",
        }
    }
}

pub const DEFAULT_JS_SUFFIXES: &[&str] = &[".js", ".mjs", ".cjs", ".jsx", ".vue"];
pub const DEFAULT_TS_SUFFIXES: &[&str] = &[".ts", ".mts", ".cts", ".tsx"];
pub const DEFAULT_CSS_SUFFIXES: &[&str] = &[".css", ".less", ".scss", ".sass"];
pub const HTML_SUFFIXES: &[&str] = &[".html", ".htm"];
pub const YAML_SUFFIXES: &[&str] = &[".yml", ".yaml"];

static VUE_TS_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<script[^>]*\blang\s*=\s*["'](ts|typescript)["'][^>]*>"#)
        .expect("vue script regex is valid")
});

/// Maps file paths to languages using the configured suffix lists.
#[derive(Debug, Clone)]
pub struct LanguageClassifier {
    js: Vec<String>,
    ts: Vec<String>,
    css: Vec<String>,
}

impl Default for LanguageClassifier {
    fn default() -> Self {
        Self {
            js: to_owned(DEFAULT_JS_SUFFIXES),
            ts: to_owned(DEFAULT_TS_SUFFIXES),
            css: to_owned(DEFAULT_CSS_SUFFIXES),
        }
    }
}

impl LanguageClassifier {
    /// Builds a classifier from an analysis configuration.
    pub fn from_config(config: &AnalysisConfiguration) -> Self {
        Self {
            js: normalize(&config.js_suffixes),
            ts: normalize(&config.ts_suffixes),
            css: normalize(&config.css_suffixes),
        }
    }

    /// Classifies a path, optionally looking at its contents.
    ///
    /// Contents are only consulted for `.vue` files, whose `<script lang="ts">`
    /// turns them into TypeScript.
    pub fn classify(&self, path: &Path, contents: Option<&str>) -> Option<Language> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        let matches = |suffixes: &[String]| suffixes.iter().any(|s| name.ends_with(s.as_str()));

        if matches(&self.ts) {
            return Some(Language::Ts);
        }
        if matches(&self.js) {
            if name.ends_with(".vue") && contents.is_some_and(|c| VUE_TS_SCRIPT.is_match(c)) {
                return Some(Language::Ts);
            }
            return Some(Language::Js);
        }
        if matches(&self.css) {
            return Some(Language::Css);
        }
        if HTML_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return Some(Language::Html);
        }
        if YAML_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return Some(Language::Yaml);
        }
        None
    }

    /// Whether the path is a JavaScript or TypeScript file.
    pub fn is_js_ts(&self, path: &Path) -> bool {
        self.classify(path, None).is_some_and(Language::is_script)
    }
}

fn to_owned(suffixes: &[&str]) -> Vec<String> {
    suffixes.iter().map(|s| (*s).to_string()).collect()
}

/// Lowercases suffixes and ensures they start with a dot.
fn normalize(suffixes: &[String]) -> Vec<String> {
    suffixes
        .iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .map(|s| if s.starts_with('.') { s } else { format!(".{s}") })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("src/app.js", Some(Language::Js))]
    #[case("src/app.mjs", Some(Language::Js))]
    #[case("src/App.JSX", Some(Language::Js))]
    #[case("src/app.ts", Some(Language::Ts))]
    #[case("src/app.d.ts", Some(Language::Ts))]
    #[case("src/app.tsx", Some(Language::Ts))]
    #[case("styles/main.scss", Some(Language::Css))]
    #[case("index.html", Some(Language::Html))]
    #[case("ci/config.yaml", Some(Language::Yaml))]
    #[case("README.md", None)]
    #[case("Makefile", None)]
    fn test_classify_by_suffix(#[case] path: &str, #[case] expected: Option<Language>) {
        let classifier = LanguageClassifier::default();
        assert_eq!(classifier.classify(Path::new(path), None), expected);
    }

    #[test]
    fn test_vue_with_ts_script_is_ts() {
        let classifier = LanguageClassifier::default();
        let ts = "<template/>\n<script setup lang=\"ts\">\nconst a: number = 1;\n</script>";
        let js = "<template/>\n<script>\nexport default {}\n</script>";
        assert_eq!(
            classifier.classify(Path::new("App.vue"), Some(ts)),
            Some(Language::Ts)
        );
        assert_eq!(
            classifier.classify(Path::new("App.vue"), Some(js)),
            Some(Language::Js)
        );
    }

    #[test]
    fn test_custom_suffixes_are_normalized() {
        let config = AnalysisConfiguration {
            js_suffixes: vec!["es6".to_string(), " .JS ".to_string()],
            ..AnalysisConfiguration::default()
        };
        let classifier = LanguageClassifier::from_config(&config);
        assert_eq!(
            classifier.classify(Path::new("a.es6"), None),
            Some(Language::Js)
        );
        assert_eq!(
            classifier.classify(Path::new("a.mjs"), None),
            None,
            "defaults are replaced by configured suffixes"
        );
    }
}
