//! Source parsing seam.
//!
//! Syntax-tree construction belongs to an external parser. The pipeline only
//! needs a line-level view of the source (code, comments) and a parse verdict,
//! so the default [`ScanParser`] is a structural scanner that tracks comments,
//! string literals and bracket balance.

use std::collections::BTreeSet;

use crate::error::AnalysisError;
use crate::language::Language;

/// A comment found in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// 1-based line where the comment starts.
    pub line: u32,
    /// 1-based line where the comment ends.
    pub end_line: u32,
    /// Comment text without delimiters.
    pub text: String,
}

/// Line-level view of a parsed source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSource {
    pub line_count: u32,
    /// Lines holding at least one code token.
    pub code_lines: BTreeSet<u32>,
    pub comments: Vec<Comment>,
}

/// Parser used by the analysis pipeline.
pub trait SourceParser: Send {
    /// Parses `source` as `language`.
    ///
    /// Returns [`AnalysisError::Parsing`] for malformed input.
    fn parse(&self, source: &str, language: Language) -> Result<ParsedSource, AnalysisError>;
}

/// Structural scanner used when no external parser is plugged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanParser;

impl SourceParser for ScanParser {
    fn parse(&self, source: &str, language: Language) -> Result<ParsedSource, AnalysisError> {
        let syntax = match language {
            Language::Js | Language::Ts => Syntax::SCRIPT,
            Language::Css => Syntax::STYLE,
            Language::Html => Syntax::MARKUP,
            Language::Yaml => Syntax::YAML,
        };
        Scanner::new(source, syntax).run()
    }
}

#[derive(Clone, Copy)]
struct Syntax {
    line_comment: Option<&'static str>,
    block_comment: Option<(&'static str, &'static str)>,
    template_strings: bool,
    regex_literals: bool,
    check_brackets: bool,
}

impl Syntax {
    const SCRIPT: Self = Self {
        line_comment: Some("//"),
        block_comment: Some(("/*", "*/")),
        template_strings: true,
        regex_literals: true,
        check_brackets: true,
    };
    const STYLE: Self = Self {
        line_comment: None,
        block_comment: Some(("/*", "*/")),
        template_strings: false,
        regex_literals: false,
        check_brackets: true,
    };
    const MARKUP: Self = Self {
        line_comment: None,
        block_comment: Some(("<!--", "-->")),
        template_strings: false,
        regex_literals: false,
        check_brackets: false,
    };
    const YAML: Self = Self {
        line_comment: Some("#"),
        block_comment: None,
        template_strings: false,
        regex_literals: false,
        check_brackets: false,
    };
}

struct Scanner<'a> {
    src: &'a str,
    syntax: Syntax,
    pos: usize,
    line: u32,
    out: ParsedSource,
    brackets: Vec<(char, u32)>,
    /// Last significant code character, used to tell regex literals from division.
    last_code: Option<char>,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str, syntax: Syntax) -> Self {
        Self {
            src,
            syntax,
            pos: 0,
            line: 1,
            out: ParsedSource::default(),
            brackets: Vec::new(),
            last_code: None,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn code(&mut self, c: char) {
        self.out.code_lines.insert(self.line);
        self.last_code = Some(c);
    }

    fn run(mut self) -> Result<ParsedSource, AnalysisError> {
        while let Some(c) = self.peek() {
            let rest = self.rest();
            if let Some(marker) = self.syntax.line_comment
                && rest.starts_with(marker)
            {
                self.line_comment(marker.len());
                continue;
            }
            if let Some((open, close)) = self.syntax.block_comment
                && rest.starts_with(open)
            {
                self.block_comment(open.len(), close)?;
                continue;
            }
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            match c {
                '"' | '\'' if self.syntax.check_brackets => self.string(c),
                '`' if self.syntax.template_strings => self.template()?,
                '/' if self.syntax.regex_literals && self.regex_allowed() => self.regex(),
                '(' | '[' | '{' if self.syntax.check_brackets => {
                    self.brackets.push((c, self.line));
                    self.code(c);
                    self.bump();
                }
                ')' | ']' | '}' if self.syntax.check_brackets => {
                    self.close_bracket(c)?;
                    self.code(c);
                    self.bump();
                }
                _ => {
                    self.code(c);
                    self.bump();
                }
            }
        }

        if let Some((open, line)) = self.brackets.pop() {
            return Err(AnalysisError::parsing(
                format!("'{}' expected", closing(open)),
                Some(line),
            ));
        }

        self.out.line_count = self.src.lines().count().max(1) as u32;
        Ok(self.out)
    }

    fn line_comment(&mut self, marker_len: usize) {
        let line = self.line;
        self.pos += marker_len;
        let end = self.rest().find('\n').map_or(self.src.len(), |i| self.pos + i);
        let text = self.src[self.pos..end].to_string();
        self.pos = end;
        self.out.comments.push(Comment {
            line,
            end_line: line,
            text,
        });
    }

    fn block_comment(&mut self, open_len: usize, close: &str) -> Result<(), AnalysisError> {
        let line = self.line;
        self.pos += open_len;
        let Some(offset) = self.rest().find(close) else {
            return Err(AnalysisError::parsing("Unterminated comment", Some(line)));
        };
        let text = self.rest()[..offset].to_string();
        let end_line = line + text.matches('\n').count() as u32;
        self.pos += offset + close.len();
        self.line = end_line;
        self.out.comments.push(Comment {
            line,
            end_line,
            text,
        });
        Ok(())
    }

    /// Single-line string literal; an unterminated one ends at the line break.
    fn string(&mut self, quote: char) {
        self.code(quote);
        self.bump();
        while let Some(c) = self.peek() {
            match c {
                '\n' => return,
                '\\' => {
                    self.bump();
                    if self.peek() != Some('\n') {
                        self.bump();
                    }
                }
                _ if c == quote => {
                    self.bump();
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn template(&mut self) -> Result<(), AnalysisError> {
        let line = self.line;
        self.code('`');
        self.bump();
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    self.bump();
                }
                '`' => {
                    self.last_code = Some('`');
                    return Ok(());
                }
                '\n' => {}
                _ => {
                    self.out.code_lines.insert(self.line);
                }
            }
        }
        Err(AnalysisError::parsing("Unterminated template literal", Some(line)))
    }

    fn regex_allowed(&self) -> bool {
        match self.last_code {
            None => true,
            Some(c) => "(,=:[!&|?{};+-*%<>~^".contains(c),
        }
    }

    fn regex(&mut self) {
        self.code('/');
        self.bump();
        let mut in_class = false;
        while let Some(c) = self.peek() {
            match c {
                '\n' => return,
                '\\' => {
                    self.bump();
                    if self.peek() != Some('\n') {
                        self.bump();
                    }
                }
                '[' => {
                    in_class = true;
                    self.bump();
                }
                ']' => {
                    in_class = false;
                    self.bump();
                }
                '/' if !in_class => {
                    self.bump();
                    self.last_code = Some('/');
                    while self.peek().is_some_and(|f| f.is_ascii_alphabetic()) {
                        self.bump();
                    }
                    // A regex literal behaves like an operand.
                    self.last_code = Some('r');
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn close_bracket(&mut self, c: char) -> Result<(), AnalysisError> {
        match self.brackets.pop() {
            Some((open, _)) if closing(open) == c => Ok(()),
            Some((open, _)) => Err(AnalysisError::parsing(
                format!("Unexpected token '{}', expected '{}'", c, closing(open)),
                Some(self.line),
            )),
            None => Err(AnalysisError::parsing(
                format!("Unexpected token '{}'", c),
                Some(self.line),
            )),
        }
    }
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}
