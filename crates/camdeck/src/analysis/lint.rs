//! Offline analysis rules.
//!
//! Nothing here parses Python properly. The balance check tracks strings,
//! comments and brackets, which catches the common ways a snippet fails to
//! parse; everything else is line-oriented regular expressions.

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{Analyzer, CodeMetrics, CodeReport, Note, NoteKind, Result, SyntaxIssue};
use crate::config::AnalysisConfig;

/// A compiled line rule.
#[derive(Debug, Clone)]
pub struct LintRule {
    /// Name of the rule for identification.
    pub name: &'static str,

    /// Description of what this rule matches.
    pub description: &'static str,

    regex: Regex,
}

impl LintRule {
    /// Compile a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regex.
    pub fn new(name: &'static str, description: &'static str, pattern: &str) -> Result<Self> {
        Ok(Self {
            name,
            description,
            regex: Regex::new(pattern)?,
        })
    }

    /// Check if a single line matches this rule.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// 1-based numbers of the lines in `source` matching this rule.
    #[must_use]
    pub fn matching_lines(&self, source: &str) -> Vec<usize> {
        source
            .lines()
            .enumerate()
            .filter(|(_, line)| self.matches(line))
            .map(|(i, _)| i + 1)
            .collect()
    }
}

/// Line rules that produce notes, in report order.
///
/// # Errors
///
/// Returns an error if a built-in pattern fails to compile.
pub fn note_rules() -> Result<Vec<(NoteKind, LintRule)>> {
    Ok(vec![
        (
            NoteKind::Todos,
            LintRule::new("todos", "Lines mentioning TODO or FIXME", r"TODO|FIXME")?,
        ),
        (
            NoteKind::BareExcept,
            LintRule::new(
                "bare_except",
                "except clauses without an exception type",
                r"^\s*except\s*:",
            )?,
        ),
    ])
}

/// Offline analyzer built from [`LintRule`]s and the balance check.
#[derive(Debug, Clone)]
pub struct LocalAnalyzer {
    long_line_limit: usize,
    function_rule: LintRule,
    class_rule: LintRule,
    note_rules: Vec<(NoteKind, LintRule)>,
}

impl LocalAnalyzer {
    /// Default line length limit.
    pub const DEFAULT_LONG_LINE_LIMIT: usize = 120;

    /// Create an analyzer reporting lines longer than `long_line_limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new(long_line_limit: usize) -> Result<Self> {
        Ok(Self {
            long_line_limit,
            function_rule: LintRule::new("functions", "Function definitions", r"^\s*def\s+\w+")?,
            class_rule: LintRule::new("classes", "Class definitions", r"^\s*class\s+\w+")?,
            note_rules: note_rules()?,
        })
    }

    /// Create an analyzer from analysis configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        Self::new(config.long_line_limit)
    }

    /// Analyze `source` synchronously.
    #[must_use]
    pub fn report(&self, source: &str) -> CodeReport {
        if let Some(issue) = check_balance(source) {
            debug!(line = issue.lineno, msg = %issue.msg, "Source does not parse");
            return CodeReport {
                syntax_error: Some(issue),
                ..CodeReport::default()
            };
        }

        let metrics = CodeMetrics {
            lines: source.lines().count(),
            functions: self.function_rule.matching_lines(source).len(),
            classes: self.class_rule.matching_lines(source).len(),
        };

        let mut notes = Vec::new();
        for (kind, rule) in &self.note_rules {
            let lines = rule.matching_lines(source);
            if !lines.is_empty() {
                notes.push(Note { kind: *kind, lines });
            }
            // Long lines sit between TODOs and bare excepts.
            if *kind == NoteKind::Todos {
                let long = self.long_lines(source);
                if !long.is_empty() {
                    notes.push(Note {
                        kind: NoteKind::LongLines,
                        lines: long,
                    });
                }
            }
        }

        CodeReport {
            syntax_error: None,
            metrics: Some(metrics),
            notes,
            ai_review: None,
        }
    }

    fn long_lines(&self, source: &str) -> Vec<usize> {
        source
            .lines()
            .enumerate()
            .filter(|(_, line)| line.chars().count() > self.long_line_limit)
            .map(|(i, _)| i + 1)
            .collect()
    }
}

#[async_trait]
impl Analyzer for LocalAnalyzer {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn analyze(&self, source: &str) -> Result<CodeReport> {
        Ok(self.report(source))
    }
}

#[derive(Debug, Clone, Copy)]
struct Open {
    ch: char,
    line: usize,
    col: usize,
}

#[derive(Debug, Clone, Copy)]
enum Scan {
    Code,
    Comment,
    Str { quote: char, triple: bool, start: Open },
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Find the first unbalanced bracket or unterminated string in `source`.
#[must_use]
pub fn check_balance(source: &str) -> Option<SyntaxIssue> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<Open> = Vec::new();
    let mut state = Scan::Code;
    let (mut line, mut col) = (1usize, 0usize);
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        col += 1;

        match state {
            Scan::Comment => {
                if ch == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::Str {
                quote,
                triple,
                start,
            } => {
                if ch == '\\' && i + 1 < chars.len() {
                    // Skip the escaped character, including a newline.
                    if chars[i + 1] == '\n' {
                        line += 1;
                        col = 0;
                    } else {
                        col += 1;
                    }
                    i += 2;
                    continue;
                }
                if ch == '\n' && !triple {
                    return Some(SyntaxIssue {
                        msg: format!("unterminated string literal (detected at line {line})"),
                        lineno: start.line,
                        offset: start.col,
                    });
                }
                if ch == quote {
                    if !triple {
                        state = Scan::Code;
                    } else if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote)
                    {
                        state = Scan::Code;
                        col += 2;
                        i += 3;
                        continue;
                    }
                }
            }
            Scan::Code => match ch {
                '#' => state = Scan::Comment,
                '\'' | '"' => {
                    let start = Open { ch, line, col };
                    let triple = chars.get(i + 1) == Some(&ch) && chars.get(i + 2) == Some(&ch);
                    state = Scan::Str {
                        quote: ch,
                        triple,
                        start,
                    };
                    if triple {
                        col += 2;
                        i += 3;
                        continue;
                    }
                }
                '(' | '[' | '{' => stack.push(Open { ch, line, col }),
                ')' | ']' | '}' => match stack.pop() {
                    None => {
                        return Some(SyntaxIssue {
                            msg: format!("unmatched '{ch}'"),
                            lineno: line,
                            offset: col,
                        });
                    }
                    Some(open) if closer_for(open.ch) != ch => {
                        let msg = if open.line == line {
                            format!(
                                "closing parenthesis '{ch}' does not match opening parenthesis '{}'",
                                open.ch
                            )
                        } else {
                            format!(
                                "closing parenthesis '{ch}' does not match opening parenthesis '{}' on line {}",
                                open.ch, open.line
                            )
                        };
                        return Some(SyntaxIssue {
                            msg,
                            lineno: line,
                            offset: col,
                        });
                    }
                    Some(_) => {}
                },
                _ => {}
            },
        }

        if ch == '\n' {
            line += 1;
            col = 0;
        }
        i += 1;
    }

    match state {
        Scan::Str {
            triple: true,
            start,
            ..
        } => {
            return Some(SyntaxIssue {
                msg: format!("unterminated triple-quoted string literal (detected at line {line})"),
                lineno: start.line,
                offset: start.col,
            });
        }
        Scan::Str { start, .. } => {
            return Some(SyntaxIssue {
                msg: format!("unterminated string literal (detected at line {line})"),
                lineno: start.line,
                offset: start.col,
            });
        }
        Scan::Code | Scan::Comment => {}
    }

    stack.first().map(|open| SyntaxIssue {
        msg: format!("'{}' was never closed", open.ch),
        lineno: open.line,
        offset: open.col,
    })
}
