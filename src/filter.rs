//! File selection for the module loader
//!
//! Patterns are globs evaluated in order against a `/`-separated path:
//! - `*` matches within one path segment, `?` one character
//! - `**` matches across segments (`**/` may match nothing)
//! - `[abc]`, `[!abc]` character classes, `{a,b}` alternatives
//! - `!pattern` revokes every earlier match of `pattern`
//!
//! Matching is case-insensitive.

use regex::Regex;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
struct Rule {
    negated: bool,
    regex: Regex,
}

/// Ordered include/exclude globs
#[derive(Debug, Clone)]
pub struct FileFilter {
    rules: Vec<Rule>,
}

impl FileFilter {
    /// Compile `patterns`; an empty list matches nothing
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let rules = patterns
            .iter()
            .map(|pattern| Self::compile(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    fn compile(pattern: &str) -> Result<Rule, ConfigError> {
        let (negated, glob) = match pattern.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        let source = glob_to_regex(glob).map_err(|reason| ConfigError::Pattern {
            pattern: pattern.to_string(),
            reason,
        })?;
        let regex = Regex::new(&source).map_err(|e| ConfigError::Pattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Rule { negated, regex })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `path` is selected
    pub fn matches(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        let path = path.replace('\\', "/");
        let mut selected = false;
        for rule in &self.rules {
            let hit = rule.regex.is_match(&path);
            if rule.negated {
                if hit {
                    selected = false;
                }
            } else {
                selected |= hit;
            }
        }
        selected
    }
}

/// Translate one glob into an anchored, case-insensitive regex
fn glob_to_regex(glob: &str) -> Result<String, String> {
    let mut out = String::from("(?i)^");
    let chars: Vec<char> = glob.chars().collect();
    let mut braces = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ']')
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| "unterminated character class".to_string())?;
                out.push('[');
                let mut class = &chars[i + 1..close];
                if let Some(('!' | '^', rest)) = class.split_first() {
                    out.push('^');
                    class = rest;
                }
                for &member in class {
                    if matches!(member, '\\' | '[' | ']') {
                        out.push('\\');
                    }
                    out.push(member);
                }
                out.push(']');
                i = close + 1;
                continue;
            }
            '{' => {
                braces += 1;
                out.push_str("(?:");
            }
            '}' if braces > 0 => {
                braces -= 1;
                out.push(')');
            }
            ',' if braces > 0 => out.push('|'),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    if braces > 0 {
        return Err("unterminated alternative group".to_string());
    }
    out.push('$');
    Ok(out)
}
