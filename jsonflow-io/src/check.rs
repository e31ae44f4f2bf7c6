//! JSON Lines validation and repair
//!
//! A line is valid when the loader would accept it: an object or an array
//! of objects. Repairs are limited to mistakes that can be fixed without
//! guessing at content:
//!
//! - trailing commas before `}` or `]`
//! - unclosed objects and arrays at the end of the line

use crate::loader::parse_line;
use jsonflow_core::Result;
use serde::Serialize;
use std::io::{BufRead, Write};
use tracing::{debug, warn};

/// Tracing target for checker events.
pub const TRACING_TARGET: &str = "jsonflow_io::check";

/// Options for [`check_lines`].
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Attempt to repair invalid lines
    pub repair: bool,
}

/// Counts gathered by [`check_lines`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Lines read, blank ones included
    pub total: usize,
    /// Lines that were valid as read
    pub valid: usize,
    /// Invalid lines that were repaired
    pub repaired: usize,
    /// Lines still invalid after any repair
    pub invalid: usize,
    /// Empty or whitespace-only lines
    pub blank: usize,
    /// 1-based numbers of the invalid lines
    pub invalid_lines: Vec<usize>,
}

impl CheckReport {
    /// Whether every non-blank line is usable.
    pub fn is_clean(&self) -> bool {
        self.invalid == 0
    }
}

/// Validate every line of `reader`.
///
/// Valid and repaired lines are copied to `output` when one is given;
/// invalid and blank lines are dropped.
pub fn check_lines<R: BufRead>(
    reader: R,
    mut output: Option<&mut dyn Write>,
    options: &CheckOptions,
) -> Result<CheckReport> {
    let mut report = CheckReport::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        report.total += 1;

        let text = line.trim();
        if text.is_empty() {
            report.blank += 1;
            continue;
        }

        let accepted = if parse_line(text, line_no).is_ok() {
            report.valid += 1;
            Some(text.to_string())
        } else if let Some(fixed) = options.repair.then(|| repair_line(text)).flatten() {
            debug!(target: TRACING_TARGET, line = line_no, "repaired line");
            report.repaired += 1;
            Some(fixed)
        } else {
            warn!(target: TRACING_TARGET, line = line_no, "invalid JSON line");
            report.invalid += 1;
            report.invalid_lines.push(line_no);
            None
        };

        if let (Some(text), Some(out)) = (accepted, output.as_mut()) {
            out.write_all(text.as_bytes())?;
            out.write_all(b"\n")?;
        }
    }

    if let Some(out) = output.as_mut() {
        out.flush()?;
    }
    Ok(report)
}

/// Try the known repairs on `line`, returning the first result that parses.
pub fn repair_line(line: &str) -> Option<String> {
    let closed = close_brackets(line);
    let candidates = [
        strip_trailing_commas(line),
        strip_trailing_commas(&closed),
        closed,
    ];
    candidates
        .into_iter()
        .find(|candidate| candidate.as_str() != line && parse_line(candidate, 1).is_ok())
}

/// Remove commas directly followed (modulo whitespace) by `}` or `]`.
fn strip_trailing_commas(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

/// Append the closers for every object and array still open at the end.
fn close_brackets(line: &str) -> String {
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in line.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.last() == Some(&c) {
                    open.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = line.to_string();
    if in_string {
        out.push('"');
    }
    out.extend(open.iter().rev());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn check(text: &str, repair: bool) -> (CheckReport, String) {
        let mut out = Vec::new();
        let report = check_lines(
            Cursor::new(text),
            Some(&mut out as &mut dyn Write),
            &CheckOptions { repair },
        )
        .unwrap();
        (report, String::from_utf8(out).unwrap())
    }

    #[test]
    fn counts_without_repair() {
        let (report, out) = check("{\"a\":1}\n\n{\"a\":\n[1,2]\n", false);
        assert_eq!(report.total, 4);
        assert_eq!(report.valid, 1);
        assert_eq!(report.blank, 1);
        assert_eq!(report.invalid, 2);
        assert_eq!(report.invalid_lines, vec![3, 4]);
        assert!(!report.is_clean());
        assert_eq!(out, "{\"a\":1}\n");
    }

    #[test]
    fn repairs_missing_closers_and_trailing_commas() {
        let (report, out) = check(
            "{\"a\":{\"b\":[1,2\n{\"a\":1,}\n[{\"a\":1},]\n{\"a\":[1,2,],\n",
            true,
        );
        assert_eq!(report.repaired, 4);
        assert!(report.is_clean());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "{\"a\":{\"b\":[1,2]}}");
        assert_eq!(lines[1], "{\"a\":1}");
        assert_eq!(lines[2], "[{\"a\":1}]");
        assert_eq!(lines[3], "{\"a\":[1,2]}");
    }

    #[test]
    fn commas_inside_strings_are_kept() {
        assert_eq!(strip_trailing_commas(r#"{"a":"x,}"}"#), r#"{"a":"x,}"}"#);
        assert_eq!(close_brackets(r#"{"a":"[{""#), r#"{"a":"[{"}"#);
    }

    #[test]
    fn unrepairable_line_stays_invalid() {
        let (report, out) = check("not json at all\n", true);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.repaired, 0);
        assert!(out.is_empty());
    }
}
