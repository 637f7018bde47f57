//! Multi-line input collection for the REPL
//!
//! Member sources and bodies often span lines. Input is collected until
//! every bracket is closed outside string literals.

/// Result of processing a line of input
#[derive(Debug, PartialEq)]
pub enum LineProcessResult {
    /// Input is complete and ready for execution
    Complete(String),
    /// More input is needed
    NeedMore,
}

/// Collects lines until brackets balance
pub struct MultiLineCollector {
    buffer: String,
    /// Open `{`, `(` and `[` not yet closed
    nesting_level: i32,
    in_string: bool,
    last_was_escape: bool,
}

impl MultiLineCollector {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            nesting_level: 0,
            in_string: false,
            last_was_escape: false,
        }
    }

    /// Prompt for the current state
    pub fn get_prompt(&self) -> &'static str {
        if self.is_collecting() {
            ".. "
        } else {
            "reflex> "
        }
    }

    pub fn is_collecting(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.nesting_level = 0;
        self.in_string = false;
        self.last_was_escape = false;
    }

    pub fn process_line(&mut self, line: &str) -> LineProcessResult {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        self.update_parsing_state(line);

        // A closing bracket too many is the parser's problem, not ours
        if !self.in_string && self.nesting_level <= 0 {
            let complete = std::mem::take(&mut self.buffer);
            self.reset();
            LineProcessResult::Complete(complete)
        } else {
            LineProcessResult::NeedMore
        }
    }

    fn update_parsing_state(&mut self, line: &str) {
        for ch in line.chars() {
            if self.in_string {
                if self.last_was_escape {
                    self.last_was_escape = false;
                } else if ch == '\\' {
                    self.last_was_escape = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
            } else {
                match ch {
                    '"' => {
                        self.in_string = true;
                        self.last_was_escape = false;
                    }
                    '{' | '(' | '[' => self.nesting_level += 1,
                    '}' | ')' | ']' => self.nesting_level -= 1,
                    _ => {}
                }
            }
        }
    }
}

impl Default for MultiLineCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_line_is_complete() {
        let mut collector = MultiLineCollector::new();
        assert_eq!(
            collector.process_line("c.add(1.0, 2.0)"),
            LineProcessResult::Complete("c.add(1.0, 2.0)".to_string())
        );
        assert!(!collector.is_collecting());
    }

    #[test]
    fn test_method_source_over_several_lines() {
        let mut collector = MultiLineCollector::new();
        assert_eq!(
            collector.process_line(".add demo.Calculator fn twice(x: int): int {"),
            LineProcessResult::NeedMore
        );
        assert_eq!(collector.get_prompt(), ".. ");
        assert_eq!(collector.process_line("    return x * 2;"), LineProcessResult::NeedMore);
        match collector.process_line("}") {
            LineProcessResult::Complete(code) => {
                assert!(code.starts_with(".add demo.Calculator fn twice"));
                assert!(code.ends_with("\n}"));
            }
            LineProcessResult::NeedMore => panic!("Expected complete input"),
        }
    }

    #[test]
    fn test_brackets_inside_strings_are_ignored() {
        let mut collector = MultiLineCollector::new();
        assert_eq!(
            collector.process_line(r#"let s = "{ \" (";"#),
            LineProcessResult::Complete(r#"let s = "{ \" (";"#.to_string())
        );
    }
}
