//! Output notification for the REPL
//!
//! Output goes through a trait so tests and embedders can capture it.

/// Receives everything the REPL prints
pub trait ReplNotifier: Send + Sync {
    fn on_output(&self, content: &str);

    fn on_error(&self, content: &str);

    /// Evaluation result with timing information
    fn on_result(&self, output: &str, duration_ms: u64, quiet: bool);
}

/// Console notifier
pub struct DefaultNotifier;

impl DefaultNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl ReplNotifier for DefaultNotifier {
    fn on_output(&self, content: &str) {
        if !content.is_empty() {
            println!("{content}");
        }
    }

    fn on_error(&self, content: &str) {
        eprintln!("{content}");
    }

    fn on_result(&self, output: &str, duration_ms: u64, quiet: bool) {
        if quiet {
            println!("{output}");
        } else {
            println!("=> {output} ({duration_ms}ms)");
        }
    }
}

impl Default for DefaultNotifier {
    fn default() -> Self {
        Self::new()
    }
}
