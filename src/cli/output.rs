//! Output formatting for CLI commands

use serde::Serialize;

use crate::tools::ToolResponse;

/// One-shot commands print pretty JSON; `serve` prints one compact
/// object per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputContext {
    compact: bool,
}

impl OutputContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compact() -> Self {
        Self { compact: true }
    }

    pub fn render<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.compact {
            serde_json::to_string(value)
        } else {
            serde_json::to_string_pretty(value)
        };
        rendered.unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"error":"Failed to serialize output: {}"}}"#,
                e
            )
        })
    }

    pub fn print_response(&self, response: &ToolResponse) {
        println!("{}", self.render(response));
    }

    pub fn print_error(&self, message: &str) {
        self.print_response(&ToolResponse::err(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_is_one_line() {
        let line = OutputContext::compact().render(&ToolResponse::ok("a\nb"));
        assert_eq!(line, r#"{"success":true,"text":"a\nb"}"#);
    }

    #[test]
    fn test_pretty_error() {
        let text = OutputContext::new().render(&ToolResponse::err("boom"));
        assert!(text.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "boom");
    }
}
