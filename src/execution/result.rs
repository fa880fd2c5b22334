//! Execution result types.

use std::borrow::Cow;
use std::string::FromUtf8Error;

/// Output captured from a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    bytes: Vec<u8>,
}

impl ProcessOutput {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Output decoded as UTF-8, replacing invalid sequences.
    pub fn string(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Output decoded as strict UTF-8.
    pub fn utf8(&self) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.bytes.clone())
    }

    /// Output split into lines.
    ///
    /// CR, LF and CRLF each end a line. A trailing terminator does not
    /// produce an extra empty line.
    pub fn lines(&self) -> Vec<String> {
        let text = self.string();
        let mut lines = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    lines.push(std::mem::take(&mut current));
                }
                '\n' => lines.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }
}

/// Exit code and optional captured output of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    exit_code: i32,
    output: Option<ProcessOutput>,
}

impl ProcessResult {
    pub fn new(exit_code: i32, output: Option<ProcessOutput>) -> Self {
        Self { exit_code, output }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Captured output. `None` unless output reading was enabled.
    pub fn output(&self) -> Option<&ProcessOutput> {
        self.output.as_ref()
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Captured output as a lossy string; empty when not captured.
    pub fn output_string(&self) -> String {
        self.output
            .as_ref()
            .map(|o| o.string().into_owned())
            .unwrap_or_default()
    }

    pub fn into_output(self) -> Option<ProcessOutput> {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_handles_all_terminators() {
        let output = ProcessOutput::new(b"one\ntwo\r\nthree\rfour".to_vec());
        assert_eq!(output.lines(), vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_lines_keeps_inner_empty_lines() {
        let output = ProcessOutput::new(b"a\n\nb\n".to_vec());
        assert_eq!(output.lines(), vec!["a", "", "b"]);
    }

    #[test]
    fn test_lossy_and_strict_decoding() {
        let output = ProcessOutput::new(vec![b'o', b'k', 0xff]);
        assert_eq!(output.string(), "ok\u{fffd}");
        assert!(output.utf8().is_err());
    }

    #[test]
    fn test_result_without_output() {
        let result = ProcessResult::new(0, None);
        assert!(!result.has_output());
        assert_eq!(result.output_string(), "");
    }

    #[test]
    fn test_result_with_output() {
        let result = ProcessResult::new(3, Some(ProcessOutput::new(b"hi".to_vec())));
        assert_eq!(result.exit_code(), 3);
        assert_eq!(result.output_string(), "hi");
        assert_eq!(result.into_output().map(|o| o.len()), Some(2));
    }
}
