//! Scanning of backend diagnostic (stderr) output.
//!
//! While starting, the backend announces itself on stderr. In socket mode it
//! prints `port=<N>` and `pid=<N>`, possibly split across chunks. A failed
//! launch prints a shell or CLI error instead, which decides the remediation.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::BridgeError;

/// Diagnostic text kept for classifying failures.
const TRANSCRIPT_LIMIT: usize = 8 * 1024;

struct DiagnosticPatterns {
    port: Regex,
    pid: Regex,
    outdated: Regex,
    missing: Regex,
}

impl DiagnosticPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            // A value counts only once a non-digit ends it.
            port: Regex::new(r"(?i)\bport=(\d+)\D")?,
            pid: Regex::new(r"(?i)\bpid=(\d+)\D")?,
            outdated: Regex::new(
                r#"(?i)(could not find command|command not found:)\s*"?(stdio|socket|server)\b"#,
            )?,
            // ENOENT only counts when a shell reports it.
            missing: Regex::new(
                r"(?im)(command not found|^\S*sh: .*(: not found|no such file or directory)|is not recognized as)",
            )?,
        })
    }
}

static PATTERNS: LazyLock<Result<DiagnosticPatterns, regex::Error>> =
    LazyLock::new(DiagnosticPatterns::compile);

fn patterns() -> Option<&'static DiagnosticPatterns> {
    match PATTERNS.as_ref() {
        Ok(patterns) => Some(patterns),
        Err(err) => {
            log::error!(
                target: "solargraph_bridge::transport",
                "Diagnostic patterns failed to compile: {}",
                err
            );
            None
        }
    }
}

/// Accumulates diagnostic chunks until the backend's port and pid are known.
#[derive(Debug, Default)]
pub struct DiagnosticScanner {
    transcript: String,
    port: Option<u16>,
    pid: Option<u32>,
}

impl DiagnosticScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns `(port, pid)` once both have been seen.
    pub fn feed(&mut self, chunk: &str) -> Option<(u16, u32)> {
        self.transcript.push_str(chunk);
        if self.transcript.len() > TRANSCRIPT_LIMIT {
            let mut cut = self.transcript.len() - TRANSCRIPT_LIMIT;
            while !self.transcript.is_char_boundary(cut) {
                cut += 1;
            }
            self.transcript.drain(..cut);
        }

        if let Some(patterns) = patterns() {
            if self.port.is_none() {
                self.port = patterns
                    .port
                    .captures(&self.transcript)
                    .and_then(|caps| caps[1].parse().ok());
            }
            if self.pid.is_none() {
                self.pid = patterns
                    .pid
                    .captures(&self.transcript)
                    .and_then(|caps| caps[1].parse().ok());
            }
        }

        self.port.zip(self.pid)
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// A launch failure recognisable from the output so far, if any.
    pub fn failure(&self, command: &str) -> Option<BridgeError> {
        detect_failure(command, &self.transcript)
    }
}

/// Recognise a launch failure from diagnostic text alone.
pub fn detect_failure(command: &str, output: &str) -> Option<BridgeError> {
    let patterns = patterns()?;
    if let Some(caps) = patterns.outdated.captures(output) {
        return Some(BridgeError::backend_outdated(format!(
            "the installed backend does not support `{}`",
            &caps[2]
        )));
    }
    if patterns.missing.is_match(output) {
        return Some(BridgeError::backend_missing(command));
    }
    None
}

/// Classify a backend that exited before signalling ready.
pub fn classify_exit(command: &str, output: &str, exit_code: Option<i32>) -> BridgeError {
    if let Some(err) = detect_failure(command, output) {
        return err;
    }
    if exit_code == Some(127) {
        return BridgeError::backend_missing(command);
    }

    let tail = output.trim();
    let code = exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string());
    if tail.is_empty() {
        BridgeError::transport(format!("backend exited ({}) before signaling ready", code))
    } else {
        BridgeError::transport(format!(
            "backend exited ({}) before signaling ready: {}",
            code, tail
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn scanner_reports_port_and_pid() {
        let mut scanner = DiagnosticScanner::new();
        assert_eq!(
            scanner.feed("Solargraph is listening port=54321 pid=9876\n"),
            Some((54321, 9876))
        );
    }

    #[test]
    fn scanner_handles_split_chunks() {
        let mut scanner = DiagnosticScanner::new();
        assert_eq!(scanner.feed("Solargraph is listening po"), None);
        assert_eq!(scanner.feed("rt=54321 "), None);
        assert_eq!(scanner.port(), Some(54321));
        assert_eq!(scanner.feed("PID=9876\n"), Some((54321, 9876)));
    }

    #[rstest]
    #[case(&["port=54", "321 pid=9876\n"])]
    #[case(&["port=54321 pid=98", "76\n"])]
    #[case(&["port=5", "4321", " pid=9", "876", "\n"])]
    fn scanner_waits_for_numbers_split_across_chunks(#[case] chunks: &[&str]) {
        let mut scanner = DiagnosticScanner::new();
        let (last, init) = chunks.split_last().unwrap();
        for chunk in init {
            assert_eq!(scanner.feed(chunk), None, "ready too early after {:?}", chunk);
        }
        assert_eq!(scanner.feed(last), Some((54321, 9876)));
    }

    #[test]
    fn unterminated_value_is_not_reported() {
        let mut scanner = DiagnosticScanner::new();
        assert_eq!(scanner.feed("port=54321 pid=9876"), None);
        assert_eq!(scanner.port(), Some(54321));
        assert_eq!(scanner.pid(), None);
    }

    #[test]
    fn scanner_keeps_first_values() {
        let mut scanner = DiagnosticScanner::new();
        scanner.feed("port=1000 ");
        scanner.feed("port=2000 pid=3");
        assert_eq!(scanner.port(), Some(1000));
    }

    #[test]
    fn transcript_is_bounded() {
        let mut scanner = DiagnosticScanner::new();
        for _ in 0..1000 {
            scanner.feed("some noisy diagnostic line\n");
        }
        assert!(scanner.transcript().len() <= TRANSCRIPT_LIMIT);
    }

    #[rstest]
    #[case(r#"Could not find command "socket"."#)]
    #[case("zsh: command not found: stdio")]
    fn outdated_backend_is_recognised(#[case] output: &str) {
        assert!(matches!(
            detect_failure("solargraph", output),
            Some(BridgeError::BackendOutdated { .. })
        ));
    }

    #[rstest]
    #[case("sh: 1: solargraph: not found")]
    #[case("bash: solargraph: command not found")]
    #[case("zsh: command not found: solargraph")]
    #[case("/bin/sh: /opt/solargraph: No such file or directory")]
    #[case("'solargraph' is not recognized as an internal or external command")]
    fn missing_backend_is_recognised(#[case] output: &str) {
        assert!(matches!(
            detect_failure("solargraph", output),
            Some(BridgeError::BackendMissing { .. })
        ));
    }

    #[rstest]
    #[case("Solargraph is starting\n")]
    #[case("Errno::ENOENT: No such file or directory @ rb_sysopen - .solargraph.yml\n")]
    #[case("Loading gems\nWarning: views: No such file or directory\n")]
    fn ordinary_output_is_not_a_failure(#[case] output: &str) {
        assert!(detect_failure("solargraph", output).is_none());
    }

    #[test]
    fn zsh_enoent_means_missing() {
        assert!(matches!(
            detect_failure("solargraph", "Solargraph log\nzsh: no such file or directory: ./bin/solargraph\n"),
            Some(BridgeError::BackendMissing { .. })
        ));
    }

    #[test]
    fn exit_127_means_missing() {
        assert!(matches!(
            classify_exit("solargraph", "", Some(127)),
            BridgeError::BackendMissing { .. }
        ));
    }

    #[test]
    fn other_exits_are_transport_errors() {
        let err = classify_exit("solargraph", "boom\n", Some(3));
        assert!(matches!(err, BridgeError::Transport { .. }));
        assert!(err.to_string().contains("boom"));
    }
}
