//! Platform shell execution for `sys`, `sys2`, `sys3` and block filters.
//!
//! Calls are synchronous with no timeout. Output is decoded as lossy UTF-8
//! and split into right trimmed lines.

use std::io::{self, Write};
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub lines: Vec<String>,
    pub success: bool,
}

fn shell(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Group `command` so its own redirections still land in the merged stream.
fn merged(command: &str) -> String {
    if cfg!(windows) {
        format!("({}) 2>&1", command)
    } else {
        format!("{{ {}\n}} 2>&1", command)
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|s| s.trim_end().to_string())
        .collect()
}

/// Run `command` and capture its standard output. With `merge_stderr`
/// standard error is captured too, otherwise it passes through.
pub fn run(command: &str, merge_stderr: bool) -> io::Result<Output> {
    let command = if merge_stderr {
        merged(command)
    } else {
        command.to_string()
    };
    tracing::debug!("shelling: {}", command);
    let output = shell(&command)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()?;
    Ok(Output {
        lines: split_lines(&output.stdout),
        success: output.status.success(),
    })
}

/// Pipe `input` through `command`.
pub fn filter(command: &str, input: &[String]) -> io::Result<Output> {
    tracing::debug!("filtering: {}", command);
    let mut child = shell(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;
    let text = input.join("\n");
    let writer = child.stdin.take().map(|mut stdin| {
        std::thread::spawn(move || {
            // A filter that exits early closes the pipe; that is not an error.
            let _ = stdin.write_all(text.as_bytes());
        })
    });
    let output = child.wait_with_output()?;
    if let Some(writer) = writer {
        let _ = writer.join();
    }
    Ok(Output {
        lines: split_lines(&output.stdout),
        success: output.status.success(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let out = run("printf 'a  \\nb\\n'", false).unwrap();
        assert_eq!(out.lines, vec!["a", "b"]);
        assert!(out.success);
    }

    #[test]
    fn test_run_merges_stderr() {
        let out = run("echo oops >&2", true).unwrap();
        assert_eq!(out.lines, vec!["oops"]);
    }

    #[test]
    fn test_run_merges_interleaved_streams() {
        let out = run("echo one; echo two >&2; echo three", true).unwrap();
        assert_eq!(out.lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_non_zero_exit_keeps_output() {
        let out = run("echo partial; exit 3", false).unwrap();
        assert_eq!(out.lines, vec!["partial"]);
        assert!(!out.success);
    }

    #[test]
    fn test_filter_pipes_lines() {
        let input = vec!["b".to_string(), "a".to_string()];
        let out = filter("sort", &input).unwrap();
        assert_eq!(out.lines, vec!["a", "b"]);
    }
}
