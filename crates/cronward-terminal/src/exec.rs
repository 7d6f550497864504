//! Run a shell command to completion while streaming its output.
//!
//! This is the only place cronward spawns a job's shell command. The child's
//! stdout and stderr are read concurrently, split on newlines, stripped of
//! ANSI escapes and handed to an [`OutputSink`] as they arrive. No timeout is
//! applied.

use crate::{
    error::{Result, TerminalError},
    types::{ExecOptions, ExecResult, OutputSink, OutputStream},
};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Execute `command` via `<shell> -c` and wait for it to exit.
///
/// A non-zero exit is not an error here; inspect [`ExecResult::success`].
///
/// # Errors
///
/// - `Spawn`: the shell could not be started.
/// - `IoError`: reading a pipe or waiting on the child failed.
pub async fn run_streaming(
    command: &str,
    options: &ExecOptions,
    sink: &dyn OutputSink,
) -> Result<ExecResult> {
    debug!(shell = %options.shell, "exec: {command}");

    let mut cmd = AsyncCommand::new(&options.shell);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(ref cwd) = options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| TerminalError::Spawn(format!("spawn failed: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (out, err, status) = tokio::join!(
        pump(stdout, OutputStream::Stdout, sink),
        pump(stderr, OutputStream::Stderr, sink),
        child.wait(),
    );
    out?;
    err?;
    let status = status?;

    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    let result = ExecResult {
        exit_code: status.code().unwrap_or(-1),
        signal,
    };
    debug!("exec finished: {result}");
    Ok(result)
}

/// Forward one pipe to the sink line by line until EOF.
async fn pump<R>(pipe: Option<R>, stream: OutputStream, sink: &dyn OutputSink) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(());
    };
    let mut segments = BufReader::new(pipe).split(b'\n');
    while let Some(raw) = segments.next_segment().await? {
        let text = strip_text(&raw);
        sink.line(stream, text.trim_end_matches('\r'));
    }
    Ok(())
}

/// Strip ANSI escape codes and convert bytes to a UTF-8 string.
fn strip_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(OutputStream, String)>>);

    impl OutputSink for Collect {
        fn line(&self, stream: OutputStream, line: &str) {
            self.0.lock().unwrap().push((stream, line.to_string()));
        }
    }

    impl Collect {
        fn lines(&self, stream: OutputStream) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, _)| *s == stream)
                .map(|(_, l)| l.clone())
                .collect()
        }
    }

    #[tokio::test]
    async fn streams_stdout_and_stderr_separately() {
        let sink = Collect::default();
        let result = run_streaming(
            "echo one; echo two; echo oops >&2",
            &ExecOptions::default(),
            &sink,
        )
        .await
        .unwrap();

        assert!(result.success());
        assert_eq!(sink.lines(OutputStream::Stdout), ["one", "two"]);
        assert_eq!(sink.lines(OutputStream::Stderr), ["oops"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let sink = Collect::default();
        let result = run_streaming("exit 3", &ExecOptions::default(), &sink)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
        assert_eq!(result.to_string(), "exit code 3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_death_is_reported() {
        let sink = Collect::default();
        let result = run_streaming("kill -9 $$", &ExecOptions::default(), &sink)
            .await
            .unwrap();
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.signal, Some(9));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn missing_shell_is_a_spawn_error() {
        let options = ExecOptions {
            shell: "/definitely/not/a/shell".to_string(),
            ..ExecOptions::default()
        };
        let err = run_streaming("true", &options, &Collect::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::Spawn(_)));
    }

    #[tokio::test]
    async fn cwd_and_env_are_applied() {
        let dir = std::env::temp_dir();
        let options = ExecOptions {
            cwd: Some(dir.clone()),
            env: vec![("CRONWARD_TEST_VALUE".to_string(), "42".to_string())],
            ..ExecOptions::default()
        };
        let sink = Collect::default();
        run_streaming("pwd; echo $CRONWARD_TEST_VALUE", &options, &sink)
            .await
            .unwrap();

        let out = sink.lines(OutputStream::Stdout);
        assert_eq!(out.len(), 2);
        let reported = std::fs::canonicalize(&out[0]).unwrap();
        assert_eq!(reported, std::fs::canonicalize(&dir).unwrap());
        assert_eq!(out[1], "42");
    }

    #[tokio::test]
    async fn ansi_escapes_are_stripped() {
        let sink = Collect::default();
        run_streaming(
            r"printf '\033[31mred\033[0m\n'",
            &ExecOptions::default(),
            &sink,
        )
        .await
        .unwrap();
        assert_eq!(sink.lines(OutputStream::Stdout), ["red"]);
    }

    #[tokio::test]
    async fn closure_sink_receives_lines() {
        let seen = Mutex::new(Vec::new());
        let sink = |_: OutputStream, line: &str| seen.lock().unwrap().push(line.to_string());
        run_streaming("printf 'a\\nb'", &ExecOptions::default(), &sink)
            .await
            .unwrap();
        // a trailing line without a newline is still delivered
        assert_eq!(*seen.lock().unwrap(), ["a", "b"]);
    }
}
