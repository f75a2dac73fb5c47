//! FFmpeg subprocess engine for binary-to-binary audio conversion.
//!
//! Input bytes are fed to the subprocess over stdin while stdout and stderr
//! are drained concurrently; draining serially can deadlock once a pipe
//! buffer fills on either side. A wall-clock deadline races process
//! completion, and a timed-out subprocess is killed, never orphaned.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Executable resolved from PATH when no explicit path is configured.
const DEFAULT_EXECUTABLE: &str = "ffmpeg";

/// Wall-clock deadline for one transcode invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound on the availability version probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Container format for the output stream.
const OUTPUT_FORMAT: &str = "mp3";

/// One transcode invocation: input bytes in, converted bytes out.
///
/// Ephemeral; owned by the `transcode` call that consumes it.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Binary input fed to the subprocess over stdin.
    pub input: Vec<u8>,
    /// Conversion arguments inserted between the input and output bindings.
    pub conversion_args: Vec<String>,
    /// Explicit executable path; None resolves the default from PATH.
    pub executable_path: Option<String>,
    /// Wall-clock deadline for the subprocess.
    pub timeout: Duration,
}

impl TranscodeJob {
    /// Create a job with the default executable and timeout.
    pub fn new(input: Vec<u8>, conversion_args: Vec<String>) -> Self {
        Self {
            input,
            conversion_args,
            executable_path: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Structured outcome of one subprocess invocation.
///
/// Always reports the command line, elapsed duration, and captured stderr so
/// failures stay diagnosable.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeResult {
    /// True iff the process completed before the deadline and exited 0.
    pub success: bool,
    /// Process exit code; -1 when the process never ran or was killed.
    pub exit_code: i32,
    /// Bytes captured from stdout.
    pub output: Vec<u8>,
    /// Text captured from stderr (or the spawn error).
    pub diagnostic: String,
    /// The command line that was executed.
    pub command_line: String,
    /// Wall-clock duration of the invocation.
    pub elapsed: Duration,
    /// True iff the deadline elapsed before the process completed.
    pub timed_out: bool,
}

/// Resolve the executable to run: the supplied path if non-blank, else the
/// well-known name looked up via PATH.
pub fn resolve_executable(executable_path: Option<&str>) -> String {
    match executable_path {
        Some(path) if !path.trim().is_empty() => path.to_string(),
        _ => DEFAULT_EXECUTABLE.to_string(),
    }
}

/// Build the full argument list for a conversion run.
///
/// Shape: `-loglevel error -i pipe:0 <conversion args> -f mp3 pipe:1` —
/// input bound to stdin, output bound to stdout in the fixed container
/// format.
pub fn build_transcode_args(conversion_args: &[String]) -> Vec<String> {
    let mut args = vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ];
    args.extend(conversion_args.iter().cloned());
    args.push("-f".to_string());
    args.push(OUTPUT_FORMAT.to_string());
    args.push("pipe:1".to_string());
    args
}

/// Check whether the transcoder executable can be spawned.
///
/// Runs a version query with a bounded wait. Any spawn failure, non-zero
/// exit, or timeout yields false; this probe never fails loudly.
pub async fn is_available(executable_path: Option<&str>) -> bool {
    let exe = resolve_executable(executable_path);

    let mut cmd = Command::new(&exe);
    cmd.arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(_) => return false,
    };

    match tokio::time::timeout(PROBE_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        Err(_) => {
            let _ = child.start_kill();
            false
        }
    }
}

/// Run one transcode job to completion (or timeout).
///
/// This call never returns an error: spawn failures, non-zero exits, and
/// timeouts are all folded into the returned `TranscodeResult`.
pub async fn transcode(job: &TranscodeJob) -> TranscodeResult {
    let exe = resolve_executable(job.executable_path.as_deref());
    let args = build_transcode_args(&job.conversion_args);
    run_piped(&exe, &args, &job.input, job.timeout).await
}

/// Spawn `exe` with the given args, feed `input` over stdin, and capture
/// stdout/stderr while racing the wall-clock deadline.
async fn run_piped(exe: &str, args: &[String], input: &[u8], timeout: Duration) -> TranscodeResult {
    let command_line = format!("{} {}", exe, args.join(" "));
    let started = Instant::now();

    let mut cmd = Command::new(exe);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return TranscodeResult {
                success: false,
                exit_code: -1,
                output: Vec::new(),
                diagnostic: e.to_string(),
                command_line,
                elapsed: started.elapsed(),
                timed_out: false,
            };
        }
    };

    // All three pipes were requested above, so take() cannot fail.
    let mut stdin = child.stdin.take().expect("stdin is piped");
    let mut stdout = child.stdout.take().expect("stdout is piped");
    let mut stderr = child.stderr.take().expect("stderr is piped");

    let input_owned = input.to_vec();
    let writer = tokio::spawn(async move {
        // A process that exits without reading all input yields a broken
        // pipe here; that is the process's business, not ours.
        let _ = stdin.write_all(&input_owned).await;
        let _ = stdin.shutdown().await;
        // Dropping stdin closes the pipe and signals end-of-input.
    });

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    });

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let _ = writer.await;
            let output = stdout_task.await.unwrap_or_default();
            let diagnostic_bytes = stderr_task.await.unwrap_or_default();

            let exit_code = status.code().unwrap_or(-1);
            TranscodeResult {
                success: status.success(),
                exit_code,
                output,
                diagnostic: String::from_utf8_lossy(&diagnostic_bytes).into_owned(),
                command_line,
                elapsed: started.elapsed(),
                timed_out: false,
            }
        }
        Ok(Err(e)) => {
            writer.abort();
            stdout_task.abort();
            stderr_task.abort();
            TranscodeResult {
                success: false,
                exit_code: -1,
                output: Vec::new(),
                diagnostic: e.to_string(),
                command_line,
                elapsed: started.elapsed(),
                timed_out: false,
            }
        }
        Err(_) => {
            // Deadline elapsed first: kill and reap so no orphan survives.
            let _ = child.start_kill();
            let _ = child.wait().await;
            writer.abort();
            let output = stdout_task.await.unwrap_or_default();
            let diagnostic_bytes = stderr_task.await.unwrap_or_default();

            TranscodeResult {
                success: false,
                exit_code: -1,
                output,
                diagnostic: String::from_utf8_lossy(&diagnostic_bytes).into_owned(),
                command_line,
                elapsed: started.elapsed(),
                timed_out: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // *For any* conversion argument list, the built command line starts with
    // the low-verbosity flag and the stdin binding, carries the conversion
    // arguments in order, and ends with the fixed output format bound to
    // stdout.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_transcode_args_completeness(
            conversion_args in prop::collection::vec("[a-zA-Z0-9:=-]{1,16}", 0..8),
        ) {
            let args = build_transcode_args(&conversion_args);

            prop_assert_eq!(&args[0..4], &[
                "-loglevel".to_string(),
                "error".to_string(),
                "-i".to_string(),
                "pipe:0".to_string(),
            ]);

            let tail_start = args.len() - 3;
            prop_assert_eq!(&args[tail_start..], &[
                "-f".to_string(),
                "mp3".to_string(),
                "pipe:1".to_string(),
            ]);

            prop_assert_eq!(&args[4..tail_start], conversion_args.as_slice());
        }
    }

    #[test]
    fn test_resolve_executable_default() {
        assert_eq!(resolve_executable(None), "ffmpeg");
        assert_eq!(resolve_executable(Some("")), "ffmpeg");
        assert_eq!(resolve_executable(Some("   ")), "ffmpeg");
    }

    #[test]
    fn test_resolve_executable_explicit() {
        assert_eq!(
            resolve_executable(Some("/opt/ffmpeg/bin/ffmpeg")),
            "/opt/ffmpeg/bin/ffmpeg"
        );
    }

    #[tokio::test]
    async fn test_run_piped_round_trips_input() {
        // cat with no args copies stdin to stdout and exits 0.
        let input = b"binary \x00\x01\x02 payload".to_vec();
        let result = run_piped("cat", &[], &input, Duration::from_secs(10)).await;

        assert!(result.success, "diagnostic: {}", result.diagnostic);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, input);
        assert!(!result.timed_out);
        assert!(result.command_line.starts_with("cat"));
    }

    #[tokio::test]
    async fn test_run_piped_large_input_does_not_deadlock() {
        // Larger than a pipe buffer on any common platform; serial stream
        // handling would wedge here.
        let input = vec![0xA5u8; 4 * 1024 * 1024];
        let result = run_piped("cat", &[], &input, Duration::from_secs(30)).await;

        assert!(result.success);
        assert_eq!(result.output.len(), input.len());
    }

    #[tokio::test]
    async fn test_run_piped_nonzero_exit_reports_failure() {
        let args = vec!["1".to_string()];
        let result = run_piped("false", &args, b"", Duration::from_secs(10)).await;

        assert!(!result.success);
        assert_ne!(result.exit_code, 0);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_run_piped_timeout() {
        let args = vec!["30".to_string()];
        let deadline = Duration::from_millis(200);
        let result = run_piped("sleep", &args, b"ignored", deadline).await;

        assert!(result.timed_out);
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        // Returns within a bounded margin of the deadline, not after 30 s.
        assert!(result.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_piped_spawn_failure() {
        let result = run_piped(
            "/nonexistent/mediaflow-test-binary",
            &[],
            b"",
            Duration::from_secs(1),
        )
        .await;

        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(!result.timed_out);
        assert!(!result.diagnostic.is_empty());
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_transcode_unsupported_executable_surfaces_diagnostic() {
        // cat rejects the ffmpeg-shaped flags, exercising the failure path
        // end to end without requiring a real transcoder on the machine.
        let job = TranscodeJob {
            input: b"payload".to_vec(),
            conversion_args: Vec::new(),
            executable_path: Some("cat".to_string()),
            timeout: Duration::from_secs(10),
        };

        let result = transcode(&job).await;

        assert!(!result.success);
        assert_ne!(result.exit_code, 0);
        assert!(!result.diagnostic.is_empty());
        assert!(result.command_line.contains("pipe:0"));
        assert!(result.command_line.contains("pipe:1"));
    }

    #[tokio::test]
    async fn test_is_available_true_for_flag_ignoring_binary() {
        // `true` exits 0 regardless of arguments.
        assert!(is_available(Some("true")).await);
    }

    #[tokio::test]
    async fn test_is_available_false_for_failing_binary() {
        assert!(!is_available(Some("false")).await);
    }

    #[tokio::test]
    async fn test_is_available_false_for_missing_binary() {
        assert!(!is_available(Some("/nonexistent/mediaflow-test-binary")).await);
    }
}
