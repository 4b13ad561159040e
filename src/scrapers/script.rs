//! Process-driven scraper.
//!
//! Runs `<program> [args..] [script] <code>` and treats the child's stdout
//! as the scrape payload. The default wiring is `node scripts/parcelsapp.js`,
//! which drives a headless browser against the tracking widget and prints
//! the captured API response.
//!
//! On unix the child leads its own process group, and the whole group is
//! SIGKILLed when the scrape returns or is dropped. That reaches the browser
//! the script launched as well as the script itself.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::Scraper;
use crate::config::ParcelsAppConfig;
use crate::types::{TrackerError, TrackingRequest};

const PROVIDER_NAME: &str = "parcels_app";

/// Longest stderr excerpt carried into an error message.
const MAX_STDERR_CHARS: usize = 500;

pub struct ScriptScraper {
    program: String,
    args: Vec<String>,
    script: Option<String>,
    timeout: Duration,
}

impl ScriptScraper {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        script: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            script,
            timeout,
        }
    }

    pub fn from_config(cfg: &ParcelsAppConfig) -> Self {
        let script = Some(cfg.script_path.clone()).filter(|s| !s.trim().is_empty());
        Self::new(
            cfg.node_path.clone(),
            cfg.args.clone(),
            script,
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    fn command(&self, code: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref script) = self.script {
            cmd.arg(script);
        }
        cmd.arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// Kills a scrape's process group on drop.
#[cfg_attr(not(unix), allow(dead_code))]
struct GroupGuard {
    pgid: Option<u32>,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // ESRCH just means the group already exited.
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
}

#[async_trait]
impl Scraper for ScriptScraper {
    async fn scrape(&self, request: &TrackingRequest) -> Result<Vec<u8>, TrackerError> {
        let code = request.code.as_str();

        let child = self.command(code).spawn().map_err(|e| {
            TrackerError::scrape(code, format!("failed to launch {}: {e}", self.program))
        })?;

        let _group = GroupGuard { pgid: child.id() };
        debug!(label = %request.label, code, pid = ?child.id(), "Scrape process started");

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| TrackerError::scrape(code, format!("failed to collect output: {e}")))?,
            Err(_) => {
                warn!(label = %request.label, code, "Scrape process timed out, killing its group");
                return Err(TrackerError::Timeout {
                    code: code.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            return Err(TrackerError::scrape(
                code,
                format!("{} exited with {}: {stderr}", self.program, output.status),
            ));
        }

        let payload = trim_whitespace(&output.stdout);
        if payload.is_empty() {
            return Err(TrackerError::scrape(code, "no response captured"));
        }

        debug!(label = %request.label, code, bytes = payload.len(), "Scrape process finished");
        Ok(payload.to_vec())
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// `sh -c <body> <code>`: the code lands in `$0`.
    fn shell(body: &str, timeout: Duration) -> ScriptScraper {
        ScriptScraper::new("sh", vec!["-c".into(), body.into()], None, timeout)
    }

    fn req(code: &str) -> TrackingRequest {
        TrackingRequest::new("pkg", code)
    }

    #[tokio::test]
    async fn test_stdout_is_payload() {
        let s = shell(r#"printf '{"code":"%s"}\n' "$0""#, Duration::from_secs(5));
        let out = s.scrape(&req("LX897146572CN")).await.unwrap();
        assert_eq!(out, br#"{"code":"LX897146572CN"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let s = shell("echo 'element #track-input not found' >&2; exit 3", Duration::from_secs(5));
        let err = s.scrape(&req("BAD123")).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("BAD123"), "{msg}");
        assert!(msg.contains("#track-input not found"), "{msg}");
    }

    #[tokio::test]
    async fn test_empty_stdout_is_error() {
        let s = shell("true", Duration::from_secs(5));
        let err = s.scrape(&req("X1")).await.unwrap_err();
        assert!(err.to_string().contains("no response captured"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let s = shell("sleep 10", Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = s.scrape(&req("SLOW1")).await.unwrap_err();
        assert!(matches!(err, TrackerError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    fn marker_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("parcel_tracker_marker_{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        let marker = marker_path();
        let body = format!("(sleep 1; touch '{}') & wait", marker.display());
        let s = shell(&body, Duration::from_millis(200));

        let err = s.scrape(&req("SLOW1")).await.unwrap_err();
        assert!(matches!(err, TrackerError::Timeout { .. }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let survived = marker.exists();
        let _ = std::fs::remove_file(&marker);
        assert!(!survived, "background process outlived the timed-out scrape");
    }

    #[tokio::test]
    async fn test_success_reaps_background_processes() {
        let marker = marker_path();
        let body = format!(
            "(sleep 1; touch '{}') >/dev/null 2>&1 & echo '{{}}'",
            marker.display()
        );
        let s = shell(&body, Duration::from_secs(5));

        let out = s.scrape(&req("LX897146572CN")).await.unwrap();
        assert_eq!(out, b"{}".to_vec());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let survived = marker.exists();
        let _ = std::fs::remove_file(&marker);
        assert!(!survived, "background process outlived the finished scrape");
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let s = ScriptScraper::new(
            "/nonexistent/parcel-tracker-node",
            Vec::new(),
            Some("scripts/parcelsapp.js".into()),
            Duration::from_secs(1),
        );
        let err = s.scrape(&req("X1")).await.unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[test]
    fn test_trim_whitespace() {
        assert_eq!(trim_whitespace(b"  {}\n"), b"{}");
        assert_eq!(trim_whitespace(b"\n\t "), b"");
        assert_eq!(trim_whitespace(b""), b"");
    }

    #[test]
    fn test_from_config_skips_blank_script() {
        let cfg = ParcelsAppConfig {
            node_path: "/usr/local/bin/track".into(),
            script_path: "".into(),
            args: Vec::new(),
            timeout_secs: 10,
        };
        let s = ScriptScraper::from_config(&cfg);
        assert!(s.script.is_none());
        assert_eq!(s.timeout, Duration::from_secs(10));
        assert_eq!(s.name(), "parcels_app");
    }
}
