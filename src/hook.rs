use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

const HOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Optional per-record enrichment plugin: an external command that receives
/// the record as a JSON object on stdin and prints a JSON patch object on
/// stdout. Patch fields override computed fields on key collision. Runs
/// under a bounded timeout so a hung hook cannot stall a page handler.
#[derive(Debug, Clone)]
pub struct OutputHook {
    argv: Vec<String>,
    timeout: Duration,
}

impl OutputHook {
    /// `argv` must be non-empty; the input resolver validates this before
    /// the crawl starts.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            timeout: HOOK_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    /// Apply the hook to one record. Any failure (spawn error, timeout,
    /// non-zero exit, unparseable output) is logged and leaves the record
    /// unmodified; a non-object result is a no-op merge.
    pub async fn apply(&self, record: &mut Value) {
        match self.run(record).await {
            Ok(Some(patch)) => merge_patch(record, patch),
            Ok(None) => {}
            Err(e) => warn!("output hook failed, record kept as-is: {e:#}"),
        }
    }

    async fn run(&self, record: &Value) -> Result<Option<Value>> {
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn hook command {:?}", self.argv[0]))?;

        let input = serde_json::to_vec(record)?;
        let mut stdin = child.stdin.take().context("hook stdin unavailable")?;

        let output = tokio::time::timeout(self.timeout, async {
            // The hook may exit without reading; a closed pipe is its problem.
            let _ = stdin.write_all(&input).await;
            drop(stdin);
            child.wait_with_output().await
        })
        .await
        .map_err(|_| anyhow::anyhow!("hook timed out after {:?}", self.timeout))??;

        if !output.status.success() {
            bail!("hook exited with {}", output.status);
        }
        let value: Value =
            serde_json::from_slice(&output.stdout).context("hook output is not valid JSON")?;
        Ok(match value {
            Value::Object(_) => Some(value),
            _ => None,
        })
    }
}

fn merge_patch(record: &mut Value, patch: Value) {
    if let (Some(target), Value::Object(fields)) = (record.as_object_mut(), patch) {
        for (key, value) in fields {
            target.insert(key, value);
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn patch_fields_override_computed_fields() {
        let hook = OutputHook::new(sh(
            r#"cat > /dev/null; echo '{"email": "patched@a.example", "extra": 1}'"#,
        ));
        let mut record = json!({"name": "Acme", "email": "old@a.example"});
        hook.apply(&mut record).await;
        assert_eq!(
            record,
            json!({"name": "Acme", "email": "patched@a.example", "extra": 1})
        );
    }

    #[tokio::test]
    async fn identity_hook_keeps_record_intact() {
        let hook = OutputHook::new(vec!["cat".to_string()]);
        let mut record = json!({"name": "Acme", "rating": 4.5});
        let before = record.clone();
        hook.apply(&mut record).await;
        assert_eq!(record, before);
    }

    #[tokio::test]
    async fn non_object_output_is_a_noop_merge() {
        let hook = OutputHook::new(sh("cat > /dev/null; echo 42"));
        let mut record = json!({"name": "Acme"});
        hook.apply(&mut record).await;
        assert_eq!(record, json!({"name": "Acme"}));
    }

    #[tokio::test]
    async fn failing_hook_never_loses_the_record() {
        let hook = OutputHook::new(vec!["false".to_string()]);
        let mut record = json!({"name": "Acme"});
        hook.apply(&mut record).await;
        assert_eq!(record, json!({"name": "Acme"}));

        let hook = OutputHook::new(vec!["/nonexistent/hook".to_string()]);
        hook.apply(&mut record).await;
        assert_eq!(record, json!({"name": "Acme"}));

        let hook = OutputHook::new(sh("cat > /dev/null; echo 'not json'"));
        hook.apply(&mut record).await;
        assert_eq!(record, json!({"name": "Acme"}));
    }

    #[tokio::test]
    async fn hung_hook_is_cut_off_by_the_timeout() {
        let hook = OutputHook::with_timeout(
            vec!["sleep".to_string(), "30".to_string()],
            Duration::from_millis(100),
        );
        let mut record = json!({"name": "Acme"});
        let start = std::time::Instant::now();
        hook.apply(&mut record).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(record, json!({"name": "Acme"}));
    }
}
