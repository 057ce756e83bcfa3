//! JSON status-file handshake with a supervising process.
//!
//! The supervisor creates a JSON object in a file; the server waits for it,
//! then rewrites it atomically with `port` and `status` merged in once it is
//! listening (or `status: "failed"` when startup dies first).

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::bail;
use serde_json::Map;
use serde_json::Value;
use tokio::time::Instant;
use tokio::time::sleep;

/// How long to wait for the supervisor to create the file.
const WAIT_TIMEOUT: Duration = Duration::from_secs(20);

/// Poll interval while waiting for the file to appear.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Tracks the status file through startup.
#[derive(Debug)]
pub struct StatusTracker {
    /// Path of the status file.
    path: PathBuf,
    /// The supervisor's object, with our keys merged in as they are written.
    contents: Map<String, Value>,
    /// Whether `status: "running"` has been written.
    running_written: bool,
}

impl StatusTracker {
    /// Waits for the supervisor to create the file and parses it.
    ///
    /// # Errors
    ///
    /// Fails when the file does not appear within 20 seconds, is not valid
    /// JSON, or is not a JSON object.
    pub async fn wait(path: &Path) -> anyhow::Result<Self> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        let text = loop {
            match tokio::fs::read_to_string(path).await {
                Ok(text) => break text,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    if Instant::now() >= deadline {
                        bail!(
                            "Status file '{}' not found after {} seconds",
                            path.display(),
                            WAIT_TIMEOUT.as_secs()
                        );
                    }
                    sleep(WAIT_POLL).await;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to read status file '{}'", path.display()));
                }
            }
        };

        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("Status file '{}' is not valid JSON", path.display()))?;
        let Value::Object(contents) = value else {
            bail!("Status file '{}' must contain a JSON object", path.display());
        };

        Ok(Self {
            path: path.to_path_buf(),
            contents,
            running_written: false,
        })
    }

    /// Whether the `running` state has been recorded.
    pub fn running_written(&self) -> bool {
        self.running_written
    }

    /// Records the bound port and `status: "running"`.
    pub fn write_running(&mut self, port: u16) -> anyhow::Result<()> {
        self.contents.insert(String::from("port"), Value::from(port));
        self.contents
            .insert(String::from("status"), Value::from("running"));
        self.write()?;
        self.running_written = true;
        Ok(())
    }

    /// Records `status: "failed"`. Used when startup dies before `running`.
    pub fn write_failed(&mut self) -> anyhow::Result<()> {
        self.contents
            .insert(String::from("status"), Value::from("failed"));
        self.write()
    }

    /// Atomically rewrites the file: write a temp sibling, then rename.
    fn write(&self) -> anyhow::Result<()> {
        let mut payload = serde_json::to_string(&Value::Object(self.contents.clone()))?;
        payload.push('\n');
        let mut temp = self.path.as_os_str().to_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        std::fs::write(&temp, payload)
            .with_context(|| format!("failed to write status file '{}'", temp.display()))?;
        std::fs::rename(&temp, &self.path)
            .with_context(|| format!("failed to replace status file '{}'", self.path.display()))?;
        Ok(())
    }
}
