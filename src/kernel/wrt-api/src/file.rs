use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::*;
use serde_json::{json, Value};
use std::time::Duration;
use ubus_rpc::CallOptions;

use crate::{ReplyExt, RouterClient, WrtApiError, WrtResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    pub code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string();
        ExecResult {
            code: value.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
            stdout: text("stdout"),
            stderr: text("stderr"),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stderr if there is any, else stdout.
    pub fn message(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

impl RouterClient {
    pub async fn file_read(&self, path: &str) -> WrtResult<String> {
        let payload = self
            .call("file", "read", json!({ "path": path }))
            .await?
            .into_payload("file", "read")?;
        Ok(payload.get("data").and_then(|d| d.as_str()).unwrap_or("").to_string())
    }

    pub async fn file_read_base64(&self, path: &str) -> WrtResult<Vec<u8>> {
        let payload = self
            .call("file", "read", json!({ "path": path, "base64": true }))
            .await?
            .into_payload("file", "read")?;
        let data = payload
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| WrtApiError::ReasonError(format!("{} returned no data", path)))?;
        STANDARD
            .decode(data.trim())
            .map_err(|err| WrtApiError::ReasonError(format!("decode {} failed: {}", path, err)))
    }

    pub async fn file_write(&self, path: &str, data: &str, base64: bool, append: bool) -> WrtResult<()> {
        self.file_write_with_options(path, data, base64, append, &CallOptions::default())
            .await
    }

    pub async fn file_write_with_options(
        &self,
        path: &str,
        data: &str,
        base64: bool,
        append: bool,
        options: &CallOptions,
    ) -> WrtResult<()> {
        let mut params = json!({ "path": path, "data": data });
        if base64 {
            params["base64"] = json!(true);
        }
        if append {
            params["append"] = json!(true);
        }
        self.call_with_options("file", "write", params, options)
            .await?
            .into_payload("file", "write")?;
        Ok(())
    }

    /// Writes `bytes` to `path` as base64 slices of `chunk_size`. The first slice
    /// truncates, the rest append. `progress` sees (written, total).
    pub async fn file_upload<F>(
        &self,
        path: &str,
        bytes: &[u8],
        chunk_size: usize,
        timeout: Option<Duration>,
        mut progress: F,
    ) -> WrtResult<()>
    where
        F: FnMut(usize, usize) + Send,
    {
        let chunk_size = chunk_size.max(1);
        let options = CallOptions { timeout };
        let total = bytes.len();
        if total == 0 {
            self.file_write_with_options(path, "", true, false, &options).await?;
            progress(0, 0);
            return Ok(());
        }
        let mut offset = 0;
        for chunk in bytes.chunks(chunk_size) {
            let encoded = STANDARD.encode(chunk);
            self.file_write_with_options(path, &encoded, true, offset > 0, &options)
                .await?;
            offset += chunk.len();
            progress(offset, total);
        }
        debug!("uploaded {} bytes to {}", total, path);
        Ok(())
    }

    pub async fn file_exec(&self, command: &str, params: &[&str], timeout: Option<Duration>) -> WrtResult<ExecResult> {
        let options = CallOptions { timeout };
        let payload = self
            .call_with_options("file", "exec", json!({ "command": command, "params": params }), &options)
            .await?
            .into_payload("file", "exec")?;
        Ok(ExecResult::from_value(&payload))
    }

    /// Best effort; a failure is only logged.
    pub async fn remove_file(&self, path: &str) {
        if let Err(err) = self.file_exec("/bin/rm", &["-f", path], None).await {
            warn!("remove {} failed: {}", path, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ubus_rpc::MockUbus;

    #[tokio::test]
    async fn test_upload_chunks() {
        let mock = Arc::new(MockUbus::new());
        mock.on("file", "write", json!({}));
        let client = RouterClient::new(mock.clone());

        let bytes: Vec<u8> = (0..10u8).collect();
        let mut seen = Vec::new();
        client
            .file_upload("/tmp/firmware.bin", &bytes, 4, Some(Duration::from_secs(30)), |done, total| {
                seen.push((done, total))
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![(4, 10), (8, 10), (10, 10)]);
        let writes = mock.calls_to("file", "write");
        assert_eq!(writes.len(), 3);
        assert!(writes[0].params.get("append").is_none());
        assert_eq!(writes[1].params["append"], true);
        assert_eq!(writes[2].params["data"], STANDARD.encode([8u8, 9]));
        assert_eq!(writes[0].timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_read_base64_and_exec() {
        let mock = Arc::new(MockUbus::new());
        mock.on("file", "read", json!({"data": STANDARD.encode(b"backup")}))
            .on("file", "exec", json!({"code": 1, "stdout": "", "stderr": "bad image\n"}));
        let client = RouterClient::new(mock);

        assert_eq!(client.file_read_base64("/tmp/backup.tar.gz").await.unwrap(), b"backup");
        let exec = client.file_exec("/sbin/sysupgrade", &["--test", "/tmp/firmware.bin"], None).await.unwrap();
        assert!(!exec.success());
        assert_eq!(exec.message(), "bad image");
    }
}
