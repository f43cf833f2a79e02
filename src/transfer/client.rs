//! Загрузчик артефакта снапшота по фрагментам (reqwest blocking).
//!
//! 1) snap_getSnapshotInfo -> dataSize, maxAllowedChunkSize, sha256, конкретный blockNumber;
//! 2) chunk_count фрагментов по порядку, дописываются в файл;
//! 3) проверка размера и sha256.
//! Любая ошибка (или отказ из on_progress) удаляет частичный файл.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use super::rpc::{METHOD_FRAGMENT, METHOD_INFO};
use super::{chunk_count, hex_lower, BlockRef, SnapshotInfo};

#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest {
    pub block: BlockRef,
    /// База инкремента; None — полный экспорт.
    pub since: Option<u64>,
    /// Просить сырые байты вместо base64.
    pub binary: bool,
}

impl Default for DownloadRequest {
    fn default() -> Self {
        Self {
            block: BlockRef::Latest,
            since: None,
            binary: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Блок, к которому сервер разрешил запрос ("latest" -> число).
    pub block: u64,
    pub info: SnapshotInfo,
}

/// Скачать артефакт в `save_to`. `on_progress(done, total)` вызывается после
/// каждого фрагмента; false прерывает загрузку.
pub fn download<F>(
    url: &str,
    save_to: &Path,
    req: &DownloadRequest,
    mut on_progress: F,
) -> Result<DownloadOutcome>
where
    F: FnMut(u64, u64) -> bool,
{
    let res = download_inner(url, save_to, req, &mut on_progress);
    if res.is_err() {
        let _ = fs::remove_file(save_to);
    }
    res
}

fn download_inner(
    url: &str,
    save_to: &Path,
    req: &DownloadRequest,
    on_progress: &mut dyn FnMut(u64, u64) -> bool,
) -> Result<DownloadOutcome> {
    let client = reqwest::blocking::Client::builder()
        .build()
        .context("build http client")?;

    let info_v = call(
        &client,
        url,
        METHOD_INFO,
        json!({ "blockNumber": req.block, "since": req.since }),
    )?;
    let block = info_v
        .get("blockNumber")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("snapshot info without blockNumber: {}", info_v))?;
    let info: SnapshotInfo =
        serde_json::from_value(info_v.clone()).context("decode snapshot info")?;
    if info.max_allowed_chunk_size == 0 {
        bail!("server reported zero maxAllowedChunkSize");
    }
    let total = chunk_count(info.data_size, info.max_allowed_chunk_size);
    info!(
        "downloading block {} from {}: {} bytes in {} chunk(s)",
        block, url, info.data_size, total
    );

    let file = File::create(save_to).with_context(|| format!("create {}", save_to.display()))?;
    let mut out = BufWriter::new(file);
    let mut hasher = Sha256::new();
    let mut got = 0u64;

    for idx in 0..total {
        let from = idx * info.max_allowed_chunk_size;
        let params = json!({
            "blockNumber": block,
            "since": req.since,
            "from": from,
            "size": info.max_allowed_chunk_size,
            "isBinary": req.binary,
        });
        let data = if req.binary {
            call_binary(&client, url, params)?
        } else {
            let v = call(&client, url, METHOD_FRAGMENT, params)?;
            let b64 = v
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("fragment without data at offset {}", from))?;
            STANDARD
                .decode(b64)
                .with_context(|| format!("decode base64 fragment at offset {}", from))?
        };
        if data.is_empty() {
            bail!("empty fragment at offset {} of {}", from, info.data_size);
        }
        hasher.update(&data);
        out.write_all(&data)
            .with_context(|| format!("write {}", save_to.display()))?;
        got += data.len() as u64;
        debug!("fragment {}/{}: {} bytes", idx + 1, total, data.len());

        if !on_progress(idx + 1, total) {
            bail!("download aborted at fragment {}/{}", idx + 1, total);
        }
    }
    out.flush()
        .with_context(|| format!("flush {}", save_to.display()))?;

    if got != info.data_size {
        bail!("size mismatch: got {} bytes, expected {}", got, info.data_size);
    }
    let digest = hex_lower(&hasher.finalize());
    if digest != info.sha256 {
        bail!("sha256 mismatch: got {}, expected {}", digest, info.sha256);
    }
    info!("downloaded {} ({} bytes)", save_to.display(), got);
    Ok(DownloadOutcome { block, info })
}

fn envelope(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params })
}

fn call(client: &reqwest::blocking::Client, url: &str, method: &str, params: Value) -> Result<Value> {
    let resp = client
        .post(url)
        .json(&envelope(method, params))
        .send()
        .with_context(|| format!("POST {} ({})", url, method))?;
    let v: Value = resp
        .json()
        .with_context(|| format!("decode response of {}", method))?;
    take_result(v, method)
}

/// isBinary: тело ответа — байты; JSON тут означает ошибку.
fn call_binary(client: &reqwest::blocking::Client, url: &str, params: Value) -> Result<Vec<u8>> {
    let resp = client
        .post(url)
        .json(&envelope(METHOD_FRAGMENT, params))
        .send()
        .with_context(|| format!("POST {} ({})", url, METHOD_FRAGMENT))?;
    let is_json = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.starts_with("application/json"))
        .unwrap_or(false);
    let bytes = resp
        .bytes()
        .with_context(|| format!("read body of {}", METHOD_FRAGMENT))?;
    if is_json {
        let v: Value = serde_json::from_slice(&bytes).context("decode error response")?;
        take_result(v, METHOD_FRAGMENT)?;
        bail!("expected binary fragment, got JSON result");
    }
    Ok(bytes.to_vec())
}

fn take_result(mut v: Value, method: &str) -> Result<Value> {
    if let Some(err) = v.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
        let msg = err.get("message").and_then(Value::as_str).unwrap_or("");
        bail!("{} failed ({}): {}", method, code, msg);
    }
    v.get_mut("result")
        .map(Value::take)
        .ok_or_else(|| anyhow!("{}: response without result", method))
}
