use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

use cowsnap::transfer::client::{download, DownloadRequest};
use cowsnap::transfer::rpc::{
    handle_rpc, RpcReply, RpcServer, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR, SERVER_ERROR,
};
use cowsnap::{BlockRef, DirCopyBackend, SnapshotManager, TransferService};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("cowsnap-rpc-{prefix}-{pid}-{t}-{id}"))
}

fn open_store(prefix: &str) -> Result<(PathBuf, SnapshotManager)> {
    let root = unique_root(prefix);
    fs::create_dir_all(root.join("vol1"))?;
    fs::create_dir_all(root.join("vol2"))?;
    let mgr = SnapshotManager::new(&root, &["vol1", "vol2"], DirCopyBackend::new())?;
    Ok((root, mgr))
}

/// Узел с двумя снапшотами и заметным объёмом данных.
fn seeded_node(prefix: &str) -> Result<(PathBuf, SnapshotManager)> {
    let (root, mgr) = open_store(prefix)?;
    let blob: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 251) as u8).collect();
    fs::create_dir_all(root.join("vol1/blocks"))?;
    fs::write(root.join("vol1/blocks/0001.blk"), &blob)?;
    fs::write(root.join("vol2/state"), b"height=1")?;
    mgr.do_snapshot(1)?;
    fs::write(root.join("vol1/blocks/0002.blk"), &blob[..1234])?;
    fs::write(root.join("vol2/state"), b"height=2")?;
    mgr.do_snapshot(2)?;
    Ok((root, mgr))
}

fn call(svc: &TransferService, req: Value) -> Value {
    match handle_rpc(svc, req.to_string().as_bytes()) {
        RpcReply::Json(v) => v,
        RpcReply::Binary(b) => panic!("unexpected binary reply ({} bytes)", b.len()),
    }
}

fn error_code(v: &Value) -> i64 {
    v["error"]["code"].as_i64().unwrap_or(0)
}

fn read_tree(dir: &Path) -> Result<BTreeMap<String, Option<Vec<u8>>>> {
    fn walk(base: &Path, cur: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) -> Result<()> {
        for entry in fs::read_dir(cur)? {
            let entry = entry?;
            let p = entry.path();
            let rel = p.strip_prefix(base)?.to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                out.insert(rel, None);
                walk(base, &p, out)?;
            } else {
                out.insert(rel, Some(fs::read(&p)?));
            }
        }
        Ok(())
    }
    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out)?;
    Ok(out)
}

#[test]
fn rpc_error_codes() -> Result<()> {
    let (root, mgr) = open_store("errors")?;
    let svc = TransferService::new(mgr, 1024);

    match handle_rpc(&svc, b"{not json") {
        RpcReply::Json(v) => assert_eq!(error_code(&v), PARSE_ERROR),
        RpcReply::Binary(_) => panic!("binary reply to garbage"),
    }
    let v = call(&svc, json!({"jsonrpc": "2.0", "id": 1}));
    assert_eq!(error_code(&v), INVALID_REQUEST);
    let v = call(&svc, json!({"jsonrpc": "1.0", "id": 1, "method": "snap_getSnapshotInfo"}));
    assert_eq!(error_code(&v), INVALID_REQUEST);

    let v = call(&svc, json!({"jsonrpc": "2.0", "id": 2, "method": "eth_blockNumber"}));
    assert_eq!(error_code(&v), METHOD_NOT_FOUND);
    assert_eq!(v["id"], json!(2));

    let v = call(
        &svc,
        json!({"jsonrpc": "2.0", "id": 3, "method": "snap_getSnapshotInfo", "params": {"blockNumber": "soon"}}),
    );
    assert_eq!(error_code(&v), INVALID_PARAMS);
    let v = call(
        &svc,
        json!({"jsonrpc": "2.0", "id": 4, "method": "snap_downloadSnapshotFragment", "params": {"blockNumber": 1}}),
    );
    assert_eq!(error_code(&v), INVALID_PARAMS);

    // пустое хранилище
    let v = call(
        &svc,
        json!({"jsonrpc": "2.0", "id": 5, "method": "snap_getSnapshotInfo", "params": {"blockNumber": "latest"}}),
    );
    assert_eq!(error_code(&v), SERVER_ERROR);

    // отсутствующий снапшот: ошибка хранилища с видом и путём
    let v = call(
        &svc,
        json!({"jsonrpc": "2.0", "id": 6, "method": "snap_getSnapshotInfo", "params": [{"blockNumber": 9}]}),
    );
    assert_eq!(error_code(&v), SERVER_ERROR);
    assert_eq!(v["error"]["data"]["kind"], json!("SnapshotAbsent"));
    let path = v["error"]["data"]["path"].as_str().unwrap_or_default().to_string();
    assert!(path.ends_with("9"), "{path}");

    drop(svc);
    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn info_and_fragments_are_clamped() -> Result<()> {
    let (root, mgr) = seeded_node("clamp")?;
    let svc = TransferService::new(mgr, 512);

    let info = call(
        &svc,
        json!({"jsonrpc": "2.0", "id": 1, "method": "snap_getSnapshotInfo", "params": {"blockNumber": "latest", "since": 1}}),
    );
    let r = &info["result"];
    assert_eq!(r["blockNumber"], json!(2));
    assert_eq!(r["since"], json!(1));
    assert_eq!(r["maxAllowedChunkSize"], json!(512));
    let size = r["dataSize"].as_u64().unwrap_or(0);
    assert!(size > 512, "artifact too small for the test: {size}");

    let prepared = svc.prepare(BlockRef::Number(2), Some(1))?;
    assert_eq!(prepared.info.data_size, size);
    let artifact = fs::read(&prepared.path)?;

    // запрос больше max_chunk обрезается
    let v = call(
        &svc,
        json!({"jsonrpc": "2.0", "id": 2, "method": "snap_downloadSnapshotFragment",
               "params": {"blockNumber": 2, "since": 1, "from": 0, "size": 100000}}),
    );
    assert_eq!(v["result"]["size"], json!(512));
    let data = STANDARD.decode(v["result"]["data"].as_str().unwrap_or_default())?;
    assert_eq!(data, &artifact[..512]);

    // хвост
    let from = size - 10;
    let v = call(
        &svc,
        json!({"jsonrpc": "2.0", "id": 3, "method": "snap_downloadSnapshotFragment",
               "params": {"blockNumber": "0x2", "since": 1, "from": from, "size": 512}}),
    );
    assert_eq!(v["result"]["size"], json!(10));

    // за концом
    let v = call(
        &svc,
        json!({"jsonrpc": "2.0", "id": 4, "method": "snap_downloadSnapshotFragment",
               "params": {"blockNumber": 2, "since": 1, "from": size + 1, "size": 512}}),
    );
    assert_eq!(v["result"]["size"], json!(0));
    assert_eq!(v["result"]["data"], json!(""));

    // сырые байты
    let req = json!({"jsonrpc": "2.0", "id": 5, "method": "snap_downloadSnapshotFragment",
                     "params": {"blockNumber": 2, "since": 1, "from": 512, "size": 100, "isBinary": true}});
    match handle_rpc(&svc, req.to_string().as_bytes()) {
        RpcReply::Binary(b) => assert_eq!(b, &artifact[512..612]),
        RpcReply::Json(v) => panic!("expected binary, got {v}"),
    }

    // повторная подготовка берёт кэш
    let again = svc.prepare(BlockRef::Latest, Some(1))?;
    assert_eq!(again.path, prepared.path);

    // сервис удаляет свои артефакты
    drop(svc);
    assert!(!prepared.path.exists());

    fs::remove_dir_all(&root)?;
    Ok(())
}

fn serve(svc: TransferService) -> Result<String> {
    let server = RpcServer::bind("127.0.0.1:0")?;
    let addr = server
        .local_addr()
        .ok_or_else(|| anyhow::anyhow!("server has no ip address"))?;
    let svc = Arc::new(svc);
    thread::spawn(move || {
        let _ = server.serve(&svc);
    });
    Ok(format!("http://{addr}"))
}

#[test]
fn download_then_import_and_restore() -> Result<()> {
    let (root_a, mgr_a) = seeded_node("server")?;
    let expected_1 = read_tree(&mgr_a.snapshot_dir(1))?;
    let expected_2 = read_tree(&mgr_a.snapshot_dir(2))?;
    let url = serve(TransferService::new(mgr_a, 700))?;

    let (root_b, b) = open_store("client")?;
    let scratch = unique_root("scratch");
    fs::create_dir_all(&scratch)?;

    // полный снапшот 1 в base64
    let full = scratch.join("full.diff");
    let req = DownloadRequest {
        block: BlockRef::Number(1),
        since: None,
        binary: false,
    };
    let mut calls = 0u64;
    let out = download(&url, &full, &req, |done, total| {
        calls += 1;
        assert!(done <= total);
        true
    })?;
    assert_eq!(out.block, 1);
    assert_eq!(out.info.data_size, fs::metadata(&full)?.len());
    assert!(calls >= 1);
    b.import_diff(1, &full)?;
    assert_eq!(read_tree(&b.snapshot_dir(1))?, expected_1);

    // инкремент 1 -> latest в бинарном режиме
    let inc = scratch.join("inc.diff");
    let req = DownloadRequest {
        block: BlockRef::Latest,
        since: Some(1),
        binary: true,
    };
    let out = download(&url, &inc, &req, |_, _| true)?;
    assert_eq!(out.block, 2);
    b.import_diff(out.block, &inc)?;
    assert_eq!(read_tree(&b.snapshot_dir(2))?, expected_2);

    b.restore_snapshot(2)?;
    assert_eq!(fs::read(root_b.join("vol2/state"))?, b"height=2");
    assert_eq!(read_tree(&root_b.join("vol1"))?, read_tree(&b.snapshot_dir(2).join("vol1"))?);

    // прерванная загрузка не оставляет файла
    let aborted = scratch.join("aborted.diff");
    let res = download(&url, &aborted, &DownloadRequest::default(), |_, _| false);
    assert!(res.is_err());
    assert!(!aborted.exists());

    // ошибка сервера доходит до клиента
    let missing = scratch.join("missing.diff");
    let req = DownloadRequest {
        block: BlockRef::Number(42),
        since: None,
        binary: false,
    };
    assert!(download(&url, &missing, &req, |_, _| true).is_err());
    assert!(!missing.exists());

    fs::remove_dir_all(&scratch)?;
    fs::remove_dir_all(&root_b)?;
    fs::remove_dir_all(&root_a)?;
    Ok(())
}

#[test]
fn health_and_metrics_endpoints() -> Result<()> {
    let (root, mgr) = seeded_node("health")?;
    // соседнее хранилище в том же процессе не влияет на счётчики
    let (other_root, other) = seeded_node("health-other")?;
    other.do_snapshot(3)?;
    let url = serve(TransferService::new(mgr, 1024))?;

    let body = reqwest::blocking::get(format!("{url}/health"))?.text()?;
    assert_eq!(body.trim(), "OK");
    let metrics = reqwest::blocking::get(format!("{url}/metrics"))?.text()?;
    assert!(metrics.contains("cowsnap_build_info"));
    assert!(metrics.contains("cowsnap_snapshots_created_total 2\n"), "{metrics}");
    assert!(metrics.contains("cowsnap_fragments_served_total 0\n"), "{metrics}");
    assert_eq!(other.metrics().snapshot().snapshots_created, 3);

    let status = reqwest::blocking::get(format!("{url}/nope"))?.status();
    assert_eq!(status.as_u16(), 404);

    fs::remove_dir_all(&root)?;
    fs::remove_dir_all(&other_root)?;
    Ok(())
}
