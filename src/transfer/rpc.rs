//! JSON-RPC 2.0 front of TransferService over tiny_http.
//!
//! POST / (любой путь, кроме служебных):
//!   snap_getSnapshotInfo           {blockNumber, since?}
//!   snap_downloadSnapshotFragment  {blockNumber, since?, from, size, isBinary?}
//! params — объект или массив из одного объекта.
//!
//! GET /health -> "OK", GET /metrics -> Prometheus text.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::net::SocketAddr;
use tiny_http::{Header, Request, Response, Server};

use super::{BlockRef, TransferError, TransferService};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32000;

pub const METHOD_INFO: &str = "snap_getSnapshotInfo";
pub const METHOD_FRAGMENT: &str = "snap_downloadSnapshotFragment";

const MAX_BODY: u64 = 1024 * 1024;

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoParams {
    block_number: BlockRef,
    #[serde(default)]
    since: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FragmentParams {
    block_number: BlockRef,
    #[serde(default)]
    since: Option<u64>,
    from: u64,
    size: u64,
    #[serde(default)]
    is_binary: bool,
}

/// Ответ на один RPC-вызов.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply {
    Json(Value),
    /// Сырые байты фрагмента (isBinary = true).
    Binary(Vec<u8>),
}

/// Разобрать и выполнить один JSON-RPC запрос.
pub fn handle_rpc(svc: &TransferService, body: &[u8]) -> RpcReply {
    let v: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return error_reply(Value::Null, PARSE_ERROR, &e.to_string(), None),
    };
    let id_hint = v.get("id").cloned().unwrap_or(Value::Null);
    let req: RpcRequest = match serde_json::from_value(v) {
        Ok(r) => r,
        Err(e) => return error_reply(id_hint, INVALID_REQUEST, &e.to_string(), None),
    };
    let id = req.id.unwrap_or(Value::Null);
    if let Some(ver) = &req.jsonrpc {
        if ver != "2.0" {
            return error_reply(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"", None);
        }
    }
    let params = unwrap_params(req.params);

    match req.method.as_str() {
        METHOD_INFO => {
            let p: InfoParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return error_reply(id, INVALID_PARAMS, &e.to_string(), None),
            };
            match svc.prepare(p.block_number, p.since) {
                Ok(a) => ok_reply(
                    id,
                    json!({
                        "blockNumber": a.block,
                        "since": a.since,
                        "dataSize": a.info.data_size,
                        "maxAllowedChunkSize": a.info.max_allowed_chunk_size,
                        "sha256": a.info.sha256,
                    }),
                ),
                Err(e) => store_error(id, &e),
            }
        }
        METHOD_FRAGMENT => {
            let p: FragmentParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return error_reply(id, INVALID_PARAMS, &e.to_string(), None),
            };
            match svc.fragment(p.block_number, p.since, p.from, p.size) {
                Ok(f) if p.is_binary => RpcReply::Binary(f.data),
                Ok(f) => ok_reply(
                    id,
                    json!({
                        "from": f.from,
                        "size": f.size,
                        "data": STANDARD.encode(&f.data),
                    }),
                ),
                Err(e) => store_error(id, &e),
            }
        }
        other => error_reply(id, METHOD_NOT_FOUND, &format!("method '{}' not found", other), None),
    }
}

fn unwrap_params(params: Option<Value>) -> Value {
    match params {
        Some(Value::Array(mut a)) if a.len() == 1 => a.remove(0),
        Some(v) => v,
        None => Value::Object(Default::default()),
    }
}

fn ok_reply(id: Value, result: Value) -> RpcReply {
    RpcReply::Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

fn error_reply(id: Value, code: i64, message: &str, data: Option<Value>) -> RpcReply {
    let mut err = json!({ "code": code, "message": message });
    if let Some(d) = data {
        err["data"] = d;
    }
    RpcReply::Json(json!({ "jsonrpc": "2.0", "id": id, "error": err }))
}

fn store_error(id: Value, e: &TransferError) -> RpcReply {
    warn!("rpc: {}", e);
    let data = match e {
        TransferError::Store(se) => Some(json!({
            "kind": se.kind(),
            "path": se.path().display().to_string(),
        })),
        _ => None,
    };
    error_reply(id, SERVER_ERROR, &e.to_string(), data)
}

/// HTTP сервер поверх tiny_http.
pub struct RpcServer {
    server: Server,
}

impl RpcServer {
    pub fn bind(addr: &str) -> Result<Self> {
        let server = Server::http(addr).map_err(|e| anyhow!("bind http at {}: {}", addr, e))?;
        Ok(Self { server })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Обслуживать запросы бесконечно.
    pub fn serve(&self, svc: &TransferService) -> Result<()> {
        loop {
            let rq = match self.server.recv() {
                Ok(rq) => rq,
                Err(e) => {
                    warn!("http recv error: {}", e);
                    continue;
                }
            };
            self.handle(svc, rq);
        }
    }

    pub fn handle(&self, svc: &TransferService, mut rq: Request) {
        let url = rq.url().to_string();
        let method = rq.method().as_str().to_string();
        debug!("http {} {}", method, url);

        if method == "GET" && (url == "/health" || url == "/ready") {
            let _ = rq.respond(Response::from_string("OK\n").with_status_code(200));
            return;
        }

        if method == "GET" && url == "/metrics" {
            let mut body = String::new();
            body.push_str("# HELP cowsnap_build_info Build info.\n");
            body.push_str("# TYPE cowsnap_build_info gauge\n");
            body.push_str(&format!(
                "cowsnap_build_info{{version=\"{}\"}} 1\n",
                env!("CARGO_PKG_VERSION")
            ));
            body.push_str(&svc.manager().metrics().snapshot().to_prometheus());
            let mut resp = Response::from_string(body);
            if let Ok(ct) = Header::from_bytes(b"Content-Type", b"text/plain; version=0.0.4") {
                resp.add_header(ct);
            }
            let _ = rq.respond(resp);
            return;
        }

        if method != "POST" {
            let _ = rq.respond(Response::from_string("not found\n").with_status_code(404));
            return;
        }

        let mut body = Vec::new();
        if let Err(e) = rq.as_reader().take(MAX_BODY).read_to_end(&mut body) {
            warn!("http body read error: {}", e);
            let _ = rq.respond(Response::from_string("bad request\n").with_status_code(400));
            return;
        }

        match handle_rpc(svc, &body) {
            RpcReply::Json(v) => {
                let mut resp = Response::from_string(v.to_string());
                if let Ok(ct) = Header::from_bytes(b"Content-Type", b"application/json") {
                    resp.add_header(ct);
                }
                let _ = rq.respond(resp);
            }
            RpcReply::Binary(bytes) => {
                let mut resp = Response::from_data(bytes);
                if let Ok(ct) = Header::from_bytes(b"Content-Type", b"application/octet-stream") {
                    resp.add_header(ct);
                }
                let _ = rq.respond(resp);
            }
        }
    }
}
