//! Unix domain socket IPC listener.
//!
//! Accepts connections, reads newline-delimited JSON-RPC-lite messages,
//! dispatches them to the petition engine and writes one response line per
//! request.

use std::path::Path;
use std::sync::Arc;

use petition_core::{PetitionError, PublicId, SignatureSubmission};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::protocol::*;
use crate::{PROTOCOL_VERSION, ServiceState};

/// Methods advertised in the `hello` handshake.
const CAPABILITIES: &[&str] = &[
    "petition.create",
    "petition.get",
    "petition.current",
    "petition.owned",
    "petition.update",
    "petition.delete",
    "petition.list_owned",
    "signature.submit",
    "signature.exists",
    "signature.list",
    "results.get",
    "results.current",
    "results.owned",
    "service.status",
];

/// Longest accepted request line. Signature images travel inline as data
/// URLs, so this is sized for a large PNG.
pub const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

/// Bind the listening socket, replacing a stale socket file.
pub fn bind_listener(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!("Petition service listening on {}", path.display());
    Ok(listener)
}

/// Accept connections until `shutdown` flips to true or its sender is gone.
pub async fn serve(
    state: Arc<ServiceState>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            tracing::warn!("Connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {e}");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Listener shutting down");
                    break;
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    TooLong,
}

/// Read one newline-terminated request, refusing to buffer past `limit`.
async fn read_request_line<R>(reader: &mut R, line: &mut String, limit: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader).take(limit as u64 + 1).read_line(line).await?;
    if n == 0 {
        Ok(LineRead::Eof)
    } else if n > limit && !line.ends_with('\n') {
        Ok(LineRead::TooLong)
    } else {
        Ok(LineRead::Line)
    }
}

async fn handle_connection(state: Arc<ServiceState>, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        let read = read_request_line(&mut reader, &mut line, MAX_REQUEST_BYTES).await?;
        let response = match read {
            LineRead::Eof => break,
            LineRead::TooLong => {
                tracing::warn!(limit = MAX_REQUEST_BYTES, "Request line too long, closing connection");
                serde_json::to_value(RpcErrorResponse {
                    id: RequestId::Integer(0),
                    error: RpcError::new(
                        ERR_INVALID_REQUEST,
                        format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
                    ),
                })
                .unwrap_or_default()
            }
            LineRead::Line => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                dispatch_message(&state, trimmed).await
            }
        };

        let mut response_bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        response_bytes.push(b'\n');
        writer.write_all(&response_bytes).await?;
        writer.flush().await?;

        // The rest of an oversized line cannot be resynchronised
        if read == LineRead::TooLong {
            break;
        }
    }

    Ok(())
}

/// Parse and dispatch a single JSON-RPC message.
pub async fn dispatch_message(state: &ServiceState, raw: &str) -> serde_json::Value {
    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            return serde_json::to_value(RpcErrorResponse {
                id: RequestId::Integer(0),
                error: RpcError::new(ERR_INVALID_REQUEST, format!("Invalid JSON-RPC: {e}")),
            })
            .unwrap_or_default();
        }
    };

    let id = request.id.clone();
    tracing::debug!(method = %request.method, "Dispatching request");
    let result = dispatch_method(state, &request.method, request.params).await;

    match result {
        Ok(value) => serde_json::to_value(RpcResponse { id, result: value }).unwrap_or_default(),
        Err(error) => serde_json::to_value(RpcErrorResponse { id, error }).unwrap_or_default(),
    }
}

async fn dispatch_method(
    state: &ServiceState,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    match method {
        "hello" => handle_hello(params),
        "petition.create" => handle_petition_create(state, params).await,
        "petition.get" => handle_petition_get(state, params).await,
        "petition.current" => {
            let petition = state.engine.current_petition().await.map_err(to_rpc)?;
            to_value(CurrentPetitionResult { petition })
        }
        "petition.owned" => handle_petition_owned(state, params).await,
        "petition.update" => handle_petition_update(state, params).await,
        "petition.delete" => handle_petition_delete(state, params).await,
        "petition.list_owned" => handle_list_owned(state, params).await,
        "signature.submit" => handle_signature_submit(state, params).await,
        "signature.exists" => handle_signature_exists(state, params).await,
        "signature.list" => handle_signature_list(state, params).await,
        "results.get" => handle_results_get(state, params).await,
        "results.current" => {
            let results = state.engine.current_results().await.map_err(to_rpc)?;
            to_value(CurrentResultsResult { results })
        }
        "results.owned" => handle_results_owned(state, params).await,
        "service.status" => to_value(ServiceStatusResult {
            uptime_s: state.uptime_s(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            single_petition_mode: state.engine.single_petition_mode(),
        }),
        _ => Err(RpcError::new(
            ERR_METHOD_NOT_FOUND,
            format!("Unknown method: {method}"),
        )),
    }
}

fn handle_hello(params: Option<serde_json::Value>) -> Result<serde_json::Value, RpcError> {
    let hello: HelloParams = parse_params("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(RpcError::invalid_params(format!(
            "Incompatible protocol version: client={}, service={}",
            hello.protocol_version, PROTOCOL_VERSION
        )));
    }

    to_value(HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: CAPABILITIES.iter().map(ToString::to_string).collect(),
    })
}

async fn handle_petition_create(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: PetitionCreateParams = parse_params("petition.create", params)?;
    let caller = params.caller();
    let id = state
        .engine
        .create_petition(caller, params.petition)
        .await
        .map_err(to_rpc)?;
    to_value(PetitionCreateResult { id })
}

async fn handle_petition_get(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: PetitionRefParams = parse_params("petition.get", params)?;
    let id = parse_public_id(&params.petition_id)?;
    let detail = state.engine.get_petition(id).await.map_err(to_rpc)?;
    to_value(detail)
}

async fn handle_petition_owned(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: OwnedRefParams = parse_params("petition.owned", params)?;
    let id = parse_public_id(&params.petition_id)?;
    let detail = state
        .engine
        .owned_petition(params.caller(), id)
        .await
        .map_err(to_rpc)?;
    to_value(detail)
}

async fn handle_petition_update(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: PetitionUpdateParams = parse_params("petition.update", params)?;
    let id = parse_public_id(&params.petition_id)?;
    let caller = params.caller();
    let petition = state
        .engine
        .update_petition(caller, id, params.update)
        .await
        .map_err(to_rpc)?;
    to_value(petition)
}

async fn handle_petition_delete(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: OwnedRefParams = parse_params("petition.delete", params)?;
    let id = parse_public_id(&params.petition_id)?;
    state
        .engine
        .delete_petition(params.caller(), id)
        .await
        .map_err(to_rpc)?;
    to_value(OkResult { ok: true })
}

async fn handle_list_owned(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: CallerParams = parse_params("petition.list_owned", params)?;
    let petitions = state
        .engine
        .list_owned(params.caller())
        .await
        .map_err(to_rpc)?;
    to_value(PetitionListResult { petitions })
}

/// Handle `signature.submit`.
///
/// A data-URL image is written before the ledger call; if the ledger then
/// rejects the submission the image is discarded again.
async fn handle_signature_submit(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: SignatureSubmitParams = parse_params("signature.submit", params)?;
    let petition_id = parse_public_id(&params.petition_id)?;

    let (image_ref, stored_here) = match (params.signature_image_ref, params.signature_data_url) {
        (Some(image_ref), None) => (image_ref, false),
        (None, Some(data_url)) => {
            let images = Arc::clone(&state.images);
            let stored = tokio::task::spawn_blocking(move || images.store_data_url(&data_url))
                .await
                .map_err(|e| RpcError::internal(format!("Image task failed: {e}")))?
                .map_err(|e| to_rpc(e.into()))?;
            (stored, true)
        }
        _ => {
            return Err(to_rpc(PetitionError::validation(
                "exactly one of signature_image_ref or signature_data_url is required",
            )));
        }
    };

    let submission = SignatureSubmission {
        petition_id,
        name: params.name,
        phone: params.phone,
        signature_image_ref: image_ref.clone(),
        survey_responses: params.survey_responses,
    };

    match state.engine.submit_signature(submission).await {
        Ok(signature_id) => to_value(SignatureSubmitResult {
            ok: true,
            signature_id,
        }),
        Err(err) => {
            if stored_here {
                let images = Arc::clone(&state.images);
                let discarded =
                    tokio::task::spawn_blocking(move || images.discard(&image_ref)).await;
                if !matches!(discarded, Ok(Ok(()))) {
                    tracing::warn!("Failed to discard image of rejected signature");
                }
            }
            Err(to_rpc(err))
        }
    }
}

async fn handle_signature_exists(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: SignatureExistsParams = parse_params("signature.exists", params)?;
    let id = parse_public_id(&params.petition_id)?;
    let signed = state
        .engine
        .has_signed(id, params.phone)
        .await
        .map_err(to_rpc)?;
    to_value(SignatureExistsResult { signed })
}

async fn handle_signature_list(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: OwnedRefParams = parse_params("signature.list", params)?;
    let id = parse_public_id(&params.petition_id)?;
    let signatures = state
        .engine
        .list_signatures(params.caller(), id)
        .await
        .map_err(to_rpc)?;
    to_value(SignatureListResult { signatures })
}

async fn handle_results_get(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: PetitionRefParams = parse_params("results.get", params)?;
    let id = parse_public_id(&params.petition_id)?;
    let results = state.engine.results(id).await.map_err(to_rpc)?;
    to_value(results)
}

async fn handle_results_owned(
    state: &ServiceState,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, RpcError> {
    let params: OwnedRefParams = parse_params("results.owned", params)?;
    let id = parse_public_id(&params.petition_id)?;
    let results = state
        .engine
        .owner_results(params.caller(), id)
        .await
        .map_err(to_rpc)?;
    to_value(results)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_params<P: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<P, RpcError> {
    params
        .ok_or_else(|| RpcError::invalid_params("Missing params"))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| RpcError::invalid_params(format!("Invalid {method} params: {e}")))
        })
}

fn parse_public_id(raw: &str) -> Result<PublicId, RpcError> {
    PublicId::parse(raw).map_err(to_rpc)
}

fn to_value<R: Serialize>(result: R) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(result).map_err(|e| RpcError::internal(format!("Serialize error: {e}")))
}

/// Map a petition error onto a JSON-RPC error.
///
/// The code is the category's HTTP-style status; `data` carries the
/// machine-readable category and, for survey validation, the survey id.
fn to_rpc(err: PetitionError) -> RpcError {
    let category = err.category();
    let code = i64::from(category.status_code());
    if code >= ERR_INTERNAL {
        tracing::error!(category = category.as_str(), "Request failed: {err}");
    } else {
        tracing::debug!(category = category.as_str(), "Request rejected: {err}");
    }

    let mut data = serde_json::json!({ "category": category.as_str() });
    if let Some(survey_id) = err.survey_id() {
        data["survey_id"] = serde_json::json!(survey_id);
    }

    RpcError {
        code,
        message: err.to_string(),
        data: Some(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::FsImageStore;
    use base64::Engine as _;
    use petition_core::{PetitionConfig, PetitionEngine};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> ServiceState {
        let mut cfg = PetitionConfig::default();
        cfg.storage.db_path = dir.path().join("petition.db").to_string_lossy().into_owned();
        cfg.storage.pool_size = 2;
        let engine = PetitionEngine::open(&cfg).unwrap();
        ServiceState::new(
            engine,
            Arc::new(FsImageStore::new(dir.path().join("signatures"))),
        )
    }

    async fn call(state: &ServiceState, method: &str, params: serde_json::Value) -> serde_json::Value {
        let msg = serde_json::json!({ "id": 1, "method": method, "params": params });
        dispatch_message(state, &msg.to_string()).await
    }

    async fn create(state: &ServiceState) -> (String, serde_json::Value) {
        let resp = call(
            state,
            "petition.create",
            serde_json::json!({
                "caller_id": "owner",
                "title": "T",
                "content": "<p>C</p>",
                "surveys": [{
                    "title": "Q1",
                    "question_type": "single",
                    "options": [{"label": "A"}, {"label": "B"}]
                }]
            }),
        )
        .await;
        let id = resp["result"]["id"].as_str().unwrap().to_string();
        let detail = call(state, "petition.get", serde_json::json!({ "petition_id": id })).await;
        (id, detail["result"].clone())
    }

    fn png_data_url() -> String {
        let bytes = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    #[tokio::test]
    async fn dispatch_hello() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let resp = call(
            &state,
            "hello",
            serde_json::json!({ "protocol_version": PROTOCOL_VERSION, "client_version": "0.1.0" }),
        )
        .await;
        assert!(resp.get("result").is_some(), "Expected result, got: {resp}");

        let resp = call(
            &state,
            "hello",
            serde_json::json!({ "protocol_version": "0.1", "client_version": "0.1.0" }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn dispatch_unknown_method_and_garbage() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let resp = call(&state, "unknown.method", serde_json::json!({})).await;
        assert_eq!(resp["error"]["code"], ERR_METHOD_NOT_FOUND);

        let resp = dispatch_message(&state, "not json").await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_REQUEST);
    }

    #[tokio::test]
    async fn malformed_petition_id_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let resp = call(&state, "petition.get", serde_json::json!({ "petition_id": "../x" })).await;
        assert_eq!(resp["error"]["code"], ERR_VALIDATION);
        assert_eq!(resp["error"]["data"]["category"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn submit_with_data_url_then_duplicate_conflicts() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let (id, detail) = create(&state).await;
        let survey_id = detail["surveys"][0]["id"].clone();
        let option_a = detail["surveys"][0]["options"][0]["id"].clone();

        let params = serde_json::json!({
            "petition_id": id,
            "name": "Li",
            "phone": "13800000000",
            "signature_data_url": png_data_url(),
            "survey_responses": [{ "survey_id": survey_id, "option_ids": [option_a] }]
        });
        let resp = call(&state, "signature.submit", params.clone()).await;
        assert_eq!(resp["result"]["ok"], true, "{resp}");

        let resp = call(&state, "signature.submit", params).await;
        assert_eq!(resp["error"]["code"], ERR_CONFLICT);
        assert_eq!(resp["error"]["data"]["category"], "CONFLICT_ERROR");

        // The rejected duplicate's image was discarded
        let stored = std::fs::read_dir(dir.path().join("signatures")).unwrap().count();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn survey_errors_carry_survey_id() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let (id, detail) = create(&state).await;
        let survey_id = detail["surveys"][0]["id"].clone();
        let options: Vec<serde_json::Value> = detail["surveys"][0]["options"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].clone())
            .collect();

        let resp = call(
            &state,
            "signature.submit",
            serde_json::json!({
                "petition_id": id,
                "name": "Li",
                "phone": "13800000000",
                "signature_image_ref": "/signatures/pre.png",
                "survey_responses": [{ "survey_id": survey_id, "option_ids": options }]
            }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_VALIDATION);
        assert_eq!(resp["error"]["data"]["survey_id"], survey_id);
    }

    #[tokio::test]
    async fn submit_requires_exactly_one_image_source() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let (id, _) = create(&state).await;

        let resp = call(
            &state,
            "signature.submit",
            serde_json::json!({ "petition_id": id, "name": "Li", "phone": "13800000000" }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_VALIDATION);

        let resp = call(
            &state,
            "signature.submit",
            serde_json::json!({
                "petition_id": id,
                "name": "Li",
                "phone": "13800000000",
                "signature_data_url": "data:image/png;base64,AAAA"
            }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_VALIDATION);
        // Rejected before anything reached the disk
        assert!(!dir.path().join("signatures").exists());
    }

    #[tokio::test]
    async fn owner_methods_require_caller() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let (id, _) = create(&state).await;

        let resp = call(&state, "petition.delete", serde_json::json!({ "petition_id": id })).await;
        assert_eq!(resp["error"]["code"], ERR_UNAUTHENTICATED);

        let resp = call(
            &state,
            "petition.delete",
            serde_json::json!({ "petition_id": id, "caller_id": "someone-else" }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_FORBIDDEN);

        let resp = call(
            &state,
            "petition.delete",
            serde_json::json!({ "petition_id": id, "caller_id": "owner" }),
        )
        .await;
        assert_eq!(resp["result"]["ok"], true);

        let resp = call(&state, "petition.get", serde_json::json!({ "petition_id": id })).await;
        assert_eq!(resp["error"]["code"], ERR_NOT_FOUND);
    }

    #[tokio::test]
    async fn dispatch_service_status() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let msg = serde_json::json!({ "id": 2, "method": "service.status" });
        let resp = dispatch_message(&state, &msg.to_string()).await;
        assert_eq!(resp["result"]["single_petition_mode"], true);
        assert_eq!(resp["id"], 2);
    }

    #[tokio::test]
    async fn oversized_request_lines_are_refused() {
        let input = format!("{{}}\n{}\n", "x".repeat(64));
        let mut reader = BufReader::new(input.as_bytes());
        let mut line = String::new();

        assert_eq!(
            read_request_line(&mut reader, &mut line, 16).await.unwrap(),
            LineRead::Line
        );
        assert_eq!(line, "{}\n");
        assert_eq!(
            read_request_line(&mut reader, &mut line, 16).await.unwrap(),
            LineRead::TooLong
        );
        assert_eq!(line.len(), 17);

        let mut empty = BufReader::new(&b""[..]);
        assert_eq!(
            read_request_line(&mut empty, &mut line, 16).await.unwrap(),
            LineRead::Eof
        );
    }
}
