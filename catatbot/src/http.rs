use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use futures::Stream;
use regex::Regex;
use tokio::sync::broadcast::error::RecvError;

use crate::creds::CredentialStore;
use crate::logging::LogSink;
use crate::supervisor::LinkState;

/// Shared state behind the status/download routes.
#[derive(Clone)]
pub struct AppState {
    pub link: LinkState,
    pub creds: CredentialStore,
    pub logs: Arc<LogSink>,
    pub download_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pairing_page))
        .route("/reset", get(reset))
        .route("/download/{filename}", get(download))
        .route("/logs", get(logs))
        .route("/logs/stream", get(logs_stream))
        .with_state(state)
}

/// Pairing page: renders the current code as a scannable image, or points
/// at `/reset` when there is none.
async fn pairing_page(State(state): State<AppState>) -> Html<String> {
    let status = state.link.status().await;
    let body = match state.link.pairing_code().await {
        Some(code) => {
            // The code goes into the page as a JS string; the QR image is
            // drawn client-side.
            let code_js = serde_json::to_string(&code).unwrap_or_else(|_| "\"\"".to_string());
            format!(
                r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>catatbot</title></head>
<body>
  <h1>Scan QR Code</h1>
  <div id="qr"></div>
  <p>Buka WhatsApp di HP, pilih Setelan &gt; Sambungkan Perangkat, lalu scan kode di atas.</p>
  <p>Status: {status}</p>
  <script src="https://cdn.jsdelivr.net/npm/qrcodejs@1.0.0/qrcode.min.js"></script>
  <script>new QRCode(document.getElementById("qr"), {{ text: {code_js}, width: 256, height: 256 }});</script>
</body>
</html>"#,
                status = status.label(),
                code_js = code_js,
            )
        }
        None => format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>catatbot</title></head>
<body>
  <h1>Tidak ada kode pairing</h1>
  <p>Status: {status}</p>
  <p>Jika bot tidak tersambung, coba <a href="/reset">reset</a> lalu restart proses.</p>
</body>
</html>"#,
            status = status.label(),
        ),
    };
    Html(body)
}

/// Wipe persisted credentials and the cached pairing code so the next
/// connection issues a fresh one.
async fn reset(State(state): State<AppState>) -> Response {
    state.link.set_code(None).await;
    match state.creds.clear().await {
        Ok(()) => Html(
            "<html><body><h1>Sesi dihapus</h1>\
             <p>Restart proses untuk mendapatkan kode pairing baru.</p></body></html>"
                .to_string(),
        )
        .into_response(),
        Err(e) => {
            log::error!("credential reset failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!(
                    "<html><body><h1>Reset gagal</h1><p>{}</p></body></html>",
                    e
                )),
            )
                .into_response()
        }
    }
}

/// Stream a previously generated export file by name.
async fn download(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    // Only names the exporter can generate; anything path-like 404s.
    let valid = Regex::new(r"^[A-Za-z0-9._-]+$")
        .map(|re| re.is_match(&filename))
        .unwrap_or(false);
    if !valid || filename.starts_with('.') {
        return (StatusCode::NOT_FOUND, "File tidak ditemukan").into_response();
    }

    let path = state.download_dir.join(&filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let disposition = format!("attachment; filename=\"{}\"", filename);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "File tidak ditemukan").into_response(),
    }
}

/// Accumulated log lines, oldest first.
async fn logs(State(state): State<AppState>) -> String {
    let mut text = state.logs.snapshot().join("\n");
    text.push('\n');
    text
}

/// Live log lines as Server-Sent Events.
async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.logs.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(line) => Some((Ok(Event::default().data(line)), rx)),
            Err(RecvError::Lagged(skipped)) => Some((
                Ok(Event::default().comment(format!("{} lines dropped", skipped))),
                rx,
            )),
            Err(RecvError::Closed) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_state(dir: &std::path::Path) -> AppState {
        AppState {
            link: LinkState::new(),
            creds: CredentialStore::new(dir.join("session")),
            logs: crate::logging::init(dir),
            download_dir: dir.join("download"),
        }
    }

    #[tokio::test]
    async fn test_pairing_page_shows_code_or_reset_hint() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let Html(body) = pairing_page(State(state.clone())).await;
        assert!(body.contains("Tidak ada kode pairing"));
        assert!(body.contains("/reset"));

        state.link.set_code(Some("CODE123".to_string())).await;
        let Html(body) = pairing_page(State(state)).await;
        assert!(body.contains("Scan QR Code"));
        assert!(body.contains("CODE123"));
    }

    #[tokio::test]
    async fn test_reset_clears_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.creds.save("creds", &json!({"k": 1})).await.unwrap();

        let response = reset(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.creds.has_credentials().await);
    }

    #[tokio::test]
    async fn test_download_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        std::fs::create_dir_all(&state.download_dir).unwrap();
        std::fs::write(state.download_dir.join("ok.csv"), "a,b\n").unwrap();

        let response = download(
            State(state.clone()),
            Path("../../etc/passwd".to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = download(State(state.clone()), Path("missing.csv".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = download(State(state), Path("ok.csv".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
