//! Control-plane integration tests against an in-process HTTP listener.
//!
//! The listener speaks just enough HTTP/1.1 for reqwest: it reads one
//! request, answers from a routing closure, and closes the connection.

use fedmesh_worker::config::{ClientIdentity, WorkerConfig};
use fedmesh_worker::discovery::{AssignStatus, AssignmentSource, DiscoveryClient};
use fedmesh_worker::{FatalError, Worker};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Responder = dyn Fn(&str, &str, &str) -> (u16, Vec<u8>) + Send + Sync;

/// Bind a canned control plane; `respond(method, path, head)` produces the
/// status and body for each request.
async fn spawn_control_plane(respond: Arc<Responder>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                handle_connection(socket, respond).await;
            });
        }
    });
    addr
}

async fn handle_connection(mut socket: TcpStream, respond: Arc<Responder>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        match find_header_end(&buf) {
            Some(end) => break end,
            None => match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            },
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let request_line = head.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    let (status, body) = respond(method, path, &head);
    let reason = match status {
        200 => "OK",
        203 => "Non-Authoritative Information",
        401 => "Unauthorized",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "OK",
    };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    );
    let _ = socket.write_all(header.as_bytes()).await;
    let _ = socket.write_all(&body).await;
    let _ = socket.flush().await;
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn config_for(addr: SocketAddr, token: Option<&str>) -> WorkerConfig {
    WorkerConfig {
        name: "worker-1".to_string(),
        client_id: "cid-1".to_string(),
        discover_host: addr.ip().to_string(),
        discover_port: addr.port(),
        token: token.map(str::to_string),
        preferred_combiner: None,
        force_ssl: false,
        secure: false,
        verify: false,
        trainer: true,
        validator: true,
        remote_compute_context: true,
        checksum: None,
        heartbeat_interval: 2,
        reconnect_after_missed_heartbeat: 30,
        logfile: None,
    }
}

fn discovery_for(addr: SocketAddr, token: Option<&str>) -> DiscoveryClient {
    let config = config_for(addr, token);
    let identity = ClientIdentity::new("worker-1", "cid-1").unwrap();
    DiscoveryClient::new(&config, &identity).unwrap()
}

fn canned(status: u16, body: &str) -> Arc<Responder> {
    let body = body.to_string();
    Arc::new(move |_method, _path, _head| (status, body.clone().into_bytes()))
}

#[tokio::test]
async fn test_assign_success() {
    let addr = spawn_control_plane(canned(
        200,
        r#"{"host": "combiner0", "port": 12080, "helper_type": "binary", "package": "remote"}"#,
    ))
    .await;

    match discovery_for(addr, None).assign().await {
        AssignStatus::Assigned(assignment) => {
            assert_eq!(assignment.host, "combiner0");
            assert_eq!(assignment.port, 12080);
            assert_eq!(assignment.helper_type.as_deref(), Some("binary"));
        }
        other => panic!("expected Assigned, got {other:?}"),
    }
}

#[tokio::test]
async fn test_assign_sends_token_and_body() {
    let seen: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let seen_in_responder = Arc::clone(&seen);
    let addr = spawn_control_plane(Arc::new(move |method, path, head| {
        seen_in_responder
            .lock()
            .unwrap()
            .push(format!("{method} {path}\n{head}"));
        (200, br#"{"host": "combiner0", "port": 12080}"#.to_vec())
    }))
    .await;

    let _ = discovery_for(addr, Some("secret")).assign().await;

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = requests[0].to_ascii_lowercase();
    assert!(request.starts_with("post /assign"));
    assert!(request.contains("authorization: token secret"));
}

#[tokio::test]
async fn test_assign_unauthorized() {
    let addr = spawn_control_plane(canned(401, "invalid token")).await;
    assert!(matches!(
        discovery_for(addr, Some("bad")).assign().await,
        AssignStatus::Unauthorized(_)
    ));
}

#[tokio::test]
async fn test_assign_unmatched_config() {
    let addr = spawn_control_plane(canned(409, "no such combiner")).await;
    assert!(matches!(
        discovery_for(addr, None).assign().await,
        AssignStatus::UnmatchedConfig(_)
    ));
}

#[tokio::test]
async fn test_assign_try_again_on_203() {
    let addr = spawn_control_plane(canned(203, "assignment pending")).await;
    match discovery_for(addr, None).assign().await {
        AssignStatus::TryAgain(msg) => assert_eq!(msg, "assignment pending"),
        other => panic!("expected TryAgain, got {other:?}"),
    }
}

#[tokio::test]
async fn test_assign_try_again_on_server_error() {
    let addr = spawn_control_plane(canned(500, "boom")).await;
    assert!(matches!(
        discovery_for(addr, None).assign().await,
        AssignStatus::TryAgain(_)
    ));
}

#[tokio::test]
async fn test_assign_try_again_on_unparseable_body() {
    let addr = spawn_control_plane(canned(200, "not json")).await;
    assert!(matches!(
        discovery_for(addr, None).assign().await,
        AssignStatus::TryAgain(_)
    ));
}

#[tokio::test]
async fn test_assign_transient_error_when_unreachable() {
    // bind and immediately drop to get a port nothing listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    assert!(matches!(
        discovery_for(addr, None).assign().await,
        AssignStatus::TransientError(_)
    ));
}

// --- worker startup against a full control plane -------------------------

/// Archive with the manifest at the root: train/validate plus a startup
/// entry that drops a marker file in the run directory.
fn compute_package() -> Vec<u8> {
    fn append_file(builder: &mut tar::Builder<GzEncoder<Vec<u8>>>, name: &str, content: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_file(
        &mut builder,
        "package.yaml",
        "entry_points:\n  startup:\n    command: touch startup-ran\n  train:\n    command: sh train.sh\n  validate:\n    command: sh validate.sh\n",
    );
    append_file(&mut builder, "train.sh", "cp \"$1\" \"$2\"\n");
    append_file(&mut builder, "validate.sh", "printf '{}' > \"$2\"\n");
    builder.into_inner().unwrap().finish().unwrap()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

async fn spawn_full_control_plane(package: Vec<u8>) -> SocketAddr {
    let checksum = sha256_hex(&package);
    spawn_control_plane(Arc::new(move |method, path, _head| {
        match (method, path) {
            ("POST", "/assign") => (
                200,
                br#"{"host": "127.0.0.1", "port": 12099, "helper_type": "binary", "package": "remote"}"#
                    .to_vec(),
            ),
            ("GET", "/package") => (200, package.clone()),
            ("GET", "/package_checksum") => (
                200,
                format!(r#"{{"checksum": "{checksum}"}}"#).into_bytes(),
            ),
            _ => (500, b"unexpected request".to_vec()),
        }
    }))
    .await
}

fn marker_exists(run_path: &Path) -> bool {
    walkdir::WalkDir::new(run_path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name() == "startup-ran")
}

#[tokio::test]
async fn test_startup_binds_dispatcher_and_runs_startup_entry() {
    let package = compute_package();
    let checksum = sha256_hex(&package);
    let addr = spawn_full_control_plane(package).await;

    let run_dir = tempfile::tempdir().unwrap();
    let mut config = config_for(addr, Some("secret"));
    config.checksum = Some(checksum);

    let mut worker = Worker::new(config, run_dir.path().to_path_buf()).unwrap();
    worker.startup().await.unwrap();

    let flags = worker.flags();
    assert!(flags.attached());
    assert!(!flags.error_state());
    assert!(marker_exists(run_dir.path()));
}

#[tokio::test]
async fn test_startup_checksum_mismatch_is_fatal() {
    let addr = spawn_full_control_plane(compute_package()).await;

    let run_dir = tempfile::tempdir().unwrap();
    let mut config = config_for(addr, Some("secret"));
    config.checksum = Some("abcd".to_string());

    let mut worker = Worker::new(config, run_dir.path().to_path_buf()).unwrap();
    let err = worker.startup().await.unwrap_err();

    assert!(matches!(err, FatalError::PackageValidation));
    assert!(worker.flags().error_state());
    // validation failed before unpack: no dispatcher was bound
    assert!(!marker_exists(run_dir.path()));
}

#[tokio::test]
async fn test_startup_without_helper_type_is_fatal() {
    // a complete control plane whose assignment omits the helper type
    let package = compute_package();
    let checksum = sha256_hex(&package);
    let addr = spawn_control_plane(Arc::new(move |method, path, _head| {
        match (method, path) {
            ("POST", "/assign") => (
                200,
                br#"{"host": "127.0.0.1", "port": 12099, "package": "remote"}"#.to_vec(),
            ),
            ("GET", "/package") => (200, package.clone()),
            ("GET", "/package_checksum") => (
                200,
                format!(r#"{{"checksum": "{checksum}"}}"#).into_bytes(),
            ),
            _ => (500, b"unexpected request".to_vec()),
        }
    }))
    .await;

    let run_dir = tempfile::tempdir().unwrap();
    let mut worker =
        Worker::new(config_for(addr, None), run_dir.path().to_path_buf()).unwrap();
    let result = worker.startup().await;

    assert!(matches!(result, Err(FatalError::Helper(_))));
}
