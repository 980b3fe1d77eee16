use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rangedl::{
    ChunkGeometry, DownloadConfig, DownloadError, DownloadState, Downloader, ProgressSink, ProtocolError, SilentSink,
};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHUNK: usize = 10;

fn config() -> DownloadConfig {
    DownloadConfig {
        chunk_size: CHUNK as u64,
        workers: 4,
        retry_delay: Duration::from_millis(10),
        ..DownloadConfig::default()
    }
}

fn layout(size: u64) -> ChunkGeometry {
    ChunkGeometry::new(size, CHUNK as u64)
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn range_of(index: usize, len: usize) -> String {
    let start = index * CHUNK;
    let end = (start + CHUNK).min(len) - 1;
    format!("bytes={}-{}", start, end)
}

async fn mount_head(server: &MockServer, body: &[u8], ranged: bool) {
    let mut template = ResponseTemplate::new(200)
        .insert_header("Content-Length", body.len().to_string().as_str())
        .set_body_bytes(body.to_vec());
    if ranged {
        template = template.insert_header("Accept-Ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn mount_chunk(server: &MockServer, body: &[u8], index: usize, expected_calls: Option<u64>) {
    let start = index * CHUNK;
    let end = (start + CHUNK).min(body.len());
    let mut mock = Mock::given(method("GET"))
        .and(header("Range", range_of(index, body.len()).as_str()))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body[start..end].to_vec()));
    if let Some(n) = expected_calls {
        mock = mock.expect(n);
    }
    mock.mount(server).await;
}

async fn download(downloader: &Downloader, url: &str, dir: &Path) -> Result<std::path::PathBuf, DownloadError> {
    downloader
        .download(url, dir, Arc::new(SilentSink), &CancellationToken::new())
        .await
}

#[derive(Default)]
struct PositionSink {
    start: AtomicU64,
    received: AtomicU64,
}

impl ProgressSink for PositionSink {
    fn log(&self, _message: &str) {}
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, position: u64) {
        self.start.store(position, Ordering::SeqCst);
    }
    fn inc(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::SeqCst);
    }
    fn finish(&self, _message: &str) {}
}

#[tokio::test]
async fn chunked_download_reassembles_the_resource() {
    let server = MockServer::start().await;
    let body = content(95);
    mount_head(&server, &body, true).await;
    for index in 0..10 {
        mount_chunk(&server, &body, index, Some(1)).await;
    }

    let dir = tempdir().unwrap();
    let url = format!("{}/data.bin", server.uri());
    let path = download(&Downloader::new(config()).unwrap(), &url, dir.path()).await.unwrap();

    assert_eq!(path, dir.path().join("data.bin"));
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert!(!dir.path().join("data.bin.progress").exists());
}

#[tokio::test]
async fn resume_fetches_only_missing_chunks() {
    let server = MockServer::start().await;
    let body = content(100);
    mount_head(&server, &body, true).await;
    for index in 0..4 {
        mount_chunk(&server, &body, index, Some(0)).await;
    }
    for index in 4..10 {
        mount_chunk(&server, &body, index, Some(1)).await;
    }

    let dir = tempdir().unwrap();
    let mut partial = body[..40].to_vec();
    partial.resize(100, 0);
    std::fs::write(dir.path().join("data.bin"), &partial).unwrap();

    let mut state = DownloadState::new(dir.path(), "data.bin", layout(100));
    for index in 0..4 {
        state.mark_done(index);
    }
    state.persist().await.unwrap();

    let sink = Arc::new(PositionSink::default());
    let url = format!("{}/data.bin", server.uri());
    let path = Downloader::new(config())
        .unwrap()
        .download(&url, dir.path(), sink.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(std::fs::read(path).unwrap(), body);
    assert_eq!(sink.start.load(Ordering::SeqCst), 40);
    assert_eq!(sink.received.load(Ordering::SeqCst), 60);
    let ranged = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "GET")
        .count();
    assert_eq!(ranged, 6);
}

#[tokio::test]
async fn failing_chunk_is_retried_then_reported() {
    let server = MockServer::start().await;
    let body = content(100);
    mount_head(&server, &body, true).await;
    for index in (0..10).filter(|i| *i != 6) {
        mount_chunk(&server, &body, index, Some(1)).await;
    }
    Mock::given(method("GET"))
        .and(header("Range", range_of(6, body.len()).as_str()))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let url = format!("{}/data.bin", server.uri());
    let err = download(&Downloader::new(config()).unwrap(), &url, dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::ChunksFailed { .. }));
    assert_eq!(err.failed_chunks(), vec![6]);

    let state = DownloadState::load_or_create(dir.path(), "data.bin", layout(100))
        .await
        .unwrap();
    assert_eq!(state.done_count(), 9);
    assert!(!state.is_done(6));
}

#[tokio::test]
async fn rerun_after_failure_completes_remaining_chunk() {
    let body = content(100);
    let dir = tempdir().unwrap();

    let first = MockServer::start().await;
    mount_head(&first, &body, true).await;
    for index in (0..10).filter(|i| *i != 2) {
        mount_chunk(&first, &body, index, Some(1)).await;
    }
    Mock::given(method("GET"))
        .and(header("Range", range_of(2, body.len()).as_str()))
        .respond_with(ResponseTemplate::new(503))
        .mount(&first)
        .await;
    let url = format!("{}/data.bin", first.uri());
    assert!(download(&Downloader::new(config()).unwrap(), &url, dir.path()).await.is_err());

    let second = MockServer::start().await;
    mount_head(&second, &body, true).await;
    for index in (0..10).filter(|i| *i != 2) {
        mount_chunk(&second, &body, index, Some(0)).await;
    }
    mount_chunk(&second, &body, 2, Some(1)).await;
    let url = format!("{}/data.bin", second.uri());
    let path = download(&Downloader::new(config()).unwrap(), &url, dir.path()).await.unwrap();

    assert_eq!(std::fs::read(path).unwrap(), body);
    assert!(!dir.path().join("data.bin.progress").exists());
}

#[tokio::test]
async fn ignored_range_fails_explicitly() {
    let server = MockServer::start().await;
    let body = content(30);
    mount_head(&server, &body, true).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let url = format!("{}/data.bin", server.uri());
    let err = download(&Downloader::new(config()).unwrap(), &url, dir.path())
        .await
        .unwrap_err();

    let DownloadError::ChunksFailed { failures } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(err.failed_chunks(), vec![0, 1, 2]);
    for failure in failures {
        let DownloadError::ChunkExhausted { source, .. } = failure else {
            panic!("unexpected failure: {failure}");
        };
        assert!(matches!(**source, DownloadError::Protocol(ProtocolError::RangeNotHonored)));
    }
    // Nothing from the whole-body responses was written.
    assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), vec![0u8; 30]);
}

#[tokio::test]
async fn server_without_ranges_uses_direct_download() {
    let server = MockServer::start().await;
    let body = content(64);
    mount_head(&server, &body, false).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let url = format!("{}/plain.txt", server.uri());
    let path = download(&Downloader::new(config()).unwrap(), &url, dir.path()).await.unwrap();

    assert_eq!(std::fs::read(path).unwrap(), body);
    assert!(!dir.path().join("plain.txt.progress").exists());
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.headers.contains_key("range")));
}

#[tokio::test]
async fn empty_resource_produces_empty_file() {
    let server = MockServer::start().await;
    mount_head(&server, &[], true).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let url = format!("{}/empty.bin", server.uri());
    let path = download(&Downloader::new(config()).unwrap(), &url, dir.path()).await.unwrap();

    assert_eq!(std::fs::metadata(path).unwrap().len(), 0);
}

#[tokio::test]
async fn keep_progress_leaves_a_complete_record() {
    let server = MockServer::start().await;
    let body = content(25);
    mount_head(&server, &body, true).await;
    for index in 0..3 {
        mount_chunk(&server, &body, index, Some(1)).await;
    }

    let dir = tempdir().unwrap();
    let url = format!("{}/kept.bin", server.uri());
    let downloader = Downloader::new(DownloadConfig {
        keep_progress: true,
        ..config()
    })
    .unwrap();
    download(&downloader, &url, dir.path()).await.unwrap();

    let state = DownloadState::load_or_create(dir.path(), "kept.bin", layout(25))
        .await
        .unwrap();
    assert!(state.is_complete());
}

#[tokio::test]
async fn corrupted_progress_record_aborts() {
    let server = MockServer::start().await;
    let body = content(25);
    mount_head(&server, &body, true).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("data.bin.progress"), b"garbage").unwrap();

    let url = format!("{}/data.bin", server.uri());
    let err = download(&Downloader::new(config()).unwrap(), &url, dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::StateCorruption { .. }));
    assert_eq!(std::fs::read(dir.path().join("data.bin.progress")).unwrap(), b"garbage");
}

#[tokio::test]
async fn different_chunk_size_on_resume_is_refused() {
    let server = MockServer::start().await;
    let body = content(100);
    mount_head(&server, &body, true).await;

    let dir = tempdir().unwrap();
    DownloadState::new(dir.path(), "data.bin", ChunkGeometry::new(100, 20))
        .persist()
        .await
        .unwrap();

    let url = format!("{}/data.bin", server.uri());
    let err = download(&Downloader::new(config()).unwrap(), &url, dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::StateMismatch { .. }));
}

#[tokio::test]
async fn resized_resource_on_resume_is_refused() {
    let server = MockServer::start().await;
    let body = content(100);
    mount_head(&server, &body, true).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    // Same ten chunks, but written for a 95 byte resource.
    let mut stale = DownloadState::new(dir.path(), "data.bin", layout(95));
    stale.mark_done(0);
    stale.persist().await.unwrap();

    let url = format!("{}/data.bin", server.uri());
    let err = download(&Downloader::new(config()).unwrap(), &url, dir.path())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DownloadError::StateMismatch { field: "size", recorded: 95, expected: 100, .. }
    ));
}

#[test]
fn zero_chunk_size_is_rejected_up_front() {
    let err = Downloader::new(DownloadConfig {
        chunk_size: 0,
        ..config()
    })
    .err()
    .unwrap();

    assert!(matches!(err, DownloadError::InvalidConfig(_)));
}

/// Answers every connection with a fixed raw HTTP response.
async fn raw_server(response: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}/nolength.bin", addr)
}

#[tokio::test]
async fn missing_content_length_fails_before_creating_files() {
    let url = raw_server("HTTP/1.1 200 OK\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n").await;

    let dir = tempdir().unwrap();
    let target = dir.path().join("out");
    let err = download(&Downloader::new(config()).unwrap(), &url, &target)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Protocol(ProtocolError::MissingLength)));
    assert!(!target.exists());
}

#[tokio::test]
async fn cancellation_persists_completed_chunks() {
    let server = MockServer::start().await;
    let body = content(100);
    mount_head(&server, &body, true).await;
    for index in 0..5 {
        mount_chunk(&server, &body, index, None).await;
    }
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let url = format!("{}/data.bin", server.uri());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        Downloader::new(config()).unwrap().download(&url, dir.path(), Arc::new(SilentSink), &cancel),
    )
    .await
    .expect("download did not stop after cancellation");

    assert!(matches!(result, Err(DownloadError::Cancelled)));
    let state = DownloadState::load_or_create(dir.path(), "data.bin", layout(100))
        .await
        .unwrap();
    assert_eq!(state.pending().collect::<Vec<_>>(), (5..10).collect::<Vec<_>>());
}
