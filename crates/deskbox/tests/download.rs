#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::io::Write;

use httpmock::prelude::*;

use deskbox::{ImageStore, ProvisionError, fetch};

const IMAGE_NAME: &str = "System.qcow2";
const ARCHIVE_PATH: &str = "/images/System.qcow2.tar.gz";

/// Fake qcow2 payload, long enough to split into partial/remainder slices.
fn image_bytes() -> Vec<u8> {
    (0u32..4096).flat_map(|i| i.to_le_bytes()).collect()
}

/// Build the gzip tarball the mock server hands out.
fn tarball(payload: &[u8]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(payload.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, IMAGE_NAME, payload).unwrap();

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .unwrap()
}

fn store(dir: &tempfile::TempDir) -> ImageStore {
    ImageStore::new(dir.path().to_path_buf())
}

#[tokio::test]
async fn fresh_download_extracts_image() {
    let server = MockServer::start();
    let payload = image_bytes();
    let archive = tarball(&payload);

    let mock = server.mock(|when, then| {
        when.method(GET).path(ARCHIVE_PATH);
        then.status(200).body(&archive);
    });

    let dir = tempfile::tempdir().unwrap();
    let url = server.url(ARCHIVE_PATH);
    let image = fetch::ensure_image(&reqwest::Client::new(), &store(&dir), &url)
        .await
        .unwrap();

    mock.assert();
    assert_eq!(image, dir.path().join(IMAGE_NAME));
    assert_eq!(std::fs::read(&image).unwrap(), payload);
}

#[tokio::test]
async fn resume_requests_range_from_partial_length() {
    let server = MockServer::start();
    let payload = image_bytes();
    let archive = tarball(&payload);
    let split = archive.len() / 3;

    let dir = tempfile::tempdir().unwrap();
    // A previous interrupted transfer left the first `split` bytes on disk.
    let mut partial = std::fs::File::create(dir.path().join("System.qcow2.tar.gz")).unwrap();
    partial.write_all(&archive[..split]).unwrap();
    drop(partial);

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path(ARCHIVE_PATH)
            .header("Range", format!("bytes={split}-"));
        then.status(206).body(&archive[split..]);
    });

    let url = server.url(ARCHIVE_PATH);
    let image = fetch::ensure_image(&reqwest::Client::new(), &store(&dir), &url)
        .await
        .unwrap();

    mock.assert();
    // Resumed transfer must be byte-identical to a one-shot download.
    assert_eq!(
        std::fs::read(dir.path().join("System.qcow2.tar.gz")).unwrap(),
        archive
    );
    assert_eq!(std::fs::read(&image).unwrap(), payload);
}

#[tokio::test]
async fn complete_archive_answers_416_and_extracts() {
    let server = MockServer::start();
    let payload = image_bytes();
    let archive = tarball(&payload);

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("System.qcow2.tar.gz"), &archive).unwrap();

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path(ARCHIVE_PATH)
            .header("Range", format!("bytes={}-", archive.len()));
        then.status(416);
    });

    let url = server.url(ARCHIVE_PATH);
    let image = fetch::ensure_image(&reqwest::Client::new(), &store(&dir), &url)
        .await
        .unwrap();

    mock.assert();
    // The retrieval loop exited without writing anything further.
    assert_eq!(
        std::fs::read(dir.path().join("System.qcow2.tar.gz")).unwrap(),
        archive
    );
    assert_eq!(std::fs::read(&image).unwrap(), payload);
}

#[tokio::test]
async fn fatal_http_status_propagates() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path(ARCHIVE_PATH);
        then.status(404);
    });

    let dir = tempfile::tempdir().unwrap();
    let url = server.url(ARCHIVE_PATH);
    let err = fetch::ensure_image(&reqwest::Client::new(), &store(&dir), &url)
        .await
        .unwrap_err();

    mock.assert();
    match err {
        ProvisionError::Download(detail) => assert!(detail.contains("404"), "got: {detail}"),
        other => panic!("expected Download error, got: {other}"),
    }
}

#[tokio::test]
async fn existing_image_skips_download() {
    let server = MockServer::start();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(IMAGE_NAME), b"already here").unwrap();

    let url = server.url(ARCHIVE_PATH);
    let image = fetch::ensure_image(&reqwest::Client::new(), &store(&dir), &url)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&image).unwrap(), b"already here");
}

#[tokio::test]
async fn corrupt_archive_is_an_extraction_error() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path(ARCHIVE_PATH);
        then.status(200).body(b"this is not a gzip stream");
    });

    let dir = tempfile::tempdir().unwrap();
    let url = server.url(ARCHIVE_PATH);
    let err = fetch::ensure_image(&reqwest::Client::new(), &store(&dir), &url)
        .await
        .unwrap_err();

    mock.assert();
    assert!(matches!(err, ProvisionError::Extract(_)), "got: {err}");
}
