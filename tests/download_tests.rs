// Download and cache behavior against a mock HTTP server


use ladle::LadleError;
use ladle::cache::cache_path;
use ladle::download::{self, DownloadEvent, DownloadOptions};
use ladle::manifest::{ArchitectureKey, DetailField};
use mockito::Server;
use std::fs;
use test_helpers::{TestEnvironment, sha256_hex};

const BODY: &[u8] = b"artifact contents";

async fn setup(server: &mut Server) -> (TestEnvironment, String) {
    let env = TestEnvironment::new();
    let url = format!("{}/pkg-1.0.zip", server.url());
    env.write_manifest(
        "main",
        "pkg",
        &format!(
            r#"{{"version": "1.0", "url": "{}", "hash": "{}"}}"#,
            url,
            sha256_hex(BODY)
        ),
    );
    (env, url)
}

#[tokio::test]
async fn test_cache_hit_skips_network() {
    let mut server = Server::new_async().await;
    let (env, url) = setup(&mut server).await;
    let mock = server
        .mock("GET", "/pkg-1.0.zip")
        .with_body(BODY)
        .expect(0)
        .create_async()
        .await;

    let cached = env.cache.join(cache_path("pkg", "1.0", &url));
    fs::write(&cached, BODY).unwrap();

    let report = env
        .manager()
        .download("pkg", ArchitectureKey::X64, false)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(report.cached, vec![cached]);
    assert!(report.downloaded.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_corrupted_cache_is_downloaded_once() {
    let mut server = Server::new_async().await;
    let (env, url) = setup(&mut server).await;
    let mock = server
        .mock("GET", "/pkg-1.0.zip")
        .with_body(BODY)
        .expect(1)
        .create_async()
        .await;

    let cached = env.cache.join(cache_path("pkg", "1.0", &url));
    fs::write(&cached, b"truncated").unwrap();

    let report = env
        .manager()
        .download("pkg", ArchitectureKey::X64, false)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(report.downloaded, vec![cached.clone()]);
    assert!(report.cached.is_empty());
    assert_eq!(fs::read(&cached).unwrap(), BODY);
}

#[tokio::test]
async fn test_every_item_gets_one_terminal_event() {
    let mut server = Server::new_async().await;
    let env = TestEnvironment::new();
    let _ok = server
        .mock("GET", "/a.zip")
        .with_body(BODY)
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/b.zip")
        .with_status(404)
        .create_async()
        .await;

    env.write_manifest(
        "main",
        "pair",
        &format!(
            r#"{{"version": "1.0", "url": ["{0}/a.zip", "{0}/b.zip"]}}"#,
            server.url()
        ),
    );

    let mut app = ladle::bucket::find_available_app(&env.config, "pair")
        .unwrap()
        .unwrap();
    app.load_details(DetailField::ALL).unwrap();
    let resolved = app.for_arch(ArchitectureKey::X64);

    let mut events = download::download(
        &reqwest::Client::new(),
        &resolved,
        &env.cache,
        2,
        DownloadOptions::default(),
    )
    .await
    .unwrap();

    let mut started = 0;
    let mut finished = 0;
    let mut failed = 0;
    while let Some(event) = events.recv().await {
        match event {
            DownloadEvent::Started(_) => started += 1,
            DownloadEvent::Finished(_) => finished += 1,
            DownloadEvent::Failed { item, .. } => {
                assert!(item.url.ends_with("/b.zip"));
                failed += 1;
            }
            DownloadEvent::CacheHit(_) => panic!("nothing was cached"),
        }
    }

    assert_eq!((started, finished, failed), (2, 1, 1));
}

#[tokio::test]
async fn test_item_without_url_fails_instead_of_vanishing() {
    let mut server = Server::new_async().await;
    let env = TestEnvironment::new();
    let _ok = server
        .mock("GET", "/a.zip")
        .with_body(BODY)
        .create_async()
        .await;

    // Two extract_dirs for one url leave the second item without a url
    env.write_manifest(
        "main",
        "lopsided",
        &format!(
            r#"{{"version": "1.0", "url": "{}/a.zip", "extract_dir": ["a", "b"]}}"#,
            server.url()
        ),
    );

    let mut app = ladle::bucket::find_available_app(&env.config, "lopsided")
        .unwrap()
        .unwrap();
    app.load_details(DetailField::ALL).unwrap();
    let resolved = app.for_arch(ArchitectureKey::X64);
    assert_eq!(resolved.downloadables.len(), 2);

    let mut events = download::download(
        &reqwest::Client::new(),
        &resolved,
        &env.cache,
        2,
        DownloadOptions::default(),
    )
    .await
    .unwrap();

    let mut terminal = 0;
    let mut invalid = 0;
    while let Some(event) = events.recv().await {
        if event.is_terminal() {
            terminal += 1;
        }
        if let DownloadEvent::Failed { item, error } = event {
            assert!(item.url.is_empty());
            assert_eq!(item.extract_dir, "b");
            assert!(matches!(error, LadleError::InvalidManifest { .. }));
            invalid += 1;
        }
    }

    assert_eq!((terminal, invalid), (2, 1));
}

#[tokio::test]
async fn test_cache_remove() {
    let mut server = Server::new_async().await;
    let (env, url) = setup(&mut server).await;
    fs::write(env.cache.join(cache_path("pkg", "1.0", &url)), BODY).unwrap();
    fs::write(env.cache.join(cache_path("other", "1.0", &url)), BODY).unwrap();

    let pm = env.manager();
    assert_eq!(pm.cache_entries(None).unwrap().len(), 2);

    let removed = pm.cache_remove("pkg").unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(pm.cache_entries(None).unwrap().len(), 1);
}
