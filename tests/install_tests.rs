// End-to-end install/uninstall against a mock HTTP server
// Links are symlinks here, so these run on unix only.
#![cfg(unix)]


use ladle::LadleError;
use ladle::cache::cache_path;
use ladle::link::is_link;
use ladle::manifest::ArchitectureKey;
use mockito::Server;
use std::fs;
use test_helpers::{TestEnvironment, sha256_hex, tarball};

const ARCH: ArchitectureKey = ArchitectureKey::X64;

fn tool_archive(version: &str) -> Vec<u8> {
    let exe = format!("tool-{}/tool.exe", version);
    let helper = format!("tool-{}/bin/helper.cmd", version);
    let settings = format!("tool-{}/data/settings.ini", version);
    tarball(&[
        (exe.as_str(), "binary"),
        (helper.as_str(), "@echo helper"),
        (settings.as_str(), "fresh=1"),
    ])
}

fn tool_manifest(version: &str, url: &str, hash: &str) -> String {
    format!(
        r#"{{
            "version": "{version}",
            "description": "A demo tool",
            "url": "{url}",
            "hash": "{hash}",
            "extract_dir": "tool-{version}",
            "bin": [["tool.exe", "tool", "--quiet"], "bin/helper.cmd"],
            "env_add_path": "bin",
            "env_set": {{ "TOOL_HOME": "$dir" }},
            "persist": "data",
            "shortcuts": [["tool.exe", "Tool"]],
            "post_install": "echo $dir"
        }}"#
    )
}

/// Serve `tool-<version>.tar.gz` and write a matching manifest
async fn publish(env: &TestEnvironment, server: &mut Server, version: &str) -> mockito::Mock {
    let archive = tool_archive(version);
    let path = format!("/tool-{}.tar.gz", version);
    let url = format!("{}{}", server.url(), path);
    env.write_manifest("main", "tool", &tool_manifest(version, &url, &sha256_hex(&archive)));

    server
        .mock("GET", path.as_str())
        .with_status(200)
        .with_body(archive)
        .expect(1)
        .create_async()
        .await
}

#[tokio::test]
async fn test_install_then_uninstall_reverses_everything() {
    let env = TestEnvironment::new();
    let mut server = Server::new_async().await;
    let mock = publish(&env, &mut server, "1.0").await;
    let pm = env.manager();

    let result = pm.install("main/tool", ARCH).await.unwrap();
    mock.assert_async().await;

    assert_eq!(result.name, "tool");
    assert_eq!(result.version, "1.0");
    assert_eq!(result.downloaded, 1);
    assert_eq!(result.cache_hits, 0);
    assert!(!result.held);

    // Version directory and current link
    let version_dir = env.config.app_dir("tool").join("1.0");
    let current = env.config.current_dir("tool");
    assert_eq!(result.path, version_dir);
    assert!(version_dir.join("tool.exe").is_file());
    assert!(version_dir.join("manifest.json").is_file());
    assert!(is_link(&current));
    assert!(current.join("install.json").is_file());

    // Shims
    let shims = env.config.shims_dir();
    let sidecar = fs::read_to_string(shims.join("tool.shim")).unwrap();
    assert!(sidecar.contains(&current.join("tool.exe").display().to_string()));
    assert!(sidecar.contains("args = --quiet"));
    assert!(shims.join("tool.exe").is_file());
    assert!(shims.join("helper.cmd").is_file());

    // Environment
    let path = env.env_var("PATH").unwrap();
    assert_eq!(
        path,
        format!("{};C:\\existing", current.join("bin").display())
    );
    assert_eq!(env.env_var("TOOL_HOME").unwrap(), current.display().to_string());

    // Persist: fresh data moved out and linked back
    let persisted = env.config.persist_dir().join("tool").join("data");
    assert_eq!(fs::read_to_string(persisted.join("settings.ini")).unwrap(), "fresh=1");
    assert!(is_link(&version_dir.join("data")));

    // Shortcut and post_install
    let shortcuts = env.recorder.shortcuts();
    assert_eq!(shortcuts.len(), 1);
    assert!(shortcuts[0].link.ends_with("shortcuts/Tool.lnk"));
    assert_eq!(shortcuts[0].target, current.join("tool.exe"));
    assert_eq!(
        env.recorder.scripts(),
        vec![format!("echo {}", version_dir.display())]
    );

    // Uninstall
    let installed = pm.installed("tool").unwrap();
    assert_eq!(installed.architecture, ARCH);
    let removed = pm.uninstall(&installed, installed.architecture).unwrap();

    assert_eq!(removed.version, "1.0");
    assert_eq!(removed.removed_shims, 4);
    assert!(!version_dir.exists());
    assert!(fs::symlink_metadata(&current).is_err());
    assert!(!shims.join("tool.shim").exists());
    assert!(!shims.join("helper.cmd").exists());
    assert_eq!(env.env_var("PATH").unwrap(), "C:\\existing");
    assert_eq!(env.env_var("TOOL_HOME"), None);

    // Persisted data survives uninstall
    assert_eq!(fs::read_to_string(persisted.join("settings.ini")).unwrap(), "fresh=1");
    assert!(pm.list().unwrap().is_empty());
}

/// Write the 1.0 manifest and return its url and archive without serving it
fn publish_offline(env: &TestEnvironment, server: &Server) -> (String, Vec<u8>) {
    let archive = tool_archive("1.0");
    let url = format!("{}/tool-1.0.tar.gz", server.url());
    env.write_manifest("main", "tool", &tool_manifest("1.0", &url, &sha256_hex(&archive)));
    (url, archive)
}

#[tokio::test]
async fn test_verified_cache_installs_without_network() {
    let env = TestEnvironment::new();
    let mut server = Server::new_async().await;
    let (url, archive) = publish_offline(&env, &server);
    let mock = server
        .mock("GET", "/tool-1.0.tar.gz")
        .with_body(archive.clone())
        .expect(0)
        .create_async()
        .await;

    fs::write(env.cache.join(cache_path("tool", "1.0", &url)), &archive).unwrap();

    let result = env.manager().install("tool", ARCH).await.unwrap();
    mock.assert_async().await;

    assert_eq!(result.cache_hits, 1);
    assert_eq!(result.downloaded, 0);
    assert!(result.path.join("tool.exe").is_file());
}

#[tokio::test]
async fn test_corrupted_cache_is_replaced_during_install() {
    let env = TestEnvironment::new();
    let mut server = Server::new_async().await;
    let (url, archive) = publish_offline(&env, &server);
    let mock = server
        .mock("GET", "/tool-1.0.tar.gz")
        .with_body(archive.clone())
        .expect(1)
        .create_async()
        .await;

    let cached = env.cache.join(cache_path("tool", "1.0", &url));
    fs::write(&cached, b"truncated").unwrap();

    let result = env.manager().install("tool", ARCH).await.unwrap();
    mock.assert_async().await;

    assert_eq!(result.cache_hits, 0);
    assert_eq!(result.downloaded, 1);
    assert_eq!(fs::read(&cached).unwrap(), archive);
    assert!(result.path.join("tool.exe").is_file());
}

#[tokio::test]
async fn test_reinstall_same_version_is_rejected() {
    let env = TestEnvironment::new();
    let mut server = Server::new_async().await;
    let _mock = publish(&env, &mut server, "1.0").await;
    let pm = env.manager();

    pm.install("tool", ARCH).await.unwrap();
    let err = pm.install("tool", ARCH).await.unwrap_err();

    assert!(matches!(err, LadleError::Step { .. }));
    assert!(matches!(err.root(), LadleError::AlreadyInstalled { .. }));
}

#[tokio::test]
async fn test_held_app_is_not_upgraded() {
    let env = TestEnvironment::new();
    let mut server = Server::new_async().await;
    let _v1 = publish(&env, &mut server, "1.0").await;
    let pm = env.manager();

    pm.install("tool", ARCH).await.unwrap();
    pm.hold("tool").unwrap();
    assert!(pm.installed("tool").unwrap().hold);

    let v2 = publish(&env, &mut server, "2.0").await;
    let err = pm.install("tool", ARCH).await.unwrap_err();
    assert!(matches!(err.root(), LadleError::Held(_)));

    let outdated = pm.outdated().unwrap();
    assert_eq!(outdated.len(), 1);
    assert_eq!(outdated[0].latest, "2.0");
    assert!(outdated[0].hold);

    // Releasing the hold allows the upgrade, keeping persisted data
    pm.unhold("tool").unwrap();
    let result = pm.install("tool", ARCH).await.unwrap();
    v2.assert_async().await;

    assert_eq!(result.version, "2.0");
    assert!(!env.config.app_dir("tool").join("1.0").exists());
    assert!(env.config.current_dir("tool").join("tool.exe").is_file());

    // 2.0 ships its own settings; the persisted copy wins
    let version_dir = env.config.app_dir("tool").join("2.0");
    assert!(version_dir.join("data.original").join("settings.ini").is_file());
    assert!(is_link(&version_dir.join("data")));

    // PATH holds the entry exactly once
    let path = env.env_var("PATH").unwrap();
    assert_eq!(path.matches("current").count(), 1);
}

#[tokio::test]
async fn test_checksum_mismatch_fails_download_step() {
    let env = TestEnvironment::new();
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/tool-1.0.tar.gz")
        .with_status(200)
        .with_body(tool_archive("1.0"))
        .create_async()
        .await;
    let url = format!("{}/tool-1.0.tar.gz", server.url());
    env.write_manifest("main", "tool", &tool_manifest("1.0", &url, &"0".repeat(64)));

    let pm = env.manager();
    let err = pm.install("tool", ARCH).await.unwrap_err();

    match &err {
        LadleError::Step { step, .. } => assert_eq!(step, "download"),
        other => panic!("unexpected error: {}", other),
    }
    assert!(matches!(err.root(), LadleError::ChecksumMismatch { .. }));
    assert!(pm.cache_entries(Some("tool")).unwrap().is_empty());
    assert!(pm.installed("tool").is_err());
}

#[tokio::test]
async fn test_unknown_app() {
    let env = TestEnvironment::new();
    let pm = env.manager();

    let err = pm.install("main/ghost", ARCH).await.unwrap_err();
    assert!(matches!(err.root(), LadleError::AppNotFound(_)));

    let err = pm.hold("ghost").unwrap_err();
    assert!(matches!(err, LadleError::NotInstalled(_)));
}

#[tokio::test]
async fn test_installer_file_runs_and_is_removed() {
    let env = TestEnvironment::new();
    let mut server = Server::new_async().await;
    let body = b"MZ installer".to_vec();
    let _mock = server
        .mock("GET", "/setup.exe")
        .with_status(200)
        .with_body(body.clone())
        .create_async()
        .await;

    env.write_manifest(
        "main",
        "setup",
        &format!(
            r#"{{
                "version": "3.1",
                "url": "{}/setup.exe",
                "hash": "{}",
                "installer": {{ "args": ["/S", "/D=$dir"] }}
            }}"#,
            server.url(),
            sha256_hex(&body)
        ),
    );

    let pm = env.manager();
    let result = pm.install("setup", ARCH).await.unwrap();

    let programs = env.recorder.programs();
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].0, result.path.join("setup.exe"));
    assert_eq!(
        programs[0].1,
        vec!["/S".to_string(), format!("/D={}", result.path.display())]
    );
    assert!(!result.path.join("setup.exe").exists());
}
