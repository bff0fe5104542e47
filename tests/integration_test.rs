use assert_cmd::Command;
use assert_cmd::cargo;
use flate2::Compression;
use flate2::write::GzEncoder;
use mockito::Server;
use predicates::prelude::*;
use std::io::prelude::*;
use std::path::Path;
use tar::Builder;
use tempfile::tempdir;

use cellar::digest::Sha256Digest;

fn create_tar_gz(files: &[(&str, &str, u32)]) -> Vec<u8> {
    let mut tar_builder = Builder::new(Vec::new());
    for (name, content, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_path(name).unwrap();
        header.set_mode(*mode);
        header.set_cksum();
        tar_builder.append(&header, content.as_bytes()).unwrap();
    }
    let tar = tar_builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

/// Descriptor JSON for a tool whose entry point is a shell script printing
/// the expected banner. Digests are the real SHA-256 of the served payloads.
fn write_descriptor(
    dir: &Path,
    server_url: &str,
    selenium: &[u8],
    dateutil: &[u8],
    target: &[u8],
) -> std::path::PathBuf {
    let descriptor = format!(
        r#"{{
            "name": "polyparse",
            "version": "0.1.0",
            "source": {{
                "url": "{url}/polyparse-0.1.0.tar.gz",
                "sha256": "{target}"
            }},
            "license": "MIT",
            "resources": [
                {{
                    "name": "selenium",
                    "url": "{url}/selenium-4.15.0.tar.gz",
                    "sha256": "{selenium}"
                }},
                {{
                    "name": "python-dateutil",
                    "url": "{url}/python-dateutil-2.8.2.tar.gz",
                    "sha256": "{dateutil}",
                    "requires": ["selenium"]
                }}
            ],
            "entry_point": "bin/polyparse",
            "verification": {{
                "args": ["--help"],
                "expect": "CLI tool to scrape"
            }}
        }}"#,
        url = server_url,
        target = Sha256Digest::compute(target),
        selenium = Sha256Digest::compute(selenium),
        dateutil = Sha256Digest::compute(dateutil),
    );
    let path = dir.join("polyparse.json");
    std::fs::write(&path, descriptor).unwrap();
    path
}

fn payloads() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let selenium = create_tar_gz(&[(
        "selenium-4.15.0/selenium/__init__.py",
        "# selenium",
        0o644,
    )]);
    let dateutil = create_tar_gz(&[(
        "python-dateutil-2.8.2/dateutil/__init__.py",
        "# dateutil",
        0o644,
    )]);
    let target = create_tar_gz(&[(
        "polyparse-0.1.0/bin/polyparse",
        "#!/bin/sh\necho 'CLI tool to scrape Polymarket event data'\n",
        0o755,
    )]);
    (selenium, dateutil, target)
}

fn serve(server: &mut Server, path: &str, bytes: &[u8]) -> mockito::Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_body(bytes)
        .create()
}

#[test]
fn test_end_to_end_install() {
    let mut server = Server::new();
    let url = server.url();

    let (selenium, dateutil, target) = payloads();
    let _m1 = serve(&mut server, "/selenium-4.15.0.tar.gz", &selenium);
    let _m2 = serve(&mut server, "/python-dateutil-2.8.2.tar.gz", &dateutil);
    let _m3 = serve(&mut server, "/polyparse-0.1.0.tar.gz", &target);

    let work = tempdir().unwrap();
    let descriptor = write_descriptor(work.path(), &url, &selenium, &dateutil, &target);
    let root = work.path().join("cellar");

    Command::new(cargo::cargo_bin!("cellar"))
        .arg("install")
        .arg(&descriptor)
        .arg("--root")
        .arg(&root)
        .assert()
        .success();

    let env_root = root.join("polyparse/0.1.0");
    assert!(env_root.join("bin/polyparse").is_file());
    assert!(
        env_root
            .join("lib/selenium/selenium/__init__.py")
            .is_file()
    );
    assert!(
        env_root
            .join("lib/python-dateutil/dateutil/__init__.py")
            .is_file()
    );

    let meta = std::fs::read_to_string(env_root.join("meta.json")).unwrap();
    assert!(meta.contains("\"complete\""));
    assert!(meta.contains("polyparse"));

    // list shows the package with no incomplete flag
    Command::new(cargo::cargo_bin!("cellar"))
        .arg("list")
        .arg("--root")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicates::str::contains("polyparse 0.1.0"))
        .stdout(predicates::str::contains("failed").not());

    // the smoke test can be re-run on demand
    Command::new(cargo::cargo_bin!("cellar"))
        .arg("verify")
        .arg("polyparse")
        .arg("--root")
        .arg(&root)
        .assert()
        .success();

    // remove deletes the whole package directory
    Command::new(cargo::cargo_bin!("cellar"))
        .arg("remove")
        .arg("polyparse")
        .arg("--root")
        .arg(&root)
        .assert()
        .success();
    assert!(!root.join("polyparse").exists());
}

#[test]
fn test_corrupted_payload_fails_and_writes_no_resources() {
    let mut server = Server::new();
    let url = server.url();

    let (selenium, dateutil, target) = payloads();
    // The served selenium bytes differ from the pinned digest.
    let _m1 = serve(&mut server, "/selenium-4.15.0.tar.gz", b"tampered");
    let _m2 = serve(&mut server, "/python-dateutil-2.8.2.tar.gz", &dateutil);
    let _m3 = serve(&mut server, "/polyparse-0.1.0.tar.gz", &target);

    let work = tempdir().unwrap();
    let descriptor = write_descriptor(work.path(), &url, &selenium, &dateutil, &target);
    let root = work.path().join("cellar");

    Command::new(cargo::cargo_bin!("cellar"))
        .arg("install")
        .arg(&descriptor)
        .arg("--root")
        .arg(&root)
        .assert()
        .failure()
        .code(4)
        .stderr(predicates::str::contains("selenium"));

    // The environment exists, marked failed, and holds no resource content.
    let env_root = root.join("polyparse/0.1.0");
    let meta = std::fs::read_to_string(env_root.join("meta.json")).unwrap();
    assert!(meta.contains("\"failed\""));
    assert!(!env_root.join("lib").exists());
    assert!(!env_root.join("bin").exists());

    // list flags the incomplete install
    Command::new(cargo::cargo_bin!("cellar"))
        .arg("list")
        .arg("--root")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicates::str::contains("failed"));
}

#[test]
fn test_reinstall_requires_force() {
    let mut server = Server::new();
    let url = server.url();

    let (selenium, dateutil, target) = payloads();
    let _m1 = serve(&mut server, "/selenium-4.15.0.tar.gz", &selenium);
    let _m2 = serve(&mut server, "/python-dateutil-2.8.2.tar.gz", &dateutil);
    let _m3 = serve(&mut server, "/polyparse-0.1.0.tar.gz", &target);

    let work = tempdir().unwrap();
    let descriptor = write_descriptor(work.path(), &url, &selenium, &dateutil, &target);
    let root = work.path().join("cellar");

    Command::new(cargo::cargo_bin!("cellar"))
        .arg("install")
        .arg(&descriptor)
        .arg("--root")
        .arg(&root)
        .assert()
        .success();

    Command::new(cargo::cargo_bin!("cellar"))
        .arg("install")
        .arg(&descriptor)
        .arg("--root")
        .arg(&root)
        .assert()
        .failure()
        .code(5)
        .stderr(predicates::str::contains("already installed"));

    Command::new(cargo::cargo_bin!("cellar"))
        .arg("install")
        .arg(&descriptor)
        .arg("--force")
        .arg("--root")
        .arg(&root)
        .assert()
        .success();
}

#[test]
fn test_missing_descriptor_file_fails() {
    let work = tempdir().unwrap();
    let root = work.path().join("cellar");

    Command::new(cargo::cargo_bin!("cellar"))
        .arg("install")
        .arg(work.path().join("nonexistent.json"))
        .arg("--root")
        .arg(&root)
        .assert()
        .failure()
        .stderr(predicates::str::contains("Failed to read descriptor"));
}

#[test]
fn test_verify_unknown_package_fails() {
    let work = tempdir().unwrap();

    Command::new(cargo::cargo_bin!("cellar"))
        .arg("verify")
        .arg("ghost")
        .arg("--root")
        .arg(work.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("not installed"));
}
