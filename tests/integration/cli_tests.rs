//! The subrelay binary

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;
use wiremock::{Mock, MockServer, ResponseTemplate};

const SOURCES: &str = r#"
[[source]]
name = "zoom"
site = "zoom"
base-url = "https://zoom.test"
categories = ["/category/films/", "/category/tv-series/"]
"#;

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_subrelay"))
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("binary runs")
}

#[test]
fn test_dry_run_does_not_create_database() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("subrelay.db");
    let config = dir.path().join("subrelay.toml");
    std::fs::write(
        &config,
        format!("[ledger]\ndatabase-path = {:?}\n{}", db.to_str().unwrap(), SOURCES),
    )
    .unwrap();

    let output = run(&config, &["--dry-run", "--quiet"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Source 'zoom'"));
    assert!(stdout.contains("/category/tv-series/"));
    assert!(!db.exists(), "dry run must not open the ledger");
}

#[tokio::test]
async fn test_dry_run_sends_nothing_to_d1() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = dir.path().join("subrelay.toml");
    std::fs::write(
        &config,
        format!(
            "[ledger]\nbackend = \"d1\"\nd1-account-id = \"acct\"\nd1-database-id = \"db1\"\n\
             d1-api-token = \"secret\"\nd1-api-base = {:?}\n{}",
            server.uri(),
            SOURCES
        ),
    )
    .unwrap();

    let output = run(&config, &["--dry-run", "--quiet"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("D1 database: db1"));
}
