// Integration tests for CLI commands
// These run the built binary and never reach the Telegram API.

use std::io::Write;
use std::process::{Command, Output};
use tempfile::{NamedTempFile, TempDir};

fn relaybot(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_relaybot"))
        .args(args)
        .env_remove("RELAYBOT_BOT_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_cli_help() {
    let output = relaybot(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("signal relay bot"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("init-config"));
    assert!(stdout.contains("stats"));
    assert!(stdout.contains("version"));
}

#[test]
fn test_cli_version() {
    let output = relaybot(&["version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("relaybot {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_init_config_writes_template() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    let path_str = path.to_str().unwrap();

    let output = relaybot(&["init-config", "--path", path_str]);
    assert!(output.status.success());
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("[telegram]"));
    assert!(contents.contains("invite_ttl"));

    // Existing file is kept without --force
    let output = relaybot(&["init-config", "--path", path_str]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already exists"));

    let output = relaybot(&["init-config", "--path", path_str, "--force"]);
    assert!(output.status.success());
}

#[test]
fn test_cli_run_with_missing_config() {
    let output = relaybot(&["run", "--config", "/nonexistent/config.toml"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("init-config"));
}

#[test]
fn test_cli_run_rejects_empty_token() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[telegram]").unwrap();
    writeln!(temp_file, "bot_token = \"\"").unwrap();
    writeln!(temp_file, "[channel]").unwrap();
    writeln!(temp_file, "id = -1001").unwrap();
    writeln!(temp_file, "handle = \"signals\"").unwrap();

    let output = relaybot(&["run", "--config", temp_file.path().to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bot_token"));
}

#[test]
fn test_cli_stats_with_missing_database() {
    let output = relaybot(&["stats", "--database", "/nonexistent/relaybot.db"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"));
}

// Test all commands show help text
#[test]
fn test_subcommand_help() {
    for cmd in ["run", "init-config", "stats", "version"] {
        let output = relaybot(&[cmd, "--help"]);

        assert!(output.status.success(), "Command {} --help failed", cmd);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(!stdout.is_empty(), "Command {} --help produced no output", cmd);
    }
}

// Test that invalid commands are rejected
#[test]
fn test_invalid_command() {
    let output = relaybot(&["invalid-command"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid-command") || stderr.contains("unrecognized"));
}
