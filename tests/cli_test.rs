use std::process::{Command, Output, Stdio};

/// Run the mailrank binary with the given args; no vector index is contacted
/// because every case here stops at argument parsing.
fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mailrank"))
        .args(args)
        .env("MAILRANK_LOG_LEVEL", "error")
        .stdin(Stdio::null())
        .output()
        .expect("Failed to spawn mailrank binary")
}

#[test]
fn test_help_lists_subcommands() {
    let output = run(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["search", "context", "status", "warmup", "lexical-stats"] {
        assert!(stdout.contains(subcommand), "help output missing '{}'", subcommand);
    }
}

#[test]
fn test_search_requires_collection_and_query() {
    let output = run(&["search"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("COLLECTION") || stderr.contains("collection"));
}

#[test]
fn test_malformed_filter_is_rejected() {
    let output = run(&["search", "reply_templates", "interview", "--filter", "email_type"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("key=value"));
}
