use anyhow::Result;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run the CLI binary against a workspace
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<std::process::Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_codescope"))
        .arg("--root")
        .arg(temp_dir.path())
        .args(args)
        .env("RUST_LOG", "error") // Reduce log noise
        .output()?;
    Ok(output)
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to create a small workspace and index it
fn indexed_workspace() -> Result<TempDir> {
    let temp_dir = TempDir::new()?;
    std::fs::create_dir_all(temp_dir.path().join("src"))?;
    std::fs::write(
        temp_dir.path().join("src/math.js"),
        "function add(a,b){return a+b;} function sub(a,b){return a-b;}",
    )?;
    std::fs::write(
        temp_dir.path().join("src/greet.py"),
        "def greet(name):\n    return f\"hello {name}\"\n",
    )?;

    let output = run_cli(&temp_dir, &["index"])?;
    assert!(output.status.success(), "index failed: {output:?}");
    Ok(temp_dir)
}

#[test]
fn test_index_reports_and_persists() -> Result<()> {
    let temp_dir = indexed_workspace()?;
    assert!(temp_dir.path().join(".codescope/index.json").is_file());

    // A second run rescans the same workspace
    let output = run_cli(&temp_dir, &["index", "--format", "json"])?;
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(report["files_discovered"], 2);
    assert_eq!(report["cancelled"], false);
    Ok(())
}

#[test]
fn test_search_json_output() -> Result<()> {
    let temp_dir = indexed_workspace()?;

    let output = run_cli(
        &temp_dir,
        &["search", "add", "--threshold", "0.01", "--format", "json"],
    )?;
    assert!(output.status.success());
    let hits: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    let hits = hits.as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["name"], "add");
    assert_eq!(hits[0]["chunk_type"], "function");
    assert_eq!(hits[0]["file_path"], "src/math.js");

    let output = run_cli(
        &temp_dir,
        &["search", "add", "--language", "python", "--format", "json"],
    )?;
    let hits: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert!(hits.as_array().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_search_summary_and_type_filter() -> Result<()> {
    let temp_dir = indexed_workspace()?;

    let output = run_cli(&temp_dir, &["search", "greet", "--type", "function"])?;
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.starts_with("Found 1 matching chunks:"), "unexpected: {text}");
    assert!(text.contains("function greet | File: src/greet.py | Lines: 1-2"));
    Ok(())
}

#[test]
fn test_augment_and_context() -> Result<()> {
    let temp_dir = indexed_workspace()?;

    let output = run_cli(&temp_dir, &["augment", "How does greet work?", "-q", "greet"])?;
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.starts_with("How does greet work?\n\nRelevant code from the workspace:"));
    assert!(text.contains("src/greet.py\n```python\ndef greet(name):"));

    let output = run_cli(&temp_dir, &["augment", "unrelated question", "-q", "zzzz"])?;
    assert_eq!(stdout(&output), "unrelated question\n");

    let output = run_cli(&temp_dir, &["context", "greet", "--max-tokens", "200"])?;
    assert!(output.status.success());
    let context = stdout(&output);
    assert!(context.starts_with("File: src/greet.py:1-"), "unexpected: {context}");
    assert!(context.contains("Language: python\n```python\ndef greet(name):"));
    assert!(!context.contains("\nLines: "));
    Ok(())
}

#[test]
fn test_stats_and_clear() -> Result<()> {
    let temp_dir = indexed_workspace()?;

    let output = run_cli(&temp_dir, &["stats", "--format", "json"])?;
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(stats["file_count"], 2);
    assert_eq!(stats["chunk_count"], 5);
    assert_eq!(stats["by_type"]["function"], 3);

    let output = run_cli(&temp_dir, &["clear"])?;
    assert!(output.status.success());
    assert_eq!(stdout(&output), "Removed 5 chunks\n");

    let output = run_cli(&temp_dir, &["stats"])?;
    assert!(stdout(&output).contains("Total chunks: 0"));
    Ok(())
}

#[test]
fn test_invalid_arguments() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let output = run_cli(&temp_dir, &["search", "x", "--format", "xml"])?;
    assert!(!output.status.success());

    std::fs::write(temp_dir.path().join(".codescope.toml"), "batch_size = 0\n")?;
    let output = run_cli(&temp_dir, &["index"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("batch_size must be at least 1"));
    Ok(())
}
