// SPDX-License-Identifier: MIT OR Apache-2.0

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CONFIG: &str = r#"
[embeddings]
provider = "dummy"
dimension = 256

[generation]
provider = "template"

[warehouse]
chunk_size = 40
"#;

const POSTINGS: &str = "\
job_id,title,company,location,description
j1,Rust Engineer,Acme,Berlin,Build Rust services. Maintain SQL pipelines. Review code.
j2,Pastry Chef,Bakehaus,Paris,Bake bread and croissants. Decorate cakes.
j3,Data Analyst,Numbers Inc,Remote,Analyze SQL data. Build dashboards for teams.
";

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

fn workspace() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    write_file(&dir.path().join(".jobmatchrc.toml"), CONFIG);
    write_file(&dir.path().join("postings.csv"), POSTINGS);
    dir
}

fn jobmatch(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("jobmatch"));
    cmd.current_dir(dir)
        .env("NO_COLOR", "1")
        .env_remove("CHUNK_SIZE")
        .env_remove("CHONK_SIZE")
        .env_remove("SOURCE_TABLE")
        .env_remove("DESTINATION_TABLE")
        .arg("--data-dir")
        .arg(dir);
    cmd
}

fn stdout_json(assert: assert_cmd::assert::Assert) -> Value {
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    serde_json::from_str(&stdout).expect("json output")
}

#[test]
fn chunk_splits_at_sentence_boundaries() {
    let dir = workspace();
    let assert = jobmatch(dir.path())
        .args(["--format", "json", "chunk", "--max-size", "15"])
        .write_stdin("Sentence one. Sentence two. Sentence three.")
        .assert()
        .success();
    let chunks = stdout_json(assert);
    let contents: Vec<&str> = chunks
        .as_array()
        .expect("array")
        .iter()
        .map(|c| c["content"].as_str().expect("content"))
        .collect();
    assert_eq!(
        contents,
        vec!["Sentence one.", "Sentence two.", "Sentence three."]
    );
}

#[test]
fn chunk_size_falls_back_to_chonk_size_env() {
    let dir = workspace();
    let assert = jobmatch(dir.path())
        .env("CHONK_SIZE", "15")
        .args(["--format", "json", "chunk"])
        .write_stdin("Sentence one. Sentence two. Sentence three.")
        .assert()
        .success();
    assert_eq!(stdout_json(assert).as_array().expect("array").len(), 3);
}

#[test]
fn chunk_rejects_zero_max_size() {
    let dir = workspace();
    jobmatch(dir.path())
        .args(["chunk", "--max-size", "0"])
        .write_stdin("text")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_size must be greater than 0"));
}

#[test]
fn load_trans_and_match() {
    let dir = workspace();

    jobmatch(dir.path())
        .args(["load-csv", "postings.csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded 3 rows into job_posts"));

    let assert = jobmatch(dir.path())
        .args(["--format", "json", "trans", "--mode", "all"])
        .assert()
        .success();
    let report = stdout_json(assert);
    assert_eq!(report["transform"]["postings"], 3);
    assert_eq!(report["index"]["jobs_indexed"], 3);
    assert_eq!(report["index"]["dimension"], 256);

    let assert = jobmatch(dir.path())
        .args([
            "--format",
            "json",
            "match",
            "I analyze SQL data and build dashboards.",
            "-k",
            "2",
        ])
        .assert()
        .success();
    let matches = stdout_json(assert);
    let matches = matches.as_array().expect("array");
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0]["job_id"], "j3");
    assert_eq!(matches[0]["company"], "Numbers Inc");

    jobmatch(dir.path())
        .args(["match", "I analyze SQL data and build dashboards."])
        .assert()
        .success()
        .stdout(predicate::str::contains("Data Analyst at Numbers Inc"));
}

#[test]
fn match_before_indexing_fails() {
    let dir = workspace();
    jobmatch(dir.path())
        .args(["match", "Rust developer."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No jobs indexed yet"));
}

#[test]
fn trans_with_unknown_mode_is_a_noop() {
    let dir = workspace();
    jobmatch(dir.path())
        .args(["trans", "--mode", "reindex"])
        .assert()
        .success()
        .stdout(predicate::str::diff("OK\n"));
}

#[test]
fn upload_event_loads_object_by_folder_name() {
    let dir = workspace();
    write_file(&dir.path().join("drive/uploads/job_posts/a.csv"), POSTINGS);

    let assert = jobmatch(dir.path())
        .args([
            "--format",
            "json",
            "upload-event",
            "--bucket",
            "uploads",
            "--name",
            "job_posts/a.csv",
        ])
        .assert()
        .success();
    let outcome = stdout_json(assert);
    assert_eq!(outcome["status"], "loaded");
    assert_eq!(outcome["table"], "job_posts");
    assert_eq!(outcome["rows_loaded"], 3);

    jobmatch(dir.path())
        .args(["upload-event", "--bucket", "uploads", "--name", "a.csv", "--size", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No table name present"));
}

#[test]
fn webhook_conversation_from_files() {
    let dir = workspace();
    jobmatch(dir.path())
        .args(["load-csv", "postings.csv"])
        .assert()
        .success();
    jobmatch(dir.path())
        .args(["trans", "--mode", "all"])
        .assert()
        .success();

    write_file(
        &dir.path().join("folder.json"),
        r#"{"fulfillmentInfo": {"tag": "create_folder"},
            "sessionInfo": {"session": "s1", "parameters": {"user_name": "Ada"}}}"#,
    );
    let response = stdout_json(
        jobmatch(dir.path())
            .args(["webhook", "folder.json"])
            .assert()
            .success(),
    );
    let mut params = response["sessionInfo"]["parameters"].clone();
    assert!(params["folder_id"].is_string());

    params["resume_text"] = Value::from("I analyze SQL data and build dashboards.");
    let request = serde_json::json!({
        "fulfillmentInfo": {"tag": "cover_letter"},
        "sessionInfo": {"session": "s1", "parameters": params},
    });
    // cover letter needs a match or a selected job first
    jobmatch(dir.path())
        .arg("webhook")
        .write_stdin(request.to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("match_jobs"));

    let request = serde_json::json!({
        "fulfillmentInfo": {"tag": "match_jobs"},
        "sessionInfo": {"session": "s1", "parameters": params},
    });
    let response = stdout_json(
        jobmatch(dir.path())
            .arg("webhook")
            .write_stdin(request.to_string())
            .assert()
            .success(),
    );
    assert_eq!(
        response["sessionInfo"]["parameters"]["matches"][0]["job_id"],
        "j3"
    );

    let request = serde_json::json!({
        "fulfillmentInfo": {"tag": "cover_letter"},
        "sessionInfo": {"session": "s1", "parameters": response["sessionInfo"]["parameters"]},
    });
    let response = stdout_json(
        jobmatch(dir.path())
            .arg("webhook")
            .write_stdin(request.to_string())
            .assert()
            .success(),
    );
    let letter = response["fulfillmentResponse"]["messages"][0]["text"]["text"][0]
        .as_str()
        .expect("letter");
    assert!(letter.starts_with("Dear Numbers Inc Hiring Team,"));
    assert!(letter.ends_with("Sincerely,\nAda"));
}

#[test]
fn completions_are_generated() {
    let dir = workspace();
    jobmatch(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("jobmatch"));
}
