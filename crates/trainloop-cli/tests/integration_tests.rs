use assert_cmd::Command;
use predicates::prelude::*;
use std::time::Duration;
use tempfile::tempdir;

fn tloop() -> Command {
    Command::cargo_bin("tloop").unwrap()
}

#[test]
fn test_cli_help() {
    tloop()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("trainloop - Resumable training main loop"));
}

#[test]
fn test_cli_train_writes_checkpoint() {
    let dir = tempdir().unwrap();
    let checkpoint = dir.path().join("model.bin");

    tloop()
        .arg("train")
        .arg("--epochs")
        .arg("2")
        .arg("--examples")
        .arg("32")
        .arg("--checkpoint")
        .arg(&checkpoint)
        .arg("--save-separately")
        .arg("model")
        .arg("--quiet")
        .assert()
        .success()
        .stdout(predicate::str::contains("Training complete"));

    assert!(checkpoint.is_file());
    assert!(dir.path().join("model_model.bin").is_file());

    tloop()
        .arg("inspect")
        .arg(&checkpoint)
        .assert()
        .success()
        .stdout(predicate::str::contains("Epochs done: 2"))
        .stdout(predicate::str::contains("Iterations done: 4"))
        .stdout(predicate::str::contains("saved_to"));
}

#[test]
fn test_cli_resume_continues_training() {
    let dir = tempdir().unwrap();
    let checkpoint = dir.path().join("model.bin");

    tloop()
        .args(["train", "--batches", "3", "--examples", "32", "--quiet"])
        .arg("--checkpoint")
        .arg(&checkpoint)
        .assert()
        .success();

    tloop()
        .args(["train", "--epochs", "2", "--examples", "32", "--quiet"])
        .arg("--resume")
        .arg(&checkpoint)
        .assert()
        .success()
        .stdout(predicate::str::contains("Resumed from checkpoint"));

    // The second run saves nothing, the checkpoint still holds the first run
    tloop()
        .arg("inspect")
        .arg("--json")
        .arg(&checkpoint)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"iterations_done\": 3"));
}

#[test]
fn test_cli_dump_is_loaded_on_next_run() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("dump");

    tloop()
        .args(["train", "--epochs", "1", "--examples", "32", "--quiet"])
        .arg("--dump")
        .arg(&folder)
        .assert()
        .success()
        .stdout(predicate::str::contains("No dump found"));

    tloop()
        .args(["train", "--epochs", "3", "--examples", "32", "--quiet"])
        .arg("--dump")
        .arg(&folder)
        .assert()
        .success()
        .stdout(predicate::str::contains("Loading the state from the dump"));

    tloop()
        .arg("inspect")
        .arg(&folder)
        .assert()
        .success()
        .stdout(predicate::str::contains("Dump:"))
        .stdout(predicate::str::contains("Epochs done: 3"))
        .stdout(predicate::str::contains("loaded_from").not());
}

#[test]
fn test_cli_rerun_of_finished_dump_exits() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("dump");

    for _ in 0..2 {
        tloop()
            .args(["train", "--epochs", "1", "--examples", "32", "--quiet"])
            .arg("--dump")
            .arg(&folder)
            .timeout(Duration::from_secs(60))
            .assert()
            .success();
    }

    tloop()
        .arg("inspect")
        .arg(&folder)
        .assert()
        .success()
        .stdout(predicate::str::contains("Epochs done: 1"))
        .stdout(predicate::str::contains("Iterations done: 2"))
        .stdout(predicate::str::contains("loaded_from"));
}

#[test]
fn test_cli_resume_of_finished_checkpoint_exits() {
    let dir = tempdir().unwrap();
    let checkpoint = dir.path().join("model.bin");

    tloop()
        .args(["train", "--epochs", "1", "--examples", "32", "--quiet"])
        .arg("--checkpoint")
        .arg(&checkpoint)
        .assert()
        .success();

    tloop()
        .args(["train", "--epochs", "1", "--examples", "32", "--quiet"])
        .arg("--resume")
        .arg(&checkpoint)
        .timeout(Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("already reached its limit"));
}

#[test]
fn test_cli_rejects_unknown_attribute() {
    let dir = tempdir().unwrap();

    tloop()
        .args(["train", "--epochs", "1", "--quiet"])
        .arg("--checkpoint")
        .arg(dir.path().join("model.bin"))
        .arg("--save-separately")
        .arg("optimizer")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown attribute"));
}

#[test]
fn test_cli_config_file() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("run.json");
    let checkpoint = dir.path().join("run.bin");
    std::fs::write(
        &config,
        format!(
            r#"{{"finish_after": {{"batches": 5}}, "batch_size": 4, "printing": false,
                "checkpoint": {{"path": {:?}}}}}"#,
            checkpoint.display().to_string()
        ),
    )
    .unwrap();

    tloop()
        .arg("train")
        .arg("--config")
        .arg(&config)
        .args(["--examples", "16"])
        .assert()
        .success();

    tloop()
        .arg("inspect")
        .arg(&checkpoint)
        .assert()
        .success()
        .stdout(predicate::str::contains("Iterations done: 5"))
        .stdout(predicate::str::contains("Epochs done: 1"));
}

#[test]
fn test_cli_inspect_missing_file() {
    tloop()
        .arg("inspect")
        .arg("does-not-exist.bin")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load checkpoint"));
}
