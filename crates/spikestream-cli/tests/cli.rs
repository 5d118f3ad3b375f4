use assert_cmd::Command;
use predicates::prelude::*;
use spikestream_storage::{FileStore, ParameterTable, StoreImage, WeightRecord};
use std::error::Error;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn network() -> StoreImage {
    StoreImage::new()
        .neuron_type(
            1,
            "standard",
            ParameterTable::new()
                .with("threshold_val", 0.5)
                .with("decay_rate_val", 0.0)
                .with("refractory_period_val", 0.0),
        )
        .synapse_type(2, "weight")
        .group(1, 10, 2, 2, 1)
        .group(2, 20, 2, 2, 1)
        .connection_group(1, 1, 2, 2, ParameterTable::new())
        .connect(1, 11, 21, 1.0, 0)
        .connect(1, 12, 22, 0.25, 2)
}

fn workspace() -> Result<(TempDir, PathBuf), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("network.json");
    FileStore::create(&path, network())?;
    Ok((dir, path))
}

fn spikestream(dir: &Path) -> Result<Command, Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("spikestream")?;
    // keep the user's config file out of the tests
    cmd.env("SPIKESTREAM_CONFIG", dir.join("absent.toml"));
    cmd.env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn test_inspect_text() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    spikestream(dir.path())?
        .arg("inspect")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("Neuron groups: 2"))
        .stdout(predicate::str::contains("C1 G1 -> G2 2 connections, max delay 2 (weight)"));
    Ok(())
}

#[test]
fn test_inspect_json_and_verify() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    let output = spikestream(dir.path())?
        .args(["inspect", "--json"])
        .arg(&store)
        .output()?;
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(summary["groups"].as_array().map(Vec::len), Some(2));
    assert_eq!(summary["connection_groups"][0]["plugin"], "weight");

    spikestream(dir.path())?
        .args(["inspect", "--verify"])
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("All 2 groups load"));
    Ok(())
}

#[test]
fn test_run_reports_firings() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    let output = spikestream(dir.path())?
        .arg("run")
        .arg(&store)
        .args(["--steps", "5", "--fire", "11", "--json"])
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(summary["steps"], 5);
    assert_eq!(summary["firings"]["1"], 1);
    assert_eq!(summary["firings"]["2"], 1);
    Ok(())
}

#[test]
fn test_run_rejects_unknown_neuron() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    spikestream(dir.path())?
        .arg("run")
        .arg(&store)
        .args(["--steps", "1", "--fire", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("belongs to no group"));
    Ok(())
}

#[test]
fn test_run_rejects_bad_noise() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    spikestream(dir.path())?
        .arg("run")
        .arg(&store)
        .args(["--noise", "150"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a percentage"));
    Ok(())
}

#[test]
fn test_run_with_config_file() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[simulation]\nupdate_mode = \"full_both\"\n\n[preferences]\njson_output = true\n")?;
    let output = spikestream(dir.path())?
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg(&store)
        .args(["--steps", "3"])
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(summary["steps"], 3);
    Ok(())
}

#[test]
fn test_missing_store_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    spikestream(dir.path())?
        .args(["inspect", "does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Command failed"));
    Ok(())
}

#[test]
fn test_snapshot_export_show_import() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    let binary = dir.path().join("out").join("weights.vwgt");
    spikestream(dir.path())?
        .args(["snapshot", "export"])
        .arg(&store)
        .arg("--out")
        .arg(&binary)
        .assert()
        .success();
    assert!(binary.exists());

    spikestream(dir.path())?
        .args(["snapshot", "show"])
        .arg(&binary)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 records"))
        .stdout(predicate::str::contains("N11 -> N21"));

    spikestream(dir.path())?
        .args(["snapshot", "import"])
        .arg(&store)
        .arg("--input")
        .arg(&binary)
        .assert()
        .success();
    Ok(())
}

#[test]
fn test_snapshot_json_import_updates_store() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    let json = dir.path().join("weights.json");
    std::fs::write(&json, r#"[{"from": 12, "to": 22, "weight": -40}]"#)?;
    spikestream(dir.path())?
        .args(["snapshot", "import", "--format", "json"])
        .arg(&store)
        .arg("--input")
        .arg(&json)
        .assert()
        .success();

    let exported = dir.path().join("exported.json");
    spikestream(dir.path())?
        .args(["snapshot", "export", "--format", "json", "--group", "2"])
        .arg(&store)
        .arg("--out")
        .arg(&exported)
        .assert()
        .success();
    let records: Vec<WeightRecord> = serde_json::from_str(&std::fs::read_to_string(&exported)?)?;
    let updated = records.iter().find(|r| r.from.raw() == 12).map(|r| r.weight);
    assert_eq!(updated, Some(-40));
    Ok(())
}

#[test]
fn test_snapshot_import_rejects_unknown_connection() -> Result<(), Box<dyn Error>> {
    let (dir, store) = workspace()?;
    let json = dir.path().join("weights.json");
    std::fs::write(&json, r#"[{"from": 13, "to": 23, "weight": 5}]"#)?;
    spikestream(dir.path())?
        .args(["snapshot", "import", "--format", "json"])
        .arg(&store)
        .arg("--input")
        .arg(&json)
        .assert()
        .failure()
        .stderr(predicate::str::contains("match no connection"));
    Ok(())
}

#[test]
fn test_completions() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    spikestream(dir.path())?
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("spikestream"));
    Ok(())
}
