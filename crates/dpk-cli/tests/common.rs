#![allow(dead_code)]

use std::fs;
use std::path::Path;

use assert_cmd::assert::Assert;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

const ISOLATED_VARS: &[&str] = &[
    "DPK_ROOT",
    "DPK_ONLINE",
    "DPK_HTTP_TIMEOUT",
    "DPK_GITHUB_API",
    "DPK_CATALOG_REPO",
    "DPK_CATALOG_PATH",
    "DPK_RELEASES_REPO",
    "DPK_GITHUB_TOKEN",
    "GITHUB_TOKEN",
    "DPK_STOCK_LIBRARY",
];

/// A scratch DE1 app folder announcing `version` in its version file.
pub fn prepare_installation(version: &str) -> TempDir {
    let temp = tempfile::Builder::new()
        .prefix("dpk-app")
        .tempdir()
        .expect("tempdir");
    fs::write(
        temp.path().join("version.tcl"),
        format!("package provide de1app {version}\n"),
    )
    .expect("write version.tcl");
    fs::create_dir_all(temp.path().join("profiles")).expect("profiles dir");
    temp
}

pub fn write_profile(root: &Path, name: &str, title: &str) {
    fs::write(
        root.join("profiles").join(name),
        format!("profile_title {{{title}}}\nadvanced_shot {{}}\n"),
    )
    .expect("write profile");
}

/// `dpk` rooted at `root`, offline and shielded from the caller's environment.
pub fn dpk(root: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("dpk");
    for var in ISOLATED_VARS {
        cmd.env_remove(var);
    }
    cmd.env("DPK_ONLINE", "0").arg("--root").arg(root);
    cmd
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}
