use assert_cmd::Command;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated client environment: its own data dir, a config that disables all
/// external commands, and the non-root escape hatch so tests never need sudo.
pub struct TestEnv {
    _tmp: TempDir,
    pub data_dir: PathBuf,
    config_file: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let data_dir = tmp.path().join("data");
        fs::create_dir_all(&data_dir).expect("create data dir");

        let config_file = tmp.path().join("client.yaml");
        fs::write(&config_file, "apt_cmd: null\nlivepatch_cmd: null\n").expect("write config");

        Self {
            _tmp: tmp,
            data_dir,
            config_file,
        }
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("pro").expect("pro binary");
        cmd.env("PRO_CONFIG_FILE", &self.config_file)
            .env("PRO_DATA_DIR", &self.data_dir)
            .env("PRO_ALLOW_NON_ROOT", "1")
            .env_remove("PRO_ALLOW_BETA");
        cmd
    }

    /// A machine token entitling the common test services. Only the ESM pair
    /// is marked for auto-enable.
    pub fn machine_token() -> Value {
        let entitlement = |auto: bool| json!({"entitled": true, "auto_enable": auto});
        json!({
            "contract_id": "cAaBbCc",
            "contract_name": "pro-client-test",
            "account_name": "testing",
            "entitlements": {
                "esm-infra": entitlement(true),
                "esm-apps": entitlement(true),
                "usg": entitlement(false),
                "fips": entitlement(false),
                "fips-updates": entitlement(false),
                "livepatch": entitlement(false),
                "realtime-kernel": entitlement(false),
                "ros": entitlement(false),
                "ros-updates": entitlement(false)
            }
        })
    }

    /// Attach by writing the machine token directly, skipping auto-enable.
    pub fn attach(&self) {
        fs::write(
            self.data_dir.join("machine-token.json"),
            serde_json::to_string_pretty(&Self::machine_token()).unwrap(),
        )
        .expect("write machine token");
    }

    /// The token written to a file, for exercising the attach flow itself.
    pub fn token_file(&self) -> PathBuf {
        let path = self.data_dir.join("contract-token.json");
        fs::write(&path, Self::machine_token().to_string()).expect("write token file");
        path
    }

    pub fn run_json(&self, args: &[&str]) -> Value {
        let out = self
            .cmd()
            .args(["--format", "json"])
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).expect("valid json output")
    }

    /// Run a command expected to fail, returning its envelope and exit code.
    pub fn run_json_err(&self, args: &[&str]) -> (Value, i32) {
        let assert = self.cmd().args(["--format", "json"]).args(args).assert();
        let out = assert.get_output();
        let code = out.status.code().expect("exit code");
        assert_ne!(code, 0, "expected a failing exit code");
        let value = serde_json::from_slice(&out.stdout).expect("valid json output");
        (value, code)
    }

    pub fn run_api(&self, endpoint: &str, args: &[&str]) -> Value {
        let mut cmd_args = vec!["api", endpoint];
        for arg in args {
            cmd_args.push("--args");
            cmd_args.push(arg);
        }
        let out = self
            .cmd()
            .args(&cmd_args)
            .assert()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).expect("valid json output")
    }
}

#[allow(dead_code)]
pub fn attributes(envelope: &Value) -> &Value {
    &envelope["data"]["attributes"]
}

#[allow(dead_code)]
pub fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .expect("array")
        .iter()
        .map(|v| v.as_str().expect("string").to_string())
        .collect()
}
