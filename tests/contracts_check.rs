mod common;

use common::TestEnv;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

fn load_schema() -> Value {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let raw = fs::read_to_string(root.join("docs/contracts/api_response.schema.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

fn validate(data: &Value) {
    let schema = load_schema();
    let validator = JSONSchema::compile(&schema).expect("compile schema");
    let msgs: Vec<String> = match validator.validate(data) {
        Ok(()) => return,
        Err(errors) => errors.map(|e| e.to_string()).collect(),
    };
    panic!("schema validation failed: {}", msgs.join(" | "));
}

#[test]
fn success_envelopes_match_the_contract() {
    let env = TestEnv::new();
    validate(&env.run_api("u.pro.services.dependencies.v1", &[]));
    validate(&env.run_api("u.pro.status.is_attached.v1", &[]));

    env.attach();
    validate(&env.run_api("u.pro.services.enable.v1", &["service=esm-infra"]));
    validate(&env.run_json(&["status"]));
}

#[test]
fn failure_envelopes_match_the_contract() {
    let env = TestEnv::new();
    env.attach();

    let out = env.run_api("u.pro.services.enable.v1", &["service=no-such-service"]);
    validate(&out);
    assert_eq!(out["result"], "failure");
    assert_eq!(out["errors"][0]["code"], "entitlement-not-found");

    let (out, _) = env.run_json_err(&["enable", "no-such-service"]);
    validate(&out);
}

#[test]
fn result_is_failure_exactly_when_errors_are_present() {
    let env = TestEnv::new();
    env.attach();

    let ok = env.run_api("u.pro.services.enable.v1", &["service=esm-infra"]);
    assert_eq!(ok["result"], "success");
    assert!(ok["errors"].as_array().unwrap().is_empty());

    // ros requires esm-apps, which is not enabled.
    let failed = env.run_api("u.pro.services.enable.v1", &["service=ros"]);
    assert_eq!(failed["result"], "failure");
    assert!(!failed["errors"].as_array().unwrap().is_empty());
}

#[test]
fn environment_overrides_are_echoed_in_meta() {
    let env = TestEnv::new();
    let out = env.run_api("u.pro.status.is_attached.v1", &[]);
    let vars = out["data"]["meta"]["environment_vars"].as_array().unwrap();
    let names: Vec<&str> = vars
        .iter()
        .map(|v| v["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"PRO_DATA_DIR"));
    assert!(names.contains(&"PRO_ALLOW_NON_ROOT"));
    // Sorted by name.
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}
