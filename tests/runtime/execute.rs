use serde_json::json;

use jsbox::{ErrorKind, RuntimeBuilder};

use super::common::Fixture;

#[test]
fn execute_returns_the_exports_value() {
    let fixture = Fixture::new();
    let outcome = fixture.runtime.execute("module.exports = 2 + 2;", None).expect("execute");
    assert_eq!(outcome.exports.to_json().unwrap(), json!(4));
}

#[test]
fn execute_captures_console_output() {
    let fixture = Fixture::new();
    let outcome = fixture
        .runtime
        .execute("console.log('hello', 42); console.warn('careful'); module.exports = 1;", None)
        .expect("execute");

    assert_eq!(outcome.console.len(), 2);
    assert_eq!(outcome.console[0].method, "log");
    assert_eq!(outcome.console[0].args, vec![json!("hello"), json!(42)]);
    assert_eq!(outcome.console[1].method, "warn");
}

#[test]
fn console_entries_do_not_leak_between_executions() {
    let fixture = Fixture::new();
    fixture.runtime.execute("console.log('first');", None).expect("first");
    let outcome = fixture.runtime.execute("module.exports = 0;", None).expect("second");
    assert!(outcome.console.is_empty());
}

#[test]
fn anonymous_executions_get_distinct_module_paths() {
    let fixture = Fixture::new();
    fixture.runtime.execute("module.exports = 'one';", None).expect("first");
    let second = fixture.runtime.execute("module.exports = 'two';", None).expect("second");
    // A shared path would return the first module from the cache.
    assert_eq!(second.exports.to_json().unwrap(), json!("two"));
}

#[test]
fn run_file_loads_multi_file_programs() {
    let fixture = Fixture::new();
    fixture.mkdir("/src");
    fixture.write("/src/math.js", "exports.add = (a,b)=>a+b;");
    fixture.write(
        "/src/main.js",
        "const {add}=require('./math'); module.exports = add(3,4);",
    );

    let outcome = fixture.runtime.run_file("/src/main.js").expect("run file");
    assert_eq!(outcome.exports.to_json().unwrap(), json!(7));
}

#[test]
fn run_file_on_missing_path_fails_not_found() {
    let fixture = Fixture::new();
    let err = fixture.runtime.run_file("/nope.js").expect_err("missing file");
    assert_eq!(err.kind, ErrorKind::Fs(jsbox::FsErrorKind::NotFound));
}

#[test]
fn syntax_errors_surface_as_parse_failures() {
    let fixture = Fixture::new();
    let err = fixture.runtime.execute("const = broken;", None).expect_err("syntax error");
    assert_eq!(err.kind, ErrorKind::Parse);
}

#[test]
fn thrown_errors_surface_as_execution_failures() {
    let fixture = Fixture::new();
    let err = fixture
        .runtime
        .execute("throw new Error('deliberate');", None)
        .expect_err("throwing module");
    assert_eq!(err.kind, ErrorKind::Execution);
    assert!(err.message.contains("deliberate"));
}

#[test]
fn execute_without_vfs_falls_back_to_direct_evaluation() {
    let runtime = RuntimeBuilder::empty().build().expect("bare runtime");
    assert!(runtime.vfs().is_err());

    let outcome = runtime.execute("module.exports = 5 * 5;", None).expect("direct eval");
    assert_eq!(outcome.exports.to_json().unwrap(), json!(25));
}

#[test]
fn exported_functions_are_callable_from_the_host() {
    let fixture = Fixture::new();
    let outcome = fixture
        .runtime
        .execute("module.exports = { double(n) { return n * 2; } };", None)
        .expect("execute");
    assert_eq!(outcome.exports.call("double", &[json!(21)]).unwrap(), json!(42));
}

#[test]
fn config_cwd_anchors_top_level_requires() {
    let mut config = jsbox::RuntimeConfig::default();
    config.cwd = "/srv".to_owned();
    let runtime = RuntimeBuilder::new().config(config).build().expect("runtime");

    let vfs = runtime.vfs().unwrap();
    vfs.mkdir("/srv", true).unwrap();
    vfs.write_file("/srv/entry.js", "module.exports = 'anchored';").unwrap();

    let exports = runtime.require("./entry").expect("cwd-relative require");
    assert_eq!(exports.to_json().unwrap(), json!("anchored"));
}

#[test]
fn config_loads_from_toml_file() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let config_path = dir.path().join("jsbox.toml");
    std::fs::write(&config_path, "cwd = \"/work\"\nmode = \"worker\"\n").expect("write config");

    let config = jsbox::RuntimeConfig::from_toml_path(&config_path).expect("load config");
    assert_eq!(config.cwd, "/work");
    assert_eq!(config.mode, jsbox::TrustMode::Worker);
}
