use serde_json::json;

use jsbox::ErrorKind;

use super::common::Fixture;

#[test]
fn circular_requires_observe_partial_exports() {
    let fixture = Fixture::new();
    fixture.write(
        "/a.js",
        "exports.value='a'; const b=require('./b.js'); exports.bValue=b.value;",
    );
    fixture.write(
        "/b.js",
        "exports.value='b'; const a=require('./a.js'); exports.aValue=a.value;",
    );

    let exports = fixture.runtime.require("/a.js").expect("cycle resolves");
    assert_eq!(exports.get("value").unwrap(), json!("a"));
    assert_eq!(exports.get("bValue").unwrap(), json!("b"));
}

#[test]
fn repeated_requires_share_one_module_instance() {
    let fixture = Fixture::new();
    fixture.write("/id.js", "module.exports = { stamp: Math.random() };");

    let outcome = fixture
        .runtime
        .execute(
            "const a = require('/id.js'); const b = require('/id.js'); \
             module.exports = a === b;",
            None,
        )
        .expect("execute");
    assert_eq!(outcome.exports.to_json().unwrap(), json!(true));
}

#[test]
fn extension_probing_reaches_typescript_sources() {
    let fixture = Fixture::new();
    fixture.mkdir("/app");
    fixture.write("/app/utils.ts", "export const add = (a, b) => a + b;");
    fixture.write(
        "/app/index.js",
        "const { add } = require('./utils'); module.exports = add(20, 22);",
    );

    let outcome = fixture.runtime.run_file("/app/index.js").expect("run");
    assert_eq!(outcome.exports.to_json().unwrap(), json!(42));
}

#[test]
fn json_modules_parse_to_plain_values() {
    let fixture = Fixture::new();
    fixture.write("/config.json", r#"{"name": "demo", "port": 8080}"#);

    let exports = fixture.runtime.require("/config.json").expect("json module");
    assert_eq!(exports.get("port").unwrap(), json!(8080));
}

#[test]
fn invalid_json_module_is_a_parse_error() {
    let fixture = Fixture::new();
    fixture.write("/broken.json", "{ nope");
    let err = fixture.runtime.require("/broken.json").expect_err("bad json");
    assert_eq!(err.kind, ErrorKind::Parse);
}

#[test]
fn package_require_uses_node_modules() {
    let fixture = Fixture::new();
    fixture.mkdir("/project/node_modules/greeter");
    fixture.write(
        "/project/node_modules/greeter/package.json",
        r#"{"main": "./lib.js"}"#,
    );
    fixture.write(
        "/project/node_modules/greeter/lib.js",
        "module.exports = name => 'hi ' + name;",
    );
    fixture.write(
        "/project/app.js",
        "const greet = require('greeter'); module.exports = greet('box');",
    );

    let outcome = fixture.runtime.run_file("/project/app.js").expect("run");
    assert_eq!(outcome.exports.to_json().unwrap(), json!("hi box"));
}

#[test]
fn missing_specifier_propagates_module_not_found() {
    let fixture = Fixture::new();
    fixture.write("/outer.js", "require('./gone');");

    let err = fixture.runtime.require("/outer.js").expect_err("nested failure");
    // The tagged error survives the trip through the module body.
    assert_eq!(err.kind, ErrorKind::ModuleNotFound);
    assert!(err.message.contains("./gone"));
}

#[test]
fn module_body_may_catch_a_failed_require() {
    let fixture = Fixture::new();
    fixture.write(
        "/tolerant.js",
        "let extra; try { extra = require('./optional'); } catch (e) { extra = null; } \
         module.exports = extra === null ? 'fallback' : 'loaded';",
    );

    let exports = fixture.runtime.require("/tolerant.js").expect("caught inside");
    assert_eq!(exports.to_json().unwrap(), json!("fallback"));
}

#[test]
fn failed_modules_keep_their_partial_state() {
    let fixture = Fixture::new();
    fixture.write("/boom.js", "exports.ok = 'partial'; throw new Error('kaboom');");

    let err = fixture.runtime.require("/boom.js").expect_err("module throws");
    assert_eq!(err.kind, ErrorKind::Execution);
    assert!(err.message.contains("kaboom"));

    // Node keeps the partially populated record; a second require
    // returns it without re-running the body.
    let outcome = fixture
        .runtime
        .execute("module.exports = require('/boom.js').ok;", None)
        .expect("cached partial module");
    assert_eq!(outcome.exports.to_json().unwrap(), json!("partial"));
}

#[test]
fn clear_cache_reloads_modules() {
    let fixture = Fixture::new();
    fixture.write("/state.js", "module.exports = { tag: 'v1' };");

    let first = fixture.runtime.require("/state.js").expect("first load");
    assert_eq!(first.get("tag").unwrap(), json!("v1"));

    fixture.write("/state.js", "module.exports = { tag: 'v2' };");
    // Still v1: the module cache is keyed by path.
    let cached = fixture.runtime.require("/state.js").expect("cached load");
    assert_eq!(cached.get("tag").unwrap(), json!("v1"));

    fixture.runtime.clear_cache().expect("clear");
    let reloaded = fixture.runtime.require("/state.js").expect("fresh load");
    assert_eq!(reloaded.get("tag").unwrap(), json!("v2"));

    // Handles from before the clear lost their engine context.
    assert!(first.to_json().is_err());
}

#[test]
fn requiring_a_directory_resolves_its_index() {
    let fixture = Fixture::new();
    fixture.mkdir("/lib/tools");
    fixture.write("/lib/tools/index.js", "module.exports = 'toolbox';");

    let exports = fixture.runtime.require("/lib/tools").expect("index resolution");
    assert_eq!(exports.to_json().unwrap(), json!("toolbox"));
}

#[test]
fn modules_resolve_through_symlinked_directories() {
    let fixture = Fixture::new();
    fixture.mkdir("/real");
    fixture.write("/real/mod.js", "module.exports = 'via-link';");
    fixture.vfs().symlink("/real", "/alias").expect("symlink");

    let exports = fixture.runtime.require("/alias/mod.js").expect("symlinked require");
    assert_eq!(exports.to_json().unwrap(), json!("via-link"));
}
