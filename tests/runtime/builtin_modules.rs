use std::sync::Arc;

use serde_json::json;

use jsbox::builtins::JsonBuiltin;
use jsbox::ErrorKind;

use super::common::{fixture_with_os_shim, Fixture};

#[test]
fn builtins_resolve_by_bare_name() {
    let fixture = fixture_with_os_shim();
    let outcome = fixture
        .runtime
        .execute("module.exports = require('os').platform;", None)
        .expect("require builtin");
    assert_eq!(outcome.exports.to_json().unwrap(), json!("jsbox"));
}

#[test]
fn node_scheme_reaches_the_same_builtin() {
    let fixture = fixture_with_os_shim();
    let outcome = fixture
        .runtime
        .execute(
            "const os = require('node:os'); module.exports = os.release();",
            None,
        )
        .expect("require node:os");
    assert_eq!(outcome.exports.to_json().unwrap(), json!("1.0"));
}

#[test]
fn builtin_identity_is_stable_across_requires() {
    let fixture = fixture_with_os_shim();
    let outcome = fixture
        .runtime
        .execute(
            "module.exports = require('os') === require('node:os');",
            None,
        )
        .expect("identity check");
    assert_eq!(outcome.exports.to_json().unwrap(), json!(true));
}

#[test]
fn builtins_shadow_same_named_packages() {
    let fixture = fixture_with_os_shim();
    fixture.mkdir("/node_modules/os");
    fixture.write("/node_modules/os/index.js", "module.exports = 'impostor';");

    let outcome = fixture
        .runtime
        .execute("module.exports = require('os').platform;", None)
        .expect("builtin wins");
    assert_eq!(outcome.exports.to_json().unwrap(), json!("jsbox"));
}

#[test]
fn reregistration_replaces_the_module() {
    let fixture = fixture_with_os_shim();
    fixture
        .runtime
        .kernel()
        .builtins()
        .register("os", Arc::new(JsonBuiltin::new(&json!({ "platform": "replaced" }))));

    let outcome = fixture
        .runtime
        .execute("module.exports = require('os').platform;", None)
        .expect("require replacement");
    assert_eq!(outcome.exports.to_json().unwrap(), json!("replaced"));
}

#[test]
fn unknown_bare_names_are_not_builtins() {
    let fixture = Fixture::new();
    let err = fixture.runtime.require("os").expect_err("no shim registered");
    assert_eq!(err.kind, ErrorKind::ModuleNotFound);
}
