use serde_json::json;

use jsbox::ErrorKind;

use super::common::{fixture_with_os_shim, Fixture};

#[tokio::test]
async fn import_loads_an_es_module_namespace() {
    let fixture = Fixture::new();
    fixture.write("/lib.mjs", "export const answer = 42;\nexport default 'lib';");

    let namespace = fixture.runtime.import("/lib.mjs").await.expect("import");
    assert_eq!(namespace.get("answer").unwrap(), json!(42));
    assert_eq!(namespace.get("default").unwrap(), json!("lib"));
}

#[tokio::test]
async fn import_follows_relative_imports() {
    let fixture = Fixture::new();
    fixture.mkdir("/esm");
    fixture.write("/esm/b.mjs", "export const base = 10;");
    fixture.write(
        "/esm/a.mjs",
        "import { base } from './b.mjs';\nexport const total = base + 5;",
    );

    let namespace = fixture.runtime.import("/esm/a.mjs").await.expect("import graph");
    assert_eq!(namespace.get("total").unwrap(), json!(15));
}

#[tokio::test]
async fn import_of_commonjs_file_exposes_default_and_names() {
    let fixture = Fixture::new();
    fixture.write("/thing.js", "module.exports = { kind: 'cjs', size: 3 };");

    let namespace = fixture.runtime.import("/thing.js").await.expect("cjs interop");
    assert_eq!(namespace.get("kind").unwrap(), json!("cjs"));
    let default_export = namespace.get("default").unwrap();
    assert_eq!(default_export["size"], json!(3));
}

#[tokio::test]
async fn import_of_builtin_exposes_its_keys() {
    let fixture = fixture_with_os_shim();
    let namespace = fixture.runtime.import("node:os").await.expect("builtin import");
    assert_eq!(namespace.get("platform").unwrap(), json!("jsbox"));
}

#[tokio::test]
async fn import_namespace_is_cached_per_id() {
    let fixture = Fixture::new();
    fixture.write("/once.mjs", "export const stamp = Math.random();");

    let first = fixture.runtime.import("/once.mjs").await.expect("first import");
    let second = fixture.runtime.import("/once.mjs").await.expect("second import");
    assert_eq!(first.get("stamp").unwrap(), second.get("stamp").unwrap());
}

#[tokio::test]
async fn import_failure_carries_module_not_found() {
    let fixture = Fixture::new();
    let err = fixture.runtime.import("./missing.mjs").await.expect_err("no module");
    assert_eq!(err.kind, ErrorKind::ModuleNotFound);
}

#[tokio::test]
async fn require_of_es_module_uses_the_transform_fallback() {
    let fixture = Fixture::new();
    fixture.write("/values.mjs", "export const nine = 9;\nexport default 'dflt';");

    let exports = fixture.runtime.require("/values.mjs").expect("fallback require");
    assert_eq!(exports.get("nine").unwrap(), json!(9));
    assert_eq!(exports.get("default").unwrap(), json!("dflt"));
}

#[tokio::test]
async fn mixed_graph_esm_importing_cjs() {
    let fixture = Fixture::new();
    fixture.write("/store.js", "module.exports = { items: ['a', 'b'] };");
    fixture.write(
        "/app.mjs",
        "import store from '/store.js';\nexport const count = store.items.length;",
    );

    let namespace = fixture.runtime.import("/app.mjs").await.expect("mixed graph");
    assert_eq!(namespace.get("count").unwrap(), json!(2));
}
