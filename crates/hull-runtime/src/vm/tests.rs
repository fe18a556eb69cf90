// SPDX-License-Identifier: MIT OR Apache-2.0
use super::*;
use hull_capability::db::Db;
use std::collections::BTreeMap;

fn config(heap: usize) -> RuntimeConfig {
    RuntimeConfig {
        heap_cap_bytes: heap,
        ..RuntimeConfig::default()
    }
}

fn request(path: &str, params: &[(&str, &str)]) -> Request {
    Request {
        id: 1,
        method: Method::Get,
        path: path.into(),
        query: String::new(),
        headers: BTreeMap::new(),
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: Vec::new(),
        context: BTreeMap::new(),
    }
}

fn caps_for_test() -> Rc<RefCell<Caps>> {
    let dir = tempfile::tempdir().unwrap();
    let caps = Caps::for_serve(dir.path(), None, Db::open_in_memory().unwrap());
    // The tempdir handle drops here; nothing in these tests touches fs.
    Rc::new(RefCell::new(caps))
}

// The entry unit declares a manifest and one route; the handler greets
// the captured name.
fn greeting_program() -> String {
    json!({
        "constants": [
            {"fs": {"read": ["data"], "write": []}, "env": [], "hosts": []},
            "GET",
            "/hello/:name",
            1,
            "params",
            "name",
            "hello ",
            "status",
            200,
            "body",
        ],
        "functions": [
            {
                "name": "main",
                "registers": 4,
                "code": [
                    {"op": "load_const", "dst": 0, "index": 0},
                    {"op": "host_call", "dst": 1, "func": "manifest", "args_start": 0, "args_len": 1},
                    {"op": "load_const", "dst": 0, "index": 1},
                    {"op": "load_const", "dst": 1, "index": 2},
                    {"op": "load_const", "dst": 2, "index": 3},
                    {"op": "host_call", "dst": 3, "func": "route", "args_start": 0, "args_len": 3},
                    {"op": "return", "src": 3}
                ]
            },
            {
                "name": "hello",
                "registers": 10,
                "code": [
                    {"op": "load_const", "dst": 1, "index": 4},
                    {"op": "map_get", "dst": 2, "map": 0, "key": 1},
                    {"op": "load_const", "dst": 3, "index": 5},
                    {"op": "map_get", "dst": 4, "map": 2, "key": 3},
                    {"op": "load_const", "dst": 5, "index": 6},
                    {"op": "add", "dst": 6, "a": 5, "b": 4},
                    {"op": "new_map", "dst": 7},
                    {"op": "load_const", "dst": 8, "index": 7},
                    {"op": "load_const", "dst": 9, "index": 8},
                    {"op": "map_set", "map": 7, "key": 8, "value": 9},
                    {"op": "load_const", "dst": 8, "index": 9},
                    {"op": "map_set", "map": 7, "key": 8, "value": 6},
                    {"op": "return", "src": 7}
                ]
            }
        ]
    })
    .to_string()
}

#[test]
fn load_registers_routes_and_manifest() {
    let mut vm = VmRuntime::new(&config(1 << 20));
    vm.load_app(&greeting_program()).unwrap();

    let manifest = vm.extract_manifest().unwrap().expect("manifest declared");
    assert_eq!(manifest.fs.read, vec!["data"]);

    let mut wired = Vec::new();
    vm.wire_routes(&mut |route: &RouteSpec| wired.push(route.clone()));
    assert_eq!(wired.len(), 1);
    assert_eq!(wired[0].method, Method::Get);
    assert_eq!(wired[0].pattern.as_str(), "/hello/:name");
    assert_eq!(wired[0].handler_ref, 1);
}

#[test]
fn dispatch_runs_the_handler() {
    let mut vm = VmRuntime::new(&config(1 << 20));
    vm.load_app(&greeting_program()).unwrap();
    vm.install_caps(caps_for_test());

    let resp = vm
        .dispatch(1, &request("/hello/ada", &[("name", "ada")]))
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, b"hello ada");
}

#[test]
fn second_manifest_declaration_fails_load() {
    let program = json!({
        "constants": [{"fs": {"read": [], "write": []}, "env": [], "hosts": []}],
        "functions": [{
            "name": "main",
            "registers": 2,
            "code": [
                {"op": "load_const", "dst": 0, "index": 0},
                {"op": "host_call", "dst": 1, "func": "manifest", "args_start": 0, "args_len": 1},
                {"op": "host_call", "dst": 1, "func": "manifest", "args_start": 0, "args_len": 1},
                {"op": "return", "src": 1}
            ]
        }]
    })
    .to_string();

    let mut vm = VmRuntime::new(&config(1 << 20));
    let err = vm.load_app(&program).unwrap_err();
    assert!(err.to_string().contains("already declared"), "{err}");
}

#[test]
fn heap_cap_fires_as_resource_exhausted() {
    // Append a 64-byte string forever; the account trips long before the
    // process feels anything.
    let filler = "x".repeat(64);
    let program = json!({
        "constants": [filler],
        "functions": [
            {"name": "main", "registers": 1, "code": [{"op": "return", "src": 0}]},
            {
                "name": "hog",
                "registers": 3,
                "code": [
                    {"op": "new_list", "dst": 1},
                    {"op": "load_const", "dst": 2, "index": 0},
                    {"op": "list_push", "list": 1, "value": 2},
                    {"op": "jump", "offset": -3}
                ]
            }
        ]
    })
    .to_string();

    let mut vm = VmRuntime::new(&config(16 * 1024));
    vm.load_app(&program).unwrap();
    vm.install_caps(caps_for_test());

    let err = vm.dispatch(1, &request("/", &[])).unwrap_err();
    assert!(matches!(err, RuntimeError::ResourceExhausted(_)), "{err}");
}

#[test]
fn db_round_trip_through_host_calls() {
    let program = json!({
        "constants": [
            "CREATE TABLE notes (body TEXT)",
            "INSERT INTO notes (body) VALUES (?)",
            "a note",
            "SELECT body FROM notes",
            "status", 200, "body"
        ],
        "functions": [
            {"name": "main", "registers": 1, "code": [{"op": "return", "src": 0}]},
            {
                "name": "handler",
                "registers": 8,
                "code": [
                    {"op": "load_const", "dst": 1, "index": 0},
                    {"op": "host_call", "dst": 2, "func": "db_exec", "args_start": 1, "args_len": 1},
                    {"op": "load_const", "dst": 1, "index": 1},
                    {"op": "new_list", "dst": 2},
                    {"op": "load_const", "dst": 3, "index": 2},
                    {"op": "list_push", "list": 2, "value": 3},
                    {"op": "host_call", "dst": 4, "func": "db_exec", "args_start": 1, "args_len": 2},
                    {"op": "load_const", "dst": 1, "index": 3},
                    {"op": "host_call", "dst": 5, "func": "db_query", "args_start": 1, "args_len": 1},
                    {"op": "new_map", "dst": 6},
                    {"op": "load_const", "dst": 7, "index": 6},
                    {"op": "map_set", "map": 6, "key": 7, "value": 5},
                    {"op": "return", "src": 6}
                ]
            }
        ]
    })
    .to_string();

    let mut vm = VmRuntime::new(&config(1 << 20));
    vm.load_app(&program).unwrap();
    vm.install_caps(caps_for_test());

    let resp = vm.dispatch(1, &request("/", &[])).unwrap();
    assert_eq!(resp.status, 200);
    let rows: Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(rows, json!([{"body": "a note"}]));
}

#[test]
fn denied_capability_surfaces_stable_code() {
    let program = json!({
        "constants": ["secret.txt", "status", 200, "body"],
        "functions": [
            {"name": "main", "registers": 1, "code": [{"op": "return", "src": 0}]},
            {
                "name": "handler",
                "registers": 4,
                "code": [
                    {"op": "load_const", "dst": 1, "index": 0},
                    {"op": "host_call", "dst": 2, "func": "fs_read", "args_start": 1, "args_len": 1},
                    {"op": "return", "src": 2}
                ]
            }
        ]
    })
    .to_string();

    let mut vm = VmRuntime::new(&config(1 << 20));
    vm.load_app(&program).unwrap();
    // No manifest declared: the fs capability denies everything.
    vm.install_caps(caps_for_test());

    let err = vm.dispatch(1, &request("/", &[])).unwrap_err();
    assert!(err.to_string().contains("DENIED"), "{err}");
}

#[test]
fn bad_chunk_fails_load() {
    let mut vm = VmRuntime::new(&config(1 << 20));
    assert!(matches!(
        vm.load_app("not json"),
        Err(RuntimeError::Load(_))
    ));
    assert!(matches!(
        vm.load_app(r#"{"constants": [], "functions": []}"#),
        Err(RuntimeError::Load(_))
    ));
}
