//! Per-connection message conversion and schema gates.
//!
//! A connection's conversion rules rewrite the outgoing property bag per
//! destination (moving values into nested array paths, setting fixed
//! values, renaming the message) while the sender's own copy stays
//! untouched. Schema predicates attached by an addon reject property
//! writes at the extension boundary.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::{AddonRegistry, ExtensionAddon};
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::{EnvHandle, Extension};
use weft_runtime_core::msg::{Cmd, CmdResult, StatusCode};
use weft_runtime_core::{Error, Schema};

const CONVERSION_GRAPH: &str = r#"{
    "nodes": [
        {"type": "extension", "name": "S", "addon": "sender"},
        {"type": "extension", "name": "T", "addon": "inspector"}
    ],
    "connections": [
        {"extension": "S",
         "cmd": [{"name": "alpha", "dest": [{
            "extension": "T",
            "msg_conversion": {
                "keep_original": false,
                "rules": [
                    {"path": "name", "conversion_mode": "fixed_value", "value": "beta"},
                    {"path": "moved[3][4].c", "conversion_mode": "from_original",
                     "original_path": "orig"},
                    {"path": "tag", "conversion_mode": "fixed_value", "value": 7}
                ]
            }
         }]}]}
    ]
}"#;

/// Sends `alpha` with a payload and reports what came back.
struct Sender;

impl Extension for Sender {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        let original = cmd;
        let mut alpha = Cmd::new("alpha");
        alpha.set_property("orig", "byte-identical").unwrap();
        alpha.set_property("stale", true).unwrap();
        env.send_cmd(alpha, move |env, result| {
            let mut up = CmdResult::from_cmd(result.status_code(), &original);
            if let Some(detail) = result.detail() {
                up.set_property("detail", detail).unwrap();
            }
            env.return_result(up, &original).unwrap();
        })
        .unwrap();
    }
}

/// Reports the converted message it observed.
struct Inspector;

impl Extension for Inspector {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        let moved = cmd
            .get_property("moved[3][4].c")
            .unwrap()
            .map(|v| v.get_str().unwrap().to_string())
            .unwrap_or_default();
        let tag = cmd
            .get_property("tag")
            .unwrap()
            .map(|v| v.get_i64().unwrap())
            .unwrap_or(-1);
        let stale_dropped = cmd.get_property("stale").unwrap().is_none();
        let filler_is_null = cmd
            .get_property("moved[3][0]")
            .unwrap()
            .map(|v| v.is_null())
            .unwrap_or(false);

        let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        result
            .set_property(
                "detail",
                format!(
                    "name={};moved={moved};tag={tag};stale_dropped={stale_dropped};filler_null={filler_is_null}",
                    cmd.name()
                ),
            )
            .unwrap();
        env.return_result(result, &cmd).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn conversion_rules_rewrite_per_destination() {
    let mut addons = AddonRegistry::new();
    addons.register_fn("sender", || Box::new(Sender));
    addons.register_fn("inspector", || Box::new(Inspector));

    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(CONVERSION_GRAPH).await.unwrap();

    let result = client
        .send_cmd_and_wait(&graph_id, "S", Cmd::new("go"))
        .await
        .unwrap();
    assert_eq!(result.status_code(), StatusCode::Ok);
    assert_eq!(
        result.detail().as_deref(),
        Some("name=beta;moved=byte-identical;tag=7;stale_dropped=true;filler_null=true")
    );

    client.close_app().await.unwrap();
    join.await.unwrap();
}

/// Addon whose schema rejects non-integer writes to `count`.
struct CountedAddon;

impl ExtensionAddon for CountedAddon {
    fn create_instance(&self) -> Box<dyn Extension> {
        Box::new(Counted)
    }

    fn schema(&self) -> Schema {
        Schema::default().with_property_check(|path, value| {
            if path == "count" && value.get_i64().is_err() {
                return Err(Error::SchemaViolation("count must be an integer".into()));
            }
            Ok(())
        })
    }
}

struct Counted;

impl Extension for Counted {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        let accepted = env.set_property("count", 41i64).is_ok();
        let rejected = matches!(
            env.set_property("count", "forty-two"),
            Err(Error::SchemaViolation(_))
        );
        // The failed write left the previous value in place.
        let kept = env
            .get_property("count")
            .unwrap()
            .map(|v| v.get_i64().unwrap())
            .unwrap_or(-1);

        // The app store is readable through the `app:` prefix but not
        // writable from extension scope.
        let app_uri_visible = env
            .get_property("app:uri")
            .unwrap()
            .map(|v| v.get_str().unwrap() == env.app_uri())
            .unwrap_or(false);
        let app_write_refused = env.set_property("app:uri", "hijack").is_err();

        let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        result
            .set_property(
                "detail",
                format!(
                    "accepted={accepted};rejected={rejected};kept={kept};app_uri_visible={app_uri_visible};app_write_refused={app_write_refused}"
                ),
            )
            .unwrap();
        env.return_result(result, &cmd).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_predicate_gates_property_writes() {
    let mut addons = AddonRegistry::new();
    addons.register("counted", Arc::new(CountedAddon));

    let graph = r#"{
        "nodes": [
            {"type": "extension", "name": "C", "addon": "counted"}
        ],
        "connections": []
    }"#;

    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(graph).await.unwrap();

    let result = client
        .send_cmd_and_wait(&graph_id, "C", Cmd::new("poke"))
        .await
        .unwrap();
    assert_eq!(result.status_code(), StatusCode::Ok);
    assert_eq!(
        result.detail().as_deref(),
        Some("accepted=true;rejected=true;kept=41;app_uri_visible=true;app_write_refused=true")
    );

    client.close_app().await.unwrap();
    join.await.unwrap();
}
