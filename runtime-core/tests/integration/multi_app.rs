//! Two apps, one graph.
//!
//! start_graph partitions the nodes by hosting app and forwards the
//! definition to the remote participant; the command then crosses the
//! wire A -> B and its result walks the inverse path back to the
//! client. Stopping the graph on the originator leaves the remote app
//! alive for the next round.

#[path = "../common/mod.rs"]
mod common;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::{EnvHandle, Extension};
use weft_runtime_core::msg::{Cmd, CmdResult, StatusCode};

struct Forwarder;

impl Extension for Forwarder {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        let original = cmd;
        env.send_cmd(Cmd::new("hello_world"), move |env, result| {
            let mut up = CmdResult::from_cmd(result.status_code(), &original);
            if let Some(detail) = result.detail() {
                up.set_property("detail", detail).unwrap();
            }
            env.return_result(up, &original).unwrap();
        })
        .unwrap();
    }
}

struct Greeter;

impl Extension for Greeter {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        result
            .set_property("detail", format!("hello from {}", env.app_uri()))
            .unwrap();
        env.return_result(result, &cmd).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn command_crosses_apps_and_returns() {
    let uri_a = common::test_uri();
    let uri_b = common::test_uri();

    let mut addons_a = AddonRegistry::new();
    addons_a.register_fn("forwarder", || Box::new(Forwarder));
    let mut config_a = AppConfig::new(uri_a.clone());
    config_a.long_running_mode = true;
    let (handle_a, join_a) = common::spawn_app(config_a, addons_a).await;

    let mut addons_b = AddonRegistry::new();
    addons_b.register_fn("greeter", || Box::new(Greeter));
    let mut config_b = AppConfig::new(uri_b.clone());
    config_b.long_running_mode = true;
    let (handle_b, join_b) = common::spawn_app(config_b, addons_b).await;

    let graph = format!(
        r#"{{
        "nodes": [
            {{"type": "extension", "name": "A", "addon": "forwarder",
             "app": "{uri_a}"}},
            {{"type": "extension", "name": "B", "addon": "greeter",
             "app": "{uri_b}"}}
        ],
        "connections": [
            {{"app": "{uri_a}", "extension": "A",
             "cmd": [{{"name": "hello_world",
                      "dest": [{{"app": "{uri_b}", "extension": "B"}}]}}]}}
        ]
    }}"#
    );

    let mut client = MsgpackClient::connect(&uri_a).await.unwrap();
    let (_, graph_id) = client.start_graph(&graph).await.unwrap();

    let result = client
        .send_cmd_and_wait(&graph_id, "A", Cmd::new("hello_world"))
        .await
        .unwrap();
    assert_eq!(result.status_code(), StatusCode::Ok);
    assert_eq!(
        result.detail().as_deref(),
        Some(format!("hello from {uri_b}").as_str())
    );

    // The remote engine was started under the same graph id.
    let stop = client.stop_graph(&graph_id).await.unwrap();
    assert_eq!(stop.status_code(), StatusCode::Ok);

    handle_a.close();
    handle_b.close();
    join_a.await.unwrap();
    join_b.await.unwrap();
}
