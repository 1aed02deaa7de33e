//! Basic command round trip through a two-extension graph.
//!
//! A client sends `hello_world` to extension A; the graph routes it to
//! extension B, which answers OK with `detail = "hello, too"`. The
//! result walks back through A to the client with the original seq id
//! and nobody else's handler involved.

#[path = "../common/mod.rs"]
mod common;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::msg::{Cmd, CmdResult, StatusCode};
use weft_runtime_core::extension::{EnvHandle, Extension};

const GRAPH: &str = r#"{
    "nodes": [
        {"type": "extension", "name": "A", "addon": "forwarder"},
        {"type": "extension", "name": "B", "addon": "greeter"}
    ],
    "connections": [
        {"extension": "A",
         "cmd": [{"name": "hello_world", "dest": [{"extension": "B"}]}]}
    ]
}"#;

/// Forwards `hello_world` downstream and chains the result back up.
struct Forwarder;

impl Extension for Forwarder {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        let original = cmd;
        let fwd = Cmd::new("hello_world");
        env.send_cmd(fwd, move |env, result| {
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
        assert_eq!(cmd.name(), "hello_world");
        let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        result.set_property("detail", "hello, too").unwrap();
        env.return_result(result, &cmd).unwrap();
    }
}

fn addons() -> AddonRegistry {
    let mut addons = AddonRegistry::new();
    addons.register_fn("forwarder", || Box::new(Forwarder));
    addons.register_fn("greeter", || Box::new(Greeter));
    addons
}

#[tokio::test(flavor = "multi_thread")]
async fn hello_world_round_trip() {
    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons()).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(GRAPH).await.unwrap();
    assert!(!graph_id.is_empty());

    let mut cmd = Cmd::new("hello_world");
    cmd.set_seq_id("seq-7").unwrap();
    let result = client
        .send_cmd_and_wait(&graph_id, "A", cmd)
        .await
        .unwrap();

    assert_eq!(result.status_code(), StatusCode::Ok);
    assert_eq!(result.detail().as_deref(), Some("hello, too"));
    // Client correlation is preserved across both hops.
    assert_eq!(result.seq_id(), "seq-7");
    assert!(result.is_final());
    assert!(result.is_completed());

    client.close_app().await.unwrap();
    join.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn second_command_reuses_the_migrated_connection() {
    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons()).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(GRAPH).await.unwrap();

    for _ in 0..3 {
        let result = client
            .send_cmd_and_wait(&graph_id, "A", Cmd::new("hello_world"))
            .await
            .unwrap();
        assert_eq!(result.status_code(), StatusCode::Ok);
        assert_eq!(result.detail().as_deref(), Some("hello, too"));
    }

    client.close_app().await.unwrap();
    join.await.unwrap();
}
