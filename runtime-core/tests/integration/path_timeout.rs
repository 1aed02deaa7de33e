//! Path timeout: commands without a reply are flushed by the sweep.
//!
//! The graph routes `hello_world` to a sink that never answers. With
//! `path_check_interval = 1s` and `path_timeout = 2s`, the sender's
//! handler fires exactly once with a PathTimeout error result within a
//! few seconds, and the entry is gone afterwards.

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::{EnvHandle, Extension};
use weft_runtime_core::msg::{Cmd, CmdResult, StatusCode};
use weft_runtime_core::ErrorKind;

const GRAPH: &str = r#"{
    "nodes": [
        {"type": "extension", "name": "issuer", "addon": "issuer"},
        {"type": "extension", "name": "sink", "addon": "silent_sink"}
    ],
    "connections": [
        {"extension": "issuer",
         "cmd": [{"name": "hello_world", "dest": [{"extension": "sink"}]}]}
    ]
}"#;

/// Issues the doomed command and reports what its handler saw. Handler
/// firings are counted in the property store so the test can assert the
/// flush happened exactly once.
struct Issuer;

impl Extension for Issuer {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        match cmd.name() {
            "go" => {
                let original = cmd;
                env.send_cmd(Cmd::new("hello_world"), move |env, result| {
                    let hits = env
                        .get_property("timeout_hits")
                        .unwrap()
                        .map(|v| v.get_i64().unwrap())
                        .unwrap_or(0);
                    env.set_property("timeout_hits", hits + 1).unwrap();

                    let mut up = CmdResult::from_cmd(result.status_code(), &original);
                    if let Some(detail) = result.detail() {
                        up.set_property("detail", detail).unwrap();
                    }
                    if let Some(code) = result.error_code() {
                        up.set_property("code", code).unwrap();
                    }
                    up.set_property("completed", result.is_completed()).unwrap();
                    env.return_result(up, &original).unwrap();
                })
                .unwrap();
            }
            "hits" => {
                let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
                result
                    .set_property(
                        "hits",
                        env.get_property("timeout_hits")
                            .unwrap()
                            .map(|v| v.get_i64().unwrap())
                            .unwrap_or(0),
                    )
                    .unwrap();
                env.return_result(result, &cmd).unwrap();
            }
            other => panic!("unexpected command {other}"),
        }
    }
}

/// Swallows every command without answering.
struct SilentSink;

impl Extension for SilentSink {
    fn on_cmd(&mut self, _env: &mut EnvHandle<'_>, _cmd: Cmd) {}
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_command_times_out_once() {
    let mut addons = AddonRegistry::new();
    addons.register_fn("issuer", || Box::new(Issuer));
    addons.register_fn("silent_sink", || Box::new(SilentSink));

    let mut config = AppConfig::new(common::test_uri());
    config.path_check_interval = 1_000_000;
    config.path_timeout = 2_000_000;
    let uri = config.uri.clone();
    let (_handle, join) = common::spawn_app(config, addons).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(GRAPH).await.unwrap();

    let started = std::time::Instant::now();
    client.send_cmd(&graph_id, "issuer", Cmd::new("go")).await.unwrap();
    let result = client
        .recv_result_timeout(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.status_code(), StatusCode::Error);
    assert_eq!(result.detail().as_deref(), Some("Path timeout."));
    assert_eq!(
        result.get_property("code").unwrap().unwrap().get_i64().unwrap(),
        ErrorKind::PathTimeout.code() as i64
    );
    assert!(result.get_property("completed").unwrap().unwrap().get_bool().unwrap());
    // One sweep interval of slack on top of the configured timeout.
    assert!(started.elapsed() <= Duration::from_secs(4));

    // No second firing after further sweeps: the entry was reclaimed.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let hits = client
        .send_cmd_and_wait(&graph_id, "issuer", Cmd::new("hits"))
        .await
        .unwrap();
    assert_eq!(
        hits.get_property("hits").unwrap().unwrap().get_i64().unwrap(),
        1
    );

    client.close_app().await.unwrap();
    join.await.unwrap();
}
