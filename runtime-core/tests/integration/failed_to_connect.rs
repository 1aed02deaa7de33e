//! start_graph with an unreachable remote participant.
//!
//! The predefined graph anchors one node on an app that is not
//! listening; starting it must fail with a ConnectionFailed detail that
//! names the remote URI, and nothing may be left running locally.

#[path = "../common/mod.rs"]
mod common;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::Extension;
use weft_runtime_core::msg::{Cmd, StatusCode};

struct Noop;
impl Extension for Noop {}

#[tokio::test(flavor = "multi_thread")]
async fn start_graph_reports_the_unreachable_remote() {
    let dead_uri = common::test_uri(); // allocated but nobody listens

    let mut addons = AddonRegistry::new();
    addons.register_fn("noop", || Box::new(Noop));

    let mut config = AppConfig::new(common::test_uri());
    let predefined = format!(
        r#"{{
        "uri": "{uri}",
        "predefined_graphs": [
            {{
                "name": "with_remote",
                "nodes": [
                    {{"type": "extension", "name": "local_node", "addon": "noop"}},
                    {{"type": "extension", "name": "remote_node", "addon": "noop",
                     "app": "{dead_uri}"}}
                ]
            }}
        ]
    }}"#,
        uri = config.uri,
    );
    config = AppConfig::from_json(&predefined).unwrap();
    let uri = config.uri.clone();
    let (_handle, join) = common::spawn_app(config, addons).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let result = client.start_predefined_graph("with_remote").await.unwrap();

    assert_eq!(result.status_code(), StatusCode::Error);
    let detail = result.detail().unwrap();
    assert!(
        detail.contains(&format!("Failed to connect to {dead_uri}")),
        "unexpected detail: {detail}"
    );

    // The failed start left nothing behind: the same name can be tried
    // again and fails the same way instead of reporting "already
    // running".
    let retry = client.start_predefined_graph("with_remote").await.unwrap();
    assert_eq!(retry.status_code(), StatusCode::Error);
    assert!(retry.detail().unwrap().contains("Failed to connect to"));

    // A command addressed at the never-started graph finds no engine.
    let probe = client
        .send_cmd_and_wait("with_remote", "local_node", Cmd::new("ping"))
        .await
        .unwrap();
    assert_eq!(probe.status_code(), StatusCode::Error);

    client.close_app().await.unwrap();
    join.await.unwrap();
}
