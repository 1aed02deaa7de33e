//! Streaming results: non-final intermediates keep the path alive.
//!
//! The receiver answers one command with two non-final results and a
//! final one; the sender's handler fires three times and the path entry
//! is released exactly on the final. A fourth result attempted after
//! the final is dropped, and a fresh command starts a clean chain.

#[path = "../common/mod.rs"]
mod common;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::{EnvHandle, Extension};
use weft_runtime_core::msg::{Cmd, CmdResult, StatusCode};

const GRAPH: &str = r#"{
    "nodes": [
        {"type": "extension", "name": "A", "addon": "stream_sender"},
        {"type": "extension", "name": "B", "addon": "stream_responder"}
    ],
    "connections": [
        {"extension": "A",
         "cmd": [{"name": "stream", "dest": [{"extension": "B"}]}]}
    ]
}"#;

/// Issues `stream` downstream and records the finality pattern.
struct StreamSender;

impl Extension for StreamSender {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        assert_eq!(cmd.name(), "run");
        let original = cmd;
        let mut pattern = String::new();
        env.send_cmd(Cmd::new("stream"), move |env, result| {
            pattern.push(if result.is_final() { 'F' } else { 'i' });
            pattern.push(if result.is_completed() { '!' } else { '.' });
            if result.is_final() {
                let mut up = CmdResult::from_cmd(StatusCode::Ok, &original);
                up.set_property("pattern", pattern.clone()).unwrap();
                env.return_result(up, &original).unwrap();
            }
        })
        .unwrap();
    }
}

/// Answers with two streaming intermediates, a final, and one bogus
/// post-final result that the runtime must drop.
struct StreamResponder;

impl Extension for StreamResponder {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        for _ in 0..2 {
            let mut intermediate = CmdResult::from_cmd(StatusCode::Ok, &cmd);
            intermediate.set_final(false).unwrap();
            env.return_result(intermediate, &cmd).unwrap();
        }
        let final_result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        env.return_result(final_result, &cmd).unwrap();

        // The path entry is gone; this never reaches the sender.
        let mut late = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        late.set_final(false).unwrap();
        env.return_result(late, &cmd).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_chain_fires_once_per_result() {
    let mut addons = AddonRegistry::new();
    addons.register_fn("stream_sender", || Box::new(StreamSender));
    addons.register_fn("stream_responder", || Box::new(StreamResponder));

    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(GRAPH).await.unwrap();

    for _ in 0..2 {
        let result = client
            .send_cmd_and_wait(&graph_id, "A", Cmd::new("run"))
            .await
            .unwrap();
        assert_eq!(result.status_code(), StatusCode::Ok);
        // Two intermediates without completion, then the completed final.
        assert_eq!(
            result.get_property("pattern").unwrap().unwrap().get_str().unwrap(),
            "i.i.F!"
        );
    }

    client.close_app().await.unwrap();
    join.await.unwrap();
}
