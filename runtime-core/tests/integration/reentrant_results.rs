//! Same-thread re-entrancy in the path table.
//!
//! Sender and receiver share one extension group (one thread). The
//! receiver answers synchronously inside its handler; the sender's
//! result handler then returns a result for a *different* originating
//! command. Each path entry must complete against its own counters and
//! none may leak, which the second round proves.

#[path = "../common/mod.rs"]
mod common;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::{EnvHandle, Extension};
use weft_runtime_core::msg::{Cmd, CmdResult, StatusCode};

const GRAPH: &str = r#"{
    "nodes": [
        {"type": "extension", "name": "P", "addon": "pinger",
         "extension_group": "shared"},
        {"type": "extension", "name": "Q", "addon": "ponger",
         "extension_group": "shared"}
    ],
    "connections": [
        {"extension": "P",
         "cmd": [{"name": "ping", "dest": [{"extension": "Q"}]}]}
    ]
}"#;

/// On `kick`, issues `ping` to its same-thread peer; the ping's result
/// handler resolves the original `kick` command.
struct Pinger;

impl Extension for Pinger {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        assert_eq!(cmd.name(), "kick");
        let original = cmd;
        env.send_cmd(Cmd::new("ping"), move |env, result| {
            assert!(result.is_final());
            assert!(result.is_completed());
            let mut up = CmdResult::from_cmd(StatusCode::Ok, &original);
            let pong = result.detail().unwrap_or_default();
            up.set_property("detail", format!("kicked:{pong}")).unwrap();
            env.return_result(up, &original).unwrap();
        })
        .unwrap();
    }
}

/// Answers synchronously from inside its handler.
struct Ponger {
    hits: u64,
}

impl Extension for Ponger {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        self.hits += 1;
        let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        result
            .set_property("detail", format!("pong-{}", self.hits))
            .unwrap();
        env.return_result(result, &cmd).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reentrant_returns_complete_their_own_entries() {
    let mut addons = AddonRegistry::new();
    addons.register_fn("pinger", || Box::new(Pinger));
    addons.register_fn("ponger", || Box::new(Ponger { hits: 0 }));

    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(GRAPH).await.unwrap();

    // Two rounds: a leaked or cross-wired path entry would break the
    // second one.
    for round in 1..=2 {
        let result = client
            .send_cmd_and_wait(&graph_id, "P", Cmd::new("kick"))
            .await
            .unwrap();
        assert_eq!(result.status_code(), StatusCode::Ok);
        assert_eq!(
            result.detail().as_deref(),
            Some(format!("kicked:pong-{round}").as_str())
        );
        assert!(result.is_completed());
    }

    client.close_app().await.unwrap();
    join.await.unwrap();
}
