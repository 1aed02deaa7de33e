//! Cyclic graph command routing.
//!
//! A -> B -> C -> D -> B is a cycle: B keeps forwarding until it has
//! been visited `limit + 1` times, then answers with the accumulated
//! total. Every hop chains its result handler backwards, so the final
//! total surfaces at the client. Dispatch is queue-trampolined, which
//! is what keeps the larger round count from growing the stack.

#[path = "../common/mod.rs"]
mod common;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::{EnvHandle, Extension};
use weft_runtime_core::msg::{Cmd, CmdResult, StatusCode};

fn loop_graph(limit: u32) -> String {
    format!(
        r#"{{
        "nodes": [
            {{"type": "extension", "name": "A", "addon": "sum_node",
             "property": {{"value": 0}}}},
            {{"type": "extension", "name": "B", "addon": "sum_node",
             "property": {{"value": 1, "limit": {limit}}}}},
            {{"type": "extension", "name": "C", "addon": "sum_node",
             "property": {{"value": 2}}}},
            {{"type": "extension", "name": "D", "addon": "sum_node",
             "property": {{"value": 3}}}}
        ],
        "connections": [
            {{"extension": "A", "cmd": [{{"name": "sum", "dest": [{{"extension": "B"}}]}}]}},
            {{"extension": "B", "cmd": [{{"name": "sum", "dest": [{{"extension": "C"}}]}}]}},
            {{"extension": "C", "cmd": [{{"name": "sum", "dest": [{{"extension": "D"}}]}}]}},
            {{"extension": "D", "cmd": [{{"name": "sum", "dest": [{{"extension": "B"}}]}}]}}
        ]
    }}"#
    )
}

/// Adds its configured `value` to the running total and forwards; a node
/// with a `limit` terminates the cycle once it has seen the command
/// `limit + 1` times.
struct SumNode {
    visits: u32,
}

impl Extension for SumNode {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        assert_eq!(cmd.name(), "sum");
        self.visits += 1;

        let limit = env
            .get_property("limit")
            .unwrap()
            .map(|v| v.get_u32().unwrap());
        let total = cmd
            .get_property("total")
            .unwrap()
            .map(|v| v.get_i64().unwrap())
            .unwrap_or(0);

        if let Some(limit) = limit {
            if self.visits > limit {
                let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
                result.set_property("total", total).unwrap();
                env.return_result(result, &cmd).unwrap();
                return;
            }
        }

        let value = env
            .get_property("value")
            .unwrap()
            .map(|v| v.get_i64().unwrap())
            .unwrap_or(0);
        let mut fwd = Cmd::new("sum");
        fwd.set_property("total", total + value).unwrap();

        let original = cmd;
        env.send_cmd(fwd, move |env, result| {
            let mut up = CmdResult::from_cmd(result.status_code(), &original);
            if let Ok(Some(total)) = result.get_property("total") {
                up.set_property("total", total.get_i64().unwrap()).unwrap();
            }
            env.return_result(up, &original).unwrap();
        })
        .unwrap();
    }
}

fn addons() -> AddonRegistry {
    let mut addons = AddonRegistry::new();
    addons.register_fn("sum_node", || Box::new(SumNode { visits: 0 }));
    addons
}

async fn run_loop(limit: u32) -> i64 {
    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons()).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(&loop_graph(limit)).await.unwrap();

    let result = client
        .send_cmd_and_wait(&graph_id, "A", Cmd::new("sum"))
        .await
        .unwrap();
    assert_eq!(result.status_code(), StatusCode::Ok);
    let total = result
        .get_property("total")
        .unwrap()
        .unwrap()
        .get_i64()
        .unwrap();

    client.close_app().await.unwrap();
    join.await.unwrap();
    total
}

#[tokio::test(flavor = "multi_thread")]
async fn cycle_accumulates_two_rounds() {
    // B, C, D each contribute twice: (1 + 2 + 3) * 2.
    assert_eq!(run_loop(2).await, 12);
}

#[tokio::test(flavor = "multi_thread")]
async fn deep_cycle_does_not_recurse_on_the_stack() {
    // Hundreds of same-thread hops; inline dispatch would stack these.
    assert_eq!(run_loop(150).await, (1 + 2 + 3) * 150);
}
