//! Timer subsystem: cmd_timer fires cmd_timeout back at the sender.
//!
//! Arming a timer answers the timer command with OK, then delivers
//! `times` timeout commands with the same timer id at the requested
//! period, and self-disables afterwards.

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::{EnvHandle, Extension};
use weft_runtime_core::msg::{Cmd, CmdResult, MsgKind, Payload, StatusCode};

const GRAPH: &str = r#"{
    "nodes": [
        {"type": "extension", "name": "clock", "addon": "clock"}
    ],
    "connections": []
}"#;

const TIMER_ID: u32 = 42;
const TIMES: u32 = 3;

struct Clock {
    fired: u32,
    armed_ack: bool,
    original: Option<Cmd>,
}

impl Extension for Clock {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        match cmd.kind() {
            MsgKind::CmdTimeout => {
                let timer_id = match cmd.payload() {
                    Payload::Timeout { timer_id } => *timer_id,
                    _ => panic!("timeout without payload"),
                };
                assert_eq!(timer_id, TIMER_ID);
                self.fired += 1;
                if self.fired == TIMES {
                    if let Some(original) = self.original.take() {
                        let mut up = CmdResult::from_cmd(StatusCode::Ok, &original);
                        up.set_property("fired", self.fired as i64).unwrap();
                        up.set_property("armed_ack", self.armed_ack).unwrap();
                        env.return_result(up, &original).unwrap();
                    }
                }
            }
            _ => match cmd.name() {
                "arm" => {
                    env.send_cmd(
                        Cmd::timer(TIMER_ID, 100_000, TIMES),
                        |env_inner, result| {
                            assert_eq!(result.status_code(), StatusCode::Ok);
                            env_inner.set_property("armed", true).unwrap();
                        },
                    )
                    .unwrap();
                    self.armed_ack = true;
                    self.original = Some(cmd);
                }
                "count" => {
                    let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
                    result.set_property("fired", self.fired as i64).unwrap();
                    env.return_result(result, &cmd).unwrap();
                }
                other => panic!("unexpected command {other}"),
            },
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn timer_fires_the_requested_number_of_times() {
    let mut addons = AddonRegistry::new();
    addons.register_fn("clock", || {
        Box::new(Clock {
            fired: 0,
            armed_ack: false,
            original: None,
        })
    });

    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(GRAPH).await.unwrap();

    // Three firings at 100ms; the result arrives on the third.
    client.send_cmd(&graph_id, "clock", Cmd::new("arm")).await.unwrap();
    let result = client
        .recv_result_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result.status_code(), StatusCode::Ok);
    assert_eq!(
        result.get_property("fired").unwrap().unwrap().get_i64().unwrap(),
        TIMES as i64
    );

    // Self-disables: no further timeouts after the configured count.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let count = client
        .send_cmd_and_wait(&graph_id, "clock", Cmd::new("count"))
        .await
        .unwrap();
    assert_eq!(
        count.get_property("fired").unwrap().unwrap().get_i64().unwrap(),
        TIMES as i64
    );

    client.close_app().await.unwrap();
    join.await.unwrap();
}
