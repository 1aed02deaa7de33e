//! Env proxy: outer threads reaching back into an extension.
//!
//! `notify` closures run on the extension thread in order; lock mode
//! lets an outer thread push a burst that is processed as one atomic
//! FIFO sequence; dropping the proxy releases the run loop.

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use weft_msgpack::MsgpackClient;
use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::AppConfig;
use weft_runtime_core::extension::{EnvHandle, Extension};
use weft_runtime_core::msg::{Cmd, CmdResult, StatusCode};

const GRAPH: &str = r#"{
    "nodes": [
        {"type": "extension", "name": "worker", "addon": "proxy_worker"}
    ],
    "connections": []
}"#;

/// Offloads onto a user thread that reports back through a proxy.
struct ProxyWorker;

impl Extension for ProxyWorker {
    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        assert_eq!(cmd.name(), "offload");
        let mut proxy = env.proxy();
        let original = cmd;
        std::thread::spawn(move || {
            // Plain notifications append in order.
            for step in ["a", "b"] {
                proxy
                    .notify(move |env| append_trace(env, step))
                    .expect("notify");
            }

            // A locked burst is atomic with respect to everything else
            // the extension thread might process.
            proxy.acquire_lock_mode().expect("acquire lock mode");
            for step in ["c1", "c2", "c3"] {
                proxy
                    .notify(move |env| append_trace(env, step))
                    .expect("notify in lock mode");
            }
            proxy.release_lock_mode().expect("release lock mode");

            proxy
                .notify(move |env| {
                    let trace = env
                        .get_property("trace")
                        .unwrap()
                        .map(|v| v.get_str().unwrap().to_string())
                        .unwrap_or_default();
                    let mut result = CmdResult::from_cmd(StatusCode::Ok, &original);
                    result.set_property("trace", trace).unwrap();
                    env.return_result(result, &original).unwrap();
                })
                .expect("final notify");
            proxy.close();
        });
    }
}

fn append_trace(env: &mut EnvHandle<'_>, step: &str) {
    let mut trace = env
        .get_property("trace")
        .unwrap()
        .map(|v| v.get_str().unwrap().to_string())
        .unwrap_or_default();
    if !trace.is_empty() {
        trace.push(',');
    }
    trace.push_str(step);
    env.set_property("trace", trace).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn notifications_run_on_the_extension_thread_in_order() {
    let mut addons = AddonRegistry::new();
    addons.register_fn("proxy_worker", || Box::new(ProxyWorker));

    let uri = common::test_uri();
    let (_handle, join) = common::spawn_app(AppConfig::new(uri.clone()), addons).await;

    let mut client = MsgpackClient::connect(&uri).await.unwrap();
    let (_, graph_id) = client.start_graph(GRAPH).await.unwrap();

    client
        .send_cmd(&graph_id, "worker", Cmd::new("offload"))
        .await
        .unwrap();
    let result = client
        .recv_result_timeout(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.status_code(), StatusCode::Ok);
    assert_eq!(
        result.get_property("trace").unwrap().unwrap().get_str().unwrap(),
        "a,b,c1,c2,c3"
    );

    // The proxy was closed; the app can shut down cleanly, meaning the
    // group loop was not left waiting on a leaked proxy.
    client.close_app().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), join)
        .await
        .expect("app drained despite proxies")
        .unwrap();
}
