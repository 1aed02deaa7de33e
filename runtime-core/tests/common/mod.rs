//! Shared helpers for the integration suites

use std::time::Duration;

use weft_runtime_core::addon::AddonRegistry;
use weft_runtime_core::app::{App, AppConfig, AppHandle};

/// Grab a free localhost port from the OS.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe socket");
    listener.local_addr().expect("probe addr").port()
}

pub fn test_uri() -> String {
    format!("msgpack://127.0.0.1:{}/", free_port())
}

/// Boot an app on the current runtime and wait until it accepts
/// connections.
pub async fn spawn_app(
    config: AppConfig,
    addons: AddonRegistry,
) -> (AppHandle, tokio::task::JoinHandle<()>) {
    weft_runtime_core::init();
    let uri = config.uri.clone();
    let app = App::new(config, addons, weft_msgpack::codec_registry()).expect("app construction");
    let handle = app.handle();
    let join = tokio::spawn(async move {
        if let Err(e) = app.run().await {
            panic!("app exited with error: {e}");
        }
    });
    wait_listening(&uri).await;
    (handle, join)
}

/// Poll until the app's listener is up.
pub async fn wait_listening(uri: &str) {
    let (host, port) = weft_runtime_core::transport::uri_host_port(uri).expect("app uri");
    for _ in 0..200 {
        if tokio::net::TcpStream::connect((host.as_str(), port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("app at {uri} never started listening");
}
