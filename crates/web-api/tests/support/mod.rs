use std::net::SocketAddr;
use std::time::Duration;

use config::AppConfig;
use infrastructure::Infrastructure;
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use web_api::{router as build_router_fn, AppState};

pub struct TestServer {
    pub addr: SocketAddr,
    pub infrastructure: Infrastructure,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn ws_url(&self, session_id: &str, user_id: uuid::Uuid, username: &str) -> String {
        format!(
            "ws://{}/ws?session_id={}&user_id={}&username={}",
            self.addr, session_id, user_id, username
        )
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub fn build_state(config: &AppConfig) -> (Infrastructure, AppState) {
    let infrastructure = Infrastructure::build(config);
    let state = AppState::new(&infrastructure);
    (infrastructure, state)
}

pub async fn spawn_server(config: AppConfig) -> TestServer {
    let (infrastructure, state) = build_state(&config);
    infrastructure
        .router
        .start_processing()
        .expect("start router");

    let router = build_router_fn(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    // allow server to start
    sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        infrastructure,
        shutdown: Some(shutdown_tx),
    }
}
