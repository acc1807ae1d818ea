use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use simple_logger::SimpleLogger;
use tokio::runtime::Builder as RuntimeBuilder;
use tokio::signal;

use volley_core::app::{AppConfig, Application};

use crate::config::{ServerConfig, ServerSection};
use crate::service::VolleyAxumService;

/// Listener settings for [`AxumServer`].
#[derive(Clone, Debug)]
pub struct AxumServerConfig {
    pub addr: SocketAddr,
    pub enable_ctrl_c: bool,
}

impl Default for AxumServerConfig {
    fn default() -> Self {
        ServerSection::default().into()
    }
}

impl From<ServerSection> for AxumServerConfig {
    fn from(section: ServerSection) -> Self {
        Self {
            addr: section.addr,
            enable_ctrl_c: section.enable_ctrl_c,
        }
    }
}

/// Blocking HTTP server that hosts one application.
pub struct AxumServer {
    app: Arc<Application>,
    config: AxumServerConfig,
}

impl AxumServer {
    pub fn new(app: Application) -> Self {
        Self::with_config(app, AxumServerConfig::default())
    }

    pub fn with_config(app: Application, config: AxumServerConfig) -> Self {
        Self {
            app: Arc::new(app),
            config,
        }
    }

    pub fn config(&self) -> &AxumServerConfig {
        &self.config
    }

    pub fn run(self) -> anyhow::Result<()> {
        let runtime = RuntimeBuilder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        runtime.block_on(async move { self.run_async().await })
    }

    async fn run_async(self) -> anyhow::Result<()> {
        let listener = StdTcpListener::bind(self.config.addr)
            .with_context(|| format!("failed to bind server to {}", self.config.addr))?;
        listener
            .set_nonblocking(true)
            .context("failed to set listener to non-blocking")?;

        let listener = tokio::net::TcpListener::from_std(listener)
            .context("failed to adopt std listener into tokio")?;

        self.run_with_listener(listener).await
    }

    /// Serve on an already bound listener until ctrl-c (when enabled) or an I/O failure.
    pub async fn run_with_listener(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let AxumServer { app, config } = self;
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("volley listening on http://{} origin={}", addr, app.origin());
        }
        serve_with_listener(app, listener, config.enable_ctrl_c).await
    }
}

async fn serve_with_listener(
    app: Arc<Application>,
    listener: tokio::net::TcpListener,
    enable_ctrl_c: bool,
) -> anyhow::Result<()> {
    let service = VolleyAxumService::from_arc(app);
    let router = Router::new().fallback_service(service);
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

    let server = axum::serve(listener, make_service);
    if enable_ctrl_c {
        let shutdown = async {
            let _ = signal::ctrl_c().await;
        };
        server
            .with_graceful_shutdown(shutdown)
            .await
            .context("axum server error")?;
    } else {
        server.await.context("axum server error")?;
    }

    Ok(())
}

/// Load `config_src`, overlay the process environment, install the logger, build the
/// application and serve it.
pub fn run_app<F>(config_src: &str, build: F) -> anyhow::Result<()>
where
    F: FnOnce(AppConfig) -> Application,
{
    let mut config = ServerConfig::load_from_str(config_src).context("invalid server config")?;
    config
        .apply_process_env()
        .context("invalid environment override")?;

    SimpleLogger::new()
        .with_level(config.logging.filter())
        .init()
        .ok();

    let ServerConfig { server, app, .. } = config;
    let application = build(app);
    AxumServer::with_config(application, server.into()).run()
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::time::{Duration, Instant};
    use volley_core::context::Context as VolleyContext;
    use volley_core::middleware::handler_fn;

    struct TestServer {
        base_url: String,
        handle: tokio::task::JoinHandle<()>,
    }

    async fn start_test_server(app: Application) -> TestServer {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let config = AxumServerConfig {
            addr,
            enable_ctrl_c: false,
        };
        let server = AxumServer::with_config(app, config);

        let handle = tokio::spawn(async move {
            let _ = server.run_with_listener(listener).await;
        });

        TestServer {
            base_url: format!("http://{}", addr),
            handle,
        }
    }

    async fn send_with_retry<F>(
        client: &reqwest::Client,
        mut make_request: F,
    ) -> reqwest::Response
    where
        F: FnMut(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let start = Instant::now();
        let timeout = Duration::from_secs(2);

        loop {
            match make_request(client).send().await {
                Ok(response) => return response,
                Err(err) => {
                    if start.elapsed() >= timeout {
                        panic!("server did not respond before timeout: {}", err);
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_responds_to_requests() {
        let mut app = Application::new();
        app.use_middleware(handler_fn(|ctx: &mut VolleyContext| {
            ctx.response_mut().set_content_type("text/plain");
            ctx.response_mut().set_body("hello from volley");
            Ok(())
        }));
        let server = start_test_server(app).await;

        let client = reqwest::Client::new();
        let url = format!("{}/test", server.base_url);
        let response = send_with_retry(&client, |client| client.get(url.as_str())).await;

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "hello from volley");

        server.handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_returns_404_without_middleware() {
        let server = start_test_server(Application::new()).await;

        let client = reqwest::Client::new();
        let url = format!("{}/nonexistent", server.base_url);
        let response = send_with_retry(&client, |client| client.get(url.as_str())).await;

        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        server.handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_reports_peer_ip() {
        let mut app = Application::new();
        app.use_middleware(handler_fn(|ctx: &mut VolleyContext| {
            let ip = ctx.ip(false).unwrap_or_else(|| "unknown".to_string());
            ctx.response_mut().set_body(ip);
            Ok(())
        }));
        let server = start_test_server(app).await;

        let client = reqwest::Client::new();
        let url = format!("{}/ip", server.base_url);
        let response = send_with_retry(&client, |client| client.get(url.as_str())).await;
        assert_eq!(response.text().await.unwrap(), "127.0.0.1");

        server.handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_fails_to_bind_to_used_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind first");
        let addr = listener.local_addr().expect("listener addr");

        let config = AxumServerConfig {
            addr,
            enable_ctrl_c: false,
        };
        let server = AxumServer::with_config(Application::new(), config);

        let result = tokio::task::spawn_blocking(move || server.run()).await;

        match result {
            Ok(Err(e)) => {
                let err_str = e.to_string();
                assert!(
                    err_str.contains("bind") || err_str.contains("address"),
                    "expected bind error, got: {}",
                    err_str
                );
            }
            _ => panic!("expected bind error"),
        }

        drop(listener);
    }
}
