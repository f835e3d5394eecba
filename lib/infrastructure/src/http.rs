use actix_web::{App, HttpServer, Scope};
use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct HttpServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl HttpServerConfig {
    pub async fn run_server<F>(&self, scopes: F) -> anyhow::Result<()>
    where
        F: Fn() -> Vec<Scope> + Send + Clone + 'static,
    {
        tracing::info!("Starting HTTP server on {}:{}", self.bind_address, self.port);

        let http_server = HttpServer::new(move || {
            let mut app = App::new().wrap(tracing_actix_web::TracingLogger::default());

            for scope in scopes() {
                app = app.service(scope);
            }

            app
        })
        .workers(1)
        .disable_signals()
        .bind((self.bind_address.as_str(), self.port))
        .with_context(|| format!("Error binding HTTP server to {}:{}", self.bind_address, self.port))?;

        http_server
            .run()
            .await
            .with_context(|| format!("Error running HTTP server on port {}", self.port))
    }
}
