//! HTTP API command: `promptsmith serve`.

use anyhow::Result;

use promptsmith::config::Settings;

pub async fn cmd_serve(mut settings: Settings, port: Option<u16>, dev: bool) -> Result<()> {
    if let Some(port) = port {
        settings.server.port = port;
    }
    if dev {
        settings.server.dev = true;
        // Reachable from a UI container.
        settings.server.host = "0.0.0.0".to_string();
    }
    promptsmith::server::start_server(&settings).await
}
