#![cfg(not(tarpaulin_include))]

use jarvis::app;
use jarvis::config::Config;

/// Main entry point for the web application
///
/// Initializes logging, loads the environment-driven configuration and
/// runs the web server until the process is stopped.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::load();
    app::run(config).await
}
