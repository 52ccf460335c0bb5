use quizduel_server::build_app;
use quizduel_server::config::ServerConfig;
use quizduel_server::store_loop::open_store;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid server configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid server configuration: {}", e);
        std::process::exit(1);
    }

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open data file: {}", e);
            std::process::exit(1);
        }
    };

    let app = build_app(&config, store);

    tracing::info!("Starting quizduel store on {}", config.listen_addr);
    println!("Quizduel store listening on {}", config.listen_addr);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
