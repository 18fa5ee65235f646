use argh::FromArgs;
use kornia_facedet::{
    AppState, CaffeFaceNetwork, DetectionEngine, FaceDetector, FetchConfig, ImageFetcher,
    ModelArtifacts, ServerConfig, engine::DEFAULT_QUEUE_CAPACITY, model::DEFAULT_MODEL_DIR,
    router,
};
use std::{path::PathBuf, sync::Arc, time::Duration};

// defaults for the server
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 7071;
const FUNCTION_KEY_ENV: &str = "FACEDET_FUNCTION_KEY";

#[derive(FromArgs)]
/// HTTP face detection function backed by a pre-trained SSD model.
struct ServerArgs {
    /// the host to run the server on
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// directory holding deploy.prototxt and the caffemodel weights
    #[argh(option, default = "PathBuf::from(DEFAULT_MODEL_DIR)")]
    model_dir: PathBuf,

    /// seconds allowed for connecting to the image host
    #[argh(option, default = "10")]
    connect_timeout_secs: u64,

    /// seconds allowed for the whole image download
    #[argh(option, default = "30")]
    fetch_timeout_secs: u64,

    /// maximum number of redirects followed when downloading
    #[argh(option, default = "5")]
    max_redirects: usize,

    /// maximum accepted image size in bytes
    #[argh(option, default = "20 * 1024 * 1024")]
    max_image_bytes: u64,

    /// seconds a request waits for detection before failing
    #[argh(option, default = "30")]
    inference_timeout_secs: u64,

    /// detections allowed to wait for the engine before requests are refused
    #[argh(option, default = "DEFAULT_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// directory for downloaded images (system temp dir by default)
    #[argh(option)]
    scratch_dir: Option<PathBuf>,

    /// function key required on the detection route (or FACEDET_FUNCTION_KEY)
    #[argh(option)]
    function_key: Option<String>,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            fetch: FetchConfig {
                connect_timeout: Duration::from_secs(args.connect_timeout_secs),
                timeout: Duration::from_secs(args.fetch_timeout_secs),
                max_redirects: args.max_redirects,
                max_image_bytes: args.max_image_bytes,
                scratch_dir: args.scratch_dir,
            },
            inference_timeout: Duration::from_secs(args.inference_timeout_secs),
            queue_capacity: args.queue_capacity,
            function_key: args
                .function_key
                .or_else(|| std::env::var(FUNCTION_KEY_ENV).ok())
                .filter(|key| !key.is_empty()),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {e}");
    }
    log::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: ServerArgs = argh::from_env();

    let artifacts = ModelArtifacts::in_dir(&args.model_dir);
    let config = ServerConfig::from(args);

    // the model is loaded once; a failure here aborts startup
    log::info!(
        "Loading model from {} and {}",
        artifacts.topology.display(),
        artifacts.weights.display()
    );
    let network = CaffeFaceNetwork::load(&artifacts)?;
    let engine = DetectionEngine::with_queue_capacity(
        FaceDetector::new(network),
        config.inference_timeout,
        config.queue_capacity,
    );

    let state = Arc::new(AppState {
        engine,
        fetcher: ImageFetcher::new(config.fetch.clone())?,
        function_key: config.function_key.clone(),
    });
    if state.function_key.is_none() {
        log::warn!("No function key configured, the detection route is open");
    }

    let addr = config.addr();
    log::info!("🚀 Starting the server");
    log::info!("🔥 Listening on: {addr}");
    log::info!("🔧 Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
