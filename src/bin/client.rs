use argh::FromArgs;
use kornia_facedet::{DETECTION_ROUTE, DetectionRequest, server::FUNCTION_KEY_HEADER};

// defaults for the client
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 7071;

#[derive(FromArgs)]
/// Client for the face detection function
struct ClientArgs {
    /// the host to connect to
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to connect to
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// function key sent with detection requests
    #[argh(option, short = 'k')]
    key: Option<String>,

    /// command to execute: "detect" or "status"
    #[argh(subcommand)]
    command: ClientCommands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum ClientCommands {
    Detect(DetectCommand),
    Status(StatusCommand),
}

#[derive(FromArgs)]
/// Detect faces in the image at a URL
#[argh(subcommand, name = "detect")]
struct DetectCommand {
    /// the URL of the image
    #[argh(option, short = 'u')]
    url: String,
}

#[derive(FromArgs)]
/// Show the detection engine status
#[argh(subcommand, name = "status")]
struct StatusCommand {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: ClientArgs = argh::from_env();

    let client = reqwest::Client::new();

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    match args.command {
        ClientCommands::Detect(detect_command) => {
            let mut request = client
                .post(format!("http://{addr}{DETECTION_ROUTE}"))
                .json(&DetectionRequest {
                    image_url: detect_command.url,
                });
            if let Some(key) = &args.key {
                request = request.header(FUNCTION_KEY_HEADER, key);
            }
            let response = request.send().await?;

            let status = response.status();
            if status.is_success() {
                let result = response.json::<serde_json::Value>().await?;
                println!("Result: {}", serde_json::to_string_pretty(&result)?);
            } else {
                log::warn!("Request failed with status {status}");
                println!("Error ({status}): {}", response.text().await?);
            }
        }
        ClientCommands::Status(_) => {
            let response = client.get(format!("http://{addr}/status")).send().await?;

            let result = response.json::<serde_json::Value>().await?;
            println!("Result: {}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
