use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use rand::Rng;

use chorus::config::{Config, TransportConfig};
use chorus::delivery::FailureReason;
use chorus::media::{FsMediaStore, MediaLimits, MediaRelocator, RetryPolicy, UreqFetcher};
use chorus::orchestrator::{Engine, EngineOptions, OutboundSend, SendOutcome};
use chorus::server::{app, AppState};
use chorus::storage::Storage;
use chorus::{logging, rlog, roster};

#[derive(Parser)]
#[command(name = "chorus", about = "Multi-group broadcast relay")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server (default).
    Serve,
    /// Provision default groups and an initial admin member.
    Seed {
        /// Admin phone number, any common format.
        #[arg(long)]
        admin_phone: String,
        /// Admin display name.
        #[arg(long, default_value = "Admin")]
        admin_name: String,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(error) = run().await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Seed {
            admin_phone,
            admin_name,
        } => seed(config, &admin_phone, &admin_name),
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn Error>> {
    let storage = Storage::open(&config.db_path)?;
    roster::seed_default_groups(&storage)?;
    let storage = Arc::new(Mutex::new(storage));

    let sender: Arc<dyn OutboundSend> = match &config.transport {
        Some(transport) => {
            rlog!("main: outbound transport configured, from {}", transport.from_number);
            Arc::new(TwilioSender::new(transport.clone()))
        }
        None => {
            rlog!("main: no transport credentials, running in test mode");
            Arc::new(TestModeSender)
        }
    };

    let (fetch_user, fetch_pass) = config
        .transport
        .as_ref()
        .map(|t| (t.account_sid.clone(), t.auth_token.clone()))
        .unwrap_or_default();
    let relocator = Arc::new(MediaRelocator::new(
        Arc::new(UreqFetcher::new(fetch_user, fetch_pass, config.media_max_bytes)),
        Arc::new(FsMediaStore::new(
            config.media_dir.clone(),
            config.media_base_url.clone(),
        )),
        MediaLimits {
            max_bytes: config.media_max_bytes,
            ..MediaLimits::default()
        },
        RetryPolicy::default(),
    ));

    let engine = Arc::new(Engine::new(
        storage,
        sender,
        relocator,
        EngineOptions {
            default_group: config.default_group,
            fanout_concurrency: config.fanout_concurrency,
        },
    ));

    let state = AppState {
        engine,
        media_root: Some(config.media_dir.clone()),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    rlog!("main: listening on port {}", config.port);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn seed(config: Config, admin_phone: &str, admin_name: &str) -> Result<(), Box<dyn Error>> {
    let storage = Storage::open(&config.db_path)?;
    roster::seed_default_groups(&storage)?;
    let admin = roster::add_member(&storage, admin_phone, config.default_group, admin_name, true)?;
    println!("seeded groups and admin {} ({})", admin.name, admin.phone);
    Ok(())
}

// ---------------------------------------------------------------------------
// Outbound senders
// ---------------------------------------------------------------------------

/// Per-request deadline for the carrier API; a stalled carrier fails the
/// send as transient instead of pinning a fan-out worker.
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends through the Twilio REST API.
struct TwilioSender {
    transport: TransportConfig,
    agent: ureq::Agent,
}

impl TwilioSender {
    fn new(transport: TransportConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(SEND_TIMEOUT)
            .timeout_read(SEND_TIMEOUT)
            .timeout(SEND_TIMEOUT)
            .build();
        Self { transport, agent }
    }
}

impl OutboundSend for TwilioSender {
    fn send(&self, to: &str, body: &str, media_urls: &[String]) -> SendOutcome {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.transport.account_sid
        );
        let auth = BASE64.encode(format!(
            "{}:{}",
            self.transport.account_sid, self.transport.auth_token
        ));

        let mut fields: Vec<(&str, &str)> = vec![
            ("To", to),
            ("From", &self.transport.from_number),
            ("Body", body),
        ];
        for media_url in media_urls {
            fields.push(("MediaUrl", media_url));
        }
        if let Some(callback) = &self.transport.status_callback_url {
            fields.push(("StatusCallback", callback));
        }

        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Basic {auth}"))
            .send_form(&fields);

        match response {
            Ok(response) => {
                let sid = response
                    .into_json::<serde_json::Value>()
                    .ok()
                    .and_then(|v| v.get("sid").and_then(|s| s.as_str()).map(str::to_string));
                rlog!("send: accepted for {}", logging::phone(to));
                SendOutcome::Delivered { provider_sid: sid }
            }
            Err(ureq::Error::Status(code, response)) => {
                let api_code = response
                    .into_json::<serde_json::Value>()
                    .ok()
                    .and_then(|v| v.get("code").and_then(|c| c.as_i64()));
                rlog!(
                    "send: rejected for {} (http {code}, code {:?})",
                    logging::phone(to),
                    api_code
                );
                SendOutcome::Failed(match api_code {
                    Some(21211) | Some(21214) | Some(21610) => FailureReason::InvalidDestination,
                    Some(_) if code < 500 => FailureReason::CarrierRejected,
                    _ => FailureReason::TransientNetwork,
                })
            }
            Err(e) => {
                rlog!("send: transport error for {}: {e}", logging::phone(to));
                SendOutcome::Failed(FailureReason::TransientNetwork)
            }
        }
    }
}

/// Logs sends instead of calling the carrier. Used when no credentials are
/// configured, mirroring the transport's sid format for callback testing.
struct TestModeSender;

impl OutboundSend for TestModeSender {
    fn send(&self, to: &str, body: &str, media_urls: &[String]) -> SendOutcome {
        let sid: String = {
            let mut rng = rand::thread_rng();
            (0..32).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
        };
        rlog!(
            "send: [test mode] to {} ({} media): {body}",
            logging::phone(to),
            media_urls.len()
        );
        SendOutcome::Delivered {
            provider_sid: Some(format!("SM{sid}")),
        }
    }
}
