//! tce-oracle: simulated sensor oracle emitting attested TCE records.
//!
//! ## Usage
//!
//! ```bash
//! # Provision the key pool (idempotent)
//! tce-oracle keys init
//!
//! # Emit one attested record for a shipment
//! tce-oracle --mode commit-reveal emit --shipment-id SHIP_1 --mass-kg 5000 --distance-km 300
//!
//! # Verify a bundle written by `emit`
//! tce-oracle verify bundle.json
//!
//! # Serve the sensor-data endpoint
//! tce-oracle serve --listen 127.0.0.1:8080
//! ```

mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tce_core::{
    Attestation, AttestationMode, Correlation, FileSink, KeyId, KeyProvider,
    Oracle, OracleConfig, OracleRequest, SigningScheme, SynthesisRequest, Verifier,
};
use tracing::info;

const DEFAULT_CONFIG: &str = "tce-oracle.toml";

#[derive(Parser)]
#[command(name = "tce-oracle")]
#[command(version, about = "Sensor oracle emitting attested transport emission records")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "TCE_CONFIG")]
    config: Option<PathBuf>,

    /// Key directory (overrides config file)
    #[arg(long, env = "TCE_KEY_DIR")]
    key_dir: Option<PathBuf>,

    /// Key pool size (overrides config file)
    #[arg(long, env = "TCE_POOL_SIZE")]
    pool_size: Option<u32>,

    /// Attestation mode (overrides config file)
    #[arg(long, env = "TCE_SIGNING_MODE", value_enum)]
    mode: Option<ModeArg>,

    /// Seed for synthesis and key generation
    #[arg(long, env = "TCE_SEED")]
    seed: Option<u64>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Key pool management
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },

    /// Synthesize and attest one record, printing the bundle as JSON
    Emit {
        #[arg(long)]
        shipment_id: String,

        /// Record id to use instead of a generated one
        #[arg(long)]
        tce_id: Option<String>,

        #[arg(long)]
        mass_kg: Option<f64>,

        #[arg(long)]
        distance_km: Option<f64>,

        /// Previous record id (repeatable)
        #[arg(long = "prev-tce-id")]
        prev_tce_ids: Vec<String>,

        /// Sign with this key instead of the configured selection
        #[arg(long)]
        key_id: Option<KeyId>,

        #[arg(long)]
        process_instance_key: Option<String>,

        #[arg(long)]
        activity_id: Option<String>,

        /// Also submit the bundle to the file sink
        #[arg(long)]
        submit: bool,

        /// Write the bundle here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify an attestation bundle
    Verify {
        /// Bundle JSON as written by `emit`
        bundle: PathBuf,

        /// Reject bundles signed with any other scheme
        #[arg(long, value_enum)]
        scheme: Option<SchemeArg>,
    },

    /// Serve the sensor-data HTTP endpoint
    Serve {
        /// Listen address (overrides config file)
        #[arg(long, env = "TCE_LISTEN_ADDR")]
        listen: Option<String>,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Generate missing keys up to the pool size
    Init,
    /// List persisted key ids
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Direct,
    CommitReveal,
}

impl From<ModeArg> for AttestationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => AttestationMode::Direct,
            ModeArg::CommitReveal => AttestationMode::CommitReveal,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemeArg {
    #[value(name = "rsa-pss-sha256")]
    RsaPssSha256,
    #[value(name = "rsa-pkcs1v15-sha256")]
    RsaPkcs1v15Sha256,
}

impl From<SchemeArg> for SigningScheme {
    fn from(scheme: SchemeArg) -> Self {
        match scheme {
            SchemeArg::RsaPssSha256 => SigningScheme::RsaPssSha256,
            SchemeArg::RsaPkcs1v15Sha256 => SigningScheme::RsaPkcs1v15Sha256,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tce_oracle=info,tce_core=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load the config file (explicit path, or `tce-oracle.toml` if present) and apply overrides.
fn load_config(cli: &Cli) -> anyhow::Result<OracleConfig> {
    let mut config = match &cli.config {
        Some(path) => OracleConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => OracleConfig::load(Path::new(DEFAULT_CONFIG))?,
        None => {
            info!("Config file not found, using defaults");
            OracleConfig::default()
        }
    };

    if let Some(dir) = &cli.key_dir {
        config.keys.dir = dir.clone();
    }
    if let Some(size) = cli.pool_size {
        config.keys.pool_size = size;
    }
    if let Some(mode) = cli.mode {
        config.signing.mode = mode.into();
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    config.validate()?;
    Ok(config)
}

fn file_sink(config: &OracleConfig) -> FileSink {
    let sink = FileSink::new(&config.sink.output_path);
    match config.seed {
        Some(seed) => sink.with_seed(seed),
        None => sink,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Keys { command } => {
            let oracle = Oracle::from_config(&config);
            match command {
                KeysCommand::Init => {
                    let report = oracle.init()?;
                    println!(
                        "{} keys in {} ({} existing, {} generated)",
                        report.existing + report.generated,
                        config.keys.dir.display(),
                        report.existing,
                        report.generated
                    );
                }
                KeysCommand::List => {
                    for id in oracle.keys().provider().list()? {
                        println!("{id}");
                    }
                }
            }
        }

        Commands::Emit {
            shipment_id,
            tce_id,
            mass_kg,
            distance_km,
            prev_tce_ids,
            key_id,
            process_instance_key,
            activity_id,
            submit,
            output,
        } => {
            let oracle = Oracle::from_config(&config);
            oracle.init()?;

            let mut synthesis = SynthesisRequest::new(shipment_id).prev_tce_ids(prev_tce_ids);
            if let Some(id) = tce_id {
                synthesis = synthesis.record_id(id);
            }
            if let Some(mass) = mass_kg {
                synthesis = synthesis.mass_kg(mass);
            }
            if let Some(distance) = distance_km {
                synthesis = synthesis.distance_km(distance);
            }

            let mut request = OracleRequest::new(synthesis).correlation(Correlation {
                process_instance_key,
                activity_id,
            });
            if let Some(id) = key_id {
                request = request.key_id(id);
            }

            let response = if submit {
                let sink = file_sink(&config);
                oracle.attest_and_submit(&request, &sink).await?
            } else {
                oracle.attest(&request)?
            };

            let json = serde_json::to_string_pretty(&response)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(record_id = %response.attestation.tce_id, path = %path.display(), "bundle written");
                }
                None => println!("{json}"),
            }
        }

        Commands::Verify { bundle, scheme } => {
            let text = std::fs::read_to_string(&bundle)
                .with_context(|| format!("reading {}", bundle.display()))?;
            let attestation: Attestation = serde_json::from_str(&text)
                .with_context(|| format!("{} is not an attestation bundle", bundle.display()))?;

            let mut verifier = Verifier::new();
            if let Some(scheme) = scheme {
                verifier = verifier.require_scheme(scheme.into());
            }
            verifier.verify(&attestation)?;
            println!(
                "valid: {} signed by {} ({}, {})",
                attestation.tce_id, attestation.key_id, attestation.mode, attestation.signature_scheme
            );
        }

        Commands::Serve { listen } => {
            if let Some(addr) = listen {
                config.server.listen_addr = addr;
            }
            let oracle = Oracle::from_config(&config);
            oracle.init()?;

            let state = Arc::new(server::AppState {
                oracle,
                sink: Arc::new(file_sink(&config)),
            });
            let app = server::create_router(state);

            let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
            info!("Listening on http://{}", config.server.listen_addr);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
