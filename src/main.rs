use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use polyred::api::{self, LoopbackConfig, LoopbackState};
use polyred::db::Database;
use polyred::models::{Configuration, RatingSubmission};
use polyred::{ClientConfig, Credential, PolyredClient, SessionController};

#[derive(Parser)]
#[command(name = "polyred")]
#[command(about = "Drive human-rated mesh simplification sessions")]
struct Cli {
    /// Service base URL (overrides POLYRED_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Username (overrides POLYRED_USER)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Password (overrides POLYRED_PASSWORD)
    #[arg(long, global = true)]
    password: Option<String>,

    /// Journal database (overrides POLYRED_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the service is reachable
    Ping,
    /// Upload an .fbx model and start a root session
    Upload { path: PathBuf },
    /// Submit a configuration, e.g. `config S body=0.5 lid=0.2`
    Config {
        session: String,
        #[arg(required = true)]
        ratios: Vec<String>,
    },
    /// Run the simplification and wait for new phases
    Run { session: String },
    /// List phases awaiting a rating
    Inspect { session: String },
    /// Rate phases, e.g. `evaluate S p1=4 p2=1`
    Evaluate {
        session: String,
        #[arg(required = true)]
        ratings: Vec<String>,
    },
    /// Clear a session in place
    Reset { session: String },
    /// Fork a session into a new branch
    Copy { session: String },
    /// Download one phase
    Download {
        session: String,
        phase: String,
        out: PathBuf,
    },
    /// Download the latest result of a model
    DownloadModel { id: String, out: PathBuf },
    /// Show the lineage tree containing a session
    Lineage { session: String },
    /// Export recorded ratings of a session as JSON
    Export {
        session: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Configure, run and download a range of uniform ratios
    Sweep {
        session: String,
        /// Parts to reduce, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        parts: Vec<String>,
        /// Split [0, 1] into this many steps and sweep the interior points
        #[arg(long, default_value = "10")]
        steps: u32,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// List journaled sessions
    Sessions,
    /// Serve the loopback service for offline work
    Stub {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "polyred=info".into()),
    );

    // Logs go to stderr so command output stays pipeable.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

impl Cli {
    /// Flags first, then the environment.
    fn lookup(&self, key: &str) -> Option<String> {
        let flag = match key {
            "POLYRED_URL" => self.url.clone(),
            "POLYRED_USER" => self.user.clone(),
            "POLYRED_PASSWORD" => self.password.clone(),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    }

    fn client(&self) -> anyhow::Result<PolyredClient> {
        let config = ClientConfig::from_lookup(|key| self.lookup(key))?;
        Ok(PolyredClient::new(config)?)
    }

    fn journal(&self) -> anyhow::Result<Database> {
        let path = self
            .db
            .clone()
            .or_else(|| std::env::var("POLYRED_DB").ok().map(PathBuf::from));
        let db = match path {
            Some(path) => Database::open(path)?,
            None => Database::open_default()?,
        };
        db.migrate()?;
        Ok(db)
    }

    fn controller(&self) -> anyhow::Result<SessionController> {
        Ok(SessionController::with_journal(self.client()?, self.journal()?)?)
    }
}

/// Split `key=value`, parsing the value as a number.
fn parse_assignment(raw: &str) -> anyhow::Result<(String, f64)> {
    let (key, value) = raw
        .rsplit_once('=')
        .with_context(|| format!("expected key=value, got '{}'", raw))?;
    let value = value
        .trim()
        .parse::<f64>()
        .with_context(|| format!("'{}' is not a number", value))?;
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        Commands::Ping => {
            let health = cli.client()?.health().await?;
            println!("polyred {} ({})", health.version, health.message);
        }
        Commands::Upload { path } => {
            let controller = cli.controller()?;
            let session = controller.upload_file(path).await?;
            println!("{}", session.id);
        }
        Commands::Config { session, ratios } => {
            let controller = cli.controller()?;
            controller.adopt(session)?;
            let config = ratios
                .iter()
                .map(|raw| parse_assignment(raw))
                .collect::<anyhow::Result<Configuration>>()?;
            controller.configure(session, config).await?;
            println!("configured {}", session);
        }
        Commands::Run { session } => {
            let controller = cli.controller()?;
            controller.adopt(session)?;
            let outcome = controller.run(session).await?;
            println!("assumed optimum {:.3}", outcome.assumed_optimal);
            for id in outcome.phase_ids {
                println!("{}", id);
            }
        }
        Commands::Inspect { session } => {
            let controller = cli.controller()?;
            controller.adopt(session)?;
            for id in controller.inspect(session).await? {
                println!("{}", id);
            }
        }
        Commands::Evaluate { session, ratings } => {
            let controller = cli.controller()?;
            controller.adopt(session)?;
            let submission = ratings
                .iter()
                .map(|raw| parse_assignment(raw))
                .collect::<anyhow::Result<RatingSubmission>>()?;
            let events = controller.evaluate(session, submission).await?;
            println!("recorded {} ratings", events.len());
        }
        Commands::Reset { session } => {
            let controller = cli.controller()?;
            controller.adopt(session)?;
            println!("{}", controller.reset(session).await?);
        }
        Commands::Copy { session } => {
            let controller = cli.controller()?;
            controller.adopt(session)?;
            println!("{}", controller.copy(session).await?);
        }
        Commands::Download {
            session,
            phase,
            out,
        } => {
            let mut file = tokio::fs::File::create(out)
                .await
                .with_context(|| format!("cannot create {}", out.display()))?;
            let bytes = cli.client()?.download_phase(session, phase, &mut file).await?;
            println!("wrote {} bytes to {}", bytes, out.display());
        }
        Commands::DownloadModel { id, out } => {
            let mut file = tokio::fs::File::create(out)
                .await
                .with_context(|| format!("cannot create {}", out.display()))?;
            let bytes = cli.client()?.download_model(id, &mut file).await?;
            println!("wrote {} bytes to {}", bytes, out.display());
        }
        Commands::Lineage { session } => {
            let controller = cli.controller()?;
            print!("{}", controller.lineage().render(session));
        }
        Commands::Export { session, out } => {
            let controller = cli.controller()?;
            let export = controller.export(session)?;
            let json = serde_json::to_string_pretty(&export)?;
            match out {
                Some(path) => {
                    tokio::fs::write(path, json).await?;
                    tracing::info!("exported {} variants to {}", export.variants.len(), path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Sweep {
            session,
            parts,
            steps,
            out_dir,
        } => {
            let controller = cli.controller()?;
            controller.adopt(session)?;
            let ratios: Vec<f64> = (1..*steps).map(|i| i as f64 / *steps as f64).collect();
            tokio::fs::create_dir_all(out_dir).await?;
            for path in controller.sweep(session, parts, &ratios, out_dir).await? {
                println!("{}", path.display());
            }
        }
        Commands::Sessions => {
            let controller = cli.controller()?;
            for session in controller.sessions() {
                let parent = session.parent.as_deref().unwrap_or("-");
                println!(
                    "{}\t{}\tparent={}\tphases={}\tunevaluated={}",
                    session.id,
                    session.status,
                    parent,
                    session.phases.len(),
                    session.unevaluated.len()
                );
            }
        }
        Commands::Stub { port } => {
            let mut config = LoopbackConfig::default();
            if let (Some(user), Some(password)) =
                (cli.lookup("POLYRED_USER"), cli.lookup("POLYRED_PASSWORD"))
            {
                config = config.with_credential(Credential::new(user, password));
            }
            api::serve(&format!("127.0.0.1:{}", port), LoopbackState::new(config)).await?;
        }
    }

    Ok(())
}
