use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowdeck_api::{seed, Server};
use flowdeck_core::{validation, ConfigManager, PasswordHasher, RoleName, Settings};
use flowdeck_store::{NewUser, Store};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flowdeck")]
#[command(about = "FlowDeck - team collaboration server", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding default.toml, <env>.toml and local.toml
    #[arg(long, global = true, env = "FLOWDECK_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Environment name (development, test, production, ...)
    #[arg(long, global = true, env = "FLOWDECK_ENV")]
    env: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket server (default)
    Serve,

    /// Create the database schema and exit
    InitDb,

    /// Load a demo organisation with users, tasks and messages
    Seed,

    /// Add an administrator to an existing organisation
    CreateAdmin {
        /// Organisation ID
        #[arg(long)]
        org_id: i64,

        /// Display name
        #[arg(long)]
        name: String,

        /// Login email
        #[arg(long)]
        email: String,

        /// Password; a strong one is generated when omitted
        #[arg(long, env = "FLOWDECK_ADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Print the effective configuration (secrets omitted)
    ShowConfig,
}

fn init_tracing(settings: &Settings) {
    let level = &settings.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("flowdeck_api={level},flowdeck_store={level},flowdeck_core={level},tower_http={level}")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_store(settings: &Settings) -> Result<Store> {
    Store::open(&settings.database.path)
        .with_context(|| format!("opening database {}", settings.database.path))
}

fn create_admin(
    store: &Store,
    org_id: i64,
    name: &str,
    email: &str,
    password: Option<String>,
) -> Result<()> {
    let Some(org) = store.get_organisation(org_id)? else {
        bail!("organisation {org_id} does not exist");
    };
    let name = validation::required("Name", name)?.to_string();
    let email = email.trim().to_lowercase();
    validation::validate_email(&email)?;

    let (password, generated) = match password {
        Some(password) => {
            validation::validate_password_strength(&password)?;
            (password, false)
        }
        None => (validation::generate_random_password(16), true),
    };
    let password_hash = PasswordHasher::new().hash(&password)?;
    let user = store.create_user(&NewUser {
        email,
        password_hash,
        name,
        organisation_id: org.id,
        department_id: None,
        roles: vec![RoleName::Admin],
        job_title: Some("Administrator".into()),
        is_email_verified: true,
    })?;

    println!("Created admin {} (id {}) in {}", user.email, user.id, org.name);
    if generated {
        println!("Generated password: {password}");
        println!("It is shown only once.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigManager::load(cli.config_dir, cli.env)?;
    let settings = config.settings().read().await.clone();
    init_tracing(&settings);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!(env = %config.env(), "Starting FlowDeck");
            Server::new(settings)?.run().await?;
        }
        Commands::InitDb => {
            open_store(&settings)?;
            println!("Database ready at {}", settings.database.path);
        }
        Commands::Seed => {
            let store = open_store(&settings)?;
            match seed::seed_demo(&store)? {
                Some(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    println!("Log in as {} with the password above.", report.admin_email);
                }
                None => println!("Demo organisation already exists; nothing to do."),
            }
        }
        Commands::CreateAdmin {
            org_id,
            name,
            email,
            password,
        } => {
            let store = open_store(&settings)?;
            create_admin(&store, org_id, &name, &email, password)?;
        }
        Commands::ShowConfig => {
            println!("# config dir: {}", config.config_dir().display());
            println!("{}", toml::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}
