use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use mailroom::auth::{hash_password, Role};
use mailroom::crypto::EncryptionKey;
use mailroom::store::{NewUser, PgStore, StoreError, UserStore};
use mailroom::{EnvConfig, Settings};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Parser)]
#[command(name = "mailroom", about = "Administer a mailroom deployment")]
struct Cli {
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Manage login accounts
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Print freshly generated HMAC_KEY and ENCRYPTION_KEY values
    GenKeys,
}

#[derive(Subcommand)]
enum UserCommand {
    Add {
        #[arg(long)]
        username: String,

        #[arg(long)]
        name: String,

        #[arg(long, env = "MAILROOM_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long, default_value_t = false)]
        admin: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("initializing logger")?;

    match cli.command {
        Commands::Migrate => {
            let store = connect().await?;
            store.migrate().await.context("running migrations")?;
            log::info!("Database is up to date");
        }
        Commands::User {
            command:
                UserCommand::Add {
                    username,
                    name,
                    password,
                    admin,
                },
        } => {
            if password.chars().count() < MIN_PASSWORD_LEN {
                bail!("password must be at least {MIN_PASSWORD_LEN} characters");
            }

            let store = connect().await?;
            let password_hash = hash_password(password).await?;
            let role = if admin { Role::Admin } else { Role::User };

            match store
                .create(NewUser {
                    username: username.clone(),
                    name,
                    role,
                    password_hash,
                })
                .await
            {
                Ok(user) => log::info!("Created {} {} ({})", user.role, user.username, user.id),
                Err(StoreError::Conflict(_)) => bail!("username {username} is already taken"),
                Err(err) => return Err(err).context("creating user"),
            }
        }
        Commands::GenKeys => {
            let (_, encryption_key) = EncryptionKey::generate();
            let (_, hmac_key) = EncryptionKey::generate();
            println!("HMAC_KEY={hmac_key}");
            println!("ENCRYPTION_KEY={encryption_key}");
        }
    }

    Ok(())
}

async fn connect() -> Result<PgStore> {
    let settings = Settings::from_env().context("reading settings from environment")?;
    log::debug!("Connecting to {}", settings.database_url);

    PgStore::connect(
        &settings.database_url,
        settings.database_max_connections,
        settings.encryption_key,
    )
    .await
    .context("connecting to database")
}
