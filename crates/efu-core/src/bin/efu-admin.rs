//! Operator commands for deployments.
//!
//! ```text
//! efu-admin wait-for-db
//! efu-admin create-user <email>
//! efu-admin issue-token <email>
//! efu-admin revoke-token <email>
//! ```
//!
//! Configuration is read from `CONFIG_PATH` (default `config.toml`).

use std::env;
use std::error::Error;

use efu_core::{
    Config, Database, DbError, TokenRepository, User, UserError, UserRepository, init_logging,
    migrations,
};
use tokio_util::sync::CancellationToken;

type AnyError = Box<dyn Error + Send + Sync>;

const USAGE: &str =
    "usage: efu-admin <wait-for-db | create-user <email> | issue-token <email> | revoke-token <email>>";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    WaitForDb,
    CreateUser(String),
    IssueToken(String),
    RevokeToken(String),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, AnyError> {
        match args {
            [cmd] if cmd == "wait-for-db" => Ok(Self::WaitForDb),
            [cmd, email] if cmd == "create-user" => Ok(Self::CreateUser(email.clone())),
            [cmd, email] if cmd == "issue-token" => Ok(Self::IssueToken(email.clone())),
            [cmd, email] if cmd == "revoke-token" => Ok(Self::RevokeToken(email.clone())),
            _ => Err(USAGE.into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;
    init_logging(&config.app.env)?;

    let db = Database::new(&config.paths.database).await?;

    match command {
        Command::WaitForDb => wait_for_db(&db, &config).await,
        Command::CreateUser(email) => {
            migrations::run_migrations(&db).await?;
            let user = UserRepository::new(db).create(&email).await?;
            println!("Created user {} ({})", user.email, user.id);
            Ok(())
        }
        Command::IssueToken(email) => {
            migrations::run_migrations(&db).await?;
            let user = find_user(&db, &email).await?;
            let token = TokenRepository::new(db).issue(user.id).await?;
            println!("{}", token.key);
            Ok(())
        }
        Command::RevokeToken(email) => {
            migrations::run_migrations(&db).await?;
            let user = find_user(&db, &email).await?;
            TokenRepository::new(db).revoke(user.id).await?;
            println!("Revoked token for {}", user.email);
            Ok(())
        }
    }
}

async fn find_user(db: &Database, email: &str) -> Result<User, AnyError> {
    match UserRepository::new(db.clone()).get_by_email(email).await {
        Ok(user) => Ok(user),
        Err(UserError::NotFound(_)) => Err(format!("no user with email {email}").into()),
        Err(err) => Err(err.into()),
    }
}

async fn wait_for_db(db: &Database, config: &Config) -> Result<(), AnyError> {
    let shutdown = CancellationToken::new();
    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        })
    };

    println!("Waiting for database...");
    let result = db
        .wait_until_ready(config.database.wait_options(), &shutdown)
        .await;
    ctrl_c.abort();

    match result {
        Ok(_) => {
            println!("Database available!");
            Ok(())
        }
        Err(DbError::WaitCancelled) => Err("interrupted while waiting for database".into()),
        Err(err) => Err(err.into()),
    }
}
