use std::path::PathBuf;
use std::sync::Arc;

use ava_bot::assistant::Assistant;
use ava_bot::config::Config;
use ava_bot::error::{AvaBotError, Result};
use ava_bot::scheduler::Scheduler;
use ava_bot::seo::SeoWorkflow;
use ava_bot::users::{NewUser, User, UserStore};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const CLI_SESSION: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "ava-bot")]
#[command(about = "Ava personal assistant", version)]
struct Cli {
    #[arg(long, env = "AVA_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat on stdin.
    Chat,
    /// Manage dashboard users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Run the SEO workflow job.
    Seo {
        /// Run once now and exit with the workflow's exit code.
        #[arg(long, default_value_t = false)]
        now: bool,
    },
}

#[derive(Subcommand, Debug)]
enum UserAction {
    Add {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    List,
    Delete {
        username: String,
    },
    SetAdmin {
        username: String,
        #[arg(action = clap::ArgAction::Set)]
        admin: bool,
    },
    SetActive {
        username: String,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    Passwd {
        username: String,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    ava_bot::logging::init_tracing("ava_bot");
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.users.get_or_insert_with(Default::default).sqlite_path = Some(db);
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat(&config).await,
        Commands::User { action } => user(&config, action).await,
        Commands::Seo { now } => seo(&config, now).await,
    }
}

async fn chat(config: &Config) -> Result<()> {
    let assistant = Assistant::from_config(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Ava lista. Escribe /reset para reiniciar o /salir para terminar.");
    loop {
        stdout.write_all(b"> ").await.map_err(io_error)?;
        stdout.flush().await.map_err(io_error)?;
        let Some(line) = lines.next_line().await.map_err(io_error)? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/salir" | "/exit" => break,
            "/reset" => {
                assistant.reset(CLI_SESSION).await;
                println!("Conversación reiniciada.");
                continue;
            }
            _ => {}
        }
        let reply = assistant.handle(CLI_SESSION, line).await;
        println!("{}", reply.response);
    }
    Ok(())
}

async fn user(config: &Config, action: UserAction) -> Result<()> {
    let store = UserStore::from_config(config).await?;
    match action {
        UserAction::Add {
            username,
            password,
            email,
            first_name,
            last_name,
            admin,
        } => {
            let user = store
                .create_user(&NewUser {
                    username,
                    email,
                    confirm_password: Some(password.clone()),
                    password,
                    first_name,
                    last_name,
                    is_admin: admin,
                })
                .await?;
            println!("created {} ({})", user.username, user.id);
        }
        UserAction::List => {
            for user in store.list_users().await? {
                println!(
                    "{}\t{}\t{}\t{}{}",
                    user.id,
                    user.username,
                    user.email,
                    user.role,
                    if user.is_active { "" } else { "\t(inactive)" }
                );
            }
        }
        UserAction::Delete { username } => {
            let user = existing(&store, &username).await?;
            store.delete_user(&user.id).await?;
            println!("deleted {username}");
        }
        UserAction::SetAdmin { username, admin } => {
            let user = existing(&store, &username).await?;
            store.set_admin(&user.id, admin).await?;
            println!("{username}: admin={admin}");
        }
        UserAction::SetActive { username, active } => {
            let user = existing(&store, &username).await?;
            store.set_active(&user.id, active).await?;
            println!("{username}: active={active}");
        }
        UserAction::Passwd { username, password } => {
            let user = existing(&store, &username).await?;
            store.change_password(&user.id, &password).await?;
            println!("{username}: password updated");
        }
    }
    Ok(())
}

async fn existing(store: &UserStore, username: &str) -> Result<User> {
    store
        .find_by_username(username)
        .await?
        .ok_or_else(|| AvaBotError::Validation(format!("unknown user {username}")))
}

async fn seo(config: &Config, now: bool) -> Result<()> {
    let workflow = SeoWorkflow::from_config(config)?;
    if now {
        let run = workflow.execute().await?;
        print!("{}", run.stdout);
        eprint!("{}", run.stderr);
        if !run.success {
            std::process::exit(run.exit_code.unwrap_or(1));
        }
        return Ok(());
    }

    let mut scheduler = Scheduler::new();
    scheduler.register_job(Arc::new(workflow));
    scheduler.start();
    let _ = tokio::signal::ctrl_c().await;
    scheduler.stop().await;
    Ok(())
}

fn io_error(err: std::io::Error) -> AvaBotError {
    AvaBotError::Runtime(err.to_string())
}
