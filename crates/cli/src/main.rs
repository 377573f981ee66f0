use chakra::auth::Registration;
use chakra::chat::{
    ChatBackend, ChatClient, ChatError, SessionRegistry, TargetLanguage, TurnOutcome,
};
use chakra::transport::AuthEvent;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chakra")]
#[command(about = "Chakra CLI: document assistant chat", long_about = None)]
struct Cli {
    /// Config file path (default: CHAKRA_CONFIG_PATH or ~/.chakra/config.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Show the resolved configuration.
    Config,

    /// Log in and store access and refresh tokens.
    Login {
        /// Account email
        #[arg(long, short)]
        username: String,

        /// Password (default: CHAKRA_PASSWORD env, otherwise prompted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Request a new account. It must be approved by an admin before login works.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        department: String,
    },

    /// Forget stored credentials.
    Logout,

    /// Show the logged-in user.
    Me,

    /// List conversations, most recent first.
    Sessions,

    /// Chat interactively. Ctrl-C cancels a reply that is still streaming.
    Chat {
        /// Continue this conversation instead of the most recent one.
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Start a new conversation.
        #[arg(long, conflicts_with = "session")]
        new: bool,

        /// Answer language: en, ml or hi (default from config).
        #[arg(long, short)]
        language: Option<TargetLanguage>,
    },

    /// Rename a conversation.
    Rename { id: String, title: String },

    /// Delete a conversation.
    Delete { id: String },

    /// Create a share link for a conversation.
    Share { id: String },

    /// Show a shared conversation without logging in.
    Preview { share_id: String },

    /// Copy a shared conversation into your account.
    Import { share_id: String },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Run with --help for usage");
        return;
    };
    if let Commands::Version = command {
        println!("chakra {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if let Err(e) = run(cli.config, command).await {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config_path: Option<PathBuf>, command: Commands) -> anyhow::Result<()> {
    let (config, path) = chakra::config::load_config(config_path)?;
    let client = chakra::Client::from_config(&config);
    log::debug!("using backend {}", client.transport().base_url());

    match command {
        Commands::Version => {}
        Commands::Config => {
            println!("config file:   {}", path.display());
            println!("backend:       {}", chakra::config::resolve_base_url(&config));
            println!(
                "token file:    {}",
                chakra::config::resolve_token_path(&config).display()
            );
            println!("language:      {}", config.chat.default_language);
            let push = chakra::config::resolve_push_public_key(&config);
            println!("push key:      {}", if push.is_some() { "set" } else { "not set" });
        }
        Commands::Login { username, password } => {
            let password = match password.or_else(|| std::env::var("CHAKRA_PASSWORD").ok()) {
                Some(p) => p,
                None => read_password()?,
            };
            match client.auth.login(&username, &password).await {
                Ok(user) => println!("logged in as {} ({}, {})", user.name, user.role, user.department),
                Err(e) => anyhow::bail!("login failed: {}", e),
            }
        }
        Commands::Register {
            name,
            email,
            department,
        } => {
            let password = read_password()?;
            let registration = Registration {
                name,
                email,
                department,
                password,
            };
            let message = client.auth.register(&registration).await?;
            if message.is_empty() {
                println!("registration submitted; wait for approval");
            } else {
                println!("{}", message);
            }
        }
        Commands::Logout => {
            client.auth.logout();
            println!("logged out");
        }
        Commands::Me => {
            let user = client.auth.current_user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Sessions => {
            let mut registry = SessionRegistry::new(client.chat);
            let sessions = registry.list_sessions().await.to_vec();
            print_notices(&mut registry);
            for s in sessions {
                println!("{}  {}", s.id, s.title);
            }
        }
        Commands::Chat {
            session,
            new,
            language,
        } => {
            let language = language.unwrap_or(config.chat.default_language);
            run_chat(client.chat, session, new, language).await?;
        }
        Commands::Rename { id, title } => {
            let mut registry = SessionRegistry::new(client.chat);
            registry.rename_session(&id, &title).await?;
            println!("renamed {}", id);
        }
        Commands::Delete { id } => {
            client.chat.delete_session(&id).await?;
            println!("deleted {}", id);
        }
        Commands::Share { id } => {
            let mut registry = SessionRegistry::new(client.chat);
            registry.select_session(&id).await?;
            let share_id = registry.share_active().await?;
            println!("{}", share_link(&config, &share_id));
        }
        Commands::Preview { share_id } => {
            let shared = client.chat.shared_preview(&share_id).await?;
            println!("# {}", shared.title);
            for m in shared.history {
                println!("{:?}: {}", m.role, m.content);
            }
        }
        Commands::Import { share_id } => {
            let mut registry = SessionRegistry::new(client.chat);
            let id = registry.import_shared(&share_id).await?;
            println!("imported as {}", id);
        }
    }
    Ok(())
}

fn share_link(config: &chakra::config::Config, share_id: &str) -> String {
    format!(
        "{}/dashboard/share/{}",
        chakra::config::resolve_base_url(config),
        share_id
    )
}

const CHAT_HELP: &str = "/new  /sessions  /switch ID  /rename TITLE  /share  /copy  /exit
Ctrl-C cancels a reply while it streams; /exit or Ctrl-D leaves.";

/// Print `label` and read one line. `None` at end of input.
fn prompt(label: &str) -> io::Result<Option<String>> {
    read_input(&mut io::stdin().lock(), &mut io::stdout(), label)
}

fn read_input(
    input: &mut impl BufRead,
    output: &mut impl Write,
    label: &str,
) -> io::Result<Option<String>> {
    write!(output, "{}", label)?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Write a streamed fragment. After the first failure further fragments are skipped and the
/// error is kept for the caller.
fn echo(output: &mut impl Write, text: &str, failed: &mut Option<io::Error>) {
    if failed.is_some() {
        return;
    }
    if let Err(e) = write!(output, "{}", text).and_then(|_| output.flush()) {
        *failed = Some(e);
    }
}

fn read_password() -> anyhow::Result<String> {
    prompt("password: ")?.ok_or_else(|| anyhow::anyhow!("no password given"))
}

/// Resolves on Ctrl-C. Never resolves if the signal handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn print_notices(registry: &mut SessionRegistry<ChatClient>) {
    for notice in registry.take_notices() {
        eprintln!("! {}", notice);
    }
}

async fn run_chat(
    chat: ChatClient,
    session: Option<String>,
    new: bool,
    language: TargetLanguage,
) -> anyhow::Result<()> {
    let mut auth_events = chat.transport().subscribe();
    let mut registry = SessionRegistry::new(chat);
    if new {
        registry.list_sessions().await;
        registry.new_session();
    } else if let Some(id) = session {
        registry.list_sessions().await;
        registry.select_session(&id).await?;
    } else {
        registry.bootstrap().await;
    }
    print_notices(&mut registry);
    print_thread(&registry);
    println!(
        "(language: {}; /help for commands, /exit or Ctrl-D to leave)",
        language.label()
    );

    loop {
        let Some(input) = prompt("> ")? else {
            println!();
            break;
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if let Some(cmd) = input.strip_prefix('/') {
            if !handle_command(&mut registry, cmd).await? {
                break;
            }
        } else {
            ask(&mut registry, input, language).await?;
        }
        print_notices(&mut registry);
        if let Ok(AuthEvent::LoggedOut) = auth_events.try_recv() {
            eprintln!("session expired; run `chakra login` again");
            break;
        }
    }
    Ok(())
}

/// Returns false when the user asked to leave.
async fn handle_command(
    registry: &mut SessionRegistry<ChatClient>,
    cmd: &str,
) -> anyhow::Result<bool> {
    let (name, arg) = cmd.split_once(' ').unwrap_or((cmd, ""));
    let arg = arg.trim();
    match name {
        "exit" | "quit" => return Ok(false),
        "help" => {
            println!("{}", CHAT_HELP);
        }
        "new" => {
            let id = registry.new_session();
            println!("new conversation {}", id);
        }
        "sessions" => {
            registry.reload_sessions().await;
            let active = registry.active_id().map(str::to_string);
            for s in registry.sessions() {
                let marker = if Some(&s.id) == active.as_ref() { "*" } else { " " };
                println!("{} {}  {}", marker, s.id, s.title);
            }
        }
        "switch" => match registry.select_session(arg).await {
            Ok(()) => print_thread(registry),
            Err(e) => eprintln!("! failed to load conversation: {}", e),
        },
        "rename" => {
            let Some(id) = registry.active_id().map(str::to_string) else {
                eprintln!("! no active conversation");
                return Ok(true);
            };
            match registry.rename_session(&id, arg).await {
                Ok(()) => println!("renamed"),
                Err(e) => eprintln!("! failed to rename chat: {}", e),
            }
        }
        "share" => match registry.share_active().await {
            Ok(share_id) => println!("share id: {}", share_id),
            Err(ChatError::NotSealed) => eprintln!("! the last reply is incomplete; ask again before sharing"),
            Err(e) => eprintln!("! failed to create share link: {}", e),
        },
        "copy" => {
            let last = registry.messages().len().checked_sub(1);
            match last.and_then(|i| registry.shareable_text(i)) {
                Some(text) => println!("{}", text),
                None => eprintln!("! nothing complete to copy yet"),
            }
        }
        other => eprintln!("! unknown command /{}", other),
    }
    Ok(true)
}

/// One turn, streamed to stdout. Ctrl-C abandons the reply and releases the connection.
async fn ask(
    registry: &mut SessionRegistry<ChatClient>,
    query: &str,
    language: TargetLanguage,
) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    let mut write_error = None;
    let outcome = registry
        .send(
            query,
            language,
            &mut |text: &str| echo(&mut stdout, text, &mut write_error),
            interrupted(),
        )
        .await;
    writeln!(stdout)?;
    if let Some(e) = write_error {
        return Err(e.into());
    }
    match outcome {
        Ok(TurnOutcome::Sealed) => {
            if let Some(reply) = registry.messages().last() {
                print_sources(reply);
            }
        }
        Ok(TurnOutcome::Failed(reason)) => eprintln!("! failed to get AI response: {}", reason),
        Ok(TurnOutcome::Abandoned) => println!("[cancelled]"),
        Err(ChatError::Api(e)) => eprintln!("! failed to get AI response: {}", e),
        Err(e) => eprintln!("! {}", e),
    }
    Ok(())
}

fn print_sources(entry: &chakra::chat::ThreadEntry) {
    let Some(sources) = entry.message.sources.as_ref().filter(|s| !s.is_empty()) else {
        return;
    };
    println!("sources:");
    for s in sources {
        match &s.storage_url {
            Some(url) => println!("  - {} ({})", s.file_name, url),
            None => println!("  - {}", s.file_name),
        }
    }
}

fn print_thread(registry: &SessionRegistry<ChatClient>) {
    for entry in registry.messages() {
        let who = if entry.is_assistant() { "<" } else { ">" };
        println!("{} {}", who, entry.message.content.trim());
        if entry.is_assistant() {
            print_sources(entry);
        }
    }
}
