//! CLI interface for ofw - Our Family Wizard messages from the terminal.

use std::env;
use std::io::{self, BufRead, IsTerminal, Write as _};
use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use env_logger::fmt::WriteStyle;
use log::{LevelFilter, debug};
use serde::Serialize;

use ofw_core::ofw::models::{
    FolderList, MessageDetail, MessageQuery, MessageSummary, SortDirection,
};
use ofw_core::ofw::transport::{DefaultTransportFactory, TransportKind};
use ofw_core::ofw::DebugArtifacts;
use ofw_core::paths::write_default_config;
use ofw_core::schema::REPO_URL;
use ofw_core::{
    AppConfig, AppPaths, AuthBridge, Credentials, OfwClient, TokenCache, generate_schema,
};

const APP_NAME: &str = "ofw";

fn main() -> anyhow::Result<()> {
    try_main()
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Command::Auth { subcommand } => rt.block_on(handle_auth(&ctx, subcommand)),
        Command::Folders => rt.block_on(handle_folders(&ctx)),
        Command::Messages(cmd) => rt.block_on(handle_messages(&ctx, cmd)),
        Command::Read { id } => rt.block_on(handle_read(&ctx, id)),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => {
            handle_completions(shell);
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "ofw",
    author,
    version,
    about = "Our Family Wizard messages from the terminal",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

/// Common CLI options shared across all subcommands.
#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Override the config file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
    /// Reduce output to only errors.
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    pub quiet: bool,
    /// Increase logging verbosity (stackable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,
    /// Enable trace logging.
    #[arg(long, global = true)]
    pub trace: bool,
    /// Output machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Disable ANSI colors in output.
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    pub no_color: bool,
    /// Control color output.
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    pub color: ColorOption,
    /// Do not change anything on disk.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,
    /// Assume "yes" for interactive prompts.
    #[arg(short = 'y', long = "yes", alias = "force", global = true)]
    pub assume_yes: bool,
    /// Read credentials from this KEY=value file (default: .env).
    #[arg(long = "env-file", value_name = "PATH", global = true)]
    pub env_file: Option<PathBuf>,
    /// Token cache file (default: data dir/auth_token.json).
    #[arg(long = "token-cache", value_name = "PATH", global = true)]
    pub token_cache: Option<PathBuf>,
    /// Login transport: browser or http.
    #[arg(long, value_name = "KIND", global = true)]
    pub transport: Option<TransportKind>,
    /// Show the browser window during login.
    #[arg(long, global = true)]
    pub headed: bool,
    /// Save screenshots and page snapshots of the login under the state dir.
    #[arg(long = "debug-artifacts", global = true)]
    pub debug_artifacts: bool,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorOption {
    /// Detect terminal capabilities automatically.
    Auto,
    /// Always emit ANSI color codes.
    Always,
    /// Never emit ANSI color codes.
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Authentication (login, logout, status).
    Auth {
        #[command(subcommand)]
        subcommand: AuthSubcommand,
    },
    /// List message folders with unread counts.
    Folders,
    /// List messages in a folder (inbox by default).
    Messages(MessagesCommand),
    /// Show one message with its body.
    Read {
        /// Message ID.
        id: u64,
    },
    /// Create config directories and default files.
    Init(InitCommand),
    /// Inspect and manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum AuthSubcommand {
    /// Check whether the cached token is still accepted.
    Status,
    /// Log in and cache a fresh token, even if the cached one still works.
    Login,
    /// Delete the cached token.
    Logout,
}

#[derive(Debug, Clone, Args)]
struct MessagesCommand {
    /// Folder ID or name (default: inbox).
    #[arg(short, long, value_name = "FOLDER")]
    folder: Option<String>,
    /// Page to show.
    #[arg(short, long, default_value_t = 1)]
    page: u32,
    /// Messages per page (at most 50).
    #[arg(short = 'n', long, default_value_t = 20)]
    size: u32,
    /// Oldest first.
    #[arg(long)]
    oldest_first: bool,
    /// Fetch every page instead of one.
    #[arg(short, long, group = "every_page")]
    all: bool,
    /// Only messages whose subject contains TERM (searches every page).
    #[arg(short, long, value_name = "TERM", group = "every_page")]
    search: Option<String>,
    /// Stop after this many pages with --all or --search (0 = no limit).
    #[arg(long, value_name = "N", requires = "every_page")]
    max_pages: Option<u32>,
}

impl MessagesCommand {
    /// Paging and sort options as an API query for `folder`.
    fn query(&self, folder: Option<u64>) -> MessageQuery {
        MessageQuery {
            folder,
            page: self.page.max(1),
            size: self.size,
            direction: if self.oldest_first {
                SortDirection::Asc
            } else {
                SortDirection::Desc
            },
            ..MessageQuery::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists.
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration.
    Show,
    /// Print the resolved config file path.
    Path,
    /// Print all resolved paths.
    Paths,
    /// Print the JSON schema.
    Schema,
    /// Regenerate the default configuration file.
    Reset,
}

// ─── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.as_deref())?;
        let mut config = AppConfig::load(&paths, common.dry_run)?;
        let paths = paths.apply_overrides(&config)?;

        if let Some(kind) = common.transport {
            config.auth.transport = kind;
        }
        if common.headed {
            config.auth.browser.headless = false;
        }
        config.auth.debug_artifacts |= common.debug_artifacts;

        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
        builder.filter_level(self.effective_log_level());

        let force_color = matches!(self.common.color, ColorOption::Always)
            || env::var_os("FORCE_COLOR").is_some();
        let disable_color = self.common.no_color
            || matches!(self.common.color, ColorOption::Never)
            || env::var_os("NO_COLOR").is_some()
            || (!force_color && !io::stderr().is_terminal());

        if disable_color {
            builder.write_style(WriteStyle::Never);
        } else if force_color {
            builder.write_style(WriteStyle::Always);
        } else {
            builder.write_style(WriteStyle::Auto);
        }

        builder.try_init().or_else(|err| {
            if self.common.verbose > 0 {
                eprintln!("logger already initialized: {err}");
            }
            Ok(())
        })
    }

    const fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            self.paths.log_dry_run();
            return Ok(());
        }
        self.paths.ensure_directories()
    }

    fn token_cache(&self) -> Result<TokenCache> {
        let path = self
            .config
            .token_cache_path(&self.paths, self.common.token_cache.as_deref())?;
        debug!("token cache: {}", path.display());
        Ok(TokenCache::new(path))
    }

    fn client(&self) -> Result<OfwClient> {
        OfwClient::from_config(&self.config).context("creating API client")
    }

    fn transport_factory(&self) -> DefaultTransportFactory {
        let artifacts = if self.config.auth.debug_artifacts && !self.common.dry_run {
            match DebugArtifacts::create(&self.paths.debug_dir()) {
                Ok(artifacts) => Some(artifacts),
                Err(e) => {
                    log::warn!("debug artifacts disabled: {e}");
                    None
                }
            }
        } else {
            None
        };
        DefaultTransportFactory::new(
            &self.config.service,
            &self.config.auth,
            self.config.runtime.request_timeout(),
        )
        .with_artifacts(artifacts)
    }

    /// Credentials from the environment or the env file, else an interactive prompt.
    fn credentials(&self) -> Result<Credentials> {
        if let Some(creds) = Credentials::resolve(self.common.env_file.as_deref()) {
            return Ok(creds);
        }
        if !io::stdin().is_terminal() {
            return Err(anyhow!(
                "no credentials: set OFW_USERNAME and OFW_PASSWORD or pass --env-file"
            ));
        }
        let username = prompt_line("OFW username: ")?;
        let password = prompt_password("OFW password: ")?;
        if username.is_empty() || password.is_empty() {
            return Err(anyhow!("username and password are required"));
        }
        Ok(Credentials::new(username, password))
    }

    /// A client holding a working token: the cached one if the server still
    /// accepts it, otherwise a fresh login.
    async fn authenticated_client(&self) -> Result<OfwClient> {
        let mut client = self.client()?;
        let mut bridge = AuthBridge::new(self.token_cache()?, &self.config.auth.storage_key);

        if bridge.try_cached(&mut client).await.is_some() {
            return Ok(client);
        }

        let credentials = self.credentials()?;
        let mut factory = self.transport_factory();
        bridge
            .login(&mut client, &credentials, &mut factory)
            .await
            .context("authentication failed")?;
        Ok(client)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("serializing output to JSON")?
        );
        Ok(())
    }
}

// ─── Handlers ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AuthStatus {
    token_cache: PathBuf,
    cached: bool,
    valid: bool,
}

async fn handle_auth(ctx: &RuntimeContext, cmd: AuthSubcommand) -> Result<()> {
    let cache = ctx.token_cache()?;

    match cmd {
        AuthSubcommand::Status => {
            let client = ctx.client()?;
            let token = cache.load();
            let valid = match token {
                Some(ref token) => cache.validate(&client, token).await,
                None => false,
            };
            let status = AuthStatus {
                token_cache: cache.path().to_path_buf(),
                cached: token.is_some(),
                valid,
            };

            if ctx.common.json {
                return RuntimeContext::print_json(&status);
            }
            match (status.cached, status.valid) {
                (true, true) => println!("Authenticated (cached token accepted)."),
                (true, false) => {
                    println!("Cached token rejected. Run 'ofw auth login' to log in again.");
                }
                (false, _) => println!("Not authenticated. Run 'ofw auth login' to log in."),
            }
            println!("Token cache: {}", status.token_cache.display());
            Ok(())
        }
        AuthSubcommand::Login => {
            if ctx.common.dry_run {
                log::info!("dry-run: would log in and write {}", cache.path().display());
                return Ok(());
            }
            let credentials = ctx.credentials()?;
            let mut client = ctx.client()?;
            let mut factory = ctx.transport_factory();
            let mut bridge = AuthBridge::new(cache, &ctx.config.auth.storage_key);

            eprintln!("Logging in as {} via {}...", credentials.username(), factory.kind());
            bridge
                .login(&mut client, &credentials, &mut factory)
                .await
                .context("login failed")?;

            let folders = client
                .list_folders(false)
                .await
                .context("token obtained but rejected by the API")?;
            println!(
                "Authenticated. Token cached at {} ({} folders visible).",
                bridge.cache().path().display(),
                folders.iter().count()
            );
            Ok(())
        }
        AuthSubcommand::Logout => {
            if ctx.common.dry_run {
                log::info!("dry-run: would delete {}", cache.path().display());
                return Ok(());
            }
            cache
                .clear()
                .with_context(|| format!("deleting {}", cache.path().display()))?;
            println!("Logged out.");
            Ok(())
        }
    }
}

async fn handle_folders(ctx: &RuntimeContext) -> Result<()> {
    let client = ctx.authenticated_client().await?;
    let folders = client.list_folders(true).await.context("listing folders")?;

    if ctx.common.json {
        return RuntimeContext::print_json(&folders);
    }
    print_folder_list(&folders);
    Ok(())
}

async fn handle_messages(ctx: &RuntimeContext, cmd: MessagesCommand) -> Result<()> {
    let client = ctx.authenticated_client().await?;

    let folder = match cmd.folder {
        Some(ref folder) => Some(resolve_folder(&client, folder).await?),
        None => None,
    };

    let query = cmd.query(folder);

    let messages = if let Some(ref term) = cmd.search {
        let found = client
            .search_messages(&query, term, cmd.max_pages)
            .await
            .with_context(|| format!("searching subjects for '{term}'"))?;
        if found.is_empty() && !ctx.common.json {
            println!("No subjects match '{term}'.");
            return Ok(());
        }
        found
    } else if cmd.all {
        client
            .list_all_messages(&query, cmd.max_pages)
            .await
            .context("listing messages")?
    } else {
        let page = client
            .list_messages(&query)
            .await
            .context("listing messages")?;
        if page.data.is_empty() && !ctx.common.json {
            println!("No messages on page {}.", query.page);
            return Ok(());
        }
        if !page.metadata.last && !ctx.common.json {
            let hint = format!("page {} - more with --page {}", query.page, query.page + 1);
            eprintln!("{}", dim(&hint));
        }
        page.data
    };

    if ctx.common.json {
        return RuntimeContext::print_json(&messages);
    }
    print_message_list(&messages);
    Ok(())
}

async fn handle_read(ctx: &RuntimeContext, id: u64) -> Result<()> {
    let client = ctx.authenticated_client().await?;
    let message = client
        .get_message(id)
        .await
        .with_context(|| format!("reading message {id}"))?;

    if ctx.common.json {
        return RuntimeContext::print_json(&message);
    }
    print_message(&message);
    Ok(())
}

/// A folder argument is an ID when numeric, otherwise a case-insensitive name.
async fn resolve_folder(client: &OfwClient, folder: &str) -> Result<u64> {
    if let Ok(id) = folder.parse::<u64>() {
        return Ok(id);
    }
    let folders = client.list_folders(false).await.context("listing folders")?;
    folder_id_by_name(&folders, folder)
}

fn folder_id_by_name(folders: &FolderList, name: &str) -> Result<u64> {
    folders.by_name(name).map(|f| f.id).ok_or_else(|| {
        let known: Vec<&str> = folders.iter().map(|f| f.name.as_str()).collect();
        anyhow!("no folder named '{name}' (have: {})", known.join(", "))
    })
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }
    if ctx.common.dry_run {
        log::info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }
    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                RuntimeContext::print_json(&ctx.config)?;
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Paths => {
            let token_cache = ctx
                .config
                .token_cache_path(&ctx.paths, ctx.common.token_cache.as_deref())?;
            if ctx.common.json {
                let paths = serde_json::json!({
                    "config": ctx.paths.config_file,
                    "data": ctx.paths.data_dir,
                    "state": ctx.paths.state_dir,
                    "token_cache": token_cache,
                    "debug": ctx.paths.debug_dir(),
                });
                RuntimeContext::print_json(&paths)?;
            } else {
                println!("config:      {}", ctx.paths.config_file.display());
                println!("data:        {}", ctx.paths.data_dir.display());
                println!("state:       {}", ctx.paths.state_dir.display());
                println!("token cache: {}", token_cache.display());
                println!("debug:       {}", ctx.paths.debug_dir().display());
            }
            Ok(())
        }
        ConfigCommand::Schema => {
            println!("{}", generate_schema(APP_NAME, REPO_URL)?);
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                log::info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}

// ─── Prompts ─────────────────────────────────────────────────────────

fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Read a secret with echo off.
fn prompt_password(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    terminal::enable_raw_mode().context("switching terminal to raw mode")?;
    let secret = read_secret();
    terminal::disable_raw_mode().context("restoring terminal mode")?;
    eprintln!();
    secret
}

fn read_secret() -> Result<String> {
    let mut secret = String::new();
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) = event::read()?
        else {
            continue;
        };
        match code {
            KeyCode::Enter => return Ok(secret),
            KeyCode::Char('c' | 'd') if modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(anyhow!("cancelled"));
            }
            KeyCode::Esc => return Err(anyhow!("cancelled")),
            KeyCode::Backspace => {
                secret.pop();
            }
            KeyCode::Char(c) => secret.push(c),
            _ => {}
        }
    }
}

// ─── Formatting helpers ──────────────────────────────────────────────

fn print_folder_list(folders: &FolderList) {
    for folder in folders.iter() {
        let kind = if folder.is_system { "[system]" } else { "[user]" };
        let unread = folder
            .unread_message_count
            .filter(|&n| n > 0)
            .map(|n| format!("  ({n} unread)"))
            .unwrap_or_default();
        println!("  {kind:>8}  {}{unread}", folder.name);
        println!("            {}", dim(&format!("id {}", folder.id)));
    }
}

fn print_message_list(messages: &[MessageSummary]) {
    let width = term_width();
    for m in messages {
        let marker = if m.read { " " } else { "*" };
        let files = if m.files > 0 {
            format!("  [{} file{}]", m.files, if m.files == 1 { "" } else { "s" })
        } else {
            String::new()
        };
        println!("{marker} {}  {}{files}", m.date.display(), bold(&m.subject));

        let from = if m.author.name.is_empty() {
            "(unknown)"
        } else {
            &m.author.name
        };
        let preview = m.preview.as_deref().unwrap_or_default().replace('\n', " ");
        let line = format!("{from}: {preview}");
        println!("  {}", truncate(&line, width.saturating_sub(4)));
        println!("  {}", dim(&format!("id {}", m.id)));
        println!();
    }
}

fn print_message(message: &MessageDetail) {
    let m = &message.summary;
    let width = term_width();

    println!("{}", bold(&m.subject));
    println!("From: {}", m.author.name);
    if !m.recipients.is_empty() {
        let to: Vec<String> = m
            .recipients
            .iter()
            .map(|r| match r.view_date {
                Some(ref seen) if !seen.display().is_empty() => {
                    format!("{} (viewed {})", r.user.name, seen.display())
                }
                _ => r.user.name.clone(),
            })
            .collect();
        println!("To:   {}", to.join(", "));
    }
    println!("Date: {}", m.date.display());
    println!("{}", dim(&"-".repeat(width.min(60))));

    let lines: Vec<String> = message.body.lines().map(str::to_string).collect();
    for line in wrap_lines(&lines, width.saturating_sub(2)) {
        println!("{line}");
    }

    if !message.attachments.is_empty() {
        println!();
        for a in &message.attachments {
            let size = a.size.map(|s| format!(" ({})", human_size(s))).unwrap_or_default();
            println!("  [file] {}{size}", a.name);
        }
    }
}

/// Terminal width, clamped to a reasonable range.
fn term_width() -> usize {
    terminal::size()
        .map_or(80, |(w, _)| usize::from(w))
        .clamp(40, 200)
}

/// Wrap lines to fit a maximum width, handling long words by hard-breaking.
fn wrap_lines(lines: &[String], max_width: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in lines {
        if visible_len(line) <= max_width {
            result.push(line.clone());
            continue;
        }
        let mut current = String::new();
        let mut current_len = 0;
        for word in line.split_whitespace() {
            let wlen = visible_len(word);
            if current.is_empty() {
                if wlen > max_width {
                    let mut chunk = String::new();
                    let mut clen = 0;
                    for ch in word.chars() {
                        let ch_w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(1);
                        if clen + ch_w > max_width && !chunk.is_empty() {
                            result.push(chunk);
                            chunk = String::new();
                            clen = 0;
                        }
                        chunk.push(ch);
                        clen += ch_w;
                    }
                    current = chunk;
                    current_len = clen;
                } else {
                    current = word.to_string();
                    current_len = wlen;
                }
            } else if current_len + 1 + wlen <= max_width {
                current.push(' ');
                current.push_str(word);
                current_len += 1 + wlen;
            } else {
                result.push(current);
                current = word.to_string();
                current_len = wlen;
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}

/// Visible length of a string (ignoring ANSI escape sequences).
fn visible_len(s: &str) -> usize {
    let mut len = 0;
    let mut in_escape = false;
    for ch in s.chars() {
        if in_escape {
            if ch.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else if ch == '\x1b' {
            in_escape = true;
        } else {
            len += unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        }
    }
    len
}

fn human_size(bytes: u64) -> String {
    match bytes {
        0..1024 => format!("{bytes} B"),
        1024..1_048_576 => format!("{:.1} KB", bytes as f64 / 1024.0),
        _ => format!("{:.1} MB", bytes as f64 / 1_048_576.0),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ofw",
            "messages",
            "--folder",
            "Sent",
            "--all",
            "--max-pages",
            "2",
            "--transport",
            "http",
            "--token-cache",
            "/tmp/tok.json",
        ])
        .expect("parse");

        assert_eq!(cli.common.transport, Some(TransportKind::Http));
        assert_eq!(cli.common.token_cache, Some(PathBuf::from("/tmp/tok.json")));
        let Command::Messages(cmd) = cli.command else {
            panic!("expected messages command");
        };
        assert_eq!(cmd.folder.as_deref(), Some("Sent"));
        assert!(cmd.all);
        assert_eq!(cmd.max_pages, Some(2));
    }

    #[test]
    fn max_pages_needs_all_or_search() {
        assert!(Cli::try_parse_from(["ofw", "messages", "--max-pages", "2"]).is_err());
        assert!(
            Cli::try_parse_from(["ofw", "messages", "--search", "pickup", "--max-pages", "2"])
                .is_ok()
        );
    }

    #[test]
    fn paging_options_apply_to_every_page() {
        let cli = Cli::try_parse_from(["ofw", "messages", "--all", "-n", "10", "--oldest-first"])
            .expect("parse");
        let Command::Messages(cmd) = cli.command else {
            panic!("expected messages command");
        };
        let query = cmd.query(Some(7));
        assert_eq!(query.folder, Some(7));
        assert_eq!(query.size, 10);
        assert_eq!(query.direction, SortDirection::Asc);
        assert_eq!(query.page, 1);
    }

    #[test]
    fn rejects_unknown_transport() {
        assert!(Cli::try_parse_from(["ofw", "folders", "--transport", "carrier-pigeon"]).is_err());
    }

    #[test]
    fn folder_names_resolve_case_insensitively() {
        let folders: FolderList = serde_json::from_str(
            r#"{"systemFolders": [{"id": 3, "name": "Inbox", "folderType": "INBOX"}],
                "userFolders": [{"id": 42, "name": "School"}]}"#,
        )
        .expect("folders");
        assert_eq!(folder_id_by_name(&folders, "school").expect("found"), 42);
        let err = folder_id_by_name(&folders, "Archive").expect_err("missing");
        assert!(err.to_string().contains("Inbox, School"));
    }

    #[tokio::test]
    async fn api_errors_keep_their_source() {
        let client = OfwClient::new(
            &ofw_core::config::ServiceConfig::default(),
            std::time::Duration::from_secs(1),
        )
        .expect("client");
        let err = resolve_folder(&client, "School").await.expect_err("no token");

        assert_eq!(err.to_string(), "listing folders");
        assert!(matches!(
            err.downcast_ref::<ofw_core::CoreError>(),
            Some(ofw_core::CoreError::NotAuthenticated)
        ));
    }

    #[test]
    fn wrap_breaks_on_words_and_long_tokens() {
        let lines = vec!["see you at the school gate at five".to_string()];
        assert_eq!(
            wrap_lines(&lines, 12),
            vec!["see you at", "the school", "gate at five"]
        );

        let long = vec!["abcdefghij".to_string()];
        assert_eq!(wrap_lines(&long, 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn visible_len_skips_escapes() {
        assert_eq!(visible_len(&dim("abc")), 3);
    }

    #[test]
    fn truncate_and_sizes() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long subject line", 10), "a long ...");
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
    }
}
