mod assertion;
mod browser;
mod clicker;
mod context;
mod coordinator;
mod errors;
mod evidence;
mod executors;
mod limits;
mod loader;
mod locator;
mod orchestrator;
mod protocol;
mod retry;
mod session;
mod settings;
mod telemetry;
mod validation;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use browser::BrowserLauncher;
use coordinator::CoordinatorClient;
use errors::AgentError;
use orchestrator::ActionOrchestrator;
use session::SessionManager;
use settings::AgentSettings;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "sri-agent")]
#[command(about = "Assisted SRI portal agent", long_about = None)]
struct Cli {
    /// URL base do coordenador (ANEXO_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Token do agente (AGENT_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Importação alvo (IMPORTACION_ID)
    #[arg(long, global = true)]
    importacion: Option<String>,

    /// Arquivo de fluxo (AGENT_FLOW_CONFIG)
    #[arg(long, global = true)]
    flow_config: Option<PathBuf>,

    /// Logs em nível debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Testa o token contra /api/agent/me
    CheckToken,

    /// Baixa e imprime o plan.json da importação
    Plan,

    /// Valida o arquivo de fluxo inteiro
    Validate,

    /// Sessão assistida: abre o navegador e executa ações sob comando
    Assist {
        /// Navegador sem janela (AGENT_HEADLESS)
        #[arg(long)]
        headless: bool,
    },
}

fn apply_overrides(cli: &Cli, mut settings: AgentSettings) -> AgentSettings {
    if let Some(url) = &cli.base_url {
        settings.base_url = url.clone();
    }
    if let Some(token) = &cli.token {
        settings.token = Some(token.clone());
    }
    if let Some(id) = &cli.importacion {
        settings.importacion_id = Some(id.clone());
    }
    if let Some(path) = &cli.flow_config {
        settings.flow_config = path.clone();
    }
    if let Commands::Assist { headless: true } = cli.command {
        settings.headless = true;
    }
    settings
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_telemetry(TelemetryConfig::from_env().verbose(cli.verbose)) {
        eprintln!("⚠️  Telemetria indisponível: {}", e);
    }

    let settings = apply_overrides(&cli, AgentSettings::from_env());
    let outcome = match &cli.command {
        Commands::CheckToken => check_token(&settings).await,
        Commands::Plan => print_plan(&settings).await,
        Commands::Validate => validate(&settings),
        Commands::Assist { .. } => assist(&settings).await,
    };

    shutdown_telemetry();

    if let Err(e) = outcome {
        match e.downcast_ref::<AgentError>() {
            Some(agent) => eprintln!("❌ {}", agent.user_message()),
            None => eprintln!("❌ {:#}", e),
        }
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn client(settings: &AgentSettings) -> anyhow::Result<CoordinatorClient> {
    let token = settings.require_token()?;
    Ok(CoordinatorClient::new(settings.base_url.clone(), token)?)
}

async fn check_token(settings: &AgentSettings) -> anyhow::Result<()> {
    let me = client(settings)?.check_token().await?;
    println!("✅ Token válido em {}", settings.base_url);
    print_json(&me)
}

async fn print_plan(settings: &AgentSettings) -> anyhow::Result<()> {
    let id = settings.require_importacion_id()?;
    let plan = client(settings)?.fetch_plan_raw(id).await?;
    print_json(&plan)
}

fn validate(settings: &AgentSettings) -> anyhow::Result<()> {
    let config = loader::load_flow_config(&settings.flow_config)?;
    let issues = validation::validate_flow_config(&config, &settings.limits);
    if issues.is_empty() {
        println!("✅ {} OK", settings.flow_config.display());
        return Ok(());
    }
    for issue in &issues {
        println!("   - {}", issue);
    }
    Err(AgentError::ConfigInvalid { issues }.into())
}

#[cfg(feature = "chrome")]
fn launcher(settings: &AgentSettings) -> anyhow::Result<Box<dyn BrowserLauncher>> {
    Ok(Box::new(browser::chrome::ChromeLauncher {
        headless: settings.headless,
        chrome_path: settings.chrome_path.clone(),
    }))
}

#[cfg(not(feature = "chrome"))]
fn launcher(_settings: &AgentSettings) -> anyhow::Result<Box<dyn BrowserLauncher>> {
    anyhow::bail!("binário compilado sem a feature `chrome`; recompile com --features chrome")
}

const ASSIST_HELP: &str = "\
comandos: open | goto <url> | login | status | plan | provider | invoice |
          prepare | confirm | run <fluxo> | shot [rótulo] | quit";

async fn assist(settings: &AgentSettings) -> anyhow::Result<()> {
    let id = settings.require_importacion_id()?.to_string();
    let coordinator = Arc::new(client(settings)?);
    let session = SessionManager::new(launcher(settings)?);
    let mut agent = ActionOrchestrator::new(session, coordinator, id, settings)?;

    println!("🚀 Sessão assistida ({})", settings.flow_config.display());
    run_assist(
        &mut agent,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;
    println!("🏁 Sessão encerrada.");
    Ok(())
}

/// Roda o loop de comandos e fecha o navegador em qualquer saída, inclusive
/// quando a leitura ou a escrita do terminal falha.
async fn run_assist<R, W>(agent: &mut ActionOrchestrator, input: R, output: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = assist_loop(agent, input, output).await;
    let closed = agent.teardown().await;
    outcome?;
    closed?;
    Ok(())
}

async fn assist_loop<R, W>(agent: &mut ActionOrchestrator, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(format!("{}\n", ASSIST_HELP).as_bytes()).await?;

    let mut lines = input.lines();
    loop {
        output.write_all(b"sri> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await.context("falha lendo stdin")? else {
            break;
        };
        let line = line.trim();
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        let result = match command {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                output.write_all(format!("{}\n", ASSIST_HELP).as_bytes()).await?;
                continue;
            }
            "open" => agent.open_browser().await.and_then(to_json),
            "goto" => agent.goto(arg).await.and_then(to_json),
            "login" => agent.mark_logged_in().await.and_then(to_json),
            "status" => agent.status().await.and_then(to_json),
            "plan" => agent.load_plan().await.and_then(to_json),
            "provider" => agent.provider_open().await.and_then(to_json),
            "invoice" => agent.invoice_open().await.and_then(to_json),
            "prepare" => agent.apply_prepare().await.and_then(to_json),
            "confirm" => agent.apply_confirm().await.and_then(to_json),
            "run" if !arg.is_empty() => agent.run_flow(arg).await.and_then(to_json),
            "shot" => agent.screenshot(Some(arg)).await.and_then(to_json),
            other => {
                let text = format!("❓ comando desconhecido: {}\n{}\n", other, ASSIST_HELP);
                output.write_all(text.as_bytes()).await?;
                continue;
            }
        };

        let text = match result {
            Ok(json) => format!("✅ {}\n", json),
            Err(e) => format!("❌ {}\n", e.user_message()),
        };
        output.write_all(text.as_bytes()).await?;
    }
    Ok(())
}

fn to_json<T: Serialize>(value: T) -> Result<String, AgentError> {
    serde_json::to_string_pretty(&value)
        .map_err(|e| AgentError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}
