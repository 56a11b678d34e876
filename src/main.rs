use anyhow::Context;
use copilot::cli::{
    commands,
    init::{self, InitConfig, InitResult},
    output::Output,
    Cli, Commands,
};
use copilot::{Copilot, CopilotConfig, CopilotConfigManager, Principal};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let quiet = if cli.verbose { "debug" } else { "warn" };
    let result = match cli.command {
        Some(Commands::Init {
            ref path,
            force,
            minimal,
        }) => {
            init_tracing(quiet, false);
            let config = InitConfig {
                path: path.clone(),
                force,
                minimal,
            };
            return match init::run(config, &output) {
                InitResult::Success => Ok(()),
                InitResult::AlreadyExists => std::process::exit(1),
                InitResult::Error(e) => Err(anyhow::anyhow!(e)),
            };
        }
        Some(Commands::Check) => {
            init_tracing(quiet, false);
            commands::check(&cli.config, &output)
        }
        Some(Commands::Route { ref text }) => {
            init_tracing(quiet, false);
            commands::route(&cli.config, text, &output)
        }
        Some(Commands::Agents) => {
            init_tracing(quiet, false);
            commands::agents(&cli.config, &output)
        }
        None => return run_session(&cli, &output).await,
    };

    if let Err(e) = result {
        output.error(&e.to_string());
        std::process::exit(1);
    }
    Ok(())
}

/// `RUST_LOG` wins over `default_level`. Logs go to stderr.
fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Identity for the interactive session, from COPILOT_USER, COPILOT_ORG and
/// comma-separated COPILOT_ROLES.
fn session_principal() -> Principal {
    let user = std::env::var("COPILOT_USER").unwrap_or_else(|_| "local".to_string());
    let org = std::env::var("COPILOT_ORG").unwrap_or_else(|_| "local".to_string());
    let roles = std::env::var("COPILOT_ROLES").unwrap_or_default();
    roles
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .fold(Principal::new(user, org), |p, role| p.with_role(role))
}

struct Session {
    copilot: Arc<Copilot>,
    monitor: CancellationToken,
}

impl Session {
    async fn start(config: &CopilotConfig, shutdown: &CancellationToken) -> anyhow::Result<Self> {
        let copilot = Arc::new(
            Copilot::from_config(config)
                .await
                .context("failed to build the copilot from configuration")?,
        );
        let monitor = shutdown.child_token();
        copilot.start_health_monitor(monitor.clone());
        Ok(Self { copilot, monitor })
    }
}

/// Read utterances from stdin, one per line, and print each response.
async fn run_session(cli: &Cli, output: &Output) -> anyhow::Result<()> {
    let mut manager = CopilotConfigManager::new(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let mut active = manager.config();

    let level = if cli.verbose {
        "debug"
    } else {
        active.telemetry.log_level.as_str()
    };
    init_tracing(level, active.telemetry.json);

    for warning in active.validate_with_warnings()? {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
    }
    manager.start_watching()?;

    let shutdown = CancellationToken::new();
    let mut session = Session::start(&active, &shutdown).await?;
    let principal = session_principal();
    let conversation_id = uuid::Uuid::new_v4().to_string();

    output.banner();
    output.info(&format!(
        "{} agents registered, conversation {}",
        session.copilot.registry().len(),
        conversation_id
    ));
    output.hint("Type a request and press enter; Ctrl-D to exit, Ctrl-C to cancel a running request");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let latest = manager.config();
        if !Arc::ptr_eq(&latest, &active) {
            match Session::start(&latest, &shutdown).await {
                Ok(next) => {
                    session.monitor.cancel();
                    session = next;
                    active = latest;
                    output.info("Configuration changed; agents re-registered");
                }
                Err(e) => output.warning(&format!("Keeping previous agents: {:#}", e)),
            }
        }

        let cancel = CancellationToken::new();
        let request = session
            .copilot
            .handle_with_cancel(text, &conversation_id, &principal, &cancel);
        tokio::pin!(request);
        let response = tokio::select! {
            response = &mut request => response,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                request.await
            }
        };

        output.newline();
        println!("{}", response.render_markdown());
        if cli.verbose {
            output.kv("status", &format!("{:?}", response.status));
            output.kv("latency", &format!("{}ms", response.diagnostics.elapsed_ms));
        }
    }

    shutdown.cancel();
    manager.stop_watching();

    let stats = session.copilot.stats();
    output.header("Session");
    output.kv("requests", &stats.total_requests.to_string());
    output.kv("success rate", &format!("{:.1}%", stats.success_rate));
    for recommendation in &stats.recommendations {
        output.list_item(recommendation);
    }
    Ok(())
}
