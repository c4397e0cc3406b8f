//! `verimath` command line

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use verimath_backend::BackendRegistry;
use verimath_core::{EngineConfig, GovernanceContext, MathEngine, ModeResult, Treaty};

fn cli() -> Command {
    Command::new("verimath")
        .version(verimath_core::VERSION)
        .about("Verification-first math engine")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("solve")
                .about("Solve a problem and verify the answer")
                .arg(Arg::new("query").required(true).help("Problem in natural language"))
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine configuration (TOML)"),
                )
                .arg(
                    Arg::new("treaty")
                        .long("treaty")
                        .help("Active governance treaty id, needed for critical-impact problems"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the full result as JSON"),
                ),
        )
        .subcommand(Command::new("capabilities").about("List backends and the methods they declare"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn solve(args: &ArgMatches) -> Result<bool> {
    let query = args.get_one::<String>("query").context("missing query")?;
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let governance = args.get_one::<String>("treaty").map(|id| {
        GovernanceContext::new().with_treaty(Treaty {
            id: id.clone(),
            active: true,
        })
    });

    let engine = MathEngine::new(Arc::new(BackendRegistry::with_defaults()), config);
    let out = engine.process(query, governance.as_ref()).await;
    log_outcome(&out);

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", out.explanation.render());
        println!("Confidence: {:.2}", out.confidence());
        for error in &out.errors {
            println!("Error: {error}");
        }
        println!("{}", out.audit.cognition.render());
    }
    Ok(out.success)
}

fn log_outcome(out: &ModeResult) {
    let codes: Vec<String> = out.error_codes().iter().map(ToString::to_string).collect();
    tracing::info!(
        run_id = %out.run_id,
        success = out.success,
        confidence = out.confidence(),
        errors = ?codes,
        elapsed_ms = out.total_time_ms,
        "run finished"
    );
}

fn capabilities() -> Result<()> {
    let table = BackendRegistry::with_defaults().capability_table();
    tracing::debug!(backends = table.backends.len(), "capability table");
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("solve", args)) => {
            let solved = solve(args).await?;
            std::process::exit(if solved { 0 } else { 1 });
        }
        Some(("capabilities", _)) => capabilities(),
        _ => anyhow::bail!("unknown subcommand"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn outcome_is_logged() {
        let out = MathEngine::with_defaults().process("tell me a story", None).await;
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || log_outcome(&out));

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("run finished"), "{text}");
        assert!(text.contains("success=false"), "{text}");
        assert!(text.contains("INTENT_UNCLEAR"), "{text}");
    }

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn solve_accepts_flags() {
        let matches = cli()
            .try_get_matches_from(["verimath", "solve", "solve x^2 - 4 = 0", "--json", "--treaty", "t-1"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "solve");
        assert!(args.get_flag("json"));
        assert_eq!(args.get_one::<String>("treaty").map(String::as_str), Some("t-1"));
    }
}
