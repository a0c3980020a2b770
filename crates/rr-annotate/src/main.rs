use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use rr_core::core::{AnnotatorId, Judgment, JudgmentField, UnitId};
use rr_session::bootstrap::{self, RuntimeConfig};
use rr_session::config::AppConfig;
use rr_session::coordinator::{NavOutcome, SessionCoordinator};
use rr_session::logging;
use rr_store::PersistenceGateway;

#[derive(Debug, Parser)]
#[command(name = "rr-annotate", about = "Interactive rewrite annotation")]
struct Args {
    /// Path to the configuration file. Defaults apply when it does not exist.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Annotator name; prompted for when omitted.
    #[arg(long)]
    annotator: Option<String>,
    /// Unit to open instead of the next one in the annotator's queue.
    #[arg(long)]
    unit: Option<String>,
}

const HELP: &str = "\
  0 / 1        question does not / does require a rewrite
  r <0|1>      same, explicit form (empty clears)
  c <0|1>      enough context (empty clears)
  n / p        next / previous turn
  N / P        next / previous dialog
  u+ / u-      next / previous unit in your queue
  v            verify the saved copy
  h            show this help
  q            save and quit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Judge(JudgmentField, String),
    Next,
    Previous,
    NextDialog,
    PreviousDialog,
    NextUnit,
    PreviousUnit,
    Verify,
    Help,
    Quit,
}

fn parse_action(input: &str) -> Option<Action> {
    let input = input.trim();
    let action = match input {
        "0" | "1" => Action::Judge(JudgmentField::RequiresRewrite, input.to_owned()),
        "n" => Action::Next,
        "p" => Action::Previous,
        "N" => Action::NextDialog,
        "P" => Action::PreviousDialog,
        "u+" => Action::NextUnit,
        "u-" => Action::PreviousUnit,
        "v" => Action::Verify,
        "h" | "help" | "?" => Action::Help,
        "q" | "quit" | "exit" => Action::Quit,
        _ => {
            let (command, value) = input.split_once(' ').unwrap_or((input, ""));
            let field = match command {
                "r" => JudgmentField::RequiresRewrite,
                "c" => JudgmentField::EnoughContext,
                _ => return None,
            };
            Action::Judge(field, value.trim().to_owned())
        }
    };
    Some(action)
}

fn prompt_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(input.trim().to_owned())),
        Err(err) => Err(err),
    }
}

fn load_runtime(path: &Path) -> Result<RuntimeConfig, anyhow::Error> {
    let config = if path.exists() {
        AppConfig::from_file(path)?
    } else {
        AppConfig::default()
    };
    let mut runtime = bootstrap::into_runtime(config)?;
    if runtime.logging.file.is_none() {
        // keep the prompt readable
        runtime.logging.level = "warn".to_owned();
    }
    Ok(runtime)
}

fn judgment_text(value: Option<Judgment>) -> String {
    match value {
        None => "n/a".dimmed().to_string(),
        Some(Judgment::Unset) => "-".yellow().to_string(),
        Some(judgment) => judgment.to_string().bright_green().to_string(),
    }
}

fn render(session: &SessionCoordinator) {
    let cursor = session.current_position();
    let Some((dialog_id, dialog)) = session.current_dialog() else {
        return;
    };
    let progress = session.progress();
    let queue = session
        .assignment()
        .map(|record| format!(" ({}/{})", record.unit_index + 1, record.units.len()))
        .unwrap_or_default();

    println!();
    println!(
        "{}",
        format!(
            "unit {}{queue} | dialog {dialog_id} | turn {}/{} | {}/{} judged",
            session.unit_key().unit,
            cursor.turn_index + 1,
            dialog.annotations().len(),
            progress.completed,
            progress.total
        )
        .bright_cyan()
    );

    match session.current_dialog_context(cursor.turn_index) {
        Ok(context) => {
            for turn in context {
                match turn.answer {
                    Some(answer) => {
                        println!("  Q{}: {}", turn.turn_num, turn.question);
                        println!("  A{}: {}", turn.turn_num, answer.dimmed());
                    }
                    None => println!("{}", format!("> Q{}: {}", turn.turn_num, turn.question).bold()),
                }
            }
        }
        Err(err) => eprintln!("{}", format!("Error: {err}").red()),
    }

    if let Some(options) = session.rewrite_options().filter(|options| !options.is_empty()) {
        println!("  Rewrites:");
        for (i, (key, candidate)) in options.presentation_order.iter().enumerate() {
            let duplicates = options.duplicates.get(key).map_or(0, Vec::len);
            let suffix = if duplicates > 0 {
                format!(" (+{duplicates} identical)")
            } else {
                String::new()
            };
            println!("    [{}] {}{}", i + 1, candidate.text, suffix.dimmed());
        }
    }

    if let Some(annotation) = session.current_annotation() {
        println!(
            "  Requires rewrite: {}   Enough context: {}",
            judgment_text(annotation.judgment(JudgmentField::RequiresRewrite)),
            judgment_text(annotation.judgment(JudgmentField::EnoughContext))
        );
    }
}

/// Prints the outcome; returns `false` once the session has finished.
fn report(outcome: NavOutcome) -> bool {
    match outcome {
        NavOutcome::Moved(_) => true,
        NavOutcome::UnitChanged { unit, warning, .. } => {
            if let Some(warning) = warning {
                eprintln!("{}", format!("Warning: {warning}").yellow());
            }
            println!("{}", format!("Now annotating unit {unit}.").bright_green());
            true
        }
        NavOutcome::Rejected(rejection) => {
            eprintln!("{}", rejection.to_string().yellow());
            true
        }
        NavOutcome::Finished { warning } => {
            if let Some(warning) = warning {
                eprintln!("{}", format!("Warning: {warning}").yellow());
            }
            println!("{}", "All assigned work is finished. Thank you!".bright_green());
            false
        }
        NavOutcome::Unchanged => {
            eprintln!("{}", "Nothing further in that direction.".yellow());
            true
        }
    }
}

async fn start_session(args: &Args, runtime: &RuntimeConfig) -> Result<SessionCoordinator, anyhow::Error> {
    let annotator = match args.annotator.clone() {
        Some(name) => name,
        None => loop {
            match prompt_line("Annotator name: ")? {
                Some(name) if !name.is_empty() => break name,
                Some(_) => continue,
                None => anyhow::bail!("no annotator name given"),
            }
        },
    };

    let store = bootstrap::open_store(&runtime.store)?;
    let session = SessionCoordinator::start(
        PersistenceGateway::new(store),
        AnnotatorId::new(annotator),
        args.unit.clone().map(UnitId::new),
        runtime.session,
    )
    .await?;
    Ok(session)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let runtime = match load_runtime(&args.config) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{}", format!("Config invalid: {err:#}").red());
            std::process::exit(1);
        }
    };
    if let Err(err) = logging::init(&runtime.logging) {
        eprintln!("{}", format!("Error: {err:#}").red());
        std::process::exit(1);
    }

    let mut session = match start_session(&args, &runtime).await {
        Ok(session) => session,
        Err(err) => {
            eprintln!("{}", format!("Error: {err:#}").red());
            std::process::exit(1);
        }
    };
    tracing::info!(session = %session.session_id(), "interactive session started");
    println!("{}", "Type h for help.".bright_cyan());

    loop {
        render(&session);

        let input = match prompt_line(&format!("{} ", ">".bright_cyan())) {
            Ok(Some(input)) => input,
            Ok(None) => {
                println!();
                break;
            }
            Err(err) => {
                eprintln!("{}", format!("Failed to read input: {err}").red());
                continue;
            }
        };
        if input.is_empty() {
            continue;
        }

        let Some(action) = parse_action(&input) else {
            eprintln!("{}", "Unknown command, type h for help.".yellow());
            continue;
        };

        let keep_going = match action {
            Action::Judge(field, raw) => {
                if let Err(err) = session.set_judgment_input(field, &raw) {
                    eprintln!("{}", format!("{err}").yellow());
                }
                true
            }
            Action::Next => report(session.advance().await),
            Action::Previous => report(session.retreat().await),
            Action::NextDialog => report(session.advance_group().await),
            Action::PreviousDialog => report(session.retreat_group().await),
            Action::NextUnit => report(session.advance_unit().await),
            Action::PreviousUnit => report(session.retreat_unit().await),
            Action::Verify => {
                match session.verify_integrity().await {
                    None => println!("{}", "Saved copy matches.".bright_green()),
                    Some(warning) => eprintln!("{}", format!("Warning: {warning}").yellow()),
                }
                true
            }
            Action::Help => {
                println!("{HELP}");
                true
            }
            Action::Quit => false,
        };
        if !keep_going {
            break;
        }
    }

    let flushed = session.shutdown().await;
    if flushed.failed > 0 {
        eprintln!(
            "{}",
            format!(
                "Warning: {} saves failed; your work is kept as a draft.",
                flushed.failed
            )
            .yellow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shortcuts() {
        assert_eq!(
            parse_action("1"),
            Some(Action::Judge(JudgmentField::RequiresRewrite, "1".to_owned()))
        );
        assert_eq!(parse_action(" n "), Some(Action::Next));
        assert_eq!(parse_action("P"), Some(Action::PreviousDialog));
        assert_eq!(parse_action("u+"), Some(Action::NextUnit));
        assert_eq!(parse_action("exit"), Some(Action::Quit));
    }

    #[test]
    fn test_parse_explicit_judgments() {
        assert_eq!(
            parse_action("c 0"),
            Some(Action::Judge(JudgmentField::EnoughContext, "0".to_owned()))
        );
        assert_eq!(
            parse_action("r"),
            Some(Action::Judge(JudgmentField::RequiresRewrite, String::new()))
        );
        assert_eq!(
            parse_action("r 5"),
            Some(Action::Judge(JudgmentField::RequiresRewrite, "5".to_owned()))
        );
        assert_eq!(parse_action("x 1"), None);
    }
}
