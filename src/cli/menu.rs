//! Interactive menu, a thin loop over the subcommands.

use std::env;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use crate::cli::commands::archives::{fetch_archives, run_list};
use crate::cli::commands::jobs::{run_clear, run_log, run_stop, status_view};
use crate::cli::commands::setup::run_setup;
use crate::cli::commands::test::{preflight, probe, run_test};
use crate::cli::commands::transfer::{choose_archive, run_upload};
use crate::cli::commands::{ask, Context};
use crate::cli::i18n::{tr, Text};
use crate::error::{RelayError, Result};
use crate::job::start_download;
use crate::job::worker::format_duration;
use crate::status::Severity;
use crate::types::Lang;

const ENTRIES: [(&str, Text); 11] = [
    ("1", Text::Test),
    ("2", Text::Upload),
    ("3", Text::Download),
    ("4", Text::List),
    ("5", Text::Status),
    ("6", Text::Stop),
    ("7", Text::Log),
    ("8", Text::Clear),
    ("9", Text::Setup),
    ("0", Text::Quit),
    ("q", Text::Quit),
];

struct Painter {
    color: bool,
}

impl Painter {
    fn detect() -> Self {
        Painter {
            color: io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none(),
        }
    }

    fn paint(&self, line: &str) -> String {
        if !self.color {
            return line.to_string();
        }
        let code = match Severity::of(line) {
            Severity::Error => "31",
            Severity::Warning => "33",
            Severity::Success => "32",
            Severity::InProgress => "36",
            Severity::Neutral => return line.to_string(),
        };
        format!("\x1b[{}m{}\x1b[0m", code, line)
    }
}

fn load(config: Option<&Path>) -> Result<Context> {
    match Context::load(config) {
        Ok(ctx) => Ok(ctx),
        Err(RelayError::Config(err)) => {
            println!("{}", err);
            println!("{}", tr(Lang::En, Text::ConfigProblem));
            run_setup(config)?;
            Context::load(config)
        }
        Err(err) => Err(err),
    }
}

fn header(ctx: &Context, painter: &Painter) {
    let lang = ctx.settings.lang;
    let view = status_view(&ctx.store);
    let job = if view.job == "idle" { tr(lang, Text::Idle).to_string() } else { view.job };
    let conn = if view.conn == "not tested" {
        tr(lang, Text::NotTested).to_string()
    } else {
        view.conn
    };
    println!();
    println!("{}  ({})", tr(lang, Text::Title), ctx.settings.repo);
    println!("  {:<11} {}", tr(lang, Text::Job), painter.paint(&job));
    if let Some((pid, elapsed)) = view.running {
        let took = elapsed.map(format_duration).unwrap_or_default();
        println!("  {:<11} pid {} {} {}", "", pid, tr(lang, Text::RunningFor), took);
    }
    println!("  {:<11} {}", tr(lang, Text::Connection), painter.paint(&conn));
    println!();
    for (key, text) in ENTRIES.iter().filter(|(k, _)| *k != "q") {
        println!("  {}) {}", key, tr(lang, *text));
    }
}

fn auto_test(ctx: &Context) {
    let s = &ctx.settings;
    if !(s.auto_test_repo || s.auto_test_ssh) {
        return;
    }
    println!("{}", tr(s.lang, Text::AutoTest));
    if let Err(err) = probe(ctx, !s.auto_test_repo) {
        println!("error: {}", err);
    }
}

fn download(ctx: &Context) -> Result<()> {
    let lang = ctx.settings.lang;
    if let Some(pid) = ctx.store.running_pid() {
        return Err(RelayError::JobAlreadyRunning(pid));
    }
    preflight(ctx)?;
    let key = ctx.key()?;
    let archives = fetch_archives(ctx, key.as_deref())?;
    if archives.is_empty() {
        println!("{}", tr(lang, Text::NoArchives));
        return Ok(());
    }
    let Some(archive) = choose_archive(&archives, tr(lang, Text::ArchivePrompt))? else {
        return Ok(());
    };
    let cwd = env::current_dir()?;
    let answer = ask(&format!("{} [{}]: ", tr(lang, Text::TargetPrompt), cwd.display()))?;
    let target = match answer.as_deref() {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => cwd,
    };
    let started = start_download(&ctx.settings, key.as_deref(), &ctx.store, &archive, &target)?;
    println!("{} {} (pid {})", started.kind, started.archive, started.pid);
    Ok(())
}

pub fn run_menu(config: Option<&Path>) -> Result<()> {
    let mut ctx = load(config)?;
    let painter = Painter::detect();
    auto_test(&ctx);
    loop {
        header(&ctx, &painter);
        let lang = ctx.settings.lang;
        let Some(choice) = ask(tr(lang, Text::Choice))? else {
            println!();
            return Ok(());
        };
        let Some((_, action)) = ENTRIES.iter().find(|(k, _)| *k == choice.to_lowercase()) else {
            println!("{}", tr(lang, Text::Invalid));
            continue;
        };
        let result = match action {
            Text::Test => run_test(&ctx, false),
            Text::Upload => run_upload(&ctx).map(drop),
            Text::Download => download(&ctx),
            Text::List => run_list(&ctx),
            Text::Status => Ok(()),
            Text::Stop => run_stop(&ctx),
            Text::Log => run_log(&ctx, 40, false, false),
            Text::Clear => run_clear(&ctx),
            Text::Setup => run_setup(config).and_then(|()| {
                ctx = Context::load(config)?;
                Ok(())
            }),
            _ => {
                println!("{}", tr(lang, Text::Bye));
                return Ok(());
            }
        };
        if let Err(err) = result {
            println!("{}", painter.paint(&format!("ERROR: {}", err)));
        }
        if *action != Text::Status {
            let _ = ask(&format!("{} ", tr(lang, Text::PressEnter)))?;
        }
    }
}
