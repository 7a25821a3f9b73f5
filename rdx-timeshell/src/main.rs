use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::PathBuf;
use std::rc::Rc;
use timekeep::prelude::*;
use timekeep::{ENGINE_NAME, VERSION as LIB_VERSION};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

const BANNER: &str = r"
  +------------------------------------------+
  |   t i m e s h e l l   ::   timekeep      |
  +------------------------------------------+
";

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct MyHighlighter;

impl Highlighter for MyHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", BANNER.cyan());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(64).dimmed());
}

/// Reads lines on a dedicated thread so blocking input never stalls the ticks.
fn spawn_line_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || -> rustyline::Result<()> {
        let mut rl = Editor::new()?;
        rl.set_helper(Some(MyHighlighter));
        let prompt = format!("{}", ">> ".cyan().bold());
        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    rl.add_history_entry(line.as_str())?;
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    tx.send("exit".to_string()).ok();
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    });
    rx
}

/// Prints module events. Ticks are printed once per displayed second, and only
/// while watching is switched on.
fn spawn_event_listener(engine: &TimekeepEngine, watching: Rc<Cell<bool>>) {
    let mut events = engine.subscribe();
    tokio::task::spawn_local(async move {
        let mut last_second: HashMap<ModuleId, u64> = HashMap::new();
        loop {
            match events.recv().await {
                Ok(ModuleEvent { module, event: TrackerEvent::Tick(span) }) => {
                    let second = span.as_millis() / 1_000;
                    if watching.get() && last_second.insert(module, second) != Some(second) {
                        println!("<-- [TICK] {:?} {}", module, span.format_hms().dimmed());
                    }
                }
                Ok(ModuleEvent { module, event: TrackerEvent::Lap(lap) }) => {
                    println!(
                        "<-- [LAP] {:?} #{} {} (total {})",
                        module, lap.lap_number, lap.lap_time, lap.total_time
                    );
                }
                Ok(ModuleEvent { module, event: TrackerEvent::TimeUp }) => {
                    println!("\n<-- {} {:?}\n>> ", "[TIME UP]".red().bold(), module);
                }
                Ok(ModuleEvent { module, event }) => {
                    println!("<-- [{}] {:?}", event.name().to_uppercase(), module);
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Maps the small numeric handles the user types to module ids.
#[derive(Default)]
struct Handles {
    by_handle: BTreeMap<usize, ModuleId>,
    next: usize,
}

impl Handles {
    fn register(&mut self, id: ModuleId) -> usize {
        let handle = self.next;
        self.by_handle.insert(handle, id);
        self.next += 1;
        handle
    }

    fn resolve(&self, arg: Option<&&str>) -> Result<(usize, ModuleId), String> {
        let raw = arg.ok_or("missing module handle")?;
        let handle = raw
            .trim_start_matches('#')
            .parse::<usize>()
            .map_err(|_| format!("'{raw}' is not a handle (e.g. '0', '#1')"))?;
        self.by_handle
            .get(&handle)
            .map(|id| (handle, *id))
            .ok_or_else(|| format!("invalid handle #{handle}; use 'list' to see modules"))
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  timer <SECONDS|PRESET>  - Adds a countdown timer.");
    println!("  stopwatch               - Adds a stopwatch.");
    println!("  start|pause|stop|reset <H>");
    println!("                          - Drives module #H.");
    println!("  lap <H>                 - Records a lap on stopwatch #H.");
    println!("  show <H>                - Shows a module's time, laps and lap stats.");
    println!("  list                    - Lists modules and their handles.");
    println!("  remove <H>              - Removes a module.");
    println!("  presets                 - Lists configured timer presets.");
    println!("  sessions                - Lists recorded sessions.");
    println!("  clock                   - Shows the clock face.");
    println!("  watch on|off            - Prints ticks once per second.");
    println!("  exit                    - Quits the shell.");
}

fn show(engine: &TimekeepEngine, handle: usize, id: ModuleId) -> Result<(), TimekeepError> {
    let snapshot = engine.snapshot(id)?;
    println!(
        "  #{handle} {} [{}] {}",
        snapshot.kind,
        snapshot.state,
        snapshot.display.format_hms_cs().bold()
    );
    if let Some(duration) = snapshot.duration {
        println!("     duration {}", duration.format_hms());
    }
    for lap in &snapshot.laps {
        println!("     lap {:>3}  {}  {}", lap.lap_number, lap.lap_time, lap.total_time);
    }
    if let Some(Module::Stopwatch(stopwatch)) = engine.get(id) {
        let stats = stopwatch.lap_stats();
        if let (Some(best), Some(worst)) = (stats.best, stats.worst) {
            println!(
                "     best #{} {}  worst #{} {}  average {}",
                best.lap_number,
                best.lap_time.to_string().green(),
                worst.lap_number,
                worst.lap_time.to_string().red(),
                stats.average
            );
        }
    }
    Ok(())
}

/// Handles one input line. Returns `false` when the shell should exit.
fn handle_line(line: &str, engine: &TimekeepEngine, handles: &mut Handles, watching: &Cell<bool>) -> bool {
    let args = line.split_whitespace().collect::<Vec<_>>();
    let Some(command) = args.first() else {
        return true;
    };

    match *command {
        "timer" => match args.get(1) {
            Some(arg) => {
                let added = match arg.parse::<u64>() {
                    Ok(seconds) => Ok(engine.add_timer(TimeSpan::from_secs(seconds))),
                    Err(_) => engine.add_timer_from_preset(arg),
                };
                match added {
                    Ok(id) => println!("--> Added timer with handle: #{}", handles.register(id)),
                    Err(err) => println!("Error: {err}"),
                }
            }
            None => println!("Usage: timer <SECONDS|PRESET>"),
        },
        "stopwatch" => {
            let id = engine.add_stopwatch();
            println!("--> Added stopwatch with handle: #{}", handles.register(id));
        }
        "start" | "resume" | "pause" | "stop" | "reset" | "lap" => {
            let parsed = command.parse::<Command>();
            match (parsed, handles.resolve(args.get(1))) {
                (Ok(cmd), Ok((handle, id))) => match engine.dispatch(id, cmd) {
                    Ok(CommandOutcome::Applied(state)) => println!("--> #{handle} is {state}."),
                    Ok(CommandOutcome::LapRecorded(_)) => {}
                    // A lap on a stopwatch that is not running is a disabled action.
                    Err(err @ TimekeepError::InvalidState { .. }) => {
                        println!("--> {}", err.to_string().dimmed())
                    }
                    Err(err) => println!("Error: {err}"),
                },
                (Err(err), _) => println!("Error: {err}"),
                (_, Err(msg)) => println!("Error: {msg}"),
            }
        }
        "show" => match handles.resolve(args.get(1)) {
            Ok((handle, id)) => {
                if let Err(err) = show(engine, handle, id) {
                    println!("Error: {err}");
                }
            }
            Err(msg) => println!("Error: {msg}"),
        },
        "list" => {
            println!("Modules:");
            for (handle, id) in &handles.by_handle {
                if let Ok(snapshot) = engine.snapshot(*id) {
                    println!(
                        "  Handle #{}: {} [{}] {}",
                        handle,
                        snapshot.kind,
                        snapshot.state,
                        snapshot.display.format_hms()
                    );
                }
            }
        }
        "remove" => match handles.resolve(args.get(1)) {
            Ok((handle, id)) => {
                if engine.remove(id) {
                    println!("--> Module #{handle} removed.");
                } else {
                    println!("--> Error: module not found in engine.");
                }
                handles.by_handle.remove(&handle);
            }
            Err(msg) => println!("Error: {msg}"),
        },
        "presets" => {
            for preset in &engine.config().presets {
                println!("  {:<16} {}", preset.name, TimeSpan::from(preset.duration).format_hms());
            }
        }
        "sessions" => {
            for session in engine.sessions() {
                match session {
                    Session::Timer(s) => println!(
                        "  timer      {}  {}  completed={}",
                        s.started_at.format("%H:%M:%S"),
                        s.duration.format_hms(),
                        s.completed
                    ),
                    Session::Stopwatch(s) => println!(
                        "  stopwatch  {}  {}  laps={} completed={}",
                        s.started_at.format("%H:%M:%S"),
                        s.total_time.format_hms_cs(),
                        s.laps.len(),
                        s.completed
                    ),
                }
            }
        }
        "clock" => println!("  {} ({})", engine.clock_face_text().bold(), engine.config().timezone),
        "watch" => match args.get(1) {
            Some(&"on") => {
                watching.set(true);
                println!("--> Watching ticks.");
            }
            Some(&"off") => {
                watching.set(false);
                println!("--> Stopped watching ticks.");
            }
            _ => println!("Usage: watch on|off"),
        },
        "help" => print_help(),
        "exit" => return false,
        _ => println!("Unknown command: '{}'. Type 'help'.", line),
    }
    true
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let mut config = TimekeepConfig::load(config_path.as_deref())?;
    config.record_sessions = true;

    LocalSet::new()
        .run_until(async move {
            let engine = TimekeepEngine::new(config);
            let watching = Rc::new(Cell::new(false));
            spawn_event_listener(&engine, watching.clone());

            let mut handles = Handles::default();
            let mut lines = spawn_line_reader();
            info!("{} shell ready.", ENGINE_NAME);
            println!("{} is running. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

            while let Some(line) = lines.recv().await {
                if !handle_line(line.trim(), &engine, &mut handles, &watching) {
                    break;
                }
            }
            println!("Exiting timeshell...");
        })
        .await;

    Ok(())
}
