//! Azami CLI - コマンドラインインターフェース
//!
//! リモートデバッギ用ソースレベルデバッガ azami のREPLインターフェース。
//! コアが返す構造化された結果とNoticeストリームをここで整形します。

mod command;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use azami_core::{
    spawn_reader, BreakReport, EnableMode, Evaluated, LineSource, LocationSet, Notice,
    ResolveOutcome, SessionController, Settings, StepKind, WatchKind, WatchOutcome,
};
use azami_session::loopback::{LoopbackSession, ROOT_CONTEXT};
use azami_session::{frame_base, Location, Module, SuspendReason};

use command::Command;

/// Azami - Source-Level Debugger
#[derive(Parser)]
#[command(name = "azami")]
#[command(version = "0.1.0")]
#[command(about = "Source-level debugger front end for remote debuggees", long_about = None)]
struct Cli {
    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 250)]
    poll_interval: u64,

    /// Step timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    step_timeout: u64,

    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Run the REPL against the built-in demo debuggee
    Demo,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Azami - Source-Level Debugger");
    println!("Version 0.1.0");
    println!();

    let cli = Cli::parse();
    let settings = Settings {
        poll_interval: Duration::from_millis(cli.poll_interval),
        step_timeout: Duration::from_millis(cli.step_timeout),
        ..Settings::default()
    };
    tracing::debug!(
        "poll interval {:?}, step timeout {:?}",
        settings.poll_interval,
        settings.step_timeout
    );

    match cli.command {
        DebugCommand::Demo => {
            println!("Starting the built-in demo debuggee");
            println!();

            let mut controller = SessionController::new(Box::new(demo_session()), settings);
            controller.process_events()?;
            controller.set_listing_module(Some(7));

            let source = spawn_input_thread()?;
            run_repl(&mut controller, &source)?;
        }
    }

    Ok(())
}

/// デモ用のデバッギを組み立てる
///
/// 2つのモジュールを持つコードユニットと小さなオブジェクトグラフを備え、
/// ブレークポイントを設定できるよう中断した状態で始まります。
fn demo_session() -> LoopbackSession {
    fn module(id: u32, package: &str, name: &str, lines: u32) -> Module {
        Module {
            id,
            name: name.to_string(),
            package: package.to_string(),
            line_count: lines,
            raw_identity: format!("{package}.{name}#{id}"),
        }
    }

    let mut s = LoopbackSession::new();
    s.load_unit(
        ROOT_CONTEXT,
        "demo/main.unit",
        vec![
            module(1, "app", "Main.ext", 200),
            module(7, "app.util", "Timer.ext", 120),
        ],
    );

    let locals = s.define_value("locals", "locals");
    s.bind_root(ROOT_CONTEXT, frame_base(0), locals);
    let counter = s.define_value("app.Counter", "Counter#1");
    s.add_member(locals, "counter", counter);
    let value = s.define_value("int", "5");
    s.add_member(counter, "value", value);
    let err_type = s.define_value("type", "DemoError$");
    s.set_global("DemoError", err_type);

    s.suspend_at(
        ROOT_CONTEXT,
        Some(Location::new(7, 1, ROOT_CONTEXT)),
        SuspendReason::StopRequest,
    );
    s
}

/// 行読み取りスレッドを立ち上げる
///
/// 生のreadlineはキャンセルできないため専用スレッドで回し、単一スロットの
/// チャネル越しに受け取ります。
fn spawn_input_thread() -> Result<LineSource> {
    let mut rl = DefaultEditor::new()?;
    let history = home::home_dir().map(|dir| dir.join(".azami_history"));
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    Ok(spawn_reader(move || match rl.readline("(azami) ") {
        Ok(line) => {
            let _ = rl.add_history_entry(line.as_str());
            Some(line)
        }
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
            if let Some(path) = &history {
                let _ = rl.save_history(path);
            }
            None
        }
        Err(err) => {
            eprintln!("Error: {err:?}");
            None
        }
    }))
}

enum Flow {
    Continue,
    Quit,
}

/// REPLループを実行する
fn run_repl(controller: &mut SessionController, source: &LineSource) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();
    render_notices(controller);

    loop {
        let mut confirm = |prompt: &str| {
            println!("{prompt} (y or n)");
            matches!(
                source.recv_line().as_deref().map(str::trim),
                Some("y") | Some("yes")
            )
        };
        controller.running_loop(source, &mut confirm)?;
        render_notices(controller);

        if !controller.is_connected() {
            println!("The session has ended.");
            break;
        }

        let line = match source.recv_line() {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Some(cmd) => {
                if let Flow::Quit = handle_command(controller, cmd) {
                    break;
                }
            }
            None => {
                println!("Unknown or incomplete command: {line}");
                println!("Type 'help' for available commands.");
            }
        }
        render_notices(controller);
    }

    println!("Goodbye!");
    Ok(())
}

fn handle_command(controller: &mut SessionController, cmd: Command) -> Flow {
    let result = match cmd {
        Command::Quit => return Flow::Quit,
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Break(location) => handle_break(controller, &location),
        Command::Delete(id) => controller
            .delete_breakpoint(id)
            .map(|_| println!("Breakpoint {id} deleted")),
        Command::Enable(id) => handle_enable(controller, id, EnableMode::Normal),
        Command::EnableOnce(id) => handle_enable(controller, id, EnableMode::Once),
        Command::EnableDelete(id) => handle_enable(controller, id, EnableMode::Delete),
        Command::Disable(id) => controller
            .disable_breakpoint(id)
            .map(|_| println!("Breakpoint {id} disabled")),
        Command::Condition(id, expr) => controller
            .set_breakpoint_condition(id, expr.as_deref())
            .map(|_| match expr {
                Some(text) => println!("Breakpoint {id} will stop only when {text}"),
                None => println!("Breakpoint {id} is now unconditional"),
            }),
        Command::Continue => controller
            .request_resume()
            .map(|_| println!("Continuing execution...")),
        Command::Step => controller.step(StepKind::Into),
        Command::Next => controller.step(StepKind::Over),
        Command::Finish => controller.step(StepKind::Out),
        Command::Halt => controller.halt().map(|stopped| {
            if stopped {
                println!("Debuggee stopped");
            } else {
                println!("Debuggee is still running");
            }
        }),
        Command::Print(expr) => handle_print(controller, &expr),
        Command::Set { target, value } => controller
            .assign_expression(&target, &value)
            .map(|_| println!("{target} = {value}")),
        Command::Watch(expr) => handle_watch(controller, &expr, WatchKind::Write),
        Command::RWatch(expr) => handle_watch(controller, &expr, WatchKind::Read),
        Command::AWatch(expr) => handle_watch(controller, &expr, WatchKind::ReadWrite),
        Command::Unwatch(id) => controller.remove_watch(id).map(|removed| {
            if removed {
                println!("Watchpoint {id} removed");
            } else {
                println!("No watchpoint {id}");
            }
        }),
        Command::Catch(type_name) => controller
            .add_catchpoint(type_name.as_deref())
            .map(|id| match type_name {
                Some(name) => println!("Catchpoint {id} set for {name}"),
                None => println!("Catchpoint {id} set for all exceptions"),
            }),
        Command::Uncatch(id) => controller.remove_catchpoint(id).map(|removed| {
            if removed {
                println!("Catchpoint {id} removed");
            } else {
                println!("No catchpoint {id}");
            }
        }),
        Command::Display(expr) => controller
            .add_display(&expr)
            .map(|id| println!("Display {id}: {expr}")),
        Command::Undisplay(id) => {
            if controller.remove_display(id) {
                println!("Display {id} removed");
            } else {
                println!("No display {id}");
            }
            Ok(())
        }
        Command::InfoBreakpoints => {
            print_breakpoints(controller);
            Ok(())
        }
        Command::InfoModules(pattern) => print_modules(controller, pattern.as_deref()),
        Command::Filter(unit) => controller.set_unit_filter(unit.as_deref()).map(|worked| {
            match (worked, unit) {
                (true, Some(name)) => println!("Module list restricted to {name}"),
                (true, None) => println!("Module list shows all code units"),
                (false, Some(name)) => println!("No code unit named {name}"),
                (false, None) => {}
            }
        }),
        Command::Frame(depth) => {
            controller.select_frame(depth);
            println!("Selected frame {depth}");
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("Error: {e:#}");
    }
    Flow::Continue
}

fn handle_break(controller: &mut SessionController, location: &str) -> Result<()> {
    match controller.create_breakpoint(location, true)? {
        BreakReport::Created { id, locations } => {
            println!("Breakpoint {id} set at {}", render_locations(&locations));
        }
        BreakReport::Extended { id, location } => {
            println!("Breakpoint {id} extended to {}", render_location(&location));
        }
        BreakReport::Existing { id } => {
            println!("Breakpoint {id} is already set there");
        }
        BreakReport::Unresolved { id } => {
            println!("Breakpoint {id} created, but not yet resolved: {location}");
            println!("It will be set as soon as matching code is loaded.");
        }
        BreakReport::Ambiguous { candidates } => {
            println!("Ambiguous module name, candidates:");
            for module in candidates {
                match controller.cache().resolve(module) {
                    Ok(m) => println!("  #{} {}", m.id, m.full_path()),
                    Err(_) => println!("  #{module}"),
                }
            }
        }
    }
    Ok(())
}

fn handle_enable(
    controller: &mut SessionController,
    id: usize,
    mode: EnableMode,
) -> Result<()> {
    if controller.enable_breakpoint(id, mode)? {
        println!("Breakpoint {id} enabled");
    } else {
        println!("Breakpoint {id} location no longer exists");
    }
    Ok(())
}

fn handle_print(controller: &mut SessionController, expr: &str) -> Result<()> {
    let (value, history) = controller.print_expression(expr)?;
    match history {
        Some(n) => println!("${n} = {}", render_evaluated(&value)),
        None => println!("{}", render_evaluated(&value)),
    }
    Ok(())
}

fn handle_watch(
    controller: &mut SessionController,
    expr: &str,
    kind: WatchKind,
) -> Result<()> {
    match controller.set_watch(expr, kind)? {
        WatchOutcome::Created(id) => println!("Watchpoint {id} set on {expr}"),
        WatchOutcome::Rekinded(id) => println!("Watchpoint {id} mode changed"),
    }
    Ok(())
}

fn print_breakpoints(controller: &SessionController) {
    if controller.breakpoints().is_empty() {
        println!("No breakpoints set");
        return;
    }
    for bp in controller.breakpoints().iter() {
        let status = match bp.status() {
            azami_core::BreakStatus::Resolved => "resolved  ",
            azami_core::BreakStatus::Unresolved => "unresolved",
            azami_core::BreakStatus::Ambiguous => "ambiguous ",
            azami_core::BreakStatus::NoCode => "no code   ",
        };
        let enabled = if bp.enabled { "y" } else { "n" };
        let what = if bp.locations().is_empty() {
            bp.source_text.clone()
        } else {
            render_locations(bp.locations())
        };
        print!("{:>3}  breakpoint  {status}  enb={enabled}  hits={:<3}  {what}", bp.id, bp.hit_count);
        if let Some(condition) = &bp.condition {
            print!("  if {}", condition.text);
        }
        println!();
    }
}

fn print_modules(controller: &mut SessionController, pattern: Option<&str>) -> Result<()> {
    let cache = controller.refresh_cache()?;
    let modules = match pattern {
        Some(p) => cache.find_by_pattern(p),
        None => cache.module_list().to_vec(),
    };
    if modules.is_empty() {
        println!("No matching modules");
        return Ok(());
    }
    for m in modules {
        println!("  #{} {} ({} lines)", m.id, m.full_path(), m.line_count);
    }
    Ok(())
}

fn render_notices(controller: &mut SessionController) {
    for notice in controller.drain_notices() {
        render_notice(&notice);
    }
}

fn render_notice(notice: &Notice) {
    match notice {
        Notice::Trace { text, .. } => println!("[trace] {text}"),
        Notice::CodeLoaded { context, unit } => {
            println!("[loaded] {unit} (context {context})");
        }
        Notice::CodeUnloaded { context, unit } => {
            println!("[unloaded] {unit} (context {context})");
        }
        Notice::ContextCreated { context } => println!("[context {context} created]"),
        Notice::ContextExited { context } => println!("[context {context} exited]"),
        Notice::Fault { context, fault } => {
            println!("[fault] {} in context {context}: {}", fault.name, fault.information);
        }
        Notice::Halted {
            context,
            location,
            reason,
            breakpoint,
            context_switched,
        } => {
            if *context_switched {
                println!("[switched to context {context}]");
            }
            let why = match breakpoint {
                Some(id) => format!("breakpoint {id}"),
                None => render_reason(*reason).to_string(),
            };
            match location {
                Some(l) => println!("Execution halted ({why}) at {}", render_location(l)),
                None => println!("Execution halted ({why}) in context {context}"),
            }
        }
        Notice::PromptNewCode { context } => {
            println!("Additional code has been loaded in context {context}.");
            println!("Set additional breakpoints as desired, and then type 'continue'.");
        }
        Notice::BreakpointResolution { id, outcome } => match outcome {
            ResolveOutcome::Resolved(locations) => {
                println!("Resolved breakpoint {id} to {}", render_locations(locations));
            }
            ResolveOutcome::Ambiguous(_) => {
                println!("Breakpoint {id} is ambiguous; delete it and try a more specific name");
            }
            ResolveOutcome::NoCode => {
                println!("Breakpoint {id} has no executable code at that line");
            }
            ResolveOutcome::InProgress => {
                println!("Breakpoint {id} not resolved yet, a code unit is still loading");
            }
            ResolveOutcome::Unresolved => {
                println!("Breakpoint {id} is still unresolved");
            }
        },
        Notice::BreakpointPropagated { id, location } => {
            println!("Breakpoint {id} also set at {}", render_location(location));
        }
        Notice::BreakpointNotPropagated { id } => {
            println!("Breakpoint {id} not propagated, a code unit is still loading");
        }
        Notice::Display { id, text, value } => println!("{id}: {text} = {value}"),
        Notice::DisplayFailed { id, text, error } => println!("{id}: {text} = <{error}>"),
        Notice::HaltFailed { context } => println!("Could not halt context {context}"),
        Notice::AlreadyRunning { context } => println!("Context {context} is already running"),
        Notice::SessionEnded { reason } => println!("Session ended: {reason}"),
    }
}

fn render_reason(reason: SuspendReason) -> &'static str {
    match reason {
        SuspendReason::Unknown => "unknown",
        SuspendReason::Breakpoint => "breakpoint",
        SuspendReason::Watch => "watchpoint",
        SuspendReason::Fault => "fault",
        SuspendReason::StopRequest => "stop requested",
        SuspendReason::Step => "step",
        SuspendReason::CodeLoaded => "code loaded",
    }
}

fn render_location(location: &Location) -> String {
    format!(
        "#{}:{} (context {})",
        location.module, location.line, location.context
    )
}

fn render_locations(locations: &LocationSet) -> String {
    locations
        .iter()
        .map(render_location)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_evaluated(value: &Evaluated) -> String {
    value.display_repr()
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help                - Show this help message");
    println!("  quit/exit/q         - Exit the debugger");
    println!();
    println!("Breakpoints:");
    println!("  break <loc>         - Set breakpoint (module:line, #id:line or line)");
    println!("  delete <id>         - Delete breakpoint");
    println!("  enable [once|delete] <id>");
    println!("  disable <id>        - Disable breakpoint");
    println!("  condition <id> [e]  - Stop only when expression e is true");
    println!("  info break          - List breakpoints");
    println!();
    println!("Execution:");
    println!("  continue (c)        - Continue execution");
    println!("  step (s)            - Step into");
    println!("  next (n)            - Step over");
    println!("  finish (f)          - Step out");
    println!("  halt                - Suspend the active context");
    println!();
    println!("Data:");
    println!("  print <expr>        - Evaluate and print an expression");
    println!("  set <target> = <v>  - Assign to a variable (creates it if missing)");
    println!("  watch/rwatch/awatch <expr>");
    println!("  unwatch <id>        - Remove a watchpoint");
    println!("  catch <type|*>      - Stop on thrown exceptions");
    println!("  uncatch <id>        - Remove a catchpoint");
    println!("  display <expr>      - Evaluate an expression at every stop");
    println!("  undisplay <id>      - Remove an auto-display");
    println!();
    println!("Modules:");
    println!("  info modules [pat]  - List modules (supports * wildcards)");
    println!("  filter <unit|off>   - Restrict the module list to one code unit");
    println!("  frame <n>           - Select the stack frame for name lookup");
    println!();
    println!("Examples:");
    println!("  break Timer.ext:42");
    println!("  condition 1 counter.value == 3");
    println!("  print counter.value");
}
