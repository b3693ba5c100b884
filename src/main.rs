use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use naz_flash_rust_lib::app::config::{load_config, save_config, PathSettings};
use naz_flash_rust_lib::app::console::{ConsoleLine, Severity};
use naz_flash_rust_lib::app::device::monitor::{MetricsEmitter, MetricsEvent};
use naz_flash_rust_lib::app::error::AppError;
use naz_flash_rust_lib::app::flash::engine::{BatchEmitter, BatchEvent};
use naz_flash_rust_lib::app::logging::init_logging;
use naz_flash_rust_lib::app::models::{ConnectionMode, DeviceSelection};
use naz_flash_rust_lib::app::session_log::{resolve_log_dir, save_session_log};
use naz_flash_rust_lib::app::state::AppState;
use naz_flash_rust_lib::app::tools::command_line::CommandLine;
use naz_flash_rust_lib::app::tools::commands::{
    adb_connect, adb_install, adb_pair, adb_push, adb_reboot, adb_sideload, adb_su_shell, adb_uninstall,
    fastboot_erase, fastboot_format, fastboot_reboot, is_high_risk, RebootTarget,
};
use naz_flash_rust_lib::app::tools::locator::{missing_tools, require_any_tool, Toolchain};
use naz_flash_rust_lib::app::tools::process::{ProcessEvent, ProcessListener};
use serde::Serialize;
use uuid::Uuid;

const USAGE: &str = "Usage: naz_flash_rust <command> [options]

Commands:
  check                                   verify adb and fastboot are usable
  devices                                 list attached devices
  info --serial S [--mode adb|fastboot|sideload]
  metrics --serial S [--watch]
  partitions --serial S                   list partitions of a bootloader device
  flash --serial S [--yes] PART=IMAGE|IMAGE...
  bootlog --serial S [--seconds N]        capture logcat into the log dir
  reboot --serial S [--mode M] [TARGET]   TARGET: system|bootloader|fastboot|recovery|sideload
  connect HOST:PORT                       wireless bridge connection
  pair HOST:PORT CODE
  install --serial S APK
  uninstall --serial S [--yes] PACKAGE
  sideload --serial S ZIP
  push --serial S LOCAL REMOTE
  su --serial S -- <script>               run a root shell script
  erase --serial S [--yes] PARTITION
  format --serial S [--yes] FS PARTITION
  run [--serial S] [--yes] -- <command line>

Options:
  --json        machine-readable output
  --save-log    write the console transcript to the log dir
";

#[derive(Debug, Clone, Default)]
struct Args {
    command: String,
    serial: Option<String>,
    mode: Option<ConnectionMode>,
    yes: bool,
    json: bool,
    watch: bool,
    save_log: bool,
    seconds: u64,
    rest: Vec<String>,
}

fn parse_mode(value: &str) -> Option<ConnectionMode> {
    match value.trim().to_lowercase().as_str() {
        "adb" | "bridge" | "device" => Some(ConnectionMode::Bridge),
        "fastboot" | "bootloader" => Some(ConnectionMode::Bootloader),
        "sideload" => Some(ConnectionMode::Sideload),
        _ => None,
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        serial: std::env::var("ANDROID_SERIAL")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        seconds: 30,
        ..Args::default()
    };

    let mut it = std::env::args().skip(1);
    args.command = it.next().ok_or_else(|| USAGE.to_string())?;
    if matches!(args.command.as_str(), "-h" | "--help" | "help") {
        return Err(USAGE.to_string());
    }

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => {
                args.serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if args.serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--mode" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--mode requires a value".to_string())?;
                args.mode = Some(parse_mode(&value).ok_or_else(|| format!("Unknown mode: {value}"))?);
            }
            "--seconds" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--seconds requires a value".to_string())?;
                args.seconds = value
                    .parse()
                    .map_err(|_| format!("Invalid --seconds value: {value}"))?;
            }
            "--yes" | "-y" => args.yes = true,
            "--json" => args.json = true,
            "--watch" => args.watch = true,
            "--save-log" => args.save_log = true,
            "--" => {
                args.rest.extend(it.by_ref());
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with("--") => return Err(format!("Unknown arg: {other}")),
            other => args.rest.push(other.to_string()),
        }
    }
    Ok(args)
}

/// Console output plus the transcript kept for `--save-log`.
#[derive(Clone, Default)]
struct Console {
    transcript: Arc<Mutex<Vec<String>>>,
}

impl Console {
    fn print(&self, line: ConsoleLine) {
        println!("{:<4} {}", line.severity.label(), line.text);
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.push(line.render());
        }
    }

    fn save(&self, state: &AppState, trace_id: &str) -> Result<(), AppError> {
        let lines = self
            .transcript
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default();
        let path = save_session_log(&resolve_log_dir(&state.config.paths), &lines, trace_id)?;
        eprintln!("Session log saved: {}", path.display());
        Ok(())
    }

    /// Same as `print` but on stderr, so `--json` output stays parseable.
    fn alert(&self, line: ConsoleLine) {
        eprintln!("{:<4} {}", line.severity.label(), line.text);
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.push(line.render());
        }
    }
}

fn print_json<T: Serialize>(value: &T, trace_id: &str) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::system(format!("Failed to serialize output: {err}"), trace_id))?;
    println!("{text}");
    Ok(())
}

fn require_serial(args: &Args, trace_id: &str) -> Result<String, AppError> {
    args.serial
        .clone()
        .ok_or_else(|| AppError::validation("--serial is required (or set ANDROID_SERIAL)", trace_id))
}

fn confirm(prompt: &str) -> bool {
    eprint!("{prompt} Type 'yes' to continue: ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn resolve_selection(state: &AppState, args: &Args, trace_id: &str) -> Result<DeviceSelection, AppError> {
    let serial = require_serial(args, trace_id)?;
    if let Some(mode) = args.mode {
        return Ok(DeviceSelection { serial, mode });
    }
    state
        .scan_devices(trace_id)
        .into_iter()
        .find(|device| device.serial == serial)
        .map(|device| device.selection())
        .ok_or_else(|| AppError::validation(format!("Device {serial} is not attached"), trace_id))
}

fn cmd_check(state: &AppState, args: &Args, trace_id: &str) -> Result<i32, AppError> {
    let results = state.check_tools(trace_id);
    if args.json {
        print_json(&results, trace_id)?;
    } else {
        for tool in &results {
            match (&tool.error, tool.available) {
                (_, true) => println!(
                    "{:<9} ok   {} ({})",
                    tool.name,
                    tool.version_output.lines().next().unwrap_or_default(),
                    tool.command_path
                ),
                (Some(err), false) => println!("{:<9} MISSING  {err}", tool.name),
                (None, false) => println!("{:<9} MISSING", tool.name),
            }
        }
    }
    Ok(if missing_tools(&results).is_empty() { 0 } else { 1 })
}

/// Startup notice for absent tools. Fatal only when neither client is usable.
fn require_tools(state: &AppState, console: &Console, trace_id: &str) -> Result<(), AppError> {
    for name in require_any_tool(&state.check_tools(trace_id), trace_id)? {
        console.alert(ConsoleLine::new(
            Severity::Error,
            format!("{name} is not available; every {name} command will fail. Run `check` for details."),
        ));
    }
    Ok(())
}

fn cmd_devices(state: &AppState, args: &Args, trace_id: &str) -> Result<i32, AppError> {
    let devices = state.scan_devices(trace_id);
    if args.json {
        print_json(&devices, trace_id)?;
    } else if devices.is_empty() {
        println!("No devices found.");
    } else {
        for device in &devices {
            println!("{:<9} {}", device.mode.to_string(), device.serial);
        }
    }
    Ok(0)
}

fn cmd_info(state: &AppState, args: &Args, trace_id: &str) -> Result<i32, AppError> {
    let selection = resolve_selection(state, args, trace_id)?;
    let info = state.device_info(&selection, trace_id);
    if args.json {
        print_json(&info, trace_id)?;
    } else {
        println!("Serial:   {}", info.serial);
        println!("Mode:     {}", info.mode);
        println!("Model:    {}", info.model);
        println!("Build:    {}", info.build);
        println!("Root:     {}", info.root);
        println!("Product:  {}", info.product);
        println!("Unlocked: {}", info.unlocked);
    }
    Ok(0)
}

fn cmd_metrics(state: &AppState, args: &Args, trace_id: &str) -> Result<i32, AppError> {
    let serial = require_serial(args, trace_id)?;
    if !args.watch {
        let metrics = state.metrics(&serial, trace_id);
        if args.json {
            print_json(&metrics, trace_id)?;
        } else {
            println!(
                "Battery: {}  Temp: {}  Storage: {}",
                metrics.battery, metrics.temperature, metrics.storage
            );
        }
        return Ok(0);
    }

    let (tx, rx) = mpsc::channel::<MetricsEvent>();
    let emitter: MetricsEmitter = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    let selection = DeviceSelection {
        serial,
        mode: ConnectionMode::Bridge,
    };
    state.select_device(Some(&selection), emitter, trace_id);
    for event in rx {
        match event {
            MetricsEvent::Updated { serial, metrics } if args.json => {
                print_json(&(serial, metrics), trace_id)?
            }
            MetricsEvent::Updated { metrics, .. } => println!(
                "Battery: {}  Temp: {}  Storage: {}",
                metrics.battery, metrics.temperature, metrics.storage
            ),
            MetricsEvent::Cleared { .. } => break,
        }
    }
    Ok(0)
}

fn cmd_partitions(state: &AppState, args: &Args, trace_id: &str) -> Result<i32, AppError> {
    let serial = require_serial(args, trace_id)?;
    let catalog = state.partitions(&serial, trace_id);
    if args.json {
        print_json(&catalog, trace_id)?;
        return Ok(0);
    }
    if catalog.is_empty() {
        println!("No partitions reported (is {serial} in bootloader mode?)");
        return Ok(1);
    }
    println!("Standard partitions:");
    for name in &catalog.standard {
        println!("  {name}");
    }
    println!("Critical partitions:");
    for name in &catalog.critical {
        println!("  {name}");
    }
    Ok(0)
}

fn parent_dir(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .parent()
        .map(|dir| dir.to_string_lossy().to_string())
        .filter(|dir| !dir.is_empty())
}

/// Saves last-used locations when `update` changed any of them.
fn remember_paths(state: &AppState, trace_id: &str, update: impl FnOnce(&mut PathSettings)) {
    let mut config = state.config.clone();
    update(&mut config.paths);
    if config.paths == state.config.paths {
        return;
    }
    if let Err(err) = save_config(&config, trace_id) {
        eprintln!("Could not remember last-used location: {err}");
    }
}

/// Stores the directory of the first image as the picker's last-used location.
fn remember_image_dir(state: &AppState, specs: &[String], trace_id: &str) {
    let first_image = specs
        .first()
        .map(|item| item.split_once('=').map(|(_, image)| image).unwrap_or(item));
    if let Some(dir) = first_image.and_then(parent_dir) {
        remember_paths(state, trace_id, |paths| paths.image_dir = dir);
    }
}

fn cmd_flash(state: &AppState, args: &Args, console: &Console, trace_id: &str) -> Result<i32, AppError> {
    let serial = require_serial(args, trace_id)?;
    if args.rest.is_empty() {
        return Err(AppError::validation("flash needs at least one PART=IMAGE", trace_id));
    }
    let queue = state.flash_queue();
    for item in &args.rest {
        match item.split_once('=') {
            Some((partition, image)) if !partition.contains(['/', '\\']) => {
                queue.add(partition, image, trace_id)?;
            }
            _ => {
                queue.add_image(item, trace_id)?;
            }
        }
    }

    remember_image_dir(state, &args.rest, trace_id);

    println!("Flash plan for {serial}:");
    for (index, entry) in queue.snapshot().iter().enumerate() {
        println!("  {}. {} <- {}", index + 1, entry.partition, entry.image_path);
    }
    if !args.yes && !confirm("Flashing overwrites device partitions.") {
        eprintln!("Aborted.");
        return Ok(1);
    }

    let (tx, rx) = mpsc::channel::<BatchEvent>();
    let emitter: BatchEmitter = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    let run = state.flash.start(&serial, emitter, trace_id)?;
    for event in rx {
        if args.json {
            print_json(&event, trace_id)?;
        }
        match event {
            BatchEvent::StepStarted { command, .. } if !args.json => {
                console.print(ConsoleLine::new(Severity::Command, format!("> {command}")));
            }
            BatchEvent::Output { line, severity, .. } if !args.json => {
                console.print(ConsoleLine::new(severity, line));
            }
            BatchEvent::Heartbeat { index, elapsed_secs } if !args.json => {
                console.print(ConsoleLine::new(
                    Severity::Info,
                    format!("row {} still flashing ({elapsed_secs}s)", index + 1),
                ));
            }
            BatchEvent::Completed { .. } => break,
            _ => {}
        }
    }

    let summary = run.wait()?;
    if !args.json {
        for (entry, status) in queue.snapshot().iter().zip(&summary.statuses) {
            println!("  {:<20} {status}", entry.partition);
        }
        println!(
            "Batch finished: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );
    }
    Ok(if summary.failed == 0 { 0 } else { 1 })
}

fn cmd_bootlog(state: &AppState, args: &Args, trace_id: &str) -> Result<i32, AppError> {
    let serial = require_serial(args, trace_id)?;
    let path = state.start_boot_capture(&serial, trace_id)?;
    eprintln!("Capturing boot log to {} for {}s", path.display(), args.seconds);
    thread::sleep(Duration::from_secs(args.seconds));
    let path = state.stop_boot_capture(&serial, trace_id)?;
    println!("{}", path.display());
    Ok(0)
}

fn action_usage(command: &str) -> Option<&'static str> {
    Some(match command {
        "reboot" => "reboot --serial S [--mode M] [system|bootloader|fastboot|recovery|sideload]",
        "connect" => "connect HOST:PORT",
        "pair" => "pair HOST:PORT CODE",
        "install" => "install --serial S APK",
        "uninstall" => "uninstall --serial S PACKAGE",
        "sideload" => "sideload --serial S ZIP",
        "push" => "push --serial S LOCAL REMOTE",
        "su" => "su --serial S -- <script>",
        "erase" => "erase --serial S PARTITION",
        "format" => "format --serial S FS PARTITION",
        _ => return None,
    })
}

/// Builds the single-shot device command behind a front-end action. `mode` picks the
/// client for `reboot`.
fn device_command(
    tools: &Toolchain,
    args: &Args,
    mode: ConnectionMode,
    trace_id: &str,
) -> Result<CommandLine, AppError> {
    let usage = || {
        AppError::validation(
            format!("usage: {}", action_usage(&args.command).unwrap_or(USAGE)),
            trace_id,
        )
    };
    let rest: Vec<&str> = args.rest.iter().map(String::as_str).collect();
    match (args.command.as_str(), rest.as_slice()) {
        ("connect", [address]) => return Ok(adb_connect(tools, address)),
        ("pair", [address, code]) => return Ok(adb_pair(tools, address, code)),
        ("connect" | "pair", _) => return Err(usage()),
        _ => {}
    }

    let serial = require_serial(args, trace_id)?;
    let command = match (args.command.as_str(), rest.as_slice()) {
        ("reboot", [] | [_]) => {
            let value = rest.first().copied().unwrap_or_default();
            let target = RebootTarget::parse(value).ok_or_else(|| {
                AppError::validation(format!("Unknown reboot target: {value}"), trace_id)
            })?;
            match mode {
                ConnectionMode::Bootloader => fastboot_reboot(tools, &serial, target),
                _ => adb_reboot(tools, &serial, target),
            }
        }
        ("install", [apk]) => adb_install(tools, &serial, apk),
        ("uninstall", [package]) => adb_uninstall(tools, &serial, package),
        ("sideload", [package]) => adb_sideload(tools, &serial, package),
        ("push", [local, remote]) => adb_push(tools, &serial, local, remote),
        ("su", script) if !script.is_empty() => adb_su_shell(tools, &serial, &script.join(" ")),
        ("erase", [partition]) => fastboot_erase(tools, &serial, partition),
        ("format", [filesystem, partition]) => fastboot_format(tools, &serial, filesystem, partition),
        _ => return Err(usage()),
    };
    Ok(command)
}

fn cmd_action(state: &AppState, args: &Args, console: &Console, trace_id: &str) -> Result<i32, AppError> {
    let mode = match (args.command.as_str(), args.mode) {
        (_, Some(mode)) => mode,
        ("reboot", None) => resolve_selection(state, args, trace_id)?.mode,
        _ => ConnectionMode::Bridge,
    };
    let command = device_command(&state.tools, args, mode, trace_id)?;

    let first = args.rest.first().cloned().unwrap_or_default();
    match args.command.as_str() {
        "install" => {
            if let Some(dir) = parent_dir(&first) {
                remember_paths(state, trace_id, |paths| paths.apk_dir = dir);
            }
        }
        "sideload" => {
            if let Some(dir) = parent_dir(&first) {
                remember_paths(state, trace_id, |paths| paths.sideload_dir = dir);
            }
        }
        "connect" | "pair" => {
            remember_paths(state, trace_id, |paths| paths.last_wireless_ip = first.trim().to_string());
        }
        _ => {}
    }

    stream_command(state, command, args.yes, console, trace_id)
}

fn cmd_run(state: &AppState, args: &Args, console: &Console, trace_id: &str) -> Result<i32, AppError> {
    let command = match args.rest.as_slice() {
        [] => return Err(AppError::validation("run needs a command line after --", trace_id)),
        [line] => CommandLine::parse(line, trace_id)?,
        [program, rest @ ..] => CommandLine::new(program).args(rest.iter().cloned()),
    };
    let command = match args.serial.as_deref() {
        Some(serial) => command.scoped_to(serial),
        None => command,
    };
    stream_command(state, command, args.yes, console, trace_id)
}

/// Echoes and streams one command, asking first when it is high-risk.
fn stream_command(
    state: &AppState,
    command: CommandLine,
    yes: bool,
    console: &Console,
    trace_id: &str,
) -> Result<i32, AppError> {
    let confirmed = yes
        || !is_high_risk(&command)
        || confirm(&format!("'{}' can modify or wipe the device.", command.display()));
    if !confirmed {
        eprintln!("Aborted.");
        return Ok(1);
    }

    console.print(ConsoleLine::command(&command));
    let (tx, rx) = mpsc::channel::<ProcessEvent>();
    let listener: ProcessListener = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    let handle = state.execute(command, None, true, listener, trace_id)?;
    let mut code = 0;
    for event in rx {
        match event {
            ProcessEvent::Output(line) => console.print(ConsoleLine::output(line)),
            ProcessEvent::Exit(exit) => {
                code = exit;
                break;
            }
        }
    }
    handle.join();
    Ok(code)
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let config = match load_config(&trace_id) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging);

    let state = AppState::new(config);
    let console = Console::default();
    if args.command != "check" {
        if let Err(err) = require_tools(&state, &console, &trace_id) {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
    let result = match args.command.as_str() {
        "check" => cmd_check(&state, &args, &trace_id),
        "devices" => cmd_devices(&state, &args, &trace_id),
        "info" => cmd_info(&state, &args, &trace_id),
        "metrics" => cmd_metrics(&state, &args, &trace_id),
        "partitions" => cmd_partitions(&state, &args, &trace_id),
        "flash" => cmd_flash(&state, &args, &console, &trace_id),
        "bootlog" => cmd_bootlog(&state, &args, &trace_id),
        "run" => cmd_run(&state, &args, &console, &trace_id),
        other if action_usage(other).is_some() => cmd_action(&state, &args, &console, &trace_id),
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    if args.save_log {
        if let Err(err) = console.save(&state, &trace_id) {
            eprintln!("{err}");
        }
    }
    state.shutdown(&trace_id);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
