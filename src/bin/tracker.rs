use asset_tracker::engine::{StateMatch, Target, TimeoutPolicy};
use asset_tracker::power::WakeSource;
use asset_tracker::subsystems::ButtonGesture;
use asset_tracker::{AppState, SimTracker, TrackerConfig, MACHINE};
use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use tracing::Level;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("tracker")
        .version("0.1.0")
        .author("Tracker Firmware Team")
        .about("📍 Asset tracker state machine - host-side runner and table inspector")
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Log engine activity (-v info, -vv debug, -vvv trace)")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("▶️  Run the simulated tracker for a number of cycles")
                .arg(
                    Arg::with_name("cycles")
                        .short("n")
                        .long("cycles")
                        .value_name("N")
                        .help("Cycles to run")
                        .takes_value(true)
                        .default_value("100")
                        .validator(|v| match v.parse::<u32>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Cycle count must be a valid number".into()),
                        }),
                )
                .arg(
                    Arg::with_name("press")
                        .long("press")
                        .value_name("CYCLE:GESTURE")
                        .help("Press a button at a cycle, e.g. 40:b2-short")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1),
                )
                .arg(
                    Arg::with_name("low-power")
                        .long("low-power")
                        .value_name("CYCLE")
                        .help("Schedule a low-power change at a cycle")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("wake")
                        .long("wake")
                        .value_name("SOURCE")
                        .help("Wake source for --low-power")
                        .takes_value(true)
                        .possible_values(&["ble", "accel", "ble-accel", "button"])
                        .default_value("button"),
                ),
        )
        .subcommand(SubCommand::with_name("tables").about("📋 Print the state, event and transition tables"))
        .subcommand(SubCommand::with_name("config").about("⚙️  Print the effective configuration as JSON"))
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load_config(&matches)?;
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("run", Some(sub)) => handle_run(sub, config, format),
        ("tables", Some(_)) => {
            print_tables();
            Ok(())
        }
        ("config", Some(_)) => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {}", "tracker run --cycles 200 --press 60:b2-short".bright_cyan());
            println!("  {}", "tracker tables".bright_cyan());
            Ok(())
        }
    }
}

fn load_config(matches: &ArgMatches<'_>) -> Result<TrackerConfig, Box<dyn std::error::Error>> {
    match matches.value_of("config") {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Ok(TrackerConfig::from_json(&json)?)
        }
        None => Ok(TrackerConfig::default()),
    }
}

fn parse_gesture(name: &str) -> Option<ButtonGesture> {
    match name {
        "b1-short" => Some(ButtonGesture::Button1Short),
        "b1-long" => Some(ButtonGesture::Button1Long),
        "b2-short" => Some(ButtonGesture::Button2Short),
        "b2-long" => Some(ButtonGesture::Button2Long),
        _ => None,
    }
}

fn parse_press(arg: &str) -> Result<(u32, ButtonGesture), String> {
    let (cycle, gesture) = arg
        .split_once(':')
        .ok_or_else(|| format!("press '{}' must look like CYCLE:GESTURE", arg))?;
    let cycle = cycle.parse::<u32>().map_err(|e| format!("press '{}': {}", arg, e))?;
    let gesture = parse_gesture(gesture).ok_or_else(|| format!("unknown gesture '{}'", gesture))?;
    Ok((cycle, gesture))
}

fn parse_wake(name: &str) -> WakeSource {
    match name {
        "ble" => WakeSource::Ble,
        "accel" => WakeSource::Accelerometer,
        "ble-accel" => WakeSource::BleAndAccelerometer,
        _ => WakeSource::Button,
    }
}

fn handle_run(matches: &ArgMatches<'_>, config: TrackerConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cycles = matches.value_of("cycles").unwrap_or("100").parse::<u32>()?;
    let presses = matches
        .values_of("press")
        .map(|values| values.map(parse_press).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();
    let low_power_at = matches.value_of("low-power").map(str::parse::<u32>).transpose()?;
    let wake = parse_wake(matches.value_of("wake").unwrap_or("button"));

    let mut tracker = SimTracker::simulated(config)?;
    tracker.start();
    let mut boots = 1;

    if format == "table" {
        println!("{}", "┌───────┬────────────┬───────┬────────────┐".bright_white());
        println!("{}", "│ Cycle │ From       │ Event │ To         │".bright_white());
        println!("{}", "├───────┼────────────┼───────┼────────────┤".bright_white());
    }

    for cycle in 1..=cycles {
        for (_, gesture) in presses.iter().filter(|(at, _)| *at == cycle) {
            tracker.app_mut().board_mut().press(*gesture);
        }
        if low_power_at == Some(cycle) {
            if let Err(e) = tracker.schedule_low_power(wake) {
                eprintln!("{} low-power request refused: {}", "⚠️".yellow(), e);
            }
        }

        match tracker.update() {
            Ok(report) => {
                if let (Some(t), "table") = (report.transition, format) {
                    let engine = tracker.engine();
                    println!(
                        "│ {:>5} │ {:<10} │ {:<5} │ {:<10} │",
                        cycle,
                        engine.state_name(t.from),
                        engine.event_name(t.event).bright_cyan(),
                        engine.state_name(t.to).bright_green()
                    );
                }
            }
            Err(e) if e.is_warning() => {}
            Err(e) => {
                eprintln!("{} cycle {} failed: {}", "❌".red(), cycle, e.to_string().bright_red());
                break;
            }
        }

        if tracker.reboot_pending() {
            boots += 1;
            if format == "table" {
                println!("│ {:>5} │ {:<39}│", cycle, "↻ reset".bright_yellow());
            }
            tracker = tracker.reset()?;
        }

        if tracker.current_state() == Some(AppState::End) {
            break;
        }
    }

    let snapshot = tracker.snapshot();
    match format {
        "json" => println!("{}", snapshot.to_json_pretty()?),
        _ => {
            println!("{}", "└───────┴────────────┴───────┴────────────┘".bright_white());
            println!("{} {}", "State:".bright_white(), snapshot.state.bright_green());
            println!("{} {}", "Boots:".bright_white(), boots.to_string().bright_cyan());
            println!("{} {}", "BLE failures:".bright_white(), snapshot.ble_failures.to_string().bright_cyan());
            println!(
                "{} {}",
                "Scheduler ticks:".bright_white(),
                snapshot.scheduler.ticks.to_string().bright_cyan()
            );
        }
    }
    Ok(())
}

fn describe_timeout(policy: TimeoutPolicy) -> String {
    let event = |e| MACHINE.event_name(e);
    match policy {
        TimeoutPolicy::None => "-".to_string(),
        TimeoutPolicy::Fixed { after, event: e } => format!("fixed {} → {}", after, event(e)),
        TimeoutPolicy::OkOnEntry { after, event: e } => format!("on-entry {} → {}", after, event(e)),
        TimeoutPolicy::OkWatchdog { after, event: e } => format!("watchdog {} → {}", after, event(e)),
    }
}

fn print_tables() {
    println!("\n{}", "States".bright_blue().bold());
    println!("{}", "══════".bright_blue());
    for state in MACHINE.states {
        println!(
            "  {:>2}  {:<10} {:<20} {}",
            state.id.0,
            MACHINE.state_name(state.id).bright_white(),
            describe_timeout(state.timeout),
            if state.requires_reboot { "reset on entry".bright_yellow() } else { "".normal() }
        );
    }

    println!("\n{}", "Events".bright_blue().bold());
    println!("{}", "══════".bright_blue());
    for event in MACHINE.events {
        println!("  {:>2}  {}", event.id.0, MACHINE.event_name(event.id).bright_white());
    }

    println!("\n{}", "Transitions".bright_blue().bold());
    println!("{}", "═══════════".bright_blue());
    for t in MACHINE.transitions {
        let from = match t.from {
            StateMatch::Any => "*".to_string(),
            StateMatch::State(s) => MACHINE.state_name(s).to_string(),
        };
        let to = match t.to {
            Target::State(s) => MACHINE.state_name(s).to_string(),
            Target::Return => "<Return>".to_string(),
        };
        println!("  {:<10} --({})--> {}", from, MACHINE.event_name(t.event).bright_cyan(), to.bright_green());
    }

    println!("\n{}", "Modules".bright_blue().bold());
    println!("{}", "═══════".bright_blue());
    for module in MACHINE.modules {
        let active: Vec<&str> = MACHINE
            .states
            .iter()
            .filter(|s| module.handler_for(s.id).is_some())
            .map(|s| MACHINE.state_name(s.id))
            .collect();
        println!("  {:<7} {}", MACHINE.module_name(module.id).bright_white(), active.join(", "));
    }
}
