use std::path::PathBuf;
use std::process;
use std::time::Duration;

use exo_shell::core::init_logging;
use exo_shell::platform::headless::HeadlessWindowSystem;
use exo_shell::{ShellApp, ShellConfig, ShellResult};

const USAGE: &str = "usage: exo_shell [--config FILE] [--headless] SCRIPT";

struct Options {
    config: Option<PathBuf>,
    headless: bool,
    script: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        config: None,
        headless: false,
        script: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().ok_or("--config needs a file")?;
                options.config = Some(PathBuf::from(path));
            }
            "--headless" => options.headless = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with("--") => return Err(format!("unknown option {other}\n{USAGE}")),
            _ if options.script.is_some() => return Err(USAGE.to_string()),
            _ => options.script = Some(PathBuf::from(arg)),
        }
    }
    Ok(options)
}

fn run(options: Options) -> ShellResult<()> {
    let mut config = match &options.config {
        Some(path) => ShellConfig::from_file(path)?,
        None => ShellConfig::load_or_default(),
    };
    config.apply_env_overrides();
    if let Some(script) = options.script {
        config.runtime.bootstrap = Some(script);
    }
    init_logging(&config.logging)?;

    if options.headless {
        let mut app = ShellApp::start(config)?;
        app.run_headless(&mut HeadlessWindowSystem::new(), Duration::from_millis(50));
        app.shutdown();
        Ok(())
    } else {
        exo_shell::platform::winit::run_event_loop(config)
    }
}

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            process::exit(2);
        }
    };
    if let Err(e) = run(options) {
        eprintln!("Shell failed to start: {}", e);
        process::exit(1);
    }
}
