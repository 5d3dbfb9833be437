use std::path::PathBuf;
use std::rc::Rc;
use std::{env, process};

use atrium::config::Config;
use atrium::intent::{ActivityInfo, ApplicationInfo, ComponentName, UserId};
use atrium::root::HOME_ACTION;
use atrium::services::{Services, StaticPackageService};
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Home component used when the configuration names none.
const FALLBACK_HOME: (&str, &str) = ("org.atrium.launcher", "Home");

/// Command line arguments.
#[derive(Parser, Debug)]
#[clap(author, about, version, max_term_width = 80)]
struct Options {
    /// Alternative configuration file path.
    #[clap(long)]
    config: Option<PathBuf>,
}

pub fn main() {
    // Setup logging.
    let directives = env::var("RUST_LOG").unwrap_or("warn,atrium=info".into());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    FmtSubscriber::builder().with_env_filter(env_filter).with_line_number(true).init();

    let options = Options::parse();
    let config = match Config::load(options.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("\x1b[31merror\x1b[0m: {err}");
            process::exit(1);
        },
    };

    // Register the home activity the package boundary will resolve.
    let home_component = config
        .home_component
        .clone()
        .unwrap_or_else(|| ComponentName::new(FALLBACK_HOME.0, FALLBACK_HOME.1));
    let application = ApplicationInfo::new(home_component.package.clone(), 10_000, UserId(0));
    let mut packages = StaticPackageService::new();
    packages.register(Some(HOME_ACTION), ActivityInfo::new(home_component, application));

    let services = Services::in_process(Rc::new(packages));
    if let Err(err) = atrium::run(config, services) {
        eprintln!("\x1b[31merror\x1b[0m: {err}");
        process::exit(1);
    }
}
