use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use structopt::StructOpt;

use chrono::Timelike;
use env_logger::fmt::Color;

use collective_registry::algorithms::register_builtin;
use collective_registry::config::Config;
use collective_registry::{CollectiveParams, CollectiveRegistry};

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "collective-registry")]
struct Opts {
    /// Registry config path
    #[structopt(short, long)]
    config: Option<PathBuf>,
    /// Collective params to resolve
    #[structopt(short, long)]
    params: Option<PathBuf>,
    /// Print the registered collectives
    #[structopt(short, long)]
    list: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let time = chrono::Local::now();
            let style = buf
                .style()
                .set_color(Color::Black)
                .set_intense(true)
                .clone();
            let time = format!(
                "{:02}:{:02}:{:02}.{:03}",
                time.hour() % 24,
                time.minute(),
                time.second(),
                time.timestamp_subsec_millis()
            );
            writeln!(
                buf,
                "{}{} {} {}{} {}",
                style.value("["),
                time,
                buf.default_styled_level(record.level()),
                record.module_path().unwrap_or(""),
                style.value("]"),
                record.args()
            )
        })
        .init();
}

fn main() -> Result<()> {
    better_panic::install();
    let opts = Opts::from_args();
    init_logger();

    let config = match &opts.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let registry = CollectiveRegistry::new();
    register_builtin(&registry, &config.collectives)?;

    if opts.list {
        for name in registry.names() {
            println!("{}", name);
        }
    }

    if let Some(path) = &opts.params {
        let mut params = CollectiveParams::from_path(path)?;
        params.validate()?;
        log::info!("Loaded {}", params);

        let resolver =
            registry.lookup_param_resolver(&params.instance.impl_details.collective_name)?;
        resolver.initialize_collective_params(&mut params)?;
        println!("{}", params);
    }
    Ok(())
}
