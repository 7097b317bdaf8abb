mod backoff;
mod ble;
mod config;
mod message;
mod poller;
mod radio;
mod sink;

use crate::{
    ble::BleRadio,
    config::Config,
    poller::{Poller, PollerConfig},
};

use std::{fs::File, io::BufReader, path::Path};

use anyhow::Context;
use clap::{App, Arg};
use indoc::indoc;
use log::{info, warn};
use tokio::{
    sync,
    time::{sleep, Duration, Instant},
};

const DEFAULT_CONFIG: &str = "config.yaml";

fn load_config(path: &str, explicit: bool) -> anyhow::Result<Config> {
    if !explicit && !Path::new(path).exists() {
        info!("no {} found, using built-in defaults", path);
        return Ok(Config::default());
    }
    info!("open and parse config file {}", path);
    let file = File::open(path).with_context(|| format!("failed to open file {}", path))?;
    let config: Config = serde_yaml::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse config file {}", path))?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cmd = App::new("humidity-pollster")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Poll a humidity characteristic from an ESP32 BLE peripheral")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .help("Sets custom config file location")
                .long_help(indoc!(
                    "Sets custom config file location, default to read config.yaml if present
                    The custom config must be a file of YAML 1.2 format.
                    The following configuration keys are supported:
                    device_name: optional, default esp32s3, advertised name of the peripheral
                    characteristic: optional, default 987312e0-2354-11eb-9f10-fbc30a62cf38
                    sink: optional, default File with path data.csv, or Console
                    scan_duration: optional, default 5s, length of each scan
                    request_timeout: optional, default 10s, bound on connect and read
                    poll_interval: optional, default 0s, pause after a successful read
                    retry_min: optional, default 1s, first delay after a failure
                    retry_max: optional, default 60s, largest delay after failures
                    retry_backoff: optional, default 6, failures before reaching retry_max
                    "
                ))
                .value_name("FILE")
                .takes_value(true),
        )
        .get_matches();
    env_logger::init();

    let config = load_config(
        cmd.value_of("config").unwrap_or(DEFAULT_CONFIG),
        cmd.is_present("config"),
    )?;
    config.validate().context("invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    let (termination_sender, mut termination_receiver) = sync::broadcast::channel(1);
    let poller_termination = termination_sender.subscribe();
    ctrlc::set_handler(move || {
        info!("signal received, terminating...");
        let _ = termination_sender.send(());
    })
    .context("failed to set up signal handlers")?;

    let result = runtime.block_on(async move {
        let mut sink = config.sink.clone().into_sink().await?;
        let radio = BleRadio::new().await?;
        let mut poller = Poller::new(radio, PollerConfig::from(&config));
        let task_handle = async move { poller.run_forever(sink.as_mut(), poller_termination).await };

        let deadline = sleep(Duration::from_secs(30));
        let mut terminated = false;
        tokio::pin!(deadline);
        tokio::pin!(task_handle);
        loop {
            tokio::select! {
                _ = termination_receiver.recv(), if !terminated => {
                    terminated = true;
                    deadline.as_mut().reset(Instant::now() + Duration::from_secs(5));
                },
                _ = &mut deadline, if terminated => {
                    warn!("poller didn't terminate in time, force exit");
                    return Ok(());
                },
                r = &mut task_handle => {
                    return r.context("polling aborted");
                },
            }
        }
    });
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
