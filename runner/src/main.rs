use clap::{Parser, Subcommand};
use judgerlib::config::build_config;

use crate::config::AppConfig;
use crate::relay::{RelayController, RelayFrame};

mod config;
mod console;
mod error;
mod power;
mod relay;
mod tasks;
#[cfg(test)]
mod test_harness;

#[derive(Parser, Debug)]
#[command(version, about = "Boots queued kernel images on the judging board")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take tasks off the queue until the broker goes away (default)
    Run,
    /// Send a raw command to the power relay
    Relay {
        /// 0 = off, 1 = on, anything above is a query
        cmd: u8,
        /// Relay channels, defaults to the configured ones
        #[arg(long = "addr")]
        addrs: Vec<u8>,
    },
}

fn relay_command(cfg: &AppConfig, cmd: u8, addrs: &[u8]) -> anyhow::Result<()> {
    let addrs = if addrs.is_empty() {
        &cfg.runner.power_addrs[..]
    } else {
        addrs
    };
    let mut relay = RelayController::open(&cfg.runner.tty_power, cfg.runner.power_baudrate)?;
    for (addr, response) in addrs.iter().zip(relay.run_cmd(addrs, cmd)?) {
        let hex: Vec<String> = response.iter().map(|b| format!("{:02x}", b)).collect();
        match RelayFrame::decode(response) {
            Ok(frame) => println!("{}: {} (state {})", addr, hex.join(" "), frame.command),
            Err(e) => println!("{}: {} ({})", addr, hex.join(" "), e),
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_module("judger_runner", log::LevelFilter::Debug)
        .filter_module("judgerlib", log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let app_config = build_config().extract::<AppConfig>()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            log::info!("judger runner starting up.");
            tasks::runner::run(app_config)
        }
        Command::Relay { cmd, addrs } => relay_command(&app_config, cmd, &addrs),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn relay_subcommand_arguments() {
        let cli = Cli::try_parse_from(["judger-runner", "relay", "5", "--addr", "1", "--addr", "2"])
            .unwrap();

        match cli.command {
            Some(Command::Relay { cmd, addrs }) => {
                assert_eq!(cmd, 5);
                assert_eq!(addrs, vec![1, 2]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn run_is_the_default() {
        let cli = Cli::try_parse_from(["judger-runner"]).unwrap();
        assert!(cli.command.is_none());
    }
}
