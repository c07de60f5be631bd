//! Parsing Options.
//! `--net {file}` is required; extra flags may also come from `HYPN_FLAGS`.

use clap::{Arg, ArgAction, Command, value_parser};
use std::error::Error;
use std::path::PathBuf;

use crate::config::SimConfig;
use crate::sim::ConflictPolicy;

fn make_options_parser() -> clap::Command {
    let parser = Command::new("hypn")
        .no_binary_name(true)
        .version("v0.1.0")
        .about("Steps a hybrid Petri net and reports the final marking")
        .args_override_self(true)
        .arg(
            Arg::new("net")
                .short('n')
                .long("net")
                .value_name("FILE")
                .help("Net document (.json or .ron)")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML simulation settings")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("steps")
                .short('s')
                .long("steps")
                .help("Maximum number of steps")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("dt")
                .long("dt")
                .help("Logical time per step")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("policy")
                .short('p')
                .long("policy")
                .help("Conflict resolution policy")
                .value_parser(["random", "priority", "type_based", "round_robin"]),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("trace")
                .short('o')
                .long("trace")
                .value_name("FILE")
                .help("Path to file where the firing trace will be stored")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("realtime")
                .long("realtime")
                .help("Tick on the configured wall-clock cadence")
                .action(ArgAction::SetTrue),
        );
    parser
}

#[derive(Debug, Default)]
pub struct Options {
    pub net: PathBuf,
    pub config: Option<PathBuf>,
    pub steps: Option<u64>,
    pub dt: Option<f64>,
    pub policy: Option<ConflictPolicy>,
    pub seed: Option<u64>,
    pub trace: Option<PathBuf>,
    pub realtime: bool,
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        let flags = shellwords::split(s)?;
        Self::parse_from_args(&flags)
    }

    pub fn parse_from_args(flags: &[String]) -> Result<Self, Box<dyn Error>> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;

        let net = matches
            .get_one::<PathBuf>("net")
            .cloned()
            .ok_or("MissingNetFile")?;
        let policy = match matches.get_one::<String>("policy") {
            Some(name) => Some(name.parse::<ConflictPolicy>()?),
            None => None,
        };
        let dt = matches.get_one::<f64>("dt").copied();
        if let Some(dt) = dt {
            if !(dt.is_finite() && dt > 0.0) {
                return Err(format!("--dt must be positive, got {dt}"))?;
            }
        }

        Ok(Options {
            net,
            config: matches.get_one::<PathBuf>("config").cloned(),
            steps: matches.get_one::<u64>("steps").copied(),
            dt,
            policy,
            seed: matches.get_one::<u64>("seed").copied(),
            trace: matches.get_one::<PathBuf>("trace").cloned(),
            realtime: matches.get_flag("realtime"),
        })
    }

    /// Command-line values take precedence over the config file.
    pub fn apply(&self, config: &mut SimConfig) {
        if let Some(steps) = self.steps {
            config.run.max_steps = Some(steps);
        }
        if let Some(dt) = self.dt {
            config.run.dt = dt;
        }
        if let Some(policy) = self.policy {
            config.conflict_policy = policy;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
    }
}
