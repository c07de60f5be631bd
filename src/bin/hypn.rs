use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use hypn::config::SimConfig;
use hypn::net::io;
use hypn::options::Options;
use hypn::sim::{FiringRecord, IntervalDriver, RunDriver, SimulationController, TraceCollector};

const DEFAULT_MAX_STEPS: u64 = 1000;

#[derive(Serialize)]
struct PlaceTokens<'a> {
    place: &'a str,
    tokens: f64,
}

#[derive(Serialize)]
struct TraceDocument<'a> {
    final_time: f64,
    steps: u64,
    marking: Vec<PlaceTokens<'a>>,
    firings: &'a [FiringRecord],
}

fn main() -> Result<()> {
    if std::env::var("HYPN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("HYPN_LOG")
            .write_style("HYPN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let mut flags = shellwords::split(&std::env::var("HYPN_FLAGS").unwrap_or_default())
        .map_err(|_| anyhow!("HYPN_FLAGS has mismatched quotes"))?;
    flags.extend(std::env::args().skip(1));
    let options = match Options::parse_from_args(&flags) {
        Ok(options) => options,
        Err(err) => match err.downcast::<clap::Error>() {
            Ok(clap_err) => clap_err.exit(),
            Err(err) => return Err(anyhow!("{err}")),
        },
    };
    log::debug!("hypn options: {:?}", options);

    let mut config = match &options.config {
        Some(path) => SimConfig::load_from_file(path)?,
        None => SimConfig::default(),
    };
    options.apply(&mut config);
    let dt = config.run.dt;
    let max_steps = config.run.max_steps.unwrap_or(DEFAULT_MAX_STEPS);
    let cadence = if options.realtime { config.run.cadence_ms } else { 0 };

    let net = io::read_net(&options.net)
        .with_context(|| format!("Failed to load net: {:?}", options.net))?;
    let mut controller = SimulationController::new(net, config)?;
    let trace = TraceCollector::shared();
    controller.set_data_collector(Box::new(Rc::clone(&trace)));

    if !controller.run(dt, Some(max_steps)) {
        anyhow::bail!("cannot start run with dt = {}", dt);
    }
    let ticks = IntervalDriver::from_millis(cadence).drive(&mut controller);
    log::info!(
        "{} steps, t = {}, {} firings recorded",
        ticks,
        controller.now(),
        trace.borrow().len()
    );

    for (_, place) in controller.net().places() {
        println!("{}\t{}", place.name, place.tokens);
    }

    if let Some(path) = &options.trace {
        let records = trace.borrow();
        let document = TraceDocument {
            final_time: controller.now(),
            steps: controller.steps_taken(),
            marking: controller
                .net()
                .places()
                .map(|(_, p)| PlaceTokens {
                    place: &p.name,
                    tokens: p.tokens,
                })
                .collect(),
            firings: records.records(),
        };
        io::write(path, &document)
            .with_context(|| format!("Failed to write trace: {:?}", path))?;
    }
    Ok(())
}
