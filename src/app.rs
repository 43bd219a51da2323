//! The main application logic.

use anyhow::{Context, Error};
use log::{debug, error, info};

use crate::exit;
use crate::opt::SessionConfig;
use crate::output::OutputPlan;
use crate::prelude;
use crate::runtime::{Host, Workload};
use crate::session::SessionController;

/// The main entrance point, once args have been parsed.
pub fn run(config: &SessionConfig, host: &mut dyn Host) -> Result<(), Error> {
    prelude::run(host, &config.libraries, &config.snippets)?;

    // Installed before the script runs so it fires after the script's own
    // exit hooks.
    let plan = OutputPlan::new(config);
    let mut exit_hooks = exit::install(plan, config.printer, config.print_options());

    let mut session = SessionController::new(config.profile_options(), &config.exclusions);
    info!("profiling {:?} ({})", config.script, config.measure_mode);
    session.start(config.start_paused)?;
    let outcome = {
        let workload = Workload { recorder: session.recorder()?, exit_hooks: &mut exit_hooks };
        host.load_and_execute(&config.script, &config.script_args, workload)
    };
    let outcome = session.settle(outcome);

    debug!("running {} exit hooks", exit_hooks.len());
    if let Err(e) = exit_hooks.run(host, &mut session) {
        if let Err(failure) = &outcome {
            error!("profiled program {:?} failed: {}", config.script, failure);
        }
        return Err(e);
    }
    outcome.with_context(|| format!("profiled program {:?} failed", config.script))
}
