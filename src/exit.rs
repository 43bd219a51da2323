//! Callbacks run once the measured program has finished.
//!
//! Hooks run last-registered-first while the session is still measuring.
//! The report finalizer is installed when the registry is created, so it
//! always runs after every hook the profiled program adds; it stops the
//! session and writes the report.

use anyhow::Error;
use log::{debug, error};

use crate::output::{self, OutputPlan};
use crate::printers::{PrintOptions, PrinterKind};
use crate::runtime::Host;
use crate::session::SessionController;

pub type ExitHook = Box<dyn FnOnce(&mut dyn Host, &mut SessionController) -> Result<(), Error>>;

pub struct ExitHooks {
    hooks: Vec<(String, ExitHook)>,
}

impl ExitHooks {
    /// Creates the registry with `finalizer` as its first entry.
    pub fn with_finalizer<F>(finalizer: F) -> Self
    where
        F: FnOnce(&mut dyn Host, &mut SessionController) -> Result<(), Error> + 'static,
    {
        ExitHooks { hooks: vec![("finalize".to_string(), Box::new(finalizer))] }
    }

    /// Registers a callback to run at exit, ahead of everything registered
    /// before it.
    pub fn at_exit<F>(&mut self, label: impl Into<String>, hook: F)
    where
        F: FnOnce(&mut dyn Host, &mut SessionController) -> Result<(), Error> + 'static,
    {
        self.hooks.push((label.into(), Box::new(hook)));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs every hook, newest first. A failing hook does not stop the
    /// rest; the first failure is returned.
    pub fn run(self, host: &mut dyn Host, session: &mut SessionController) -> Result<(), Error> {
        let mut first_error = None;
        for (label, hook) in self.hooks.into_iter().rev() {
            debug!("running exit hook '{}'", label);
            if let Err(e) = hook(&mut *host, &mut *session) {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    error!("exit hook '{}' failed: {:?}", label, e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// The registry for a session whose report is written according to `plan`.
pub fn install(plan: OutputPlan, printer: PrinterKind, options: PrintOptions) -> ExitHooks {
    ExitHooks::with_finalizer(move |host, session| {
        let results = session.stop()?;
        output::write_report(host, &plan, printer, results, &options)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MeasureMode, ProfileOptions};
    use crate::session::SessionState;
    use crate::testing::FakeHost;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn running_session() -> SessionController {
        let options = ProfileOptions {
            allow_exceptions: false,
            exclude_common: false,
            measure_mode: MeasureMode::Allocations,
            track_allocations: false,
        };
        let mut session = SessionController::new(options, &[]);
        session.start(false).unwrap();
        session
    }

    fn recording(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> ExitHook {
        let log = Rc::clone(log);
        Box::new(move |_, _| {
            log.borrow_mut().push(name);
            Ok(())
        })
    }

    #[test]
    fn finalizer_runs_after_later_hooks() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut hooks = ExitHooks::with_finalizer(recording(&log, "finalize"));
        hooks.at_exit("first", recording(&log, "first"));
        hooks.at_exit("second", recording(&log, "second"));
        assert_eq!(hooks.len(), 3);

        hooks.run(&mut FakeHost::new("/work"), &mut running_session()).unwrap();
        assert_eq!(*log.borrow(), vec!["second", "first", "finalize"]);
    }

    #[test]
    fn failing_hook_does_not_skip_finalizer() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut hooks = ExitHooks::with_finalizer(recording(&log, "finalize"));
        hooks.at_exit("broken", |_, _| Err(anyhow::anyhow!("broken hook")));

        let err = hooks.run(&mut FakeHost::new("/work"), &mut running_session()).unwrap_err();
        assert_eq!(err.to_string(), "broken hook");
        assert_eq!(*log.borrow(), vec!["finalize"]);
    }

    #[test]
    fn hooks_are_measured_until_the_finalizer_stops_the_session() {
        let seen = Rc::new(RefCell::new(None));
        let seen_in_finalizer = Rc::clone(&seen);
        let mut hooks = ExitHooks::with_finalizer(move |_, session: &mut SessionController| {
            *seen_in_finalizer.borrow_mut() = Some(session.stop()?.total());
            Ok(())
        });
        hooks.at_exit("work", |_, session: &mut SessionController| {
            let recorder = session.recorder()?;
            recorder.enter("Hook#flush");
            recorder.record_allocation(64);
            recorder.leave();
            Ok(())
        });

        let mut session = running_session();
        hooks.run(&mut FakeHost::new("/work"), &mut session).unwrap();
        assert_eq!(*seen.borrow(), Some(1.0));
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.results().unwrap().nodes[1].name, "Hook#flush");
    }
}
