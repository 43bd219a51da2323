//! The lifecycle of the single measurement session of a run.
//!
//! A session is started before the program runs and stays live through the
//! program's exit hooks; the report finalizer stops it.

use log::{debug, info};

use crate::engine::{Profile, ProfileOptions, Recorder, ResultSet};
use crate::error::MeasurementError;
use crate::symbols::ExclusionTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Configured,
    Running,
    Stopped,
}

pub struct SessionController {
    profile: Profile,
    state: SessionState,
    recorder: Option<Recorder>,
}

impl SessionController {
    /// Creates the session and registers `exclusions` in order.
    pub fn new(options: ProfileOptions, exclusions: &[ExclusionTarget]) -> Self {
        let mut profile = Profile::new(options);
        for target in exclusions {
            profile.exclude(target);
        }
        debug!("session configured with {} exclusions", exclusions.len());
        SessionController { profile, state: SessionState::Configured, recorder: None }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), MeasurementError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MeasurementError::State { expected, found: self.state })
        }
    }

    /// Starts measuring, paused if asked. A session starts once.
    pub fn start(&mut self, paused: bool) -> Result<(), MeasurementError> {
        self.expect_state(SessionState::Configured)?;
        if paused {
            info!("session started paused");
        }
        self.recorder = Some(self.profile.start(paused));
        self.state = SessionState::Running;
        Ok(())
    }

    /// The live recorder of a running session.
    pub fn recorder(&mut self) -> Result<&mut Recorder, MeasurementError> {
        let found = self.state;
        self.recorder
            .as_mut()
            .ok_or(MeasurementError::State { expected: SessionState::Running, found })
    }

    /// Passes on an error the workload raised only when the session allows
    /// exceptions.
    pub fn settle(&self, outcome: Result<(), MeasurementError>) -> Result<(), MeasurementError> {
        self.profile.settle(outcome)
    }

    /// Stops measuring and returns the results.
    pub fn stop(&mut self) -> Result<&ResultSet, MeasurementError> {
        self.expect_state(SessionState::Running)?;
        let recorder = self.recorder.take().ok_or(MeasurementError::State {
            expected: SessionState::Running,
            found: self.state,
        })?;
        self.state = SessionState::Stopped;
        debug!("session stopped");
        Ok(self.profile.stop(recorder))
    }

    /// The measurements, once the session has stopped.
    pub fn results(&self) -> Option<&ResultSet> {
        self.profile.results()
    }
}
