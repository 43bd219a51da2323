//! The process the profiled program is hosted in.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use object::{Object, ObjectSymbol};
use signal_hook::consts::{SIGUSR1, SIGUSR2};
use signal_hook::SigId;

use crate::engine::{self, MeasureMode, Recorder};
use crate::error::{MeasurementError, PreludeError};
use crate::exit::ExitHooks;
use crate::symbols::Namespace;

#[cfg(target_os = "macos")]
const PRELOAD_VAR: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
const PRELOAD_VAR: &str = "LD_PRELOAD";

/// Set in the child's environment to the pid that accepts `SIGUSR1`
/// (resume measuring) and `SIGUSR2` (pause measuring).
pub const CONTROL_PID_VAR: &str = "PROFLAUNCH_PID";

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// What a measured program gets to touch while it runs.
pub struct Workload<'a> {
    pub recorder: &'a mut Recorder,
    pub exit_hooks: &'a mut ExitHooks,
}

/// Facilities of the hosting process a session relies on.
pub trait Host {
    fn current_dir(&self) -> io::Result<PathBuf>;

    fn set_current_dir(&mut self, path: &Path) -> io::Result<()>;

    /// The symbol space exclusions for `script` are resolved against.
    fn symbols(&mut self, script: &Path) -> &Namespace;

    fn load_library(&mut self, name: &str) -> Result<(), PreludeError>;

    /// Evaluates `code` in the top-level context.
    fn evaluate(&mut self, code: &str) -> Result<(), PreludeError>;

    /// Loads `script` and runs it to completion as the measured workload.
    fn load_and_execute(
        &mut self,
        script: &Path,
        args: &[String],
        workload: Workload<'_>,
    ) -> Result<(), MeasurementError>;
}

/// Runs the target as a child process of this one.
#[derive(Debug, Default)]
pub struct ProcessHost {
    symbols: Option<Namespace>,
    preload: Vec<PathBuf>,
}

impl ProcessHost {
    pub fn new() -> Self {
        ProcessHost::default()
    }

    /// Libraries loaded so far, in load order.
    pub fn preloaded(&self) -> &[PathBuf] {
        &self.preload
    }

    fn preload_env(&self) -> Option<OsString> {
        if self.preload.is_empty() {
            return None;
        }
        let mut paths = self.preload.clone();
        if let Some(existing) = env::var_os(PRELOAD_VAR) {
            paths.extend(env::split_paths(&existing));
        }
        env::join_paths(paths).ok()
    }
}

impl Host for ProcessHost {
    fn current_dir(&self) -> io::Result<PathBuf> {
        env::current_dir()
    }

    fn set_current_dir(&mut self, path: &Path) -> io::Result<()> {
        env::set_current_dir(path)
    }

    fn symbols(&mut self, script: &Path) -> &Namespace {
        self.symbols.get_or_insert_with(|| match read_functions(script) {
            Ok(functions) => {
                let namespace = Namespace::from_functions(functions);
                debug!("loaded {} scopes from {:?}", namespace.len(), script);
                namespace
            }
            Err(e) => {
                warn!("no symbols available for {:?}: {}", script, e);
                Namespace::new()
            }
        })
    }

    fn load_library(&mut self, name: &str) -> Result<(), PreludeError> {
        let path = Path::new(name);
        if !path.is_file() {
            return Err(PreludeError::LibraryNotFound(name.to_string()));
        }
        let data = fs::read(path)?;
        object::File::parse(&*data).map_err(|e| PreludeError::NotALibrary {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        let path = path.canonicalize()?;
        info!("preloading {:?}", path);
        self.preload.push(path);
        Ok(())
    }

    fn evaluate(&mut self, code: &str) -> Result<(), PreludeError> {
        debug!("evaluating {:?}", code);
        let status = Command::new("sh").arg("-c").arg(code).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(PreludeError::Evaluation { code: code.to_string(), status })
        }
    }

    fn load_and_execute(
        &mut self,
        script: &Path,
        args: &[String],
        workload: Workload<'_>,
    ) -> Result<(), MeasurementError> {
        let launch_err = |source| MeasurementError::Launch { script: script.to_owned(), source };
        let mut command = Command::new(script);
        command.args(args).env(CONTROL_PID_VAR, std::process::id().to_string());
        if let Some(preload) = self.preload_env() {
            command.env(PRELOAD_VAR, preload);
        }

        // Registered before the child exists so an early request is not lost.
        let signals = ControlSignals::register()
            .map_err(|e| warn!("pause and resume requests unavailable: {}", e))
            .ok();
        let recorder = workload.recorder;
        let name = script.display().to_string();
        let started = recorder.now();
        let cpu_before = engine::children_cpu_seconds();
        recorder.enter_at(&name, Some(name.as_str()));
        let status = command.spawn().and_then(|child| supervise(child, signals.as_ref(), recorder));
        if status.is_ok() {
            if recorder.mode() == MeasureMode::WallTime {
                // Whatever the child did not spend on a CPU it spent waiting.
                let elapsed = (recorder.now() - started).max(0.0);
                let busy = engine::children_cpu_seconds() - cpu_before;
                recorder.record_wait((elapsed - busy).clamp(0.0, elapsed));
            }
            recorder.record_allocation(engine::children_peak_rss());
        }
        recorder.leave();

        let status = status.map_err(launch_err)?;
        if status.success() {
            Ok(())
        } else {
            Err(MeasurementError::Exited { script: script.to_owned(), status })
        }
    }
}

/// Pause and resume requests the child sends by signal.
struct ControlSignals {
    resume: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl ControlSignals {
    fn register() -> io::Result<Self> {
        let resume = Arc::new(AtomicBool::new(false));
        let pause = Arc::new(AtomicBool::new(false));
        let ids = vec![
            signal_hook::flag::register(SIGUSR1, Arc::clone(&resume))?,
            signal_hook::flag::register(SIGUSR2, Arc::clone(&pause))?,
        ];
        Ok(ControlSignals { resume, pause, ids })
    }

    fn apply(&self, recorder: &mut Recorder) {
        if self.resume.swap(false, Ordering::Relaxed) {
            info!("resume requested by the profiled program");
            recorder.resume();
        }
        if self.pause.swap(false, Ordering::Relaxed) {
            info!("pause requested by the profiled program");
            recorder.pause();
        }
    }
}

impl Drop for ControlSignals {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// Waits for `child` to exit, applying its pause and resume requests.
fn supervise(
    mut child: Child,
    signals: Option<&ControlSignals>,
    recorder: &mut Recorder,
) -> io::Result<ExitStatus> {
    let Some(signals) = signals else {
        return child.wait();
    };
    loop {
        signals.apply(recorder);
        if let Some(status) = child.try_wait()? {
            signals.apply(recorder);
            return Ok(status);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Demangled names of the function symbols defined in the object at `path`.
fn read_functions(path: &Path) -> Result<Vec<String>, anyhow::Error> {
    let data = fs::read(path)?;
    let file = object::File::parse(&*data)?;
    let functions = file
        .symbols()
        .chain(file.dynamic_symbols())
        .filter(|symbol| symbol.kind() == object::SymbolKind::Text && symbol.is_definition())
        .filter_map(|symbol| symbol.name().ok())
        .map(|name| format!("{:#}", rustc_demangle::demangle(name)))
        .collect();
    Ok(functions)
}
