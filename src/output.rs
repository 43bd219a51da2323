//! Routing the finished report to stdout, a file, or a directory.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info};

use crate::engine::ResultSet;
use crate::error::OutputError;
use crate::opt::SessionConfig;
use crate::printers::{Destination, PrintOptions, PrinterKind};
use crate::runtime::Host;

/// Where the report goes, decided once from the session config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    pub file: Option<PathBuf>,
    pub is_directory: bool,
    /// Directory relative destinations are resolved against.
    pub working_dir: PathBuf,
}

impl OutputPlan {
    pub fn new(config: &SessionConfig) -> Self {
        OutputPlan {
            file: config.file.clone(),
            is_directory: config.printer.needs_directory(),
            working_dir: config.working_dir.clone().unwrap_or_else(|| config.startup_dir.clone()),
        }
    }
}

/// Changes the host's working directory and changes it back on drop.
pub struct WorkingDir<'a> {
    host: &'a mut dyn Host,
    previous: PathBuf,
}

impl<'a> WorkingDir<'a> {
    pub fn change(host: &'a mut dyn Host, to: &Path) -> Result<Self, OutputError> {
        let change_dir_err = |source| OutputError::ChangeDir { path: to.to_owned(), source };
        let previous = host.current_dir().map_err(change_dir_err)?;
        host.set_current_dir(to).map_err(change_dir_err)?;
        debug!("changed directory from {:?} to {:?}", previous, to);
        Ok(WorkingDir { host, previous })
    }

    /// `path` resolved against the directory currently in effect.
    pub fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        Ok(self.host.current_dir()?.join(path))
    }
}

impl Drop for WorkingDir<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.host.set_current_dir(&self.previous) {
            error!("failed to restore working directory {:?}: {}", self.previous, e);
        }
    }
}

/// Renders `results` according to `plan`, writing to stdout when no
/// destination was configured.
pub fn write_report(
    host: &mut dyn Host,
    plan: &OutputPlan,
    printer: PrinterKind,
    results: &ResultSet,
    options: &PrintOptions,
) -> Result<(), OutputError> {
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    write_report_to(host, plan, printer, results, options, &mut stdout)
}

/// As [`write_report`], with the standard output stream supplied.
pub fn write_report_to(
    host: &mut dyn Host,
    plan: &OutputPlan,
    printer: PrinterKind,
    results: &ResultSet,
    options: &PrintOptions,
    stdout: &mut dyn Write,
) -> Result<(), OutputError> {
    let file = match &plan.file {
        Some(file) => file,
        None => {
            printer.render(results, Destination::Stream(&mut *stdout), options)?;
            stdout.flush()?;
            return Ok(());
        }
    };

    let dir = WorkingDir::change(host, &plan.working_dir)?;
    let path = dir.resolve(file)?;
    if plan.is_directory {
        info!("writing {} report into {:?}", printer, path);
        printer.render(results, Destination::Directory(&path), options)?;
    } else {
        info!("writing {} report to {:?}", printer, path);
        let file = File::create(&path)
            .map_err(|source| OutputError::Create { path: path.clone(), source })?;
        let mut out = BufWriter::new(file);
        printer.render(results, Destination::Stream(&mut out), options)?;
        out.flush()?;
    }
    Ok(())
}
