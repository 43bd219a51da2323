//! Command line parsing and validation.

use std::env;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use structopt::clap::{AppSettings, ErrorKind};
use structopt::StructOpt;

use crate::engine::{MeasureMode, ProfileOptions};
use crate::error::UsageError;
use crate::printers::{PrintOptions, PrinterKind, SortKey};
use crate::runtime::Host;
use crate::symbols::{ExclusionTarget, Namespace, ScopeLevel, ScopeRef};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "proflaunch",
    about = "Run a program under a profiling session and print a report",
    no_version,
    settings = &[AppSettings::DisableVersion, AppSettings::TrailingVarArg]
)]
pub struct Opts {
    /// Let errors raised while profiling propagate instead of suppressing them
    #[structopt(long = "allow_exceptions")]
    pub allow_exceptions: bool,

    /// Evaluate CODE before profiling starts (repeatable)
    #[structopt(long = "eval-noprof", value_name = "CODE", number_of_values = 1)]
    pub eval: Vec<String>,

    /// Comma separated methods to exclude, as SCOPE#METHOD or SCOPE.METHOD
    #[structopt(long = "exclude", value_name = "LIST", number_of_values = 1)]
    pub exclude: Vec<String>,

    /// Exclude common iteration methods
    #[structopt(long = "exclude-common")]
    pub exclude_common: bool,

    /// Output file, stdout if not present
    #[structopt(short = "f", long = "file", value_name = "PATH", parse(from_os_str))]
    pub file: Option<PathBuf>,

    /// Minimum percentage a method needs to be reported
    #[structopt(
        short = "m",
        long = "min_percent",
        value_name = "PERCENT",
        default_value = "0",
        parse(try_from_str = parse_percent)
    )]
    pub min_percent: f64,

    /// What to measure: wall, process, allocations or memory
    #[structopt(long = "mode", default_value = "wall")]
    pub mode: MeasureMode,

    /// Report format: flat, flat_with_line_numbers, graph, graph_html,
    /// call_tree, call_stack, dot or multi
    #[structopt(short = "p", long = "printer", default_value = "flat")]
    pub printer: PrinterKind,

    /// Load library LIB before profiling starts (repeatable)
    #[structopt(short = "R", long = "require-noprof", value_name = "LIB", number_of_values = 1)]
    pub require: Vec<String>,

    /// Sort textual reports by total, self, wait or child
    #[structopt(short = "s", long = "sort", default_value = "total")]
    pub sort: SortKey,

    /// Start the session paused; the program resumes it
    #[structopt(long = "start-paused")]
    pub start_paused: bool,

    /// Record allocations per method
    #[structopt(long = "track_allocations")]
    pub track_allocations: bool,

    /// Print version information and exit
    #[structopt(short = "v", long = "version")]
    pub show_version: bool,

    /// The program to profile, followed by its arguments
    #[structopt(name = "COMMAND", parse(from_os_str))]
    pub command: Vec<PathBuf>,
}

fn parse_percent(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        Ok(_) => Err(format!("'{}' is not a non-negative percentage", s)),
        Err(e) => Err(e.to_string()),
    }
}

/// The validated configuration of one profiling run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub allow_exceptions: bool,
    pub exclusions: Vec<ExclusionTarget>,
    pub exclude_common: bool,
    pub file: Option<PathBuf>,
    pub measure_mode: MeasureMode,
    pub min_percent: f64,
    pub printer: PrinterKind,
    pub sort: SortKey,
    pub libraries: Vec<String>,
    pub snippets: Vec<String>,
    pub start_paused: bool,
    pub track_allocations: bool,
    /// Captured when a destination is given; relative destinations resolve
    /// against it.
    pub working_dir: Option<PathBuf>,
    /// The directory the tool was started from.
    pub startup_dir: PathBuf,
    pub script: PathBuf,
    pub script_args: Vec<String>,
}

impl SessionConfig {
    pub fn profile_options(&self) -> ProfileOptions {
        ProfileOptions {
            allow_exceptions: self.allow_exceptions,
            exclude_common: self.exclude_common,
            measure_mode: self.measure_mode,
            track_allocations: self.track_allocations,
        }
    }

    pub fn print_options(&self) -> PrintOptions {
        PrintOptions { min_percent: self.min_percent, sort: self.sort }
    }
}

/// What the command line asked for.
#[derive(Debug)]
pub enum Invocation {
    Profile(Box<SessionConfig>),
    /// Print this text to stdout and exit successfully.
    Info(String),
}

pub fn version() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// The full help text.
pub fn usage() -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = Opts::clap().write_long_help(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Parses `args` (including the program name) into a session config.
pub fn parse<I, T>(args: I, host: &mut dyn Host) -> Result<Invocation, UsageError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let opts = match Opts::from_iter_safe(args) {
        Ok(opts) => opts,
        Err(e) if e.kind == ErrorKind::HelpDisplayed => return Ok(Invocation::Info(e.message)),
        Err(e) => {
            // Keep clap's one line diagnostic; the usage text is printed separately.
            let line = e.message.lines().next().unwrap_or_default();
            return Err(UsageError::Cli(line.trim_start_matches("error: ").to_string()));
        }
    };
    if opts.show_version {
        return Ok(Invocation::Info(version()));
    }
    SessionConfig::from_opts(opts, host).map(|config| Invocation::Profile(Box::new(config)))
}

impl SessionConfig {
    /// Validates raw options, resolving exclusions against the symbols the
    /// host provides for the script.
    pub fn from_opts(opts: Opts, host: &mut dyn Host) -> Result<SessionConfig, UsageError> {
        let mut command = opts.command.into_iter();
        let script = command.next().ok_or(UsageError::MissingScript)?;
        let script_args = command.map(|arg| arg.to_string_lossy().into_owned()).collect();

        let startup_dir = host.current_dir().map_err(UsageError::WorkingDir)?;
        let script = locate_script(script, &startup_dir);
        let mut file = opts.file;
        let mut working_dir = file.as_ref().map(|_| startup_dir.clone());

        let mut exclusions = Vec::new();
        if !opts.exclude.is_empty() {
            let namespace = host.symbols(&script);
            for list in &opts.exclude {
                for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                    exclusions.push(parse_exclusion(entry, namespace)?);
                }
            }
        }

        if opts.printer.needs_directory() {
            let dir = file.get_or_insert_with(|| PathBuf::from("."));
            let base = working_dir.get_or_insert_with(|| startup_dir.clone());
            let path = base.join(dir.as_path());
            if !path.is_dir() {
                let printer = opts.printer.name();
                return Err(UsageError::NotADirectory { path: dir.clone(), printer });
            }
        }

        Ok(SessionConfig {
            allow_exceptions: opts.allow_exceptions,
            exclusions,
            exclude_common: opts.exclude_common,
            file,
            measure_mode: opts.mode,
            min_percent: opts.min_percent,
            printer: opts.printer,
            sort: opts.sort,
            libraries: opts.require,
            snippets: opts.eval,
            start_paused: opts.start_paused,
            track_allocations: opts.track_allocations,
            working_dir,
            startup_dir,
            script,
            script_args,
        })
    }
}

/// The path both the symbol lookup and the launch use for `script`. A bare
/// name is looked for in `startup_dir` first, then on `PATH`.
fn locate_script(script: PathBuf, startup_dir: &Path) -> PathBuf {
    let mut components = script.components();
    let bare = matches!((components.next(), components.next()), (Some(Component::Normal(_)), None));
    if !bare {
        return script;
    }
    if startup_dir.join(&script).is_file() {
        return Path::new(".").join(script);
    }
    let found = env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths).map(|dir| dir.join(&script)).find(|path| path.is_file())
    });
    match found {
        Some(path) => {
            debug!("found {:?} at {:?}", script, path);
            path
        }
        None => script,
    }
}

/// Parses one `SCOPE#METHOD` or `SCOPE.METHOD` entry. The method name is the
/// text after the last separator.
pub fn parse_exclusion(entry: &str, namespace: &Namespace) -> Result<ExclusionTarget, UsageError> {
    let malformed = || UsageError::MalformedExclusion(entry.to_string());
    let split = entry.rfind(|c: char| c == '#' || c == '.').ok_or_else(malformed)?;
    let (scope, method) = (&entry[..split], &entry[split + 1..]);
    if scope.is_empty() || method.is_empty() || !method.chars().all(is_method_char) {
        return Err(malformed());
    }
    let level = if entry[split..].starts_with('#') {
        ScopeLevel::Instance
    } else {
        ScopeLevel::Singleton
    };

    let id = namespace
        .resolve(scope)
        .map_err(|source| UsageError::Resolution { entry: entry.to_string(), source })?;
    if !namespace.has_method(id, method) {
        warn!("{} does not define {}; excluding it anyway", scope, method);
    }
    Ok(ExclusionTarget {
        scope: ScopeRef { id, level },
        scope_name: namespace.qualified_name(id),
        method: method.to_string(),
    })
}

fn is_method_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '?' | '!' | '=' | '$')
}
