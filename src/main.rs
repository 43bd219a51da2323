use std::io::Write;

use proflaunch::error::UsageError;
use proflaunch::opt::{self, Invocation};
use proflaunch::runtime::ProcessHost;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    let mut host = ProcessHost::new();

    let config = match opt::parse(std::env::args_os(), &mut host) {
        Ok(Invocation::Profile(config)) => config,
        Ok(Invocation::Info(text)) => {
            println!("{}", text);
            std::process::exit(EXIT_SUCCESS);
        }
        Err(e) => {
            report_usage_error(&e);
            std::process::exit(EXIT_USAGE);
        }
    };

    if let Err(e) = proflaunch::app::run(&config, &mut host) {
        eprintln!("{:?}", e);
        std::process::exit(EXIT_ERROR);
    }
}

/// Prints the usage text followed by the diagnostic.
fn report_usage_error(err: &UsageError) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = writeln!(stderr, "{}", opt::usage());
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = write!(stderr, "error:");
    let _ = stderr.reset();
    let _ = writeln!(stderr, " {}", err);
}
