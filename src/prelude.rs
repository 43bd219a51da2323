//! Work done before measurement starts.

use log::info;

use crate::error::PreludeError;
use crate::runtime::Host;

/// Loads `libraries` and then evaluates `snippets`, each in order. The first
/// failure stops the prelude and is returned as is.
pub fn run(
    host: &mut dyn Host,
    libraries: &[String],
    snippets: &[String],
) -> Result<(), PreludeError> {
    for library in libraries {
        info!("loading {}", library);
        host.load_library(library)?;
    }
    for snippet in snippets {
        host.evaluate(snippet)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn libraries_load_before_snippets_in_order() {
        let mut host = FakeHost::new("/work");
        run(&mut host, &strings(&["liba", "libb"]), &strings(&["x = 1", "y = 2"])).unwrap();
        assert_eq!(host.events, strings(&["load liba", "load libb", "eval x = 1", "eval y = 2"]));
    }

    #[test]
    fn failure_stops_the_prelude() {
        let mut host = FakeHost::new("/work");
        host.missing_libraries.push("libmissing".into());
        let err =
            run(&mut host, &strings(&["libmissing", "libb"]), &strings(&["x = 1"])).unwrap_err();
        assert!(matches!(err, PreludeError::LibraryNotFound(ref name) if name == "libmissing"));
        assert!(host.events.is_empty());
    }
}
