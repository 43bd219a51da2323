//! Report renderers.
//!
//! Every renderer is selected by name on the command line and either writes
//! a single stream or, for [`PrinterKind::Multi`], a directory of files.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::engine::{MethodSummary, ResultSet};

/// Column the textual reports are ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Total,
    SelfTime,
    Wait,
    Child,
}

impl SortKey {
    fn value(self, method: &MethodSummary) -> f64 {
        match self {
            SortKey::Total => method.total,
            SortKey::SelfTime => method.self_value,
            SortKey::Wait => method.wait,
            SortKey::Child => method.child,
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total" => Ok(SortKey::Total),
            "self" => Ok(SortKey::SelfTime),
            "wait" => Ok(SortKey::Wait),
            "child" => Ok(SortKey::Child),
            other => Err(format!(
                "unknown sort key '{}', expected one of total, self, wait, child",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintOptions {
    pub min_percent: f64,
    pub sort: SortKey,
}

impl Default for PrintOptions {
    fn default() -> Self {
        PrintOptions { min_percent: 0.0, sort: SortKey::Total }
    }
}

/// Where a renderer writes.
pub enum Destination<'a> {
    Stream(&'a mut dyn Write),
    Directory(&'a Path),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterKind {
    Flat,
    FlatWithLineNumbers,
    Graph,
    GraphHtml,
    CallTree,
    CallStack,
    Dot,
    Multi,
}

impl PrinterKind {
    pub const ALL: [PrinterKind; 8] = [
        PrinterKind::Flat,
        PrinterKind::FlatWithLineNumbers,
        PrinterKind::Graph,
        PrinterKind::GraphHtml,
        PrinterKind::CallTree,
        PrinterKind::CallStack,
        PrinterKind::Dot,
        PrinterKind::Multi,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PrinterKind::Flat => "flat",
            PrinterKind::FlatWithLineNumbers => "flat_with_line_numbers",
            PrinterKind::Graph => "graph",
            PrinterKind::GraphHtml => "graph_html",
            PrinterKind::CallTree => "call_tree",
            PrinterKind::CallStack => "call_stack",
            PrinterKind::Dot => "dot",
            PrinterKind::Multi => "multi",
        }
    }

    /// Whether this renderer writes a tree of files rather than a stream.
    pub fn needs_directory(self) -> bool {
        matches!(self, PrinterKind::Multi)
    }

    pub fn render(
        self,
        results: &ResultSet,
        destination: Destination<'_>,
        options: &PrintOptions,
    ) -> io::Result<()> {
        match (self, destination) {
            (PrinterKind::Multi, Destination::Directory(dir)) => write_multi(results, dir, options),
            (PrinterKind::Multi, Destination::Stream(_)) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "the multi printer writes to a directory",
            )),
            (kind, Destination::Stream(out)) => kind.write_stream(results, out, options),
            (kind, Destination::Directory(dir)) => {
                let path = dir.join(format!("profile.{}", kind.extension()));
                let mut out = BufWriter::new(File::create(path)?);
                kind.write_stream(results, &mut out, options)?;
                out.flush()
            }
        }
    }

    fn extension(self) -> &'static str {
        match self {
            PrinterKind::Flat | PrinterKind::FlatWithLineNumbers => "flat.txt",
            PrinterKind::Graph => "graph.txt",
            PrinterKind::GraphHtml => "graph.html",
            PrinterKind::CallTree => "callgrind.out",
            PrinterKind::CallStack => "stack.txt",
            PrinterKind::Dot => "dot",
            PrinterKind::Multi => "",
        }
    }

    fn write_stream(
        self,
        results: &ResultSet,
        out: &mut dyn Write,
        options: &PrintOptions,
    ) -> io::Result<()> {
        match self {
            PrinterKind::Flat => write_flat(results, out, options, false),
            PrinterKind::FlatWithLineNumbers => write_flat(results, out, options, true),
            PrinterKind::Graph => write_graph(results, out, options),
            PrinterKind::GraphHtml => write_graph_html(results, out, options),
            PrinterKind::CallTree => write_call_tree(results, out),
            PrinterKind::CallStack => write_call_stack(results, out, options),
            PrinterKind::Dot => write_dot(results, out, options),
            PrinterKind::Multi => unreachable!("multi is rendered into a directory"),
        }
    }
}

impl FromStr for PrinterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrinterKind::ALL.iter().copied().find(|kind| kind.name() == s).ok_or_else(|| {
            let names = PrinterKind::ALL.iter().map(|k| k.name()).collect::<Vec<_>>();
            format!("unknown printer '{}', expected one of {}", s, names.join(", "))
        })
    }
}

impl fmt::Display for PrinterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn now_timestamp() -> impl fmt::Display {
    use chrono::prelude::*;
    let now = Local::now();
    let fmt = "%FT%T";
    now.format(fmt)
}

fn write_header(results: &ResultSet, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Measure Mode: {}", results.mode)?;
    writeln!(out, "Generated: {}", now_timestamp())?;
    writeln!(out, "Total: {:.6}", results.total())?;
    writeln!(out)
}

fn sorted_methods(results: &ResultSet, options: &PrintOptions) -> Vec<MethodSummary> {
    let mut methods = results.methods();
    methods.sort_by(|a, b| options.sort.value(b).total_cmp(&options.sort.value(a)));
    methods
}

fn write_flat(
    results: &ResultSet,
    out: &mut dyn Write,
    options: &PrintOptions,
    line_numbers: bool,
) -> io::Result<()> {
    write_header(results, out)?;
    write!(out, " %self      total       self       wait      child     calls")?;
    if results.track_allocations {
        write!(out, "     allocs")?;
    }
    writeln!(out, "  name")?;
    for method in sorted_methods(results, options) {
        let self_percent = results.percent(method.self_value);
        if self_percent < options.min_percent {
            continue;
        }
        write!(
            out,
            "{:6.2} {:10.3} {:10.3} {:10.3} {:10.3} {:9}",
            self_percent, method.total, method.self_value, method.wait, method.child, method.calls
        )?;
        if results.track_allocations {
            write!(out, " {:10}", method.allocations)?;
        }
        writeln!(out, "  {}", method.name)?;
        if line_numbers {
            if let Some(location) = &method.location {
                writeln!(out, "{:>60}  {}", "", location)?;
            }
        }
    }
    Ok(())
}

fn write_graph(results: &ResultSet, out: &mut dyn Write, options: &PrintOptions) -> io::Result<()> {
    write_header(results, out)?;
    writeln!(
        out,
        "  %total   %self      total       self       wait      child            calls  name"
    )?;
    let rule = "-".repeat(96);
    for method in sorted_methods(results, options) {
        let total_percent = results.percent(method.total);
        if total_percent < options.min_percent {
            continue;
        }
        writeln!(out, "{}", rule)?;
        for (caller, calls, total) in results.callers(&method.name) {
            writeln!(out, "{:>40.3} {:>32}/{:<6} {}", total, calls, method.calls, caller)?;
        }
        writeln!(
            out,
            "{:7.2}% {:6.2}% {:10.3} {:10.3} {:10.3} {:10.3} {:16}  {}",
            total_percent,
            results.percent(method.self_value),
            method.total,
            method.self_value,
            method.wait,
            method.child,
            method.calls,
            method.name
        )?;
        for (callee, calls, total) in results.callees(&method.name) {
            writeln!(out, "{:>40.3} {:>32}       {}", total, calls, callee)?;
        }
    }
    writeln!(out, "{}", rule)
}

fn write_graph_html(
    results: &ResultSet,
    out: &mut dyn Write,
    options: &PrintOptions,
) -> io::Result<()> {
    let mut graph = Vec::new();
    write_graph(results, &mut graph, options)?;
    let graph = String::from_utf8_lossy(&graph);
    writeln!(out, "<!DOCTYPE html>")?;
    writeln!(out, "<html><head><meta charset=\"utf-8\"><title>Profile Report</title></head>")?;
    writeln!(out, "<body><pre>")?;
    write!(out, "{}", escape_html(&graph))?;
    writeln!(out, "</pre></body></html>")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Callgrind format, readable by KCachegrind and friends.
fn write_call_tree(results: &ResultSet, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "version: 1")?;
    writeln!(out, "creator: {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "events: {}", results.mode)?;
    for method in results.methods() {
        writeln!(out)?;
        writeln!(out, "fn={}", method.name)?;
        writeln!(out, "0 {}", method.self_value)?;
        for (callee, calls, total) in results.callees(&method.name) {
            writeln!(out, "cfn={}", callee)?;
            writeln!(out, "calls={} 0", calls)?;
            writeln!(out, "0 {}", total)?;
        }
    }
    Ok(())
}

fn write_call_stack(
    results: &ResultSet,
    out: &mut dyn Write,
    options: &PrintOptions,
) -> io::Result<()> {
    write_header(results, out)?;
    let mut pending = vec![(ResultSet::ROOT, 0usize)];
    while let Some((idx, depth)) = pending.pop() {
        let node = &results.nodes[idx];
        let percent = results.percent(node.total);
        if idx != ResultSet::ROOT && percent < options.min_percent {
            continue;
        }
        writeln!(
            out,
            "{}{:6.2}% ({:.3} total, {:.3} self, {} calls) {}",
            "  ".repeat(depth),
            percent,
            node.total,
            node.self_value,
            node.calls,
            node.name
        )?;
        let mut children = node.children.clone();
        children.sort_by(|&a, &b| results.nodes[a].total.total_cmp(&results.nodes[b].total));
        pending.extend(children.into_iter().map(|c| (c, depth + 1)));
    }
    Ok(())
}

fn write_dot(results: &ResultSet, out: &mut dyn Write, options: &PrintOptions) -> io::Result<()> {
    writeln!(out, "digraph \"Profile\" {{")?;
    writeln!(out, "labelloc=t;")?;
    writeln!(out, "labeljust=l;")?;
    writeln!(out, "label=\"{} total {:.3}\";", results.mode, results.total())?;
    let methods = results
        .methods()
        .into_iter()
        .filter(|m| results.percent(m.total) >= options.min_percent)
        .collect::<Vec<_>>();
    for (id, method) in methods.iter().enumerate() {
        writeln!(
            out,
            "{} [label=\"{}\\n({:.2}%)\"];",
            id,
            method.name.replace('"', "\\\""),
            results.percent(method.total)
        )?;
    }
    for (id, method) in methods.iter().enumerate() {
        for (callee, calls, total) in results.callees(&method.name) {
            if let Some(target) = methods.iter().position(|m| m.name == callee) {
                writeln!(out, "{} -> {} [label=\"{}/{:.3}\"];", id, target, calls, total)?;
            }
        }
    }
    writeln!(out, "}}")
}

fn write_multi(results: &ResultSet, dir: &Path, options: &PrintOptions) -> io::Result<()> {
    const REPORTS: [PrinterKind; 5] = [
        PrinterKind::Flat,
        PrinterKind::Graph,
        PrinterKind::GraphHtml,
        PrinterKind::CallTree,
        PrinterKind::CallStack,
    ];
    for kind in REPORTS {
        kind.render(results, Destination::Directory(dir), options)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MeasureMode, Profile, ProfileOptions};

    fn sample() -> ResultSet {
        let mut profile = Profile::new(ProfileOptions {
            allow_exceptions: false,
            exclude_common: false,
            measure_mode: MeasureMode::Allocations,
            track_allocations: false,
        });
        profile
            .run(false, |rec| {
                rec.enter_at("App#main", Some("app.rs:1"));
                rec.record_allocation(1);
                rec.enter("App#parse");
                for _ in 0..9 {
                    rec.record_allocation(1);
                }
                rec.leave();
                rec.enter("App#tiny<T>");
                rec.leave();
                rec.leave();
                Ok(())
            })
            .unwrap()
            .clone()
    }

    fn render(kind: PrinterKind, options: PrintOptions) -> String {
        let mut out = Vec::new();
        kind.render(&sample(), Destination::Stream(&mut out), &options).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn only_multi_needs_a_directory() {
        for kind in PrinterKind::ALL {
            assert_eq!(kind.needs_directory(), kind == PrinterKind::Multi, "{}", kind);
            assert_eq!(kind.name().parse::<PrinterKind>(), Ok(kind));
        }
        assert!("html".parse::<PrinterKind>().is_err());
    }

    #[test]
    fn flat_sorts_by_key() {
        let options = PrintOptions { min_percent: 0.0, sort: SortKey::SelfTime };
        let report = render(PrinterKind::Flat, options);
        let parse = report.find("App#parse").unwrap();
        let main = report.find("App#main").unwrap();
        assert!(parse < main, "{}", report);
        assert!(report.starts_with("Measure Mode: allocations"));
    }

    #[test]
    fn flat_drops_methods_under_min_percent() {
        let options = PrintOptions { min_percent: 5.0, sort: SortKey::Total };
        let report = render(PrinterKind::Flat, options);
        assert!(report.contains("App#parse"));
        assert!(!report.contains("App#tiny"));
    }

    #[test]
    fn flat_with_line_numbers_shows_location() {
        let report = render(PrinterKind::FlatWithLineNumbers, PrintOptions::default());
        assert!(report.contains("app.rs:1"));
        assert!(!render(PrinterKind::Flat, PrintOptions::default()).contains("app.rs:1"));
    }

    #[test]
    fn call_tree_lists_callees() {
        let report = render(PrinterKind::CallTree, PrintOptions::default());
        assert!(report.contains("events: allocations"));
        assert!(report.contains("fn=App#main\n0 1\ncfn=App#parse\ncalls=1 0\n0 9"), "{}", report);
    }

    #[test]
    fn graph_html_is_escaped() {
        let report = render(PrinterKind::GraphHtml, PrintOptions::default());
        assert!(report.contains("<pre>"));
        assert!(report.contains("App#tiny&lt;T&gt;"), "{}", report);
    }

    #[test]
    fn dot_links_caller_to_callee() {
        let report = render(PrinterKind::Dot, PrintOptions::default());
        assert!(report.starts_with("digraph"));
        assert!(report.contains("0 -> 1 [label=\"1/9.000\"];"), "{}", report);
    }

    #[test]
    fn multi_writes_every_report() {
        let dir = tempfile::tempdir().unwrap();
        PrinterKind::Multi
            .render(&sample(), Destination::Directory(dir.path()), &PrintOptions::default())
            .unwrap();
        for name in ["flat.txt", "graph.txt", "graph.html", "callgrind.out", "stack.txt"] {
            assert!(dir.path().join(format!("profile.{}", name)).is_file(), "{}", name);
        }
    }

    #[test]
    fn multi_rejects_a_stream() {
        let mut out = Vec::new();
        let err = PrinterKind::Multi
            .render(&sample(), Destination::Stream(&mut out), &PrintOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
