//! The symbol space exclusions are resolved against.
//!
//! A [`Namespace`] is a tree of named scopes rooted at [`Namespace::ROOT`].
//! Each scope owns child scopes by name and may declare ancestors whose
//! members it inherits, so a name can be visible in a scope without being
//! owned by it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ResolutionError;

/// Separator between segments of a qualified name.
pub const SEPARATOR: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// Whether a method belongs to instances of a scope or to the scope's
/// class-level companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeLevel {
    Instance,
    Singleton,
}

/// A resolved scope together with the level its methods live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeRef {
    pub id: ScopeId,
    pub level: ScopeLevel,
}

/// A method marked to be left out of measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionTarget {
    pub scope: ScopeRef,
    /// Qualified name of `scope.id`, kept for matching recorded frames.
    pub scope_name: String,
    pub method: String,
}

impl ExclusionTarget {
    /// The frame name this target matches, `Scope#method` or `Scope.method`.
    pub fn frame_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ExclusionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = match self.scope.level {
            ScopeLevel::Instance => '#',
            ScopeLevel::Singleton => '.',
        };
        write!(f, "{}{}{}", self.scope_name, sep, self.method)
    }
}

#[derive(Debug)]
struct Scope {
    name: String,
    parent: Option<ScopeId>,
    constants: BTreeMap<String, ScopeId>,
    ancestors: Vec<ScopeId>,
    methods: BTreeSet<String>,
}

#[derive(Debug)]
pub struct Namespace {
    scopes: Vec<Scope>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn new() -> Self {
        let root = Scope {
            name: String::new(),
            parent: None,
            constants: BTreeMap::new(),
            ancestors: Vec::new(),
            methods: BTreeSet::new(),
        };
        Namespace { scopes: vec![root] }
    }

    /// Builds a namespace from demangled function paths such as
    /// `app::server::Server::handle`. Paths with generic or closure
    /// segments are skipped.
    pub fn from_functions<I, S>(functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut namespace = Namespace::new();
        for function in functions {
            let function = function.as_ref();
            let segments = function.split(SEPARATOR).collect::<Vec<_>>();
            let clean = segments.iter().all(|s| {
                !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
            });
            if !clean {
                continue;
            }
            if let Some((method, path)) = segments.split_last() {
                let mut scope = Self::ROOT;
                for segment in path {
                    scope = namespace.define(scope, segment);
                }
                namespace.add_method(scope, method);
            }
        }
        namespace
    }

    /// Defines `name` inside `parent`, returning the existing scope if
    /// `parent` already owns one by that name.
    pub fn define(&mut self, parent: ScopeId, name: &str) -> ScopeId {
        if let Some(&id) = self.scopes[parent.0].constants.get(name) {
            return id;
        }
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            name: name.to_string(),
            parent: Some(parent),
            constants: BTreeMap::new(),
            ancestors: Vec::new(),
            methods: BTreeSet::new(),
        });
        self.scopes[parent.0].constants.insert(name.to_string(), id);
        id
    }

    /// Defines every segment of a qualified path, starting at the root.
    pub fn define_path(&mut self, path: &str) -> ScopeId {
        path.split(SEPARATOR)
            .filter(|s| !s.is_empty())
            .fold(Self::ROOT, |scope, segment| self.define(scope, segment))
    }

    /// Makes `ancestor` part of `scope`'s lookup chain, after any ancestors
    /// declared earlier.
    pub fn inherit(&mut self, scope: ScopeId, ancestor: ScopeId) {
        let ancestors = &mut self.scopes[scope.0].ancestors;
        if scope != ancestor && !ancestors.contains(&ancestor) {
            ancestors.push(ancestor);
        }
    }

    pub fn add_method(&mut self, scope: ScopeId, method: &str) {
        self.scopes[scope.0].methods.insert(method.to_string());
    }

    pub fn has_method(&self, scope: ScopeId, method: &str) -> bool {
        self.scopes[scope.0].methods.contains(method)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.len() == 1
    }

    /// The scope `scope` owns directly under `name`.
    pub fn owned(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        self.scopes[scope.0].constants.get(name).copied()
    }

    /// `scope` followed by its ancestors, most specific first, ending at
    /// the root. Each scope appears once.
    pub fn ancestors(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut chain = Vec::new();
        self.linearize(scope, &mut chain);
        chain.retain(|&id| id != Self::ROOT);
        chain.push(Self::ROOT);
        chain
    }

    fn linearize(&self, scope: ScopeId, chain: &mut Vec<ScopeId>) {
        if chain.contains(&scope) {
            return;
        }
        chain.push(scope);
        for &ancestor in &self.scopes[scope.0].ancestors {
            self.linearize(ancestor, chain);
        }
    }

    /// Looks `name` up from `scope`, searching the ancestor chain and then
    /// the root.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Result<ScopeId, ResolutionError> {
        self.ancestors(scope)
            .into_iter()
            .find_map(|id| self.owned(id, name))
            .ok_or_else(|| ResolutionError::Unknown(self.join(scope, name)))
    }

    /// Resolves a qualified name such as `Foo::Bar` to a scope.
    ///
    /// A segment found only through the root is rejected when the current
    /// scope is nested: `Foo::Bar` never silently means the global `Bar`.
    pub fn resolve(&self, path: &str) -> Result<ScopeId, ResolutionError> {
        let mut names = path.split(SEPARATOR).collect::<Vec<_>>();
        if names.len() > 1 && names[0].is_empty() {
            names.remove(0);
        }
        if names.iter().any(|name| name.is_empty()) {
            return Err(ResolutionError::Malformed(path.to_string()));
        }

        let mut current = Self::ROOT;
        for name in names {
            if current == Self::ROOT {
                current = self.lookup(Self::ROOT, name)?;
                continue;
            }
            let candidate = self.lookup(current, name)?;
            if self.owned(current, name).is_some() || self.owned(Self::ROOT, name).is_none() {
                current = candidate;
                continue;
            }
            // The name is also global; only an ancestor short of the root
            // may supply it.
            let owner = self
                .ancestors(current)
                .into_iter()
                .skip(1)
                .take_while(|&id| id != Self::ROOT)
                .find(|&id| self.owned(id, name).is_some())
                .unwrap_or(current);
            current = self
                .owned(owner, name)
                .ok_or_else(|| ResolutionError::Unknown(self.join(owner, name)))?;
        }
        Ok(current)
    }

    /// The fully qualified name of `scope`; empty for the root.
    pub fn qualified_name(&self, scope: ScopeId) -> String {
        let mut segments = Vec::new();
        let mut next = Some(scope);
        while let Some(id) = next {
            if id != Self::ROOT {
                segments.push(self.scopes[id.0].name.as_str());
            }
            next = self.scopes[id.0].parent;
        }
        segments.reverse();
        segments.join(SEPARATOR)
    }

    fn join(&self, scope: ScopeId, name: &str) -> String {
        if scope == Self::ROOT {
            name.to_string()
        } else {
            format!("{}{}{}", self.qualified_name(scope), SEPARATOR, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Namespace {
        let mut ns = Namespace::new();
        ns.define_path("Bar");
        ns.define_path("Foo::Bar");
        ns.define_path("Foo::Baz");
        ns.define_path("Helpers::Formatter");
        ns.define_path("Helpers::Bar");
        ns.define_path("Widget");
        ns
    }

    #[test]
    fn unqualified_name_comes_from_root() {
        let ns = sample();
        let bar = ns.resolve("Bar").unwrap();
        assert_eq!(ns.owned(Namespace::ROOT, "Bar"), Some(bar));
        assert_eq!(ns.qualified_name(bar), "Bar");
    }

    #[test]
    fn nested_name_wins_over_global() {
        let ns = sample();
        let nested = ns.resolve("Foo::Bar").unwrap();
        let global = ns.resolve("Bar").unwrap();
        assert_ne!(nested, global);
        assert_eq!(ns.qualified_name(nested), "Foo::Bar");
    }

    #[test]
    fn leading_separator_is_ignored() {
        let ns = sample();
        assert_eq!(ns.resolve("::Foo::Baz"), ns.resolve("Foo::Baz"));
    }

    #[test]
    fn name_without_owner_fails() {
        let ns = sample();
        assert_eq!(ns.resolve("Missing"), Err(ResolutionError::Unknown("Missing".into())));
        assert_eq!(
            ns.resolve("Foo::Missing"),
            Err(ResolutionError::Unknown("Foo::Missing".into()))
        );
    }

    #[test]
    fn global_name_is_not_reachable_through_unrelated_scope() {
        let ns = sample();
        assert_eq!(ns.resolve("Widget::Bar"), Err(ResolutionError::Unknown("Widget::Bar".into())));
    }

    #[test]
    fn ancestor_owner_shadows_global() {
        let mut ns = sample();
        let widget = ns.resolve("Widget").unwrap();
        let helpers = ns.resolve("Helpers").unwrap();
        ns.inherit(widget, helpers);

        let bar = ns.resolve("Widget::Bar").unwrap();
        assert_eq!(ns.qualified_name(bar), "Helpers::Bar");
        let formatter = ns.resolve("Widget::Formatter").unwrap();
        assert_eq!(ns.qualified_name(formatter), "Helpers::Formatter");
    }

    #[test]
    fn empty_segments_are_malformed() {
        let ns = sample();
        assert_eq!(ns.resolve("Foo::::Bar"), Err(ResolutionError::Malformed("Foo::::Bar".into())));
        assert!(matches!(ns.resolve(""), Err(ResolutionError::Malformed(_))));
    }

    #[test]
    fn functions_populate_scopes_and_methods() {
        let ns = Namespace::from_functions([
            "app::server::Server::handle",
            "app::server::Server::new",
            "<app::Config as core::fmt::Debug>::fmt",
            "app::main::{{closure}}",
            "main",
        ]);
        let server = ns.resolve("app::server::Server").unwrap();
        assert!(ns.has_method(server, "handle"));
        assert!(ns.has_method(server, "new"));
        assert!(ns.has_method(Namespace::ROOT, "main"));
        assert!(ns.resolve("app::Config").is_err());
        assert!(!ns.has_method(ns.resolve("app::main").unwrap_or(Namespace::ROOT), "{{closure}}"));
    }
}
