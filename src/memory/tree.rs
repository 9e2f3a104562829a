use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};

use crate::constants::DataFlags;
use crate::number::Number;

/// One subscript, ordered the way the engine collates them: the empty
/// string, then canonical numbers by value, then other strings bytewise.
#[derive(Debug, Clone)]
pub(crate) struct Subscript {
    raw: Vec<u8>,
    number: Option<Number>,
}

impl Subscript {
    pub(crate) fn new(raw: &[u8]) -> Self {
        Subscript {
            raw: raw.to_vec(),
            number: Number::canonical(raw),
        }
    }

    pub(crate) fn raw(&self) -> &[u8] {
        &self.raw
    }

    fn rank(&self) -> u8 {
        if self.raw.is_empty() {
            0
        } else if self.number.is_some() {
            1
        } else {
            2
        }
    }
}

impl PartialEq for Subscript {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Subscript {}

impl Ord for Subscript {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank()).then_with(|| match (&self.number, &other.number) {
            (Some(a), Some(b)) => a.cmp(b),
            _ => self.raw.cmp(&other.raw),
        })
    }
}

impl PartialOrd for Subscript {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Subscripts below a variable; the empty path is the variable's own node
pub(crate) type Path = Vec<Subscript>;

pub(crate) fn path_of(subscripts: &[Vec<u8>]) -> Path {
    subscripts.iter().map(|s| Subscript::new(s)).collect()
}

pub(crate) fn raw_path(path: &Path) -> Vec<Vec<u8>> {
    path.iter().map(|s| s.raw().to_vec()).collect()
}

/// Every valued node of one variable, in depth-first collation order
#[derive(Debug, Clone, Default)]
pub(crate) struct Tree {
    nodes: BTreeMap<Path, Vec<u8>>,
}

impl Tree {
    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn get(&self, path: &Path) -> Option<&Vec<u8>> {
        self.nodes.get(path)
    }

    /// Store a value, returning the previous one
    pub(crate) fn set(&mut self, path: Path, value: Vec<u8>) -> Option<Vec<u8>> {
        self.nodes.insert(path, value)
    }

    pub(crate) fn remove(&mut self, path: &Path) -> Option<Vec<u8>> {
        self.nodes.remove(path)
    }

    /// Remove a node and all its descendants, returning what was removed
    pub(crate) fn remove_tree(&mut self, path: &Path) -> Vec<(Path, Vec<u8>)> {
        let doomed: Vec<Path> = self
            .nodes
            .range(path.clone()..)
            .take_while(|(p, _)| p.starts_with(path))
            .map(|(p, _)| p.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|p| self.nodes.remove(&p).map(|v| (p, v)))
            .collect()
    }

    fn has_descendants(&self, path: &Path) -> bool {
        self.nodes
            .range((Excluded(path.clone()), Unbounded))
            .next()
            .map_or(false, |(p, _)| p.starts_with(path))
    }

    pub(crate) fn data(&self, path: &Path) -> DataFlags {
        let mut flags = DataFlags::UNDEF;
        if self.nodes.contains_key(path) {
            flags |= DataFlags::VALUE;
        }
        if self.has_descendants(path) {
            flags |= DataFlags::TREE;
        }
        flags
    }

    /// Next child of `parent` after `last`; an empty `last` starts the walk
    pub(crate) fn subscript_next(&self, parent: &[Subscript], last: &Subscript) -> Option<&Subscript> {
        let mut lower = parent.to_vec();
        lower.push(last.clone());
        let depth = parent.len();
        self.nodes
            .range((Excluded(lower), Unbounded))
            .take_while(|(p, _)| p.starts_with(parent))
            .filter(|(p, _)| p.len() > depth)
            .map(|(p, _)| &p[depth])
            .find(|s| *s > last)
    }

    /// Previous child of `parent` before `last`; an empty `last` starts
    /// from the end
    pub(crate) fn subscript_previous(&self, parent: &[Subscript], last: &Subscript) -> Option<&Subscript> {
        let depth = parent.len();
        let upper = if last.raw().is_empty() {
            Unbounded
        } else {
            let mut upper = parent.to_vec();
            upper.push(last.clone());
            Excluded(upper)
        };
        self.nodes
            .range((Included(parent.to_vec()), upper))
            .rev()
            .filter(|(p, _)| p.starts_with(parent) && p.len() > depth)
            .map(|(p, _)| &p[depth])
            .find(|s| last.raw().is_empty() || *s < last)
    }

    /// First valued node strictly after `path` in depth-first order
    pub(crate) fn node_next(&self, path: &Path) -> Option<&Path> {
        self.nodes
            .range((Excluded(path.clone()), Unbounded))
            .map(|(p, _)| p)
            .next()
    }

    /// Last subscripted valued node strictly before `path`
    pub(crate) fn node_previous(&self, path: &Path) -> Option<&Path> {
        self.nodes
            .range(..path.clone())
            .map(|(p, _)| p)
            .next_back()
            .filter(|p| !p.is_empty())
    }
}

/// Variables of one namespace (all globals, or one process's locals)
pub(crate) type Store = BTreeMap<String, Tree>;

/// Next variable name after `name` holding any data
pub(crate) fn next_name<'a>(store: &'a Store, name: &str) -> Option<&'a String> {
    store
        .range::<str, _>((Excluded(name), Unbounded))
        .find(|(_, tree)| !tree.is_empty())
        .map(|(n, _)| n)
}

pub(crate) fn previous_name<'a>(store: &'a Store, name: &str) -> Option<&'a String> {
    store
        .range::<str, _>((Unbounded, Excluded(name)))
        .rev()
        .find(|(_, tree)| !tree.is_empty())
        .map(|(n, _)| n)
}
