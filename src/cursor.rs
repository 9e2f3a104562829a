use std::iter::FusedIterator;

use crate::database::Database;
use crate::engine::Engine;
use crate::error::Result;
use crate::key::Key;
use crate::types::TpToken;

/// Walks sibling subscripts with `subscript_next` or `subscript_previous`.
///
/// The walk starts after (or before) the last subscript of the starting
/// key; an empty last subscript starts at the first (or last) sibling.
/// For an unsubscripted key it walks variable names instead.
pub struct Subscripts<'a, E: Engine> {
    db: &'a Database<E>,
    tptoken: TpToken,
    key: Key,
    reverse: bool,
    done: bool,
}

impl<'a, E: Engine> Subscripts<'a, E> {
    pub(crate) fn new(db: &'a Database<E>, tptoken: TpToken, key: Key, reverse: bool) -> Self {
        Subscripts {
            db,
            tptoken,
            key,
            reverse,
            done: false,
        }
    }

    /// Key positioned at the last subscript yielded
    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl<E: Engine> Iterator for Subscripts<'_, E> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = if self.reverse {
            self.db.subscript_previous(self.tptoken, &self.key)
        } else {
            self.db.subscript_next(self.tptoken, &self.key)
        };
        match result {
            Ok(sub) => {
                self.key.replace_last(sub.clone());
                Some(Ok(sub))
            }
            Err(err) => {
                self.done = true;
                if err.is_node_end() {
                    None
                } else {
                    Some(Err(err))
                }
            }
        }
    }
}

impl<E: Engine> FusedIterator for Subscripts<'_, E> {}

/// Every valued node of one variable in depth-first order, the
/// unsubscripted node first
pub struct Nodes<'a, E: Engine> {
    db: &'a Database<E>,
    tptoken: TpToken,
    key: Key,
    started: bool,
    done: bool,
}

impl<'a, E: Engine> Nodes<'a, E> {
    pub(crate) fn new(db: &'a Database<E>, tptoken: TpToken, key: Key) -> Self {
        Nodes {
            db,
            tptoken,
            key,
            started: false,
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Option<Key>> {
        if !self.started {
            self.started = true;
            if self.db.data(self.tptoken, &self.key)?.has_value() {
                return Ok(Some(self.key.clone()));
            }
        }
        match self.db.node_next(self.tptoken, &self.key) {
            Ok(subs) => {
                self.key = self.key.with_path(subs);
                Ok(Some(self.key.clone()))
            }
            Err(err) if err.is_node_end() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<E: Engine> Iterator for Nodes<'_, E> {
    type Item = Result<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.advance().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

impl<E: Engine> FusedIterator for Nodes<'_, E> {}

/// Names of defined variables in one namespace, in collation order
pub struct VarNames<'a, E: Engine> {
    first: Option<Key>,
    names: Subscripts<'a, E>,
}

impl<'a, E: Engine> VarNames<'a, E> {
    pub(crate) fn new(db: &'a Database<E>, tptoken: TpToken, global: bool) -> Self {
        // `%` sorts before every other name
        let start = Key::new(if global { "^%" } else { "%" });
        VarNames {
            first: Some(start.clone()),
            names: Subscripts::new(db, tptoken, start, false),
        }
    }
}

impl<E: Engine> Iterator for VarNames<'_, E> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(first) = self.first.take() {
            match self.names.db.data(self.names.tptoken, &first) {
                Ok(flags) if !flags.is_empty() => return Some(Ok(first.name().to_owned())),
                Ok(_) => {}
                Err(err) => {
                    self.names.done = true;
                    return Some(Err(err));
                }
            }
        }
        self.names
            .next()
            .map(|name| name.map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }
}
