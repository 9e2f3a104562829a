use std::fmt;

use crate::constants::{YDB_MAX_IDENT, YDB_MAX_STR, YDB_MAX_SUBS};
use crate::error::ValidationError;
use crate::number::Number;

/// A variable name plus an ordered list of subscripts.
///
/// Names starting with `^` address globals stored in the database; other
/// names are process-private locals. Subscripts are raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Variable name, including the leading `^` for globals
    name: String,
    /// Subscripts in order, outermost first
    subscripts: Vec<Vec<u8>>,
}

impl Key {
    /// Key for an unsubscripted variable
    pub fn new(name: impl Into<String>) -> Self {
        Key {
            name: name.into(),
            subscripts: Vec::new(),
        }
    }

    pub fn with_subscripts<I, S>(name: impl Into<String>, subscripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Key {
            name: name.into(),
            subscripts: subscripts.into_iter().map(|s| s.as_ref().to_vec()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscripts(&self) -> &[Vec<u8>] {
        &self.subscripts
    }

    pub fn is_global(&self) -> bool {
        self.name.starts_with('^')
    }

    /// The key one level down
    pub fn child(&self, subscript: impl AsRef<[u8]>) -> Key {
        let mut key = self.clone();
        key.subscripts.push(subscript.as_ref().to_vec());
        key
    }

    /// The key one level up, or `None` for an unsubscripted variable
    pub fn parent(&self) -> Option<Key> {
        let mut key = self.clone();
        key.subscripts.pop().map(|_| key)
    }

    /// Same variable, different subscripts
    pub fn with_path(&self, subscripts: Vec<Vec<u8>>) -> Key {
        Key {
            name: self.name.clone(),
            subscripts,
        }
    }

    /// Replace the last subscript, or the name for an unsubscripted key
    pub(crate) fn replace_last(&mut self, value: Vec<u8>) {
        match self.subscripts.last_mut() {
            Some(last) => *last = value,
            None => self.name = String::from_utf8_lossy(&value).into_owned(),
        }
    }

    pub fn last(&self) -> Option<&[u8]> {
        self.subscripts.last().map(Vec::as_slice)
    }

    /// Check the key against the fixed structural limits
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        if self.subscripts.len() > YDB_MAX_SUBS {
            return Err(ValidationError::TooManySubscripts {
                count: self.subscripts.len(),
                max: YDB_MAX_SUBS,
            });
        }
        for (index, sub) in self.subscripts.iter().enumerate() {
            if sub.len() > YDB_MAX_STR {
                return Err(ValidationError::SubscriptTooLong {
                    index,
                    len: sub.len(),
                    max: YDB_MAX_STR,
                });
            }
        }
        Ok(())
    }
}

/// Validate a variable name: optional `^`, then `%` or a letter, then
/// letters and digits, at most `YDB_MAX_IDENT` characters
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let ident = name.strip_prefix('^').unwrap_or(name);
    if ident.is_empty() {
        return Err(ValidationError::EmptyVarName);
    }
    if ident.len() > YDB_MAX_IDENT {
        return Err(ValidationError::VarNameTooLong {
            name: name.to_owned(),
            max: YDB_MAX_IDENT,
        });
    }
    let mut chars = ident.chars();
    let first_ok = chars
        .next()
        .map_or(false, |c| c == '%' || c.is_ascii_alphabetic());
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidVarName(name.to_owned()));
    }
    Ok(())
}

/// Validate a local variable name (no `^`)
pub fn validate_local_name(name: &str) -> Result<(), ValidationError> {
    if name.starts_with('^') {
        return Err(ValidationError::NotLocal(name.to_owned()));
    }
    validate_name(name)
}

fn write_subscript(f: &mut fmt::Formatter, sub: &[u8]) -> fmt::Result {
    if Number::is_canonical(sub) {
        return f.write_str(&String::from_utf8_lossy(sub));
    }
    write!(f, "\"{}\"", String::from_utf8_lossy(sub).replace('"', "\"\""))
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.subscripts.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (i, sub) in self.subscripts.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write_subscript(f, sub)?;
        }
        f.write_str(")")
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::new(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::new(name)
    }
}
