use log::debug;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::key::Key;

/// A lock resource: the same name, or a name that is an ancestor or a
/// descendant of another, cannot be held by two processes at once.
#[derive(Debug)]
struct Held {
    owner: u64,
    key: Key,
    count: u32,
}

fn overlaps(a: &Key, b: &Key) -> bool {
    a.name() == b.name() && {
        let (x, y) = (a.subscripts(), b.subscripts());
        x.starts_with(y) || y.starts_with(x)
    }
}

/// Advisory locks shared by every process handle of one engine
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    held: Mutex<Vec<Held>>,
    released: Condvar,
}

impl LockTable {
    fn blocked(held: &[Held], owner: u64, key: &Key) -> bool {
        held.iter().any(|h| h.owner != owner && overlaps(&h.key, key))
    }

    fn grant(held: &mut Vec<Held>, owner: u64, key: &Key) {
        match held.iter_mut().find(|h| h.owner == owner && h.key == *key) {
            Some(h) => h.count += 1,
            None => held.push(Held {
                owner,
                key: key.clone(),
                count: 1,
            }),
        }
    }

    /// Wait until none of `keys` is blocked, then take them all. Returns
    /// false if the deadline passes first; nothing is taken in that case.
    pub(crate) fn acquire(&self, owner: u64, keys: &[Key], timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut held = self.held.lock();
        while keys.iter().any(|k| Self::blocked(&held, owner, k)) {
            debug!("process {} waiting for {} lock(s)", owner, keys.len());
            let timed_out = match deadline {
                Some(deadline) => self.released.wait_until(&mut held, deadline).timed_out(),
                None => {
                    self.released.wait(&mut held);
                    false
                }
            };
            if timed_out && keys.iter().any(|k| Self::blocked(&held, owner, k)) {
                return false;
            }
        }
        for key in keys {
            Self::grant(&mut held, owner, key);
        }
        true
    }

    /// Drop one reference to `key`; not holding it is not an error
    pub(crate) fn decrement(&self, owner: u64, key: &Key) {
        let mut held = self.held.lock();
        if let Some(pos) = held.iter().position(|h| h.owner == owner && h.key == *key) {
            held[pos].count -= 1;
            if held[pos].count == 0 {
                held.remove(pos);
                self.released.notify_all();
            }
        }
    }

    pub(crate) fn release_all(&self, owner: u64) {
        let mut held = self.held.lock();
        let before = held.len();
        held.retain(|h| h.owner != owner);
        if held.len() != before {
            self.released.notify_all();
        }
    }

    /// Reference count `owner` holds on `key`
    pub(crate) fn count(&self, owner: u64, key: &Key) -> u32 {
        self.held
            .lock()
            .iter()
            .find(|h| h.owner == owner && h.key == *key)
            .map_or(0, |h| h.count)
    }
}
