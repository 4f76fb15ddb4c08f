//! Generation-checked handle table
//!
//! Open objects are exposed to callers as opaque 64-bit cookies rather than
//! pointers. A cookie packs a slot index with the slot's generation at
//! insertion time; closing a handle bumps the generation, so any use of a
//! stale cookie is detected instead of resolving to an unrelated object.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use stripeio_common::{Error, Result};

/// Opaque 64-bit handle cookie: slot index in the low half, generation in
/// the high half.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(u64);

impl Cookie {
    fn new(slot: u32, generation: u32) -> Self {
        Self(u64::from(generation) << 32 | u64::from(slot))
    }

    fn slot(self) -> u32 {
        self.0 as u32
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw cookie value, e.g. for embedding in an external handle type.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild from a raw value previously produced by [`Self::as_u64`].
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({:#x})", self.0)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct Slot<T> {
    generation: u32,
    entry: Option<Arc<T>>,
}

/// Slot map from cookies to live entries.
pub struct HandleTable<T> {
    slots: RwLock<Vec<Slot<T>>>,
    free: Mutex<Vec<u32>>,
}

impl<T> HandleTable<T> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
        }
    }

    /// Insert an entry whose construction needs its own cookie (for
    /// non-owning back-references). The builder runs under the table lock.
    pub fn insert_with<F>(&self, build: F) -> Cookie
    where
        F: FnOnce(Cookie) -> Arc<T>,
    {
        match self.try_insert_with::<_, std::convert::Infallible>(|cookie| Ok(build(cookie))) {
            Ok(cookie) => cookie,
            Err(e) => match e {},
        }
    }

    /// Fallible variant of [`Self::insert_with`]: a builder error leaves
    /// the table unchanged and the slot available for reuse.
    pub fn try_insert_with<F, E>(&self, build: F) -> std::result::Result<Cookie, E>
    where
        F: FnOnce(Cookie) -> std::result::Result<Arc<T>, E>,
    {
        let reused = self.free.lock().pop();
        let mut slots = self.slots.write();
        match reused {
            Some(index) => {
                let slot = &mut slots[index as usize];
                debug_assert!(slot.entry.is_none());
                let cookie = Cookie::new(index, slot.generation);
                match build(cookie) {
                    Ok(entry) => {
                        slot.entry = Some(entry);
                        Ok(cookie)
                    }
                    Err(e) => {
                        drop(slots);
                        self.free.lock().push(index);
                        Err(e)
                    }
                }
            }
            None => {
                let index = slots.len() as u32;
                let cookie = Cookie::new(index, 0);
                match build(cookie) {
                    Ok(entry) => {
                        slots.push(Slot {
                            generation: 0,
                            entry: Some(entry),
                        });
                        Ok(cookie)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Resolve a cookie to its entry.
    pub fn get(&self, cookie: Cookie) -> Result<Arc<T>> {
        let slots = self.slots.read();
        let slot = slots
            .get(cookie.slot() as usize)
            .ok_or(Error::InvalidHandle)?;
        if slot.generation != cookie.generation() {
            return Err(Error::InvalidHandle);
        }
        slot.entry.clone().ok_or(Error::InvalidHandle)
    }

    /// Remove an entry, invalidating the cookie and every copy of it.
    pub fn remove(&self, cookie: Cookie) -> Result<Arc<T>> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(cookie.slot() as usize)
            .ok_or(Error::InvalidHandle)?;
        if slot.generation != cookie.generation() {
            return Err(Error::InvalidHandle);
        }
        let entry = slot.entry.take().ok_or(Error::InvalidHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        drop(slots);
        self.free.lock().push(cookie.slot());
        Ok(entry)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|s| s.entry.is_some())
            .count()
    }

    /// Whether the table holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let table: HandleTable<u32> = HandleTable::new();
        let cookie = table.insert_with(|_| Arc::new(7));
        assert_eq!(*table.get(cookie).unwrap(), 7);
        assert_eq!(table.len(), 1);

        let removed = table.remove(cookie).unwrap();
        assert_eq!(*removed, 7);
        assert!(table.is_empty());
        assert!(matches!(table.get(cookie), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_stale_cookie_detected_after_reuse() {
        let table: HandleTable<u32> = HandleTable::new();
        let first = table.insert_with(|_| Arc::new(1));
        table.remove(first).unwrap();

        // The slot is reused with a bumped generation.
        let second = table.insert_with(|_| Arc::new(2));
        assert_ne!(first.as_u64(), second.as_u64());
        assert!(matches!(table.get(first), Err(Error::InvalidHandle)));
        assert_eq!(*table.get(second).unwrap(), 2);
    }

    #[test]
    fn test_builder_sees_final_cookie() {
        let table: HandleTable<Cookie> = HandleTable::new();
        let cookie = table.insert_with(|c| Arc::new(c));
        assert_eq!(*table.get(cookie).unwrap(), cookie);
    }
}
