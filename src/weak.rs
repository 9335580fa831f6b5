use std::{
    fmt,
    hash::{Hash, Hasher},
    ptr,
};

use log::trace;

use crate::{
    block::ControlBlock,
    strong::{Raw, Strong},
};

/// Observes an allocation without owning its value.
///
/// A `Weak` counts toward the control block's weak count only, so the value is dropped as soon as
/// the last [`Strong`] goes, wherever that happens. Reaching the value therefore always goes
/// through [`lock`][Weak::lock]: it hands out a new `Strong` while the strong count is still
/// above zero, and an empty `Strong` from then on.
pub struct Weak<T> {
    raw: Option<Raw<T>>,
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        self.release();
    }
}

unsafe impl<T> Send for Weak<T> where T: Send + Sync {}

unsafe impl<T> Sync for Weak<T> where T: Send + Sync {}

impl<T> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(empty)");
        }

        f.debug_struct("Weak")
            .field("use_count", &self.use_count())
            .field("weak_count", &self.weak_count())
            .finish()
    }
}

impl<T> Weak<T> {
    /// Creates a weak pointer to the allocation of `strong`. See [`Strong::downgrade`].
    pub fn new(strong: &Strong<T>) -> Self {
        let raw = strong.raw();
        if let Some(raw) = raw {
            unsafe { raw.block() }.increment_weak();
        }

        Weak { raw }
    }

    /// Creates a weak pointer to nothing. It is always expired and no memory is allocated.
    pub const fn empty() -> Self {
        Weak { raw: None }
    }

    /// Creates a strong pointer to the allocation. Returns an empty strong pointer if the value
    /// has already been dropped because there are no more strong pointers to it.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::mem::drop;
    /// # use duorc::Strong;
    /// let s = Strong::new(5);
    /// let w = s.downgrade();
    ///
    /// assert!(*w.lock() == 5);
    ///
    /// drop(s);
    /// assert!(w.lock().is_empty());
    /// ```
    pub fn lock(&self) -> Strong<T> {
        let Some(raw) = self.raw else {
            return Strong::empty();
        };

        if !unsafe { raw.block() }.try_increment_strong() {
            trace!("promotion failed, control block {:p} expired", raw.block);
            return Strong::empty();
        }

        Strong::adopt(raw)
    }

    /// Like [`Weak::lock`], but returns `None` instead of an empty strong pointer.
    pub fn upgrade(&self) -> Option<Strong<T>> {
        let strong = self.lock();
        if strong.is_empty() {
            return None;
        }

        Some(strong)
    }

    /// Gets the number of strong pointers to this allocation. Returns `0` once the value has been
    /// dropped, or if the weak pointer is empty.
    pub fn use_count(&self) -> usize {
        self.raw
            .map_or(0, |raw| unsafe { raw.block() }.strong_count())
    }

    /// See [`Strong::weak_count`].
    pub fn weak_count(&self) -> usize {
        self.raw
            .map_or(0, |raw| unsafe { raw.block() }.weak_count())
    }

    /// Returns `true` once the value has been dropped. An expired weak pointer never becomes live
    /// again.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::mem::drop;
    /// # use duorc::Strong;
    /// let s = Strong::new(5);
    /// let w = s.downgrade();
    /// assert!(!w.expired());
    ///
    /// drop(s);
    /// assert!(w.expired());
    /// ```
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Returns `true` if the weak pointer observes nothing at all.
    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Returns `true` if both pointers observe the same allocation, or both are empty.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block() == other.block()
    }

    /// Moves the observation out of `self`, leaving it empty. No counter changes.
    pub fn take(&mut self) -> Self {
        Weak {
            raw: self.raw.take(),
        }
    }

    fn block(&self) -> *const ControlBlock {
        match self.raw {
            Some(raw) => raw.block.as_ptr(),
            None => ptr::null(),
        }
    }

    fn release(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };

        unsafe {
            if raw.block().decrement_weak() {
                // the implicit token is gone too, so the value was dropped before we got here.
                ControlBlock::release(raw.block);
                trace!("control block {:p} released", raw.block);
            }
        }
    }
}

impl<T> From<&Strong<T>> for Weak<T> {
    fn from(value: &Strong<T>) -> Self {
        Self::new(value)
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            unsafe { raw.block() }.increment_weak();
        }

        Weak { raw: self.raw }
    }

    fn clone_from(&mut self, source: &Self) {
        if Weak::ptr_eq(self, source) {
            return;
        }

        *self = source.clone();
    }
}

impl<T> Default for Weak<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> PartialEq for Weak<T> {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(self, other)
    }
}

impl<T> Eq for Weak<T> {}

impl<T> Hash for Weak<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(&self.block(), state)
    }
}
