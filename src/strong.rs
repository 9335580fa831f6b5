use std::{
    alloc, fmt, mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use log::trace;

use crate::{block::ControlBlock, error::AllocError, weak::Weak};

/// The pointer pair shared by every handle of one allocation.
pub(crate) struct Raw<T> {
    pub(crate) value: NonNull<T>,
    pub(crate) block: NonNull<ControlBlock>,
}

impl<T> Raw<T> {
    /// # Safety
    ///
    /// The caller must hold a strong or weak reference that keeps the block alive for as long as
    /// the returned reference is used.
    pub(crate) unsafe fn block(&self) -> &ControlBlock {
        self.block.as_ref()
    }
}

impl<T> Clone for Raw<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Raw<T> {}

/// A thread-safe reference counted pointer that owns its value, similar to [`Arc`].
///
/// A `Strong` is either empty or shares a heap value with every other `Strong` created from it.
/// The value is dropped exactly once, when the last non-empty `Strong` is dropped or reset.
/// Cycles of `Strong` pointers are never collected; break them with [`Weak`].
///
/// [`Arc`]: std::sync::Arc
pub struct Strong<T> {
    raw: Option<Raw<T>>,
}

impl<T> Drop for Strong<T> {
    fn drop(&mut self) {
        self.release();
    }
}

unsafe impl<T> Send for Strong<T> where T: Send + Sync {}

unsafe impl<T> Sync for Strong<T> where T: Send + Sync {}

impl<T> fmt::Debug for Strong<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T> Strong<T> {
    /// Creates an empty pointer. No memory is allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// # use duorc::Strong;
    /// let s = Strong::<usize>::empty();
    /// assert!(s.is_empty());
    /// assert!(s.use_count() == 0);
    /// ```
    pub const fn empty() -> Self {
        Strong { raw: None }
    }

    /// Moves `value` to the heap and creates the first strong pointer to it.
    ///
    /// Aborts through [`handle_alloc_error`][alloc::handle_alloc_error] if the control block cannot
    /// be allocated. See [`Strong::try_new`] for a fallible version.
    ///
    /// # Examples
    ///
    /// ```
    /// # use duorc::Strong;
    /// let s = Strong::new(5);
    ///
    /// assert!(*s == 5);
    /// assert!(s.use_count() == 1);
    /// assert!(s.weak_count() == 1);
    /// ```
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Like [`Strong::new`], but returns an error instead of aborting when the control block
    /// cannot be allocated. `value` is dropped in that case.
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        Self::try_from_box(Box::new(value))
    }

    /// Adopts a value that already lives on the heap.
    pub fn from_box(value: Box<T>) -> Self {
        match Self::try_from_box(value) {
            Ok(strong) => strong,
            Err(err) => alloc::handle_alloc_error(err.layout()),
        }
    }

    /// Adopts a value that already lives on the heap. Returns an error if the control block cannot
    /// be allocated, after dropping `value`.
    pub fn try_from_box(value: Box<T>) -> Result<Self, AllocError> {
        let block = ControlBlock::allocate()?;
        let value = NonNull::from(Box::leak(value));

        Ok(Strong {
            raw: Some(Raw { value, block }),
        })
    }

    /// Adopts a raw heap pointer. A null pointer yields an empty `Strong`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from [`Box::into_raw`], and must not be owned by anything else.
    ///
    /// # Examples
    ///
    /// ```
    /// # use duorc::Strong;
    /// let s = unsafe { Strong::from_raw(Box::into_raw(Box::new(5))) };
    /// assert!(*s == 5);
    ///
    /// let s = unsafe { Strong::<usize>::from_raw(std::ptr::null_mut()) };
    /// assert!(s.is_empty());
    /// ```
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        if ptr.is_null() {
            return Self::empty();
        }

        Self::from_box(Box::from_raw(ptr))
    }

    /// Wraps pointers whose strong reference the caller has already counted.
    pub(crate) fn adopt(raw: Raw<T>) -> Self {
        Strong { raw: Some(raw) }
    }

    /// Gets a reference to the value, or `None` if the pointer is empty.
    pub fn get(&self) -> Option<&T> {
        self.raw.map(|raw| unsafe { raw.value.as_ref() })
    }

    /// Gets a raw pointer to the value. Null if the pointer is empty.
    pub fn as_ptr(&self) -> *const T {
        match self.raw {
            Some(raw) => raw.value.as_ptr(),
            None => ptr::null(),
        }
    }

    /// Returns `true` if the pointer owns nothing.
    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Gets the number of strong pointers to this allocation, or `0` if empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::mem::drop;
    /// # use duorc::Strong;
    /// let s1 = Strong::new(5);
    /// assert!(s1.use_count() == 1);
    ///
    /// let s2 = s1.clone();
    /// assert!(s1.use_count() == 2);
    ///
    /// drop(s2);
    /// assert!(s1.use_count() == 1);
    /// ```
    pub fn use_count(&self) -> usize {
        self.raw
            .map_or(0, |raw| unsafe { raw.block() }.strong_count())
    }

    /// Gets the weak count of this allocation, or `0` if empty. While any strong pointer exists the
    /// count includes one reference held on behalf of all strong pointers.
    ///
    /// # Examples
    ///
    /// ```
    /// # use duorc::Strong;
    /// let s = Strong::new(5);
    /// assert!(s.weak_count() == 1);
    ///
    /// let w = s.downgrade();
    /// assert!(s.weak_count() == 2);
    /// ```
    pub fn weak_count(&self) -> usize {
        self.raw
            .map_or(0, |raw| unsafe { raw.block() }.weak_count())
    }

    /// Creates a new weak pointer to the allocation. Downgrading an empty pointer gives an empty
    /// weak pointer.
    pub fn downgrade(&self) -> Weak<T> {
        Weak::new(self)
    }

    /// Returns `true` if both pointers share an allocation, or both are empty.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block() == other.block()
    }

    /// Moves the allocation out of `self`, leaving it empty. No counter changes.
    pub fn take(&mut self) -> Self {
        Strong {
            raw: self.raw.take(),
        }
    }

    /// Drops this pointer's share of the allocation and leaves it empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use duorc::Strong;
    /// let mut s = Strong::new(5);
    /// let w = s.downgrade();
    ///
    /// s.reset();
    /// assert!(s.is_empty());
    /// assert!(w.expired());
    /// ```
    pub fn reset(&mut self) {
        self.release();
    }

    /// Drops this pointer's share of the current allocation, then owns `value` in a new one.
    pub fn reset_to(&mut self, value: T) {
        self.release();
        *self = Strong::new(value);
    }

    /// Returns ownership of the contained value. Returns `Err` if the pointer is empty or if there
    /// are other strong pointers to the allocation.
    ///
    /// Weak pointers do not prevent this; they observe the allocation as expired afterwards.
    ///
    /// # Examples
    ///
    /// ```
    /// # use duorc::Strong;
    /// let s = Strong::new(String::from("a"));
    /// let w = s.downgrade();
    ///
    /// assert!(s.into_inner().unwrap() == "a");
    /// assert!(w.expired());
    /// ```
    pub fn into_inner(self) -> Result<T, Self> {
        let Some(raw) = self.raw else {
            return Err(self);
        };

        if !unsafe { raw.block() }.try_claim_unique() {
            return Err(self);
        }
        mem::forget(self);

        let _token = WeakToken(raw);
        let value = unsafe { *Box::from_raw(raw.value.as_ptr()) };
        trace!("value moved out of control block {:p}", raw.block);

        Ok(value)
    }

    pub(crate) fn raw(&self) -> Option<Raw<T>> {
        self.raw
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

        if !unsafe { raw.block() }.decrement_strong() {
            return;
        }

        // the implicit weak token keeps the block alive while the value's destructor runs,
        // including any weak pointers the value holds to itself. It is given back even if that
        // destructor panics.
        let _token = WeakToken(raw);
        unsafe { drop(Box::from_raw(raw.value.as_ptr())) };
        trace!("value destroyed, control block {:p}", raw.block);
    }
}

/// The weak reference held on behalf of all strong pointers, given back on drop.
///
/// Only created after the strong count reached zero, once per allocation, right before the value
/// is dropped or moved out.
struct WeakToken<T>(Raw<T>);

impl<T> Drop for WeakToken<T> {
    fn drop(&mut self) {
        let raw = self.0;

        unsafe {
            if raw.block().decrement_weak() {
                ControlBlock::release(raw.block);
                trace!("control block {:p} released", raw.block);
            }
        }
    }
}

impl<T> Clone for Strong<T> {
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            unsafe { raw.block() }.increment_strong();
        }

        Strong { raw: self.raw }
    }

    fn clone_from(&mut self, source: &Self) {
        if Strong::ptr_eq(self, source) {
            return;
        }

        *self = source.clone();
    }
}

impl<T> Default for Strong<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Deref for Strong<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the pointer is empty. Use [`Strong::get`] to check first.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty Strong"),
        }
    }
}

impl<T> From<T> for Strong<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> From<Box<T>> for Strong<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}
