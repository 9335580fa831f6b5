use std::{
    alloc::{self, Layout},
    process,
    ptr::{self, NonNull},
    sync::atomic::Ordering::{Acquire, Relaxed, Release},
};

use crossbeam::utils::{Backoff, CachePadded};

use crate::{
    error::AllocError,
    sync::{fence, AtomicUsize},
};

/// Counters beyond this value abort the process instead of risking a wrap to zero.
const MAX_REF_COUNT: usize = isize::MAX as usize;

/// Shared bookkeeping for one managed value.
///
/// `strong` counts the live [`Strong`] handles. `weak` counts the live [`Weak`] handles plus one
/// implicit token owned by the strong handles as a group, held from the first strong handle until
/// `strong` drops to zero. The value dies on `strong` 1→0 and the block itself on `weak` 1→0, so
/// the block always outlives the value.
///
/// [`Strong`]: crate::Strong
/// [`Weak`]: crate::Weak
pub(crate) struct ControlBlock {
    strong: CachePadded<AtomicUsize>,
    weak: CachePadded<AtomicUsize>,
}

impl ControlBlock {
    fn new() -> Self {
        ControlBlock {
            strong: CachePadded::new(AtomicUsize::new(0)),
            weak: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Allocates a block for a freshly adopted value. The block is returned with one strong
    /// reference and the implicit weak token already taken.
    pub(crate) fn allocate() -> Result<NonNull<ControlBlock>, AllocError> {
        let layout = Layout::new::<ControlBlock>();

        let block = unsafe { alloc::alloc(layout) } as *mut ControlBlock;
        let Some(block) = NonNull::new(block) else {
            return Err(AllocError::new(layout));
        };

        unsafe {
            block.as_ptr().write(ControlBlock::new());

            let shared = block.as_ref();
            shared.increment_strong();
            shared.increment_weak();
        }

        Ok(block)
    }

    /// Frees the storage of a block.
    ///
    /// # Safety
    ///
    /// `block` must come from [`ControlBlock::allocate`] and the caller must have just observed
    /// the weak count's 1→0 transition. No reference into the block may be used afterwards.
    pub(crate) unsafe fn release(block: NonNull<ControlBlock>) {
        debug_assert!(block.as_ref().weak_count() == 0);

        ptr::drop_in_place(block.as_ptr());
        alloc::dealloc(block.as_ptr() as *mut u8, Layout::new::<ControlBlock>());
    }

    pub(crate) fn increment_strong(&self) {
        if self.strong.fetch_add(1, Relaxed) > MAX_REF_COUNT {
            process::abort();
        }
    }

    /// Returns `true` if this call brought the strong count to zero. In that case every write made
    /// through other strong handles happens-before the return.
    pub(crate) fn decrement_strong(&self) -> bool {
        if self.strong.fetch_sub(1, Release) == 1 {
            fence(Acquire);
            return true;
        }

        false
    }

    pub(crate) fn increment_weak(&self) {
        if self.weak.fetch_add(1, Relaxed) > MAX_REF_COUNT {
            process::abort();
        }
    }

    /// Same contract as [`ControlBlock::decrement_strong`], for the weak count.
    pub(crate) fn decrement_weak(&self) -> bool {
        if self.weak.fetch_sub(1, Release) == 1 {
            fence(Acquire);
            return true;
        }

        false
    }

    /// Adds a strong reference only if the value is still alive.
    ///
    /// A zero strong count is terminal: once observed, this never increments it again.
    pub(crate) fn try_increment_strong(&self) -> bool {
        let backoff = Backoff::new();

        let mut n = self.strong.load(Relaxed);
        loop {
            if n == 0 {
                return false;
            }

            if n > MAX_REF_COUNT {
                process::abort();
            }

            match self
                .strong
                .compare_exchange_weak(n, n + 1, Relaxed, Relaxed)
            {
                Ok(_) => break,
                Err(strong) => {
                    n = strong;
                    backoff.spin();
                }
            }
        }

        // pairs with the release decrement of whichever handle we raced against.
        fence(Acquire);
        true
    }

    /// Takes the strong count from 1 to 0 iff the caller holds the only strong reference.
    pub(crate) fn try_claim_unique(&self) -> bool {
        self.strong
            .compare_exchange(1, 0, Acquire, Relaxed)
            .is_ok()
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(Relaxed)
    }

    pub(crate) fn weak_count(&self) -> usize {
        self.weak.load(Relaxed)
    }
}
