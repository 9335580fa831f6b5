use std::alloc::Layout;

use thiserror::Error;

/// Returned by [`Strong::try_new`] and [`Strong::try_from_box`] when the control block could not
/// be allocated.
///
/// [`Strong::try_new`]: crate::Strong::try_new
/// [`Strong::try_from_box`]: crate::Strong::try_from_box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "failed to allocate a control block of {} bytes (align {})",
    .layout.size(),
    .layout.align()
)]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub(crate) fn new(layout: Layout) -> Self {
        AllocError { layout }
    }

    /// The layout of the allocation that failed.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}
