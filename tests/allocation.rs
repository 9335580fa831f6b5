//! Checks when heap memory is taken and given back. Counts are per thread, so tests running in
//! parallel do not see each other's allocations.

#![cfg(not(feature = "loom"))]

use duorc::{Strong, Weak};
use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
    mem::drop,
    ptr,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

struct CountingAlloc;

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
    // number of allocations still allowed before the next one fails, if armed.
    static FAIL_AFTER: Cell<Option<usize>> = const { Cell::new(None) };
}

fn should_fail() -> bool {
    FAIL_AFTER
        .try_with(|after| match after.get() {
            Some(0) => {
                after.set(None);
                true
            }
            Some(n) => {
                after.set(Some(n - 1));
                false
            }
            None => false,
        })
        .unwrap_or(false)
}

fn fail_allocation_after(allowed: usize) {
    FAIL_AFTER.with(|after| after.set(Some(allowed)));
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if should_fail() {
            return ptr::null_mut();
        }

        let _ = LIVE.try_with(|live| live.set(live.get() + 1));
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = LIVE.try_with(|live| live.set(live.get() - 1));
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn live() -> isize {
    LIVE.with(Cell::get)
}

struct Flag(Rc<Cell<bool>>);

impl Drop for Flag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

#[test]
fn block_released_after_value_and_last_weak() {
    let dropped = Rc::new(Cell::new(false));
    let value = Box::new(Flag(Rc::clone(&dropped)));
    let with_value = live();

    let s = Strong::from_box(value);
    assert!(live() == with_value + 1);

    let w = s.downgrade();
    let w2 = w.clone();
    assert!(live() == with_value + 1);

    drop(s);
    assert!(dropped.get());
    assert!(live() == with_value);

    drop(w);
    assert!(live() == with_value);

    drop(w2);
    assert!(live() == with_value - 1);
}

#[test]
fn block_released_with_last_strong_when_never_observed() {
    let dropped = Rc::new(Cell::new(false));
    let value = Box::new(Flag(Rc::clone(&dropped)));
    let with_value = live();

    let s = Strong::from_box(value);
    let s2 = s.clone();
    drop(s);
    assert!(live() == with_value + 1);

    drop(s2);
    assert!(dropped.get());
    assert!(live() == with_value - 1);
}

#[test]
fn empty_pointers_allocate_nothing() {
    let before = live();

    let s = unsafe { Strong::<u64>::from_raw(ptr::null_mut()) };
    let w = s.downgrade();
    let e = Weak::<u64>::default();
    assert!(w.lock().is_empty());
    drop((s, w, e));

    assert!(live() == before);
}

#[test]
fn failed_promotion_allocates_nothing() {
    let s = Strong::new(5u64);
    let w = s.downgrade();
    drop(s);

    let before = live();
    assert!(w.lock().is_empty());
    assert!(w.upgrade().is_none());
    assert!(live() == before);
}

#[test]
fn into_inner_frees_block_without_weak() {
    let before = live();

    let s = Strong::new(String::new());
    let value = s.into_inner().unwrap();
    assert!(value.is_empty());

    assert!(live() == before);
}

#[test]
fn control_block_allocation_failure() {
    let dropped = Rc::new(Cell::new(false));
    let value = Box::new(Flag(Rc::clone(&dropped)));
    let before = live();

    fail_allocation_after(0);
    let result = Strong::try_from_box(value);

    let err = match result {
        Ok(_) => panic!("allocation was expected to fail"),
        Err(err) => err,
    };
    assert!(err.layout().size() > 0);
    assert!(err.to_string().starts_with("failed to allocate a control block"));

    // the value's box was freed along the error path.
    assert!(dropped.get());
    assert!(live() == before - 1);
}

#[test]
fn try_new_allocation_failure() {
    let dropped = Rc::new(Cell::new(false));
    let before = live();

    // the value's box goes through, the control block does not.
    fail_allocation_after(1);
    let result = Strong::try_new(Flag(Rc::clone(&dropped)));

    let err = match result {
        Ok(_) => panic!("allocation was expected to fail"),
        Err(err) => err,
    };
    assert!(err.layout().size() > 0);
    assert!(dropped.get());
    assert!(live() == before);
}

struct PanicDrop;

impl Drop for PanicDrop {
    fn drop(&mut self) {
        panic!("value destructor panicked");
    }
}

#[test]
fn block_released_after_panicking_value_drop() {
    let s = Strong::new(PanicDrop);
    let w = s.downgrade();

    let result = panic::catch_unwind(AssertUnwindSafe(|| drop(s)));
    assert!(result.is_err());
    drop(result);

    assert!(w.expired());
    assert!(w.weak_count() == 1);

    let after_panic = live();
    drop(w);
    assert!(live() == after_panic - 1);
}
