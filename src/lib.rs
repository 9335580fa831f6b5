//! Thread-safe reference counted [`Strong`] and [`Weak`] pointers.
//!
//! The provided pointer types behave much like [`std::sync::Arc`] and [`std::sync::Weak`], but
//! they keep the value and its bookkeeping in two separate heap allocations. A `Strong` adopts a
//! value that already lives in a [`Box`] and allocates a small control block next to it, holding
//! two atomic counters: the number of strong pointers, and the number of weak pointers plus one
//! reference held on behalf of all strong pointers together.
//!
//! The value is dropped when the strong count reaches zero. The control block is freed when the
//! weak count reaches zero, which only happens after the value is gone. A [`Weak`] can be turned
//! back into a `Strong` with [`Weak::lock`] as long as the value is alive; once any thread has
//! observed the strong count at zero every later `lock` returns an empty pointer.
//!
//! Both pointer types can be empty, like a null pointer. Dereferencing an empty `Strong` panics;
//! use [`Strong::get`] to check.
//!
//! ```
//! # use std::thread;
//! # use duorc::Strong;
//! let s = Strong::new(String::from("hello"));
//! let w = s.downgrade();
//!
//! let t = thread::spawn(move || match w.upgrade() {
//!     Some(s) => assert!(*s == "hello"),
//!     None => assert!(w.expired()),
//! });
//!
//! drop(s);
//! t.join().unwrap();
//! ```
//!
//! Like every reference counting scheme, cycles of strong pointers are never freed.
//!
//! # Loom
//!
//! Enable the `loom` feature to run the model-checked tests, which explore every interleaving of
//! promotion racing with the final drop.
//!
//! ```text
//! cargo test --release --lib --features loom
//! ```

mod block;
mod error;
mod strong;
mod sync;
mod weak;

pub use crate::{error::AllocError, strong::Strong, weak::Weak};
