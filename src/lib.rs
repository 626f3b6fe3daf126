/*!
This crate provides [`Shared<T>`], a thread-safe reference-counted pointer in
the spirit of [`std::sync::Arc`] and C++'s
[`shared_ptr`](https://en.cppreference.com/w/cpp/memory/shared_ptr), with one
capability the std pointers lack: the *handle itself* can be retargeted
through `&self`, concurrently with other threads cloning from it, reading
through it, or retargeting it too.

With `Arc`, pointing a handle at a different object requires `&mut`, so two
threads can never race on one handle and the only shared state is the
counter. `Shared` instead gives every handle its own small mutex guarding its
(object pointer, control block pointer) pair, which makes
[`assign`][Shared::assign], [`take_from`][Shared::take_from],
[`reset`][Shared::reset] and [`reset_to`][Shared::reset_to] safe to call on a
handle that other threads are using at the same time.

```rust
use lockshare::Shared;

let a = Shared::new([1, 2, 3]);

// copy-construction: a second handle joins the chain
let b = a.clone();
assert_eq!(a.count(), 2);

// copy-assignment through &self; no `mut` anywhere
let c = Shared::empty();
c.assign(&b);
assert_eq!(a.count(), 3);
assert!(c.same_chain(&a));

// move-assignment: the share is transplanted, not duplicated
let d = Shared::empty();
d.take_from(&b);
assert!(b.is_empty());
assert_eq!(a.count(), 3);

// the managed object is freed when the last share goes
drop(a);
drop(c);
drop(d);
```

# Ownership model

Every chain of aliasing handles shares one heap-allocated control block
holding an atomic share count. Cloning or assigning from a non-empty handle
increments it; dropping, resetting, or assigning over a non-empty handle
decrements it, and exactly one decrement observes the transition to zero.
That thread frees the managed object, then the control block, and no other
handle touches either again.

The counter is atomic rather than lock-protected because the handles sharing
it each sit behind their *own* lock; there is no chain-wide lock and no way
(or need) to discover every alias. Operations that touch two handles at once
take both locks as an address-ordered pair, so `a.assign(&b)` racing
`b.assign(&a)` cannot deadlock.

# Empty handles

A handle may be empty: no managed object, count reported as 0, and
dereferencing it via [`with`][Shared::with] panics
([`try_with`][Shared::try_with] returns `None` instead). Empty handles own
no chain at all, so copies of an empty handle alias nothing, not even each
other. A handle that has been moved from with `take_from` is left empty and
behaves exactly like a default-constructed one.

# What this is not

Not a garbage collector and not a cycle detector: a chain whose managed
object transitively holds a `Shared` back into the same chain will never hit
count zero and will leak, exactly as with `Arc`. There are no weak pointers.

```rust
use lockshare::Shared;
use std::thread;

// One handle, many threads: clone-and-read races reset_to on the same
// handle object, which Arc cannot express.
let h = Shared::new(String::from("v0"));
thread::scope(|s| {
    s.spawn(|| {
        for i in 0..100 {
            h.reset_to(format!("v{i}"));
        }
    });
    s.spawn(|| {
        for _ in 0..100 {
            let alias = h.clone();
            alias.try_with(|v| assert!(v.starts_with('v')));
        }
    });
});
assert_eq!(h.count(), 1);
```
*/
mod count;
pub mod shared;

pub use self::shared::Shared;
