//! `Shared<T>` is a shared-ownership pointer in the spirit of
//! [`std::sync::Arc`], with one capability `Arc` lacks: a single handle can
//! be reassigned, reset, or moved-from through `&self`, concurrently with
//! other threads operating on the same handle object.
//!
//! Each handle guards its own (object pointer, control block pointer) pair
//! with a private mutex; the share counter itself is atomic so that handles
//! in the same chain, each behind its own lock, can update it without any
//! shared lock. See the crate docs for the full model.
use crate::count::ControlBlock;
use core::{fmt, ptr, ptr::NonNull};
use parking_lot::{Mutex, MutexGuard};

/// A live share: the managed object plus the chain's control block.
///
/// Invariant: while a `Chain` exists in some handle's slot, the counter it
/// points at is >= 1 and includes this chain's share. Duplicating increments;
/// releasing decrements, and the release that hits zero frees the object and
/// then the block.
struct Chain<T> {
    value: NonNull<T>,
    ctrl: NonNull<ControlBlock>,
}

impl<T> Chain<T> {
    fn new(value: T) -> Self {
        // Safety: Box::into_raw never returns null.
        unsafe {
            Chain {
                value: NonNull::new_unchecked(Box::into_raw(Box::new(value))),
                ctrl: NonNull::new_unchecked(Box::into_raw(Box::new(ControlBlock::new(1)))),
            }
        }
    }

    /// Seed a chain around an already-allocated object.
    ///
    /// # Safety
    /// `value` must point to a live `Box<T>` allocation owned by no one else.
    unsafe fn adopt(value: NonNull<T>) -> Self {
        Chain {
            value,
            ctrl: NonNull::new_unchecked(Box::into_raw(Box::new(ControlBlock::new(1)))),
        }
    }

    fn duplicate(&self) -> Self {
        unsafe { self.ctrl.as_ref() }.increment();
        Chain {
            value: self.value,
            ctrl: self.ctrl,
        }
    }

    fn count(&self) -> usize {
        unsafe { self.ctrl.as_ref() }.get()
    }

    /// Give up this share. The caller whose decrement hits zero frees the
    /// object first, then the control block, and no handle touches either
    /// again.
    ///
    /// # Safety
    /// This chain must have been removed from its slot; it must not be used
    /// after the call.
    unsafe fn release(self) {
        if self.ctrl.as_ref().decrement() {
            drop(Box::from_raw(self.value.as_ptr()));
            drop(Box::from_raw(self.ctrl.as_ptr()));
        }
    }
}

type Slot<T> = Option<Chain<T>>;

/// Lock two handles' slots as a pair, in address order, so that two threads
/// assigning `a = b` and `b = a` concurrently cannot deadlock on each other's
/// first lock. Callers must not pass the same mutex twice.
fn lock_pair<'a, T>(
    a: &'a Mutex<Slot<T>>,
    b: &'a Mutex<Slot<T>>,
) -> (MutexGuard<'a, Slot<T>>, MutexGuard<'a, Slot<T>>) {
    if (a as *const Mutex<Slot<T>> as usize) < (b as *const Mutex<Slot<T>> as usize) {
        let ga = a.lock();
        let gb = b.lock();
        (ga, gb)
    } else {
        let gb = b.lock();
        let ga = a.lock();
        (ga, gb)
    }
}

fn release_slot<T>(slot: &mut Slot<T>) {
    if let Some(chain) = slot.take() {
        // Safety: the chain was just removed from its slot.
        unsafe { chain.release() };
    }
}

/// A thread-safe shared-ownership handle.
///
/// Cloning a handle adds a share to its chain; dropping a handle removes
/// one, and the last drop frees the managed object. Unlike `Arc`, the
/// mutating operations ([`assign`][Shared::assign],
/// [`take_from`][Shared::take_from], [`reset`][Shared::reset],
/// [`reset_to`][Shared::reset_to]) take `&self`, so the *same handle object*
/// may be retargeted while other threads clone from it or read through it.
///
/// ```
/// use lockshare::Shared;
///
/// let a = Shared::new(String::from("hi"));
/// let b = a.clone();
/// assert_eq!(a.count(), 2);
/// assert!(a.same_chain(&b));
///
/// b.reset();
/// assert!(b.is_empty());
/// assert_eq!(a.count(), 1);
/// ```
pub struct Shared<T> {
    slot: Mutex<Slot<T>>,
}

// Same bounds as `Arc`: any alias may be the one that drops the object, and
// any thread may read through `with`.
unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Allocate `value` and construct the sole handle to it, with count 1.
    pub fn new(value: T) -> Self {
        Shared {
            slot: Mutex::new(Some(Chain::new(value))),
        }
    }

    /// Construct an empty handle: no managed object, count 0. Dereferencing
    /// it panics until it is assigned or reset to something.
    pub fn empty() -> Self {
        Shared {
            slot: Mutex::new(None),
        }
    }

    /// Construct a handle from a raw object pointer, taking ownership of the
    /// allocation. A null pointer yields an empty handle, like
    /// [`empty`][Shared::empty].
    ///
    /// ```
    /// use lockshare::Shared;
    ///
    /// let p = Box::into_raw(Box::new(7));
    /// let h = unsafe { Shared::from_raw(p) };
    /// assert_eq!(h.count(), 1);
    ///
    /// let none = unsafe { Shared::<i32>::from_raw(std::ptr::null_mut()) };
    /// assert_eq!(none.count(), 0);
    /// ```
    ///
    /// # Safety
    /// `ptr` must be null, or a pointer obtained from [`Box::into_raw`] that
    /// nothing else owns or frees.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Shared {
            slot: Mutex::new(NonNull::new(ptr).map(|value| unsafe { Chain::adopt(value) })),
        }
    }

    /// Copy-assignment: release whatever chain this handle holds, then join
    /// `source`'s chain (incrementing its count iff `source` is non-empty).
    /// Assigning a handle to itself is a no-op.
    ///
    /// Both handles' locks are taken as an address-ordered pair, so
    /// concurrent `a.assign(&b)` and `b.assign(&a)` cannot deadlock.
    ///
    /// ```
    /// use lockshare::Shared;
    ///
    /// let a = Shared::new(1);
    /// let b = Shared::empty();
    /// b.assign(&a);
    /// assert_eq!(a.count(), 2);
    /// assert!(b.same_chain(&a));
    /// ```
    pub fn assign(&self, source: &Self) {
        if ptr::eq(self, source) {
            return;
        }
        let (mut dst, src) = lock_pair(&self.slot, &source.slot);
        // Even when both handles alias one chain, releasing first is fine:
        // `src`'s own share keeps the count >= 1 until we duplicate it.
        release_slot(&mut dst);
        *dst = src.as_ref().map(Chain::duplicate);
    }

    /// Move-assignment: release this handle's chain, then transplant
    /// `source`'s share into this handle without touching the count.
    /// `source` is left empty; moving a handle into itself is a no-op.
    ///
    /// ```
    /// use lockshare::Shared;
    ///
    /// let a = Shared::new(1);
    /// let b = Shared::empty();
    /// b.take_from(&a);
    /// assert!(a.is_empty());
    /// assert_eq!(b.count(), 1);
    /// ```
    pub fn take_from(&self, source: &Self) {
        if ptr::eq(self, source) {
            return;
        }
        let (mut dst, mut src) = lock_pair(&self.slot, &source.slot);
        release_slot(&mut dst);
        *dst = src.take();
    }

    /// Release the current chain and become empty.
    pub fn reset(&self) {
        release_slot(&mut self.slot.lock());
    }

    /// Release the current chain, then own freshly allocated `value` with
    /// count 1. The new chain is allocated before the old one is touched, so
    /// the handle is never left torn.
    pub fn reset_to(&self, value: T) {
        let fresh = Chain::new(value);
        let mut slot = self.slot.lock();
        release_slot(&mut slot);
        *slot = Some(fresh);
    }

    /// Release the current chain, then adopt the raw pointer exactly as
    /// [`from_raw`][Shared::from_raw] would (null leaves the handle empty).
    ///
    /// # Safety
    /// Same contract as [`from_raw`][Shared::from_raw].
    pub unsafe fn reset_raw(&self, ptr: *mut T) {
        let fresh = NonNull::new(ptr).map(|value| unsafe { Chain::adopt(value) });
        let mut slot = self.slot.lock();
        release_slot(&mut slot);
        *slot = fresh;
    }

    /// The raw object pointer, null if the handle is empty. Ownership is not
    /// transferred; the pointer is only guaranteed valid while some handle
    /// in the chain stays live.
    pub fn get(&self) -> *mut T {
        self.slot
            .lock()
            .as_ref()
            .map_or(ptr::null_mut(), |chain| chain.value.as_ptr())
    }

    /// Borrow the managed object under this handle's lock. The lock keeps
    /// concurrent `assign`/`reset` on *this handle* out for the duration of
    /// `f`, and the share this handle holds keeps the object alive, so the
    /// borrow cannot dangle.
    ///
    /// Returns `None` if the handle is empty.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slot = self.slot.lock();
        // Safety: the slot's chain holds a share, so the object is live, and
        // nothing mutates it through a `Shared`.
        slot.as_ref().map(|chain| f(unsafe { chain.value.as_ref() }))
    }

    /// Like [`try_with`][Shared::try_with], but panics if the handle is
    /// empty. Callers must check [`is_empty`][Shared::is_empty] first when
    /// emptiness is a reachable state.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Some(r) => r,
            None => panic!("Shared::with on an empty handle"),
        }
    }

    /// Snapshot of the chain's share count, 0 for an empty handle. The value
    /// may be stale the instant it is returned if other aliases are being
    /// created or dropped concurrently.
    pub fn count(&self) -> usize {
        self.slot.lock().as_ref().map_or(0, Chain::count)
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// True iff both handles currently share one control block (they alias
    /// the same chain). Empty handles alias nothing, not even each other,
    /// but a handle always aliases itself.
    pub fn same_chain(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        let (a, b) = lock_pair(&self.slot, &other.slot);
        match (a.as_ref(), b.as_ref()) {
            (Some(x), Some(y)) => x.ctrl == y.ctrl,
            _ => false,
        }
    }
}

/// Copy-construction: a new handle joining the source's chain, incrementing
/// the count iff the source is non-empty.
impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        let src = self.slot.lock();
        Shared {
            slot: Mutex::new(src.as_ref().map(Chain::duplicate)),
        }
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Shared::empty()
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        release_slot(self.slot.get_mut());
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        match slot.as_ref() {
            // Safety: as in `try_with`.
            Some(chain) => fmt::Debug::fmt(unsafe { chain.value.as_ref() }, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.get();
        fmt::Pointer::fmt(&p, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::thread;

    struct DropCounter<'a, T>(T, &'a Cell<usize>);
    impl<'a, T> Drop for DropCounter<'a, T> {
        fn drop(&mut self) {
            self.1.set(self.1.get() + 1);
        }
    }

    #[test]
    fn test_empty() {
        let h = Shared::<i32>::empty();
        assert!(h.is_empty());
        assert_eq!(h.count(), 0);
        assert!(h.get().is_null());
        assert_eq!(h.try_with(|v| *v), None);
    }

    #[test]
    fn test_new() {
        let h = Shared::new(10);
        assert!(!h.is_empty());
        assert_eq!(h.count(), 1);
        assert_eq!(h.with(|v| *v), 10);
        assert!(!h.get().is_null());
    }

    #[test]
    fn test_from_raw() {
        let h = unsafe { Shared::from_raw(Box::into_raw(Box::new(3))) };
        assert_eq!(h.count(), 1);
        assert_eq!(h.with(|v| *v), 3);

        let n = unsafe { Shared::<i32>::from_raw(ptr::null_mut()) };
        assert!(n.is_empty());
        assert_eq!(n.count(), 0);
    }

    #[test]
    fn test_clone_aliases() {
        let a = Shared::new(20);
        let b = a.clone();
        assert_eq!(a.count(), 2);
        assert_eq!(b.count(), 2);
        assert!(a.same_chain(&b));
        assert_eq!(a.get(), b.get());
        drop(b);
        assert_eq!(a.count(), 1);
    }

    #[test]
    fn test_clone_of_empty() {
        let a = Shared::<i32>::empty();
        let b = a.clone();
        assert!(b.is_empty());
        // empty handles share no chain, not even with their own copies
        assert!(!a.same_chain(&b));
    }

    #[test]
    fn test_assign() {
        let a = Shared::new(30);
        let b = Shared::empty();
        b.assign(&a);
        assert_eq!(a.count(), 2);
        assert_eq!(b.count(), 2);
        assert!(a.same_chain(&b));
        assert_eq!(b.with(|v| *v), 30);
    }

    #[test]
    fn test_assign_releases_previous_chain() {
        let n1 = Cell::new(0);
        let n2 = Cell::new(0);
        let dst = Shared::new(DropCounter(1, &n1));
        let src = Shared::new(DropCounter(2, &n2));
        dst.assign(&src);
        // dst's old object went with its last share; src's is still held twice
        assert_eq!(n1.get(), 1);
        assert_eq!(n2.get(), 0);
        assert_eq!(src.count(), 2);
        drop(dst);
        drop(src);
        assert_eq!(n2.get(), 1);
    }

    #[test]
    fn test_assign_between_aliases() {
        let n = Cell::new(0);
        let a = Shared::new(DropCounter(1, &n));
        let b = a.clone();
        b.assign(&a);
        assert_eq!(n.get(), 0);
        assert_eq!(a.count(), 2);
        assert!(a.same_chain(&b));
    }

    #[test]
    fn test_self_assign() {
        let n = Cell::new(0);
        let a = Shared::new(DropCounter(5, &n));
        let p = a.get();
        a.assign(&a);
        assert_eq!(a.count(), 1);
        assert_eq!(a.get(), p);
        assert_eq!(n.get(), 0);

        a.take_from(&a);
        assert_eq!(a.count(), 1);
        assert_eq!(n.get(), 0);
        drop(a);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_take_from() {
        let a = Shared::new(40);
        let b = Shared::empty();
        b.take_from(&a);
        assert!(a.is_empty());
        assert_eq!(a.count(), 0);
        assert_eq!(b.count(), 1);
        assert_eq!(b.with(|v| *v), 40);
    }

    #[test]
    fn test_take_from_releases_destination() {
        let n1 = Cell::new(0);
        let n2 = Cell::new(0);
        let dst = Shared::new(DropCounter(1, &n1));
        let src = Shared::new(DropCounter(2, &n2));
        dst.take_from(&src);
        assert_eq!(n1.get(), 1);
        assert_eq!(n2.get(), 0);
        assert_eq!(dst.count(), 1);
        assert!(src.is_empty());
    }

    #[test]
    fn test_native_move() {
        let a = Shared::new(50);
        let b = a;
        // a is statically gone; the move transferred the share untouched
        assert_eq!(b.count(), 1);
        assert_eq!(b.with(|v| *v), 50);
    }

    #[test]
    fn test_last_alias_drops_exactly_once() {
        let n = Cell::new(0);
        let original = Shared::new(DropCounter(60, &n));
        {
            let alias = original.clone();
            assert_eq!(original.count(), 2);
            drop(alias);
            // one alias remains; the object must not have been freed
            assert_eq!(n.get(), 0);
        }
        assert_eq!(original.count(), 1);
        drop(original);
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_reset() {
        let n = Cell::new(0);
        let a = Shared::new(DropCounter(1, &n));
        let b = a.clone();
        a.reset();
        assert!(a.is_empty());
        assert_eq!(a.count(), 0);
        assert_eq!(n.get(), 0);
        assert_eq!(b.count(), 1);
        b.reset();
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_reset_to() {
        let n = Cell::new(0);
        let a = Shared::new(DropCounter(1, &n));
        a.reset_to(DropCounter(2, &n));
        assert_eq!(n.get(), 1);
        assert_eq!(a.count(), 1);
        assert_eq!(a.with(|v| v.0), 2);
    }

    #[test]
    fn test_reset_raw_null() {
        let a = Shared::new(1);
        unsafe { a.reset_raw(ptr::null_mut()) };
        assert!(a.is_empty());
        assert_eq!(a.count(), 0);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Shared::new(2)), "2");
        assert_eq!(format!("{:?}", Shared::<i32>::empty()), "(empty)");
    }

    #[test]
    fn test_concurrent_clones() {
        let h = Shared::new(42);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        let alias = h.clone();
                        assert!(alias.same_chain(&h));
                        assert_eq!(alias.get(), h.get());
                        assert_eq!(alias.with(|v| *v), 42);
                    }
                });
            }
        });
        assert_eq!(h.count(), 1);
        assert_eq!(h.with(|v| *v), 42);
    }

    #[test]
    fn test_concurrent_cross_assignment() {
        // Two threads assigning a = b and b = a simultaneously exercise the
        // lock-order inversion that the address-ordered pair lock prevents.
        let a = Shared::new(1);
        let b = Shared::new(2);
        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..10_000 {
                    a.assign(&b);
                }
            });
            s.spawn(|| {
                for _ in 0..10_000 {
                    b.assign(&a);
                }
            });
        });
        // Assignments only ever copy a live chain, so neither handle can end
        // up empty or torn.
        assert!(!a.is_empty());
        assert!(!b.is_empty());
        assert!(a.with(|v| *v == 1 || *v == 2));
        assert!(b.with(|v| *v == 1 || *v == 2));
        assert!(a.count() >= 1 && a.count() <= 2);
    }

    #[test]
    fn test_concurrent_reassignment_of_one_handle() {
        let h = Shared::new(0);
        thread::scope(|s| {
            s.spawn(|| {
                for i in 1..=5000 {
                    h.reset_to(i);
                }
            });
            s.spawn(|| {
                for _ in 0..5000 {
                    let alias = h.clone();
                    // the alias pins whatever chain it caught
                    assert!(alias.try_with(|v| *v <= 5000).unwrap_or(true));
                }
            });
        });
        assert_eq!(h.count(), 1);
    }

    #[test]
    fn test_handle_storm() {
        for i in 0..100_000usize {
            let a = Shared::new(i);
            let b = a.clone();
            let c = Shared::empty();
            c.assign(&b);
            let d = Shared::new(i + 1);
            d.take_from(&a);
            assert!(a.is_empty());
            assert_eq!(d.count(), 3);
            assert!(d.same_chain(&b) && d.same_chain(&c));
            assert_eq!(b.with(|v| *v), i);
            assert_eq!(c.with(|v| *v), i);
            assert_eq!(d.with(|v| *v), i);
        }
    }
}
