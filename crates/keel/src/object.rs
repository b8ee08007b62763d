//! The concrete-object wrapper behind every dispatch pointer.
//!
//! `ComBox<T>` is a single heap allocation holding a refcount, the value,
//! and one `RawIface` per interface identity the type supports. A dispatch
//! pointer always points at one of those embedded `RawIface` entries; its
//! `object` field points back at the `ComBox`, which is how the universal
//! slots (and every generated wrapper) recover `&T`.
//!
//! Lifetime is manual COM-style counting: `expose` returns the handle with
//! refcount 1, `add_ref`/`release` move it, release at zero drops the box.
//! There is no garbage collector on either side of the boundary; the
//! single-owner / free-exactly-once contract is enforced by [`IfaceHandle`]
//! being move-only on the Rust side and checked flags at the raw level.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use keel_abi::iface::{self, InterfaceId, RawIface};
use keel_abi::status;

use crate::traits::ComClass;

/// One interface identity embedded in a `ComBox`.
struct IfaceEntry {
    iid: InterfaceId,
    raw: UnsafeCell<RawIface>,
}

/// Refcounted multi-identity wrapper. Field order matters to nobody — all
/// access goes through the typed helpers below, monomorphized per `T`.
pub struct ComBox<T: ComClass> {
    refcount: AtomicU32,
    entries: Box<[IfaceEntry]>,
    value: T,
}

// The embedded RawIface pointers are interior-pointers into this very
// allocation; they move with it only because it never moves (heap, pinned
// by convention from expose() until the final release).
unsafe impl<T: ComClass> Send for ComBox<T> {}
unsafe impl<T: ComClass> Sync for ComBox<T> {}

impl<T: ComClass> ComBox<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn ref_count(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Take one extra reference (keepalive paths).
    pub(crate) fn bump_ref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    fn entry(&self, iid: InterfaceId) -> Option<*mut RawIface> {
        self.entries
            .iter()
            .find(|e| e.iid == iid)
            .map(|e| e.raw.get())
    }
}

/// Wrap `value` and hand out its primary dispatch pointer (the first
/// identity in `T::identities()`), with refcount 1 owned by the handle.
pub fn expose<T: ComClass>(value: T) -> IfaceHandle {
    let identities = T::identities();
    assert!(!identities.is_empty(), "ComClass with no identities");

    let entries: Box<[IfaceEntry]> = identities
        .iter()
        .map(|(iid, vt)| IfaceEntry {
            iid: *iid,
            raw: UnsafeCell::new(RawIface {
                vtable: vt.as_ptr(),
                object: std::ptr::null_mut(),
            }),
        })
        .collect();

    let boxed = Box::new(ComBox {
        refcount: AtomicU32::new(1),
        entries,
        value,
    });
    let ptr = Box::into_raw(boxed);

    // Second init step: now that the box has its final address, point every
    // embedded entry back at it.
    unsafe {
        for entry in (*ptr).entries.iter() {
            (*entry.raw.get()).object = ptr as *mut libc::c_void;
        }
        IfaceHandle::from_raw((*ptr).entries[0].raw.get())
    }
}

/// Recover the `ComBox` behind a dispatch pointer.
///
/// # Safety
///
/// `this` must be a live dispatch pointer produced by `expose::<T>` — the
/// caller (a slot wrapper monomorphized for `T`) guarantees the type.
pub unsafe fn resolve<'a, T: ComClass>(this: *mut RawIface) -> Option<&'a ComBox<T>> {
    if this.is_null() {
        return None;
    }
    let object = (*this).object as *const ComBox<T>;
    if object.is_null() {
        return None;
    }
    Some(&*object)
}

// =============================================================================
// Universal slots (monomorphized per concrete type)
// =============================================================================

/// Slot 0: interface query. Unsupported ids fail cleanly with
/// `NO_INTERFACE` and a null out-pointer — never a mismatched vtable.
pub unsafe extern "C" fn query_interface<T: ComClass>(
    this: *mut RawIface,
    iid: *const InterfaceId,
    out: *mut *mut RawIface,
) -> i32 {
    if out.is_null() {
        return status::NULL_DISPATCH;
    }
    out.write(std::ptr::null_mut());
    let Some(iid) = iface::InterfaceId::read(iid) else {
        return status::INVALID_ARG;
    };
    let Some(boxed) = resolve::<T>(this) else {
        return status::NULL_DISPATCH;
    };
    match boxed.entry(iid) {
        Some(raw) => {
            boxed.refcount.fetch_add(1, Ordering::AcqRel);
            out.write(raw);
            status::OK
        }
        None => status::NO_INTERFACE,
    }
}

/// Slot 1: bump the refcount. Returns the new count.
pub unsafe extern "C" fn add_ref<T: ComClass>(this: *mut RawIface) -> u32 {
    match resolve::<T>(this) {
        Some(boxed) => boxed.refcount.fetch_add(1, Ordering::AcqRel) + 1,
        None => 0,
    }
}

/// Slot 2: drop one reference; at zero, drop the box. Returns the new
/// count (0 means the object is gone).
pub unsafe extern "C" fn release<T: ComClass>(this: *mut RawIface) -> u32 {
    if this.is_null() {
        return 0;
    }
    let object = (*this).object as *mut ComBox<T>;
    if object.is_null() {
        return 0;
    }
    release_object(object)
}

/// Drop one reference on a bare object pointer (no dispatch pointer in
/// hand). Used by worker-thread keepalives.
///
/// # Safety
///
/// `object` must be live and the caller must own the reference being given
/// up.
pub(crate) unsafe fn release_object<T: ComClass>(object: *mut ComBox<T>) -> u32 {
    // No shared borrow across the drop below.
    let prev = (*object).refcount.fetch_sub(1, Ordering::AcqRel);
    if prev == 1 {
        drop(Box::from_raw(object));
        0
    } else {
        prev - 1
    }
}

/// Slot 3: the *Free* interface — release held resources. The allocation
/// itself stays until the last `release`.
pub unsafe extern "C" fn free_slot<T: ComClass + crate::traits::Free>(
    this: *mut RawIface,
) -> i32 {
    match resolve::<T>(this) {
        Some(boxed) => {
            boxed.value().free();
            status::OK
        }
        None => status::NULL_DISPATCH,
    }
}

// =============================================================================
// IfaceHandle — move-only owned reference
// =============================================================================

/// Owned reference to one interface identity of an exposed object.
///
/// Move-only: dropping it releases the reference, `into_raw` transfers
/// ownership across the boundary. Calls go through the actual vtable
/// slots, so the handle works uniformly for any concrete type.
#[derive(Debug)]
pub struct IfaceHandle {
    raw: *mut RawIface,
}

unsafe impl Send for IfaceHandle {}
unsafe impl Sync for IfaceHandle {}

impl IfaceHandle {
    /// Adopt a dispatch pointer that already owns one reference.
    ///
    /// # Safety
    ///
    /// `raw` must be live and its reference must transfer to the handle.
    pub unsafe fn from_raw(raw: *mut RawIface) -> Self {
        Self { raw }
    }

    pub fn as_raw(&self) -> *mut RawIface {
        self.raw
    }

    /// Hand the reference across the boundary; the caller now owns it.
    pub fn into_raw(self) -> *mut RawIface {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    /// Query another identity of the same object.
    pub fn query(&self, iid: InterfaceId) -> Option<IfaceHandle> {
        let mut out: *mut RawIface = std::ptr::null_mut();
        let code = unsafe {
            let qi: iface::QueryInterfaceFn =
                std::mem::transmute(iface::slot(self.raw, iface::SLOT_QUERY_INTERFACE));
            qi(self.raw, &iid, &mut out)
        };
        if status::is_ok(code) && !out.is_null() {
            Some(IfaceHandle { raw: out })
        } else {
            None
        }
    }

    pub fn add_ref(&self) -> u32 {
        unsafe {
            let f: iface::AddRefFn =
                std::mem::transmute(iface::slot(self.raw, iface::SLOT_ADD_REF));
            f(self.raw)
        }
    }

    /// Call the *Free* slot (release held resources).
    pub fn free_resources(&self) -> i32 {
        unsafe {
            let f: iface::FreeFn = std::mem::transmute(iface::slot(self.raw, iface::SLOT_FREE));
            f(self.raw)
        }
    }
}

impl Clone for IfaceHandle {
    fn clone(&self) -> Self {
        self.add_ref();
        Self { raw: self.raw }
    }
}

impl Drop for IfaceHandle {
    fn drop(&mut self) {
        unsafe {
            let f: iface::ReleaseFn =
                std::mem::transmute(iface::slot(self.raw, iface::SLOT_RELEASE));
            f(self.raw);
        }
    }
}
