//! Vtable construction.
//!
//! A vtable is an immutable, ordered array of opaque function pointers.
//! Derived interfaces are built by *copying the full slot array of the base*
//! and appending their own slots — the prefix-copy scheme that emulates
//! single inheritance without shared runtime type information. Slot order is
//! the wire contract; nothing here may reorder or insert.
//!
//! Vtables are built once per (concrete type, interface kind) in a
//! process-wide registry and leaked: init-at-first-use, immutable forever
//! after, so raw `*const Slot` handed across the boundary never dangles.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use keel_abi::iface::{InterfaceId, Slot, FREE_SLOT_COUNT};

/// An immutable slot array for one interface kind.
#[derive(Debug)]
pub struct Vtable {
    iid: InterfaceId,
    slots: Box<[Slot]>,
}

// Slots are code pointers; sharing them between threads is the whole point.
unsafe impl Send for Vtable {}
unsafe impl Sync for Vtable {}

impl Vtable {
    pub fn iid(&self) -> InterfaceId {
        self.iid
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pointer to slot 0, the value stored in `RawIface::vtable`.
    pub fn as_ptr(&self) -> *const Slot {
        self.slots.as_ptr()
    }
}

/// Builds one vtable. `derive` bulk-copies the base's slots; `push` appends
/// own slots after the base's count.
pub struct VtableBuilder {
    slots: Vec<Slot>,
}

impl VtableBuilder {
    /// Start from the universal prefix (identity triplet + free).
    pub fn root(
        query_interface: keel_abi::iface::QueryInterfaceFn,
        add_ref: keel_abi::iface::AddRefFn,
        release: keel_abi::iface::ReleaseFn,
        free: keel_abi::iface::FreeFn,
    ) -> Self {
        Self {
            slots: vec![
                query_interface as Slot,
                add_ref as Slot,
                release as Slot,
                free as Slot,
            ],
        }
    }

    /// Start from a base interface's complete slot array.
    pub fn derive(base: &Vtable) -> Self {
        Self {
            slots: base.slots.to_vec(),
        }
    }

    /// Append one slot. The index it lands on is `base.len() + n` for the
    /// n-th push — exactly the declared slot order.
    pub fn push(mut self, slot: Slot) -> Self {
        self.slots.push(slot);
        self
    }

    /// Overwrite an inherited slot (an override in the derived interface).
    pub fn set(mut self, index: usize, slot: Slot) -> Self {
        self.slots[index] = slot;
        self
    }

    pub fn finish(self, iid: InterfaceId) -> Vtable {
        debug_assert!(self.slots.len() >= FREE_SLOT_COUNT);
        Vtable {
            iid,
            slots: self.slots.into_boxed_slice(),
        }
    }
}

// =============================================================================
// Build-once registry
// =============================================================================

type RegistryKey = (TypeId, InterfaceId);

static REGISTRY: OnceLock<Mutex<HashMap<RegistryKey, &'static Vtable>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<RegistryKey, &'static Vtable>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get the vtable for `(T, iid)`, building and leaking it on first use.
///
/// The builder must be deterministic: building twice must produce the same
/// slot list, because a racing second build is discarded.
pub fn vtable_of<T: 'static>(iid: InterfaceId, build: impl FnOnce() -> Vtable) -> &'static Vtable {
    let key = (TypeId::of::<T>(), iid);
    if let Some(vt) = registry().lock().unwrap().get(&key) {
        return vt;
    }
    let built: &'static Vtable = Box::leak(Box::new(build()));
    debug_assert_eq!(built.iid(), iid);
    let mut map = registry().lock().unwrap();
    *map.entry(key).or_insert(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn qi(
        _: *mut keel_abi::iface::RawIface,
        _: *const InterfaceId,
        _: *mut *mut keel_abi::iface::RawIface,
    ) -> i32 {
        0
    }
    unsafe extern "C" fn add_ref(_: *mut keel_abi::iface::RawIface) -> u32 {
        1
    }
    unsafe extern "C" fn release(_: *mut keel_abi::iface::RawIface) -> u32 {
        0
    }
    unsafe extern "C" fn free(_: *mut keel_abi::iface::RawIface) -> i32 {
        0
    }

    fn own_slot(n: usize) -> Slot {
        n as Slot
    }

    #[test]
    fn derive_copies_full_prefix_and_appends() {
        let base = VtableBuilder::root(qi, add_ref, release, free)
            .push(own_slot(0x1000))
            .finish(InterfaceId::INITIALIZABLE_TASK);
        assert_eq!(base.len(), 5);

        let derived = VtableBuilder::derive(&base)
            .push(own_slot(0x2000))
            .push(own_slot(0x2001))
            .finish(InterfaceId::GAME_UNINSTALLER);
        assert_eq!(derived.len(), 7);

        // Prefix is byte-identical to the base.
        assert_eq!(&derived.slots()[..base.len()], base.slots());
        // Own slots start exactly at the base's slot count.
        assert_eq!(derived.slots()[5], own_slot(0x2000));
        assert_eq!(derived.slots()[6], own_slot(0x2001));
    }

    #[test]
    fn registry_returns_the_same_instance() {
        struct Marker;
        let a = vtable_of::<Marker>(InterfaceId::FREE, || {
            VtableBuilder::root(qi, add_ref, release, free).finish(InterfaceId::FREE)
        });
        let b = vtable_of::<Marker>(InterfaceId::FREE, || {
            VtableBuilder::root(qi, add_ref, release, free).finish(InterfaceId::FREE)
        });
        assert!(std::ptr::eq(a, b));
    }
}
