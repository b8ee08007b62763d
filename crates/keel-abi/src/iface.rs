//! Raw interface types: ids, dispatch pointers, vtable slots.
//!
//! An interface *kind* is a 128-bit id naming one ordered set of slots. A
//! dispatch pointer is a `*mut RawIface`; slot index is the dispatch key —
//! there is no name lookup at the flat-call boundary, so slot order is part
//! of the wire contract.
//!
//! Every interface starts with the same four slots:
//!
//! | slot | signature |
//! |------|-----------|
//! | 0 | `query_interface(this, iid, out) -> i32` |
//! | 1 | `add_ref(this) -> u32` |
//! | 2 | `release(this) -> u32` |
//! | 3 | `free(this) -> i32` (the *Free* base interface) |
//!
//! Derived interfaces append slots after their base's full slot array —
//! a derived vtable is byte-identical to its base over the base's length.

/// Stable 128-bit interface id.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u128);

impl InterfaceId {
    pub const FREE: InterfaceId = InterfaceId(0x5a3f_c2d1_8e4b_7a06_9d10_44f7_21c8_b35e);
    pub const INITIALIZABLE_TASK: InterfaceId = InterfaceId(0x1be4_90aa_3c72_d815_f06b_2e9d_57a1_c433);
    pub const PLUGIN: InterfaceId = InterfaceId(0x7d02_61fc_b5a9_4e38_8c57_d3e0_196a_f2b4);
    pub const PLUGIN_PRESET_CONFIG: InterfaceId = InterfaceId(0x93ab_4d17_60ce_2f85_1b9e_7c04_d8f3_5a62);
    pub const GAME_MANAGER: InterfaceId = InterfaceId(0x2c8f_e7b3_915d_0a46_63d2_8f1b_c470_e95a);
    pub const LAUNCHER_API: InterfaceId = InterfaceId(0xc614_3a89_f2e7_5b00_a8d4_016c_93be_7f21);
    pub const LAUNCHER_API_MEDIA: InterfaceId = InterfaceId(0x48e0_b6d5_27f9_c1a3_5062_e4a8_1d7b_39cf);
    pub const LAUNCHER_API_NEWS: InterfaceId = InterfaceId(0xe925_17c4_8ba0_6d3f_7c18_52e9_04af_b6d0);
    pub const PLUGIN_SELF_UPDATE: InterfaceId = InterfaceId(0x0af7_d852_4c1e_93b6_e8a5_30c7_6f92_d418);
    pub const GAME_UNINSTALLER: InterfaceId = InterfaceId(0xb138_59ef_06a7_24dc_492b_c6f0_8e15_a73d);
    pub const GAME_INSTALLER: InterfaceId = InterfaceId(0x6fd0_23b8_e94c_51a7_30f8_9ad1_b52e_64c9);

    /// Read an id from an ABI pointer.
    ///
    /// # Safety
    ///
    /// `ptr`, if non-null, must point to 16 readable bytes.
    pub unsafe fn read(ptr: *const InterfaceId) -> Option<InterfaceId> {
        if ptr.is_null() {
            None
        } else {
            Some(*ptr)
        }
    }
}

/// One vtable entry: an opaque function pointer. The slot's true signature
/// is fixed by (interface id, slot index).
pub type Slot = *const ();

/// The dispatch pointer target. `vtable` points at the slot array for one
/// interface identity; `object` is the opaque concrete-object pointer the
/// dispatch layer resolves.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawIface {
    pub vtable: *const Slot,
    pub object: *mut libc::c_void,
}

// Universal slot indices.
pub const SLOT_QUERY_INTERFACE: usize = 0;
pub const SLOT_ADD_REF: usize = 1;
pub const SLOT_RELEASE: usize = 2;
pub const SLOT_FREE: usize = 3;

/// Slot count of the universal prefix (identity triplet + free).
pub const FREE_SLOT_COUNT: usize = 4;

// Universal slot signatures.
pub type QueryInterfaceFn =
    unsafe extern "C" fn(*mut RawIface, *const InterfaceId, *mut *mut RawIface) -> i32;
pub type AddRefFn = unsafe extern "C" fn(*mut RawIface) -> u32;
pub type ReleaseFn = unsafe extern "C" fn(*mut RawIface) -> u32;
pub type FreeFn = unsafe extern "C" fn(*mut RawIface) -> i32;

/// Fetch a slot from a dispatch pointer.
///
/// # Safety
///
/// `this` must be a live dispatch pointer whose vtable has more than
/// `index` slots.
pub unsafe fn slot(this: *mut RawIface, index: usize) -> Slot {
    *(*this).vtable.add(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_ids_are_distinct() {
        let ids = [
            InterfaceId::FREE,
            InterfaceId::INITIALIZABLE_TASK,
            InterfaceId::PLUGIN,
            InterfaceId::PLUGIN_PRESET_CONFIG,
            InterfaceId::GAME_MANAGER,
            InterfaceId::LAUNCHER_API,
            InterfaceId::LAUNCHER_API_MEDIA,
            InterfaceId::LAUNCHER_API_NEWS,
            InterfaceId::PLUGIN_SELF_UPDATE,
            InterfaceId::GAME_UNINSTALLER,
            InterfaceId::GAME_INSTALLER,
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
