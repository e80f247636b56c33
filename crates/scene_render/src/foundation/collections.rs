//! Arena handles and small collection helpers

pub use slotmap::{SlotMap, SecondaryMap, Key};

slotmap::new_key_type! {
    /// Handle of a render object registered with the render system
    pub struct ObjectId;

    /// Handle of a material in the material library
    pub struct MaterialId;

    /// Handle of a light registered with the render system
    pub struct LightId;

    /// Handle of a quad tree node; slots are recycled when nodes empty out
    pub struct NodeId;

    /// Handle of a per-frame updatable registered with the render system
    pub struct UpdatableId;
}

/// Remove the first occurrence of `value`, moving the last element into its slot.
///
/// Returns `true` if the value was found. Order is not preserved.
pub fn remove_exchanging_with_last<T: PartialEq>(items: &mut Vec<T>, value: &T) -> bool {
    match items.iter().position(|item| item == value) {
        Some(index) => {
            items.swap_remove(index);
            true
        }
        None => false,
    }
}
