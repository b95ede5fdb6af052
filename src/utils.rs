// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! The module includes utilities for other modules.
//!
//! ## Directive Memory Rule
//! `Directive::UserDefined` carries its payload as a usize-packed pointer so the enum stays
//! light-weight and serializable. The sender allocates with [box2usize], the final receiver frees
//! with [usize2box].

use std::ptr::with_exposed_provenance_mut;
// }])>

pub fn box2usize<T>(val: T) -> usize {
    Box::into_raw(Box::new(val)).expose_provenance()
}
pub unsafe fn usize2box<T>(ptr: usize) -> Box<T> {
    unsafe { Box::<T>::from_raw(with_exposed_provenance_mut(ptr)) }
}
