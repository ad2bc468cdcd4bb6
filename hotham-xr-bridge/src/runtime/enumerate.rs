use openxr::sys;

use super::{cvt, XrResult};

/// Run an OpenXR two-call enumeration: ask for the count, allocate, then fill.
///
/// If the list grew between the two calls the fill reports `ERROR_SIZE_INSUFFICIENT`, and the
/// count is asked for again. `template` is used to initialise every element, so output structs that need their `ty` set
/// can be passed in ready to go. The closure receives `(capacity, &mut count, buffer)`.
pub(crate) fn enumerate<T, F>(template: T, mut call: F) -> XrResult<Vec<T>>
where
    T: Clone,
    F: FnMut(u32, &mut u32, *mut T) -> sys::Result,
{
    loop {
        let mut count = 0;
        cvt(call(0, &mut count, std::ptr::null_mut()))?;

        let mut buffer = vec![template.clone(); count as usize];
        if buffer.is_empty() {
            return Ok(buffer);
        }

        match call(count, &mut count, buffer.as_mut_ptr()) {
            sys::Result::ERROR_SIZE_INSUFFICIENT => continue,
            result => cvt(result)?,
        };
        buffer.truncate(count as usize);
        return Ok(buffer);
    }
}
