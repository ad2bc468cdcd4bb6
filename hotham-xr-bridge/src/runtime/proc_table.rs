/// Declare a table of typed OpenXR function pointers, resolved by name in a single pass.
///
/// ```ignore
/// proc_table! {
///     pub(crate) struct ColorSpaceFunctions {
///         enumerate_color_spaces: pfn::EnumerateColorSpacesFB = "xrEnumerateColorSpacesFB",
///         set_color_space: pfn::SetColorSpaceFB = "xrSetColorSpaceFB",
///     }
/// }
/// ```
///
/// `load` returns the table along with every name the runtime couldn't resolve.
macro_rules! proc_table {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($field:ident: $pfn:ty = $symbol:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default)]
        $vis struct $name {
            $(pub $field: Option<$pfn>,)*
        }

        #[allow(dead_code)]
        impl $name {
            pub const NAMES: &'static [&'static str] = &[$($symbol),*];

            pub fn load(
                runtime: &dyn $crate::runtime::XrRuntime,
                instance: openxr::sys::Instance,
            ) -> (Self, Vec<&'static str>) {
                let resolved = Self::NAMES
                    .iter()
                    .map(|name| runtime.get_instance_proc_addr(instance, name))
                    .collect::<Vec<_>>();
                let missing = Self::NAMES
                    .iter()
                    .zip(resolved.iter())
                    .filter(|(_, function)| function.is_none())
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>();

                let mut slots = resolved.into_iter();
                let table = Self {
                    $($field: slots.next().flatten().map(|function| {
                        // SAFETY: the runtime returned this pointer for the symbol paired with
                        // this slot, whose signature is `$pfn`.
                        unsafe { std::mem::transmute::<openxr::sys::pfn::VoidFunction, $pfn>(function) }
                    }),)*
                };

                (table, missing)
            }

            pub fn is_complete(&self) -> bool {
                true $(&& self.$field.is_some())*
            }
        }
    };
}
pub(crate) use proc_table;
