use std::{cell::RefCell, fmt, rc::Rc};

use log::{debug, error};

use crate::{BridgeError, BridgeResult};

struct Slot<T> {
    instance: Option<Rc<RefCell<T>>>,
    use_count: usize,
}

/// Lets several independent owners (eg. the engine adapter and a config object) share one lazily
/// constructed `T`.
///
/// The first [`SharedHandle::acquire`] constructs the value, every further one bumps the use count,
/// and the [`SharedHandle::release`] that brings the count back to zero drops it. Cloning the handle
/// shares the same slot.
pub struct SharedHandle<T> {
    slot: Rc<RefCell<Slot<T>>>,
    factory: Rc<dyn Fn() -> T>,
}

impl<T> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<T> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T> SharedHandle<T> {
    /// An empty handle; `factory` is called on the first acquire
    pub fn new(factory: impl Fn() -> T + 'static) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot {
                instance: None,
                use_count: 0,
            })),
            factory: Rc::new(factory),
        }
    }

    /// Get the shared value, constructing it if nobody holds it yet
    pub fn acquire(&self) -> Rc<RefCell<T>> {
        let mut slot = self.slot.borrow_mut();
        slot.use_count += 1;
        let factory = &self.factory;
        let instance = slot
            .instance
            .get_or_insert_with(|| Rc::new(RefCell::new(factory())))
            .clone();
        debug!("[SHARED] Acquired, use count is now {}", slot.use_count);
        instance
    }

    /// Give up one use. The value is dropped when the last user releases it.
    pub fn release(&self) -> BridgeResult<()> {
        // Take the value out first so it's dropped after the slot borrow ends
        let released = {
            let mut slot = self.slot.borrow_mut();
            if slot.use_count == 0 {
                error!("[SHARED] {}", BridgeError::ReleaseWithoutAcquire);
                return Err(BridgeError::ReleaseWithoutAcquire);
            }
            slot.use_count -= 1;
            debug!("[SHARED] Released, use count is now {}", slot.use_count);
            if slot.use_count == 0 {
                slot.instance.take()
            } else {
                None
            }
        };
        drop(released);
        Ok(())
    }

    /// How many acquires are outstanding
    pub fn use_count(&self) -> usize {
        self.slot.borrow().use_count
    }

    /// The shared value, if anyone currently holds it
    pub fn get(&self) -> Option<Rc<RefCell<T>>> {
        self.slot.borrow().instance.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Tracked {
        drops: Rc<Cell<u32>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    pub fn test_one_construct_one_destroy() {
        let constructs = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));
        let handle = {
            let constructs = constructs.clone();
            let drops = drops.clone();
            SharedHandle::new(move || {
                constructs.set(constructs.get() + 1);
                Tracked {
                    drops: drops.clone(),
                }
            })
        };
        let other_owner = handle.clone();

        let mut use_counts = Vec::new();
        let first = handle.acquire();
        use_counts.push(handle.use_count());
        let second = other_owner.acquire();
        use_counts.push(handle.use_count());
        assert!(Rc::ptr_eq(&first, &second));
        drop((first, second));

        handle.release().unwrap();
        use_counts.push(handle.use_count());
        assert_eq!(drops.get(), 0);
        assert!(handle.get().is_some());

        other_owner.release().unwrap();
        use_counts.push(handle.use_count());

        assert_eq!(use_counts, vec![1, 2, 1, 0]);
        assert_eq!(constructs.get(), 1);
        assert_eq!(drops.get(), 1);
        assert!(handle.get().is_none());
    }

    #[test]
    pub fn test_release_without_acquire() {
        let handle = SharedHandle::new(|| 42);
        assert!(matches!(
            handle.release(),
            Err(BridgeError::ReleaseWithoutAcquire)
        ));
        assert_eq!(handle.use_count(), 0);

        // A fresh acquire after everything was released constructs again
        assert_eq!(*handle.acquire().borrow(), 42);
        handle.release().unwrap();
        assert!(handle.release().is_err());
    }
}
