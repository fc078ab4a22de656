use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait MutexUtils<T> {
    /// Lock a mutex and execute a function with its lock.
    /// This makes sure that the mutex is locked only during the function execution.
    ///
    /// A poisoned lock is still used: the guarded state is only ever
    /// modified through single statements that cannot be left half-done.
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R;
}

impl<T> MutexUtils<T> for Mutex<T> {
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard: MutexGuard<'_, T> = self.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
