//! Thin aliases over `parking_lot`'s lock types, so the rest of the crate
//! names one lock type regardless of which crate backs it.

pub type RwLock<T> = parking_lot::RwLock<T>;
pub type RwLockReadGuard<'a, T> = parking_lot::RwLockReadGuard<'a, T>;
pub type RwLockWriteGuard<'a, T> = parking_lot::RwLockWriteGuard<'a, T>;

pub type Mutex<T> = parking_lot::Mutex<T>;
pub type MutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;
