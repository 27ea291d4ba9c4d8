use std::sync::{Mutex, MutexGuard, PoisonError};

// 锁内从不执行用户回调；即便中毒，内部状态依旧一致，直接取回 guard
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
