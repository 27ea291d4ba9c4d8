//! 订阅记录与释放句柄
//!
use super::dispatch::Delivery;
use crate::promise::{CancelHandle, CancellablePromise};
use crate::sync::lock;
use bon::Builder;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 订阅回调：同步函数，延迟投递时由通道的派发队列调用
pub type Handler<P> = Arc<dyn Fn(P) + Send + Sync>;

/// 订阅选项
///
/// - `sync`：未设置时取通道的 `!publish_asynchronously`；
/// - `once`：首次调用后自动移除。
#[derive(Builder, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub sync: Option<bool>,
    #[builder(default)]
    pub once: bool,
}

impl SubscribeOptions {
    pub fn sync() -> Self {
        Self {
            sync: Some(true),
            once: false,
        }
    }

    pub fn deferred() -> Self {
        Self {
            sync: Some(false),
            once: false,
        }
    }

    pub fn once() -> Self {
        Self {
            sync: None,
            once: true,
        }
    }
}

/// 释放句柄：移除对应的订阅/拦截器/响应方；可重复调用，丢弃句柄不会自动释放
#[derive(Clone)]
pub struct Disposer {
    action: Arc<dyn Fn() + Send + Sync>,
}

impl Disposer {
    pub(crate) fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            action: Arc::new(action),
        }
    }

    pub fn dispose(&self) {
        (self.action)();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer").finish_non_exhaustive()
    }
}

/// 订阅句柄
#[derive(Clone, Debug)]
pub struct Subscription {
    id: u64,
    disposer: Disposer,
}

impl Subscription {
    pub(crate) fn new(id: u64, disposer: Disposer) -> Self {
        Self { id, disposer }
    }

    /// 在所属事件内唯一
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 取消所有尚未执行的延迟投递并移除订阅
    pub fn dispose(&self) {
        self.disposer.dispose();
    }
}

pub(crate) struct SubscriptionEntry<P> {
    handler: Handler<P>,
    sync: bool,
    active: AtomicBool,
    // 仅在存在未结算的延迟调用时非空
    in_flight: Mutex<Vec<CancelHandle>>,
}

impl<P: Send + 'static> SubscriptionEntry<P> {
    pub(crate) fn new(handler: Handler<P>, sync: bool) -> Self {
        Self {
            handler,
            sync,
            active: AtomicBool::new(true),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_sync(&self) -> bool {
        self.sync
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 就地调用
    pub(crate) fn invoke(&self, value: P) {
        if self.is_active() {
            (self.handler)(value);
        }
    }

    /// 生成一次延迟投递，并记录取消句柄以便释放时中止
    pub(crate) fn defer(self: &Arc<Self>, value: P) -> Delivery<P> {
        let (promise, resolver) = CancellablePromise::pair();

        let mut in_flight = lock(&self.in_flight);
        in_flight.retain(|h| !h.is_settled());
        in_flight.push(promise.cancel_handle());

        Delivery {
            entry: self.clone(),
            value,
            resolver,
        }
    }

    /// 标记为已移除并取消所有在途的延迟调用
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        let pending = std::mem::take(&mut *lock(&self.in_flight));
        for handle in pending {
            handle.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        lock(&self.in_flight)
            .iter()
            .filter(|h| !h.is_settled())
            .count()
    }
}
