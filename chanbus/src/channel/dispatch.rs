//! 延迟投递队列
//!
//! 每个通道一条 FIFO 队列与一个排空任务：一次 `publish` 产生的延迟投递作为一批，
//! 在通知循环结束后整体入队。排空任务逐批、逐个执行，因此：
//! - 同一事件的订阅者按注册顺序被调用，多次发布按发布顺序到达；
//! - 同一通道的延迟回调不会并行执行（多线程运行时亦然）；
//! - 同一次发布中，同步订阅者总是先于任何延迟订阅者。
//!
//! 排空任务惰性地启动在当前 tokio 运行时上；所在运行时关闭后，下一批会在新的运行时上重建任务。
//! 不在运行时内时整批就地执行。
//!
use super::subscription::SubscriptionEntry;
use crate::key::ChannelKey;
use crate::promise::Resolver;
use crate::sync::lock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// 一次待执行的延迟投递；`resolver` 被取消即跳过
pub(crate) struct Delivery<P> {
    pub(crate) entry: Arc<SubscriptionEntry<P>>,
    pub(crate) value: P,
    pub(crate) resolver: Resolver<()>,
}

impl<P: Send + 'static> Delivery<P> {
    fn run(self, channel: &ChannelKey) {
        if self.resolver.is_settled() {
            return;
        }
        let Self { entry, value, resolver } = self;
        // 回调 panic 只影响这一次投递，队列继续排空
        if catch_unwind(AssertUnwindSafe(|| entry.invoke(value))).is_err() {
            tracing::error!(channel = %channel, "deferred subscriber panicked");
        }
        resolver.resolve(());
    }
}

pub(crate) type Batch<P> = Vec<Delivery<P>>;

pub(crate) struct Dispatcher<P> {
    key: ChannelKey,
    tx: Mutex<Option<mpsc::UnboundedSender<Batch<P>>>>,
}

impl<P: Send + 'static> Dispatcher<P> {
    pub(crate) fn new(key: ChannelKey) -> Self {
        Self {
            key,
            tx: Mutex::new(None),
        }
    }

    pub(crate) fn submit(&self, batch: Batch<P>) {
        if batch.is_empty() {
            return;
        }

        let mut tx = lock(&self.tx);
        let batch = match tx.as_ref() {
            Some(sender) => match sender.send(batch) {
                Ok(()) => return,
                // 排空任务随旧运行时一起结束
                Err(mpsc::error::SendError(batch)) => batch,
            },
            None => batch,
        };

        match Handle::try_current() {
            Ok(rt) => {
                let (sender, rx) = mpsc::unbounded_channel();
                rt.spawn(drain(self.key.clone(), rx));
                tracing::debug!(channel = %self.key, "dispatch task started");
                // 接收端刚刚交给任务，发送不会失败
                let _ = sender.send(batch);
                *tx = Some(sender);
            }
            Err(_) => {
                *tx = None;
                drop(tx);
                tracing::trace!(channel = %self.key, "no tokio runtime, running deferred batch inline");
                for delivery in batch {
                    delivery.run(&self.key);
                }
            }
        }
    }
}

async fn drain<P: Send + 'static>(key: ChannelKey, mut rx: mpsc::UnboundedReceiver<Batch<P>>) {
    while let Some(batch) = rx.recv().await {
        for delivery in batch {
            delivery.run(&key);
        }
    }
    tracing::debug!(channel = %key, "dispatch task stopped");
}
