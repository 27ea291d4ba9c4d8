//! 可取消的一次性异步结果（CancellablePromise）
//!
//! 通道内所有延迟执行的工作都以它表达：
//! - `new(executor)`：executor 拿到 `Resolver`，可同步或稍后 `resolve`/`reject`；
//! - `cancel()`：尚未结算时以“空值”结算（`Ok(None)`），已结算则无操作；
//! - `defer(f)`：把回调包装为“在 tokio 运行时上延迟执行”的可取消调用。
//!
//! 结算结果：`Ok(Some(v))` 成功，`Err(e)` 拒绝，`Ok(None)` 取消
//! （所有 `Resolver` 未结算即被丢弃时同样视为取消）。
//!
use crate::sync::lock;
use futures_util::FutureExt;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type Settlement<T, E> = Option<Result<T, E>>;

type CancelHook = Box<dyn FnOnce() + Send>;

struct Slot<T, E> {
    sender: Mutex<Option<oneshot::Sender<Settlement<T, E>>>>,
    token: CancellationToken,
    hooks: Mutex<Vec<CancelHook>>,
}

impl<T, E> Slot<T, E> {
    fn settle(&self, outcome: Settlement<T, E>) -> bool {
        match lock(&self.sender).take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    fn is_settled(&self) -> bool {
        lock(&self.sender).is_none()
    }

    // 每个钩子只会被取走一次，cancel 与 on_cancel 竞争时也不会重复执行
    fn run_hooks(&self) {
        let hooks = std::mem::take(&mut *lock(&self.hooks));
        for hook in hooks {
            hook();
        }
    }
}

/// 结算一个 `CancellablePromise` 的句柄，可克隆；首次结算生效
pub struct Resolver<T, E = Infallible> {
    slot: Arc<Slot<T, E>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.slot.is_settled())
            .finish()
    }
}

impl<T, E> Resolver<T, E> {
    pub fn resolve(&self, value: T) {
        self.slot.settle(Some(Ok(value)));
    }

    pub fn reject(&self, error: E) {
        self.slot.settle(Some(Err(error)));
    }

    pub fn settle(&self, outcome: Result<T, E>) {
        self.slot.settle(Some(outcome));
    }

    /// 对应的 promise 是否已结算（含取消）
    pub fn is_settled(&self) -> bool {
        self.slot.is_settled()
    }

    /// 取消信号：promise 被取消时触发，便于长耗时的 executor 提前退出
    pub fn cancel_token(&self) -> CancellationToken {
        self.slot.token.clone()
    }

    /// 注册取消回调：promise 被取消时同步执行；已取消则立即执行，正常结算则永不执行
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        lock(&self.slot.hooks).push(Box::new(hook));
        if self.slot.token.is_cancelled() {
            self.slot.run_hooks();
        }
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self);
    fn is_settled(&self) -> bool;
}

struct WeakSlot<T, E> {
    slot: Weak<Slot<T, E>>,
}

impl<T: Send + 'static, E: Send + 'static> Cancel for WeakSlot<T, E> {
    fn cancel(&self) {
        // 所有 Resolver 都已丢弃：promise 已以空值结束
        let Some(slot) = self.slot.upgrade() else {
            return;
        };
        if slot.settle(None) {
            slot.token.cancel();
            slot.run_hooks();
        }
    }

    fn is_settled(&self) -> bool {
        self.slot.upgrade().is_none_or(|slot| slot.is_settled())
    }
}

/// 类型擦除的取消句柄，可克隆、可跨线程传递
#[derive(Clone)]
pub struct CancelHandle(Arc<dyn Cancel>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_settled(&self) -> bool {
        self.0.is_settled()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// 可取消的一次性异步结果
///
/// ```
/// use chanbus::promise::CancellablePromise;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let p: CancellablePromise<u8> = CancellablePromise::new(|_resolver| {});
/// p.cancel();
/// assert_eq!(p.value().await, None);
/// # }
/// ```
pub struct CancellablePromise<T, E = Infallible> {
    rx: oneshot::Receiver<Settlement<T, E>>,
    handle: CancelHandle,
    token: CancellationToken,
}

// 不做结构化 pin 投影，oneshot::Receiver 本身即 Unpin
impl<T, E> Unpin for CancellablePromise<T, E> {}

impl<T, E> CancellablePromise<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// 创建 promise 并立即（同步）执行 executor
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        let (promise, resolver) = Self::pair();
        executor(resolver);
        promise
    }

    pub(crate) fn pair() -> (Self, Resolver<T, E>) {
        let (tx, rx) = oneshot::channel();
        let token = CancellationToken::new();
        let slot = Arc::new(Slot {
            sender: Mutex::new(Some(tx)),
            token: token.clone(),
            hooks: Mutex::new(Vec::new()),
        });
        let handle = CancelHandle(Arc::new(WeakSlot {
            slot: Arc::downgrade(&slot),
        }));

        (Self { rx, handle, token }, Resolver { slot })
    }

    pub fn resolved(value: T) -> Self {
        Self::new(|r| r.resolve(value))
    }

    pub fn rejected(error: E) -> Self {
        Self::new(|r| r.reject(error))
    }

    /// 在 tokio 运行时上执行 `fut` 并以其结果结算；取消后 future 在下一个 await 点被丢弃
    ///
    /// 不在运行时内时就地轮询一次：未能立即完成则丢弃并以空值结束。
    pub fn spawn<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::new(|resolver| {
            let token = resolver.cancel_token();
            let task = async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    outcome = fut => resolver.settle(outcome),
                }
            };

            match Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(task);
                }
                Err(_) => {
                    if task.now_or_never().is_none() {
                        tracing::warn!("deferred work dropped: no tokio runtime and not immediately ready");
                    }
                }
            }
        })
    }

    /// 把回调转为延迟、可取消的调用
    pub fn defer<A, F, Fut>(callback: F) -> impl Fn(A) -> Self + Send + Sync + 'static
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        move |args| Self::spawn(callback(args))
    }
}

impl<T, E> CancellablePromise<T, E> {
    /// 尚未结算时以空值结算；已结算则无操作
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.handle.is_settled()
    }
}

impl<T> CancellablePromise<T, Infallible> {
    /// 等待结果：`None` 表示已取消
    pub async fn value(self) -> Option<T> {
        match self.await {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<T, E> Future for CancellablePromise<T, E> {
    type Output = Result<Option<T>, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Some(Ok(value)))) => Poll::Ready(Ok(Some(value))),
            Poll::Ready(Ok(Some(Err(error)))) => Poll::Ready(Err(error)),
            Poll::Ready(Ok(None)) | Poll::Ready(Err(_)) => Poll::Ready(Ok(None)),
        }
    }
}

impl<T, E> fmt::Debug for CancellablePromise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellablePromise")
            .field("settled", &self.handle.is_settled())
            .finish()
    }
}
