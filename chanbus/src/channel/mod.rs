//! 事件通道（EventChannel）
//!
//! 一个通道持有四张按事件索引的表：缓存、订阅、拦截器、响应方。
//! - `publish`/`run`：值先经拦截器管线（并写入缓存），再通知订阅者；
//! - `subscribe`/`once`/`stream`：订阅时若有缓存值则立即同步回放；
//! - `response`/`request`：把一次性的响应方包装为可取消的请求，
//!   结果仍经由 response/error 事件的拦截、缓存与投递。
//!
//! 同一次 `publish`/`run`/`request` 内，拦截与缓存写入总是先于任何订阅者被通知。
//! 延迟订阅经通道自己的 FIFO 队列串行投递（见 `dispatch`），按注册与发布顺序到达。
//! 用户回调从不在内部锁内执行，因此回调中可以再次发布、订阅或释放。
//!
mod dispatch;
mod interceptor;
mod responder;
mod subscription;

pub use interceptor::{InterceptControl, InterceptorFn};
pub use responder::{EventResponder, RequestPromise, Response, ResponderFn};
pub use subscription::{Disposer, Handler, SubscribeOptions, Subscription};

use self::dispatch::Dispatcher;
use self::interceptor::{InterceptorEntry, Intercepted, run_chain};
use self::responder::ResponderEntry;
use self::subscription::SubscriptionEntry;
use crate::config::{ChannelConfig, EventConfig};
use crate::error::RequestError;
use crate::key::ChannelKey;
use crate::promise::{CancellablePromise, Resolver};
use crate::sync::lock;
use futures_core::Stream;
use futures_core::stream::BoxStream;
use futures_util::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// 通道载荷需要满足的能力边界
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// 以 JSON 值为载荷的通道
pub type DynamicChannel = EventChannel<serde_json::Value>;

struct ChannelState<P> {
    cache_events: bool,
    publish_asynchronously: bool,
    cache: HashMap<String, P>,
    // BTreeMap 以单调递增的 id 为键，迭代顺序即注册顺序
    subscriptions: HashMap<String, BTreeMap<u64, Arc<SubscriptionEntry<P>>>>,
    interceptors: HashMap<String, BTreeMap<u64, Arc<InterceptorEntry<P>>>>,
    responders: HashMap<String, Arc<ResponderEntry<P>>>,
}

struct ChannelInner<P> {
    key: ChannelKey,
    config: Option<Arc<ChannelConfig<P>>>,
    state: Mutex<ChannelState<P>>,
    dispatcher: Dispatcher<P>,
    next_id: AtomicU64,
}

/// 事件通道句柄（内部为 `Arc`，克隆开销低）
pub struct EventChannel<P> {
    inner: Arc<ChannelInner<P>>,
}

impl<P> Clone for EventChannel<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> fmt::Debug for EventChannel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

impl<P: Payload> EventChannel<P> {
    /// 无静态配置的独立通道
    pub fn new(key: impl Into<ChannelKey>) -> Self {
        Self::with_config(key, None)
    }

    /// 创建通道，并把配置中的 `default_value` 作为初始缓存写入
    pub fn with_config(key: impl Into<ChannelKey>, config: Option<Arc<ChannelConfig<P>>>) -> Self {
        let key = key.into();
        let channel = Self {
            inner: Arc::new(ChannelInner {
                dispatcher: Dispatcher::new(key.clone()),
                key,
                config,
                state: Mutex::new(ChannelState {
                    cache_events: true,
                    publish_asynchronously: true,
                    cache: HashMap::new(),
                    subscriptions: HashMap::new(),
                    interceptors: HashMap::new(),
                    responders: HashMap::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        };

        let defaults: Vec<(String, P)> = channel
            .inner
            .config
            .iter()
            .flat_map(|config| config.iter())
            .filter_map(|(event, ev)| ev.default_value.clone().map(|v| (event.to_owned(), v)))
            .collect();
        for (event, value) in defaults {
            channel.intercept_and_cache(&event, value);
        }

        channel
    }

    fn state(&self) -> MutexGuard<'_, ChannelState<P>> {
        lock(&self.inner.state)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn downgrade(&self) -> Weak<ChannelInner<P>> {
        Arc::downgrade(&self.inner)
    }

    pub fn key(&self) -> &ChannelKey {
        &self.inner.key
    }

    // ---- 标志位 ----

    pub fn cache_events(&self) -> bool {
        self.state().cache_events
    }

    /// 关闭缓存会立即丢弃全部缓存；重新开启不会恢复旧值
    pub fn set_cache_events(&self, enabled: bool) {
        let mut state = self.state();
        if state.cache_events != enabled {
            state.cache_events = enabled;
            if !enabled {
                state.cache.clear();
            }
        }
    }

    pub fn publish_asynchronously(&self) -> bool {
        self.state().publish_asynchronously
    }

    pub fn set_publish_asynchronously(&self, enabled: bool) {
        self.state().publish_asynchronously = enabled;
    }

    pub fn event_config(&self, event: &str) -> Option<&EventConfig<P>> {
        self.inner.config.as_deref().and_then(|config| config.get(event))
    }

    // ---- 订阅 ----

    /// 订阅事件；若已有缓存值，立即同步以该值调用一次 `handler`
    pub fn subscribe<F>(&self, event: &str, handler: F, options: SubscribeOptions) -> Subscription
    where
        F: Fn(P) + Send + Sync + 'static,
    {
        let sync = options.sync.unwrap_or(!self.publish_asynchronously());
        let id = self.next_id();
        let disposer = self.subscription_disposer(event, id);

        let handler: Handler<P> = if options.once {
            let fired = AtomicBool::new(false);
            let dispose = disposer.clone();
            Arc::new(move |value| {
                // 多个延迟投递可能在首次执行前已排队，只放行第一个
                if fired.swap(true, Ordering::AcqRel) {
                    return;
                }
                handler(value);
                dispose.dispose();
            })
        } else {
            Arc::new(handler)
        };

        let entry = Arc::new(SubscriptionEntry::new(handler, sync));
        let cached = {
            let mut state = self.state();
            state
                .subscriptions
                .entry(event.to_owned())
                .or_default()
                .insert(id, entry.clone());
            state.cache.get(event).cloned()
        };

        tracing::trace!(channel = %self.key(), event, id, sync, once = options.once, "subscribed");

        // 缓存回放不经过延迟包装，也不再经过拦截器
        if let Some(value) = cached {
            entry.invoke(value);
        }

        Subscription::new(id, disposer)
    }

    fn subscription_disposer(&self, event: &str, id: u64) -> Disposer {
        let weak = self.downgrade();
        let event = event.to_owned();
        Disposer::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let removed = {
                let mut state = lock(&inner.state);
                let removed = state
                    .subscriptions
                    .get_mut(&event)
                    .and_then(|subs| subs.remove(&id));
                if state.subscriptions.get(&event).is_some_and(|subs| subs.is_empty()) {
                    state.subscriptions.remove(&event);
                }
                removed
            };
            if let Some(entry) = removed {
                entry.deactivate();
            }
        })
    }

    /// 等待事件的下一个值（有缓存时立即得到缓存值）；取消后得到 `None`
    pub fn once(&self, event: &str) -> CancellablePromise<P> {
        CancellablePromise::new(|resolver| {
            let settle = resolver.clone();
            let subscription =
                self.subscribe(event, move |value| settle.resolve(value), SubscribeOptions::once());
            resolver.on_cancel(move || subscription.dispose());
        })
    }

    /// 以流的形式订阅；流被丢弃时订阅随之释放
    pub fn stream(&self, event: &str) -> BoxStream<'static, P> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(
            event,
            move |value| {
                let _ = tx.send(value);
            },
            SubscribeOptions::sync(),
        );
        Box::pin(EventStream {
            inner: UnboundedReceiverStream::new(rx),
            subscription,
        })
    }

    // ---- 拦截器 ----

    /// 以默认优先级 0 注册拦截器
    pub fn intercept<F>(&self, event: &str, interceptor: F) -> Disposer
    where
        F: Fn(P, &mut InterceptControl) -> P + Send + Sync + 'static,
    {
        self.intercept_with_priority(event, 0, interceptor)
    }

    /// 优先级高者先执行，同优先级按注册顺序
    pub fn intercept_with_priority<F>(&self, event: &str, priority: i32, interceptor: F) -> Disposer
    where
        F: Fn(P, &mut InterceptControl) -> P + Send + Sync + 'static,
    {
        let id = self.next_id();
        let entry = Arc::new(InterceptorEntry {
            priority,
            intercept: Arc::new(interceptor),
        });
        self.state()
            .interceptors
            .entry(event.to_owned())
            .or_default()
            .insert(id, entry);

        let weak = self.downgrade();
        let event = event.to_owned();
        Disposer::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = lock(&inner.state);
            if let Some(chain) = state.interceptors.get_mut(&event) {
                chain.remove(&id);
                if chain.is_empty() {
                    state.interceptors.remove(&event);
                }
            }
        })
    }

    /// 拦截器管线 + 缓存写入
    fn intercept_and_cache(&self, event: &str, payload: P) -> Intercepted<P> {
        let chain: Vec<_> = self
            .state()
            .interceptors
            .get(event)
            .map(|chain| chain.values().cloned().collect())
            .unwrap_or_default();

        let out = run_chain(chain, payload);

        if !out.prevented {
            let cacheable = self.event_config(event).is_none_or(EventConfig::is_cacheable);
            let mut state = self.state();
            if state.cache_events && cacheable {
                state.cache.insert(event.to_owned(), out.value.clone());
            }
        }
        out
    }

    fn notify(&self, event: &str, out: &Intercepted<P>, force_sync: bool) {
        if out.prevented {
            tracing::trace!(channel = %self.key(), event, "publishing prevented by interceptor");
            return;
        }

        let subscribers: Vec<_> = self
            .state()
            .subscriptions
            .get(event)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default();

        tracing::trace!(
            channel = %self.key(),
            event,
            subscribers = subscribers.len(),
            force_sync,
            "notify"
        );

        let mut deferred = Vec::new();
        for subscriber in subscribers {
            // 之前的同步回调可能已释放它
            if !subscriber.is_active() {
                continue;
            }
            if force_sync || subscriber.is_sync() {
                subscriber.invoke(out.value.clone());
            } else {
                deferred.push(subscriber.defer(out.value.clone()));
            }
        }
        self.inner.dispatcher.submit(deferred);
    }

    // ---- 发布 ----

    /// 发布：按各订阅的投递模式通知（默认延迟、可取消）
    pub fn publish(&self, event: &str, payload: P) {
        let out = self.intercept_and_cache(event, payload);
        self.notify(event, &out, false);
    }

    /// 发布并同步调用所有订阅者，忽略其注册时的投递模式
    pub fn run(&self, event: &str, payload: P) {
        let out = self.intercept_and_cache(event, payload);
        self.notify(event, &out, true);
    }

    // ---- request / response ----

    /// 注册（替换）事件的响应方
    pub fn response<F>(&self, event: &str, responder: F, force_sync_response: bool) -> Disposer
    where
        F: Fn(P, Resolver<P, P>) + Send + Sync + 'static,
    {
        self.register_responder(event, Arc::new(responder), force_sync_response, false)
    }

    fn register_responder(
        &self,
        event: &str,
        respond: ResponderFn<P>,
        force_sync_response: bool,
        needs_runtime: bool,
    ) -> Disposer {
        let id = self.next_id();
        let entry = Arc::new(ResponderEntry {
            id,
            respond,
            force_sync_response,
            needs_runtime,
        });
        let replaced = self
            .state()
            .responders
            .insert(event.to_owned(), entry)
            .is_some();

        tracing::debug!(channel = %self.key(), event, replaced, needs_runtime, "responder registered");

        let weak = self.downgrade();
        let event = event.to_owned();
        Disposer::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = lock(&inner.state);
            // 已被替换的响应方不受旧句柄影响
            if state.responders.get(&event).is_some_and(|r| r.id == id) {
                state.responders.remove(&event);
            }
        })
    }

    /// 以 `EventResponder` 注册响应方，响应在 tokio 运行时上执行
    ///
    /// 在运行时之外对它发起的请求以 `RequestError::NoRuntime` 拒绝。
    pub fn respond_with<R>(&self, event: &str, responder: Arc<R>, force_sync_response: bool) -> Disposer
    where
        R: EventResponder<P> + 'static,
    {
        let respond: ResponderFn<P> = Arc::new(move |payload, resolver| {
            let responder = responder.clone();
            // request 已确认运行时存在；失败时丢弃 resolver，请求以 Abandoned 结束
            if let Ok(rt) = Handle::try_current() {
                rt.spawn(async move {
                    let token = resolver.cancel_token();
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        outcome = responder.respond(payload) => resolver.settle(outcome),
                    }
                });
            }
        });
        self.register_responder(event, respond, force_sync_response, true)
    }

    /// 发起请求
    ///
    /// - 无响应方：立即以 `RequestError::MissingResponder` 拒绝；
    /// - 响应成功：若配置了 `response_event`，结果经其拦截、缓存并投递，
    ///   请求以拦截后的值结算（被阻止发布时为 `Response::Suppressed`）；否则直接返回原值；
    /// - 响应失败：对 `error_event` 对称处理，未配置时以原错误拒绝。
    pub fn request(&self, event: &str, payload: P) -> RequestPromise<P> {
        let request_id = Uuid::new_v4();
        let responder = self.state().responders.get(event).cloned();

        let Some(responder) = responder else {
            tracing::warn!(channel = %self.key(), event, %request_id, "request without responder");
            return CancellablePromise::rejected(RequestError::MissingResponder {
                channel: self.key().to_string(),
                event: event.to_owned(),
            });
        };

        if responder.needs_runtime && Handle::try_current().is_err() {
            tracing::warn!(channel = %self.key(), event, %request_id, "async responder needs a tokio runtime");
            return CancellablePromise::rejected(RequestError::NoRuntime {
                event: event.to_owned(),
            });
        }

        tracing::trace!(channel = %self.key(), event, %request_id, "request");

        let mut reply: CancellablePromise<P, P> =
            CancellablePromise::new(|resolver| (responder.respond)(payload, resolver));

        let channel = self.clone();
        let event = event.to_owned();
        let force_sync = responder.force_sync_response;

        CancellablePromise::new(move |outer| {
            if let Some(outcome) = (&mut reply).now_or_never() {
                channel.settle_request(&event, request_id, outcome, force_sync, &outer);
                return;
            }

            match Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(async move {
                        let outcome = reply.await;
                        channel.settle_request(&event, request_id, outcome, force_sync, &outer);
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        channel = %channel.key(),
                        event = %event,
                        %request_id,
                        "pending request without tokio runtime"
                    );
                    outer.reject(RequestError::NoRuntime { event });
                }
            }
        })
    }

    fn settle_request(
        &self,
        event: &str,
        request_id: Uuid,
        outcome: Result<Option<P>, P>,
        force_sync: bool,
        outer: &Resolver<Response<P>, RequestError<P>>,
    ) {
        let config = self.event_config(event);
        match outcome {
            Ok(Some(value)) => {
                let Some(response_event) = config.and_then(|c| c.response_event.as_deref()) else {
                    outer.resolve(Response::Value(value));
                    return;
                };
                let out = self.intercept_and_cache(response_event, value);
                self.notify(response_event, &out, force_sync);
                tracing::trace!(channel = %self.key(), event, %request_id, prevented = out.prevented, "request resolved");
                if out.prevented {
                    outer.resolve(Response::Suppressed);
                } else {
                    outer.resolve(Response::Value(out.value));
                }
            }
            Ok(None) => {
                tracing::warn!(channel = %self.key(), event, %request_id, "responder dropped without replying");
                outer.reject(RequestError::Abandoned {
                    event: event.to_owned(),
                });
            }
            Err(error) => {
                let Some(error_event) = config.and_then(|c| c.error_event.as_deref()) else {
                    outer.reject(RequestError::Rejected {
                        event: event.to_owned(),
                        error,
                    });
                    return;
                };
                let out = self.intercept_and_cache(error_event, error);
                self.notify(error_event, &out, force_sync);
                tracing::trace!(channel = %self.key(), event, %request_id, prevented = out.prevented, "request rejected");
                if out.prevented {
                    outer.resolve(Response::Suppressed);
                } else {
                    outer.reject(RequestError::Rejected {
                        event: event.to_owned(),
                        error: out.value,
                    });
                }
            }
        }
    }

    // ---- 清理 ----

    pub fn clear_interceptors(&self, event: Option<&str>) {
        let mut state = self.state();
        match event {
            Some(event) => {
                state.interceptors.remove(event);
            }
            None => state.interceptors.clear(),
        }
    }

    pub fn clear_responders(&self, event: Option<&str>) {
        let mut state = self.state();
        match event {
            Some(event) => {
                state.responders.remove(event);
            }
            None => state.responders.clear(),
        }
    }

    /// 移除订阅，并取消它们尚未执行的延迟投递
    pub fn clear_subscriptions(&self, event: Option<&str>) {
        let removed: Vec<_> = {
            let mut state = self.state();
            match event {
                Some(event) => state.subscriptions.remove(event).into_iter().collect(),
                None => state.subscriptions.drain().map(|(_, subs)| subs).collect(),
            }
        };
        for entry in removed.into_iter().flat_map(BTreeMap::into_values) {
            entry.deactivate();
        }
    }

    pub fn clear_cache(&self, event: Option<&str>) {
        let mut state = self.state();
        match event {
            Some(event) => {
                state.cache.remove(event);
            }
            None => state.cache.clear(),
        }
    }

    pub fn clear(&self) {
        self.clear_cache(None);
        self.clear_interceptors(None);
        self.clear_responders(None);
        self.clear_subscriptions(None);
    }

    // ---- 只读视图 ----

    pub fn cached(&self, event: &str) -> Option<P> {
        self.state().cache.get(event).cloned()
    }

    pub fn has_responder(&self, event: &str) -> bool {
        self.state().responders.contains_key(event)
    }

    pub fn subscription_count(&self, event: &str) -> usize {
        self.state().subscriptions.get(event).map_or(0, BTreeMap::len)
    }

    pub fn interceptor_count(&self, event: &str) -> usize {
        self.state().interceptors.get(event).map_or(0, BTreeMap::len)
    }
}

struct EventStream<P> {
    inner: UnboundedReceiverStream<P>,
    subscription: Subscription,
}

impl<P> Stream for EventStream<P> {
    type Item = P;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<P>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<P> Drop for EventStream<P> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventConfig;
    use futures_util::StreamExt;
    use std::sync::Mutex;

    fn recorder<P: Payload>() -> (Arc<Mutex<Vec<P>>>, impl Fn(P) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v| sink.lock().unwrap().push(v))
    }

    #[test]
    fn sync_subscriber_receives_inline() {
        let channel = EventChannel::<bool>::new("A");
        let (seen, handler) = recorder();
        channel.subscribe("bool", handler, SubscribeOptions::sync());

        channel.publish("bool", true);

        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn async_subscriber_runs_after_publish_returns() {
        let channel = EventChannel::<u32>::new("A");
        let (seen, handler) = recorder();
        channel.subscribe("n", handler, SubscribeOptions::default());

        channel.publish("n", 1);
        assert!(seen.lock().unwrap().is_empty());

        tokio::task::yield_now().await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn run_forces_sync_delivery() {
        let channel = EventChannel::<u32>::new("A");
        let (seen, handler) = recorder();
        channel.subscribe("n", handler, SubscribeOptions::deferred());

        channel.run("n", 7);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn dispose_cancels_in_flight_delivery() {
        let channel = EventChannel::<u32>::new("A");
        let (seen, handler) = recorder();
        let sub = channel.subscribe("n", handler, SubscribeOptions::default());

        channel.publish("n", 1);
        sub.dispose();
        tokio::task::yield_now().await;

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(channel.subscription_count("n"), 0);
    }

    #[test]
    fn cached_value_is_replayed_on_subscribe() {
        let channel = EventChannel::<bool>::new("A");
        channel.publish("bool", false);

        let (seen, handler) = recorder();
        channel.subscribe("bool", handler, SubscribeOptions::deferred());

        // 回放是同步的，即便订阅注册为延迟投递
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[test]
    fn disabling_cache_discards_values() {
        let channel = EventChannel::<u32>::new("A");
        channel.publish("n", 1);
        assert_eq!(channel.cached("n"), Some(1));

        channel.set_cache_events(false);
        assert_eq!(channel.cached("n"), None);

        channel.set_cache_events(true);
        assert_eq!(channel.cached("n"), None);

        let (seen, handler) = recorder();
        channel.subscribe("n", handler, SubscribeOptions::sync());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn per_event_cache_override_wins() {
        let config = ChannelConfig::new().event(
            "volatile",
            EventConfig::builder().cache(false).build(),
        );
        let channel = EventChannel::<u32>::with_config("A", Some(Arc::new(config)));

        channel.publish("volatile", 1);
        channel.publish("other", 2);

        assert_eq!(channel.cached("volatile"), None);
        assert_eq!(channel.cached("other"), Some(2));
    }

    #[test]
    fn default_values_are_seeded() {
        let config = ChannelConfig::new()
            .event("theme", EventConfig::builder().default_value(3).build())
            .event(
                "volatile",
                EventConfig::builder().default_value(4).cache(false).build(),
            );
        let channel = EventChannel::<u32>::with_config("A", Some(Arc::new(config)));

        assert_eq!(channel.cached("theme"), Some(3));
        assert_eq!(channel.cached("volatile"), None);
    }

    #[test]
    fn once_subscription_fires_a_single_time() {
        let channel = EventChannel::<u32>::new("A");
        let (seen, handler) = recorder();
        channel.subscribe(
            "n",
            handler,
            SubscribeOptions::builder().sync(true).once(true).build(),
        );

        channel.publish("n", 1);
        channel.publish("n", 2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(channel.subscription_count("n"), 0);
    }

    #[tokio::test]
    async fn deferred_once_fires_a_single_time() {
        let channel = EventChannel::<u32>::new("A");
        let (seen, handler) = recorder();
        channel.subscribe("n", handler, SubscribeOptions::once());

        channel.publish("n", 1);
        channel.publish("n", 2);
        tokio::task::yield_now().await;

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(channel.subscription_count("n"), 0);
    }

    #[test]
    fn once_subscription_consumed_by_replay() {
        let channel = EventChannel::<u32>::new("A");
        channel.publish("n", 1);

        let (seen, handler) = recorder();
        channel.subscribe("n", handler, SubscribeOptions::once());
        channel.run("n", 2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn once_resolves_with_next_value() {
        let channel = EventChannel::<u32>::new("A");
        let next = channel.once("n");

        channel.publish("n", 5);
        channel.publish("n", 6);

        assert_eq!(next.value().await, Some(5));
    }

    #[tokio::test]
    async fn once_resolves_with_cached_value() {
        let channel = EventChannel::<u32>::new("A");
        channel.publish("n", 5);
        assert_eq!(channel.once("n").value().await, Some(5));
    }

    #[tokio::test]
    async fn cancelled_once_yields_empty() {
        let channel = EventChannel::<u32>::new("A");
        let next = channel.once("n");

        next.cancel();
        channel.publish("n", 5);

        assert_eq!(next.value().await, None);
    }

    #[tokio::test]
    async fn cancelled_once_releases_its_subscription() {
        let channel = EventChannel::<u32>::new("A");
        let next = channel.once("n");
        assert_eq!(channel.subscription_count("n"), 1);

        next.cancel();

        assert_eq!(channel.subscription_count("n"), 0);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let channel = EventChannel::<u32>::new("A");
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 1..=4 {
            let order = order.clone();
            channel.subscribe("n", move |_| order.lock().unwrap().push(tag), SubscribeOptions::sync());
        }

        channel.publish("n", 0);

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn deferred_subscribers_run_in_registration_order_after_sync_ones() {
        let channel = EventChannel::<u32>::new("A");
        let order = Arc::new(Mutex::new(Vec::new()));
        for (tag, sync) in [("d1", false), ("s1", true), ("d2", false), ("s2", true), ("d3", false)] {
            let order = order.clone();
            let options = if sync { SubscribeOptions::sync() } else { SubscribeOptions::deferred() };
            channel.subscribe("n", move |v| order.lock().unwrap().push(format!("{tag}:{v}")), options);
        }

        channel.publish("n", 1);
        channel.publish("n", 2);
        assert_eq!(*order.lock().unwrap(), vec!["s1:1", "s2:1", "s1:2", "s2:2"]);

        tokio::task::yield_now().await;
        assert_eq!(
            *order.lock().unwrap(),
            vec!["s1:1", "s2:1", "s1:2", "s2:2", "d1:1", "d2:1", "d3:1", "d1:2", "d2:2", "d3:2"]
        );
    }

    #[test]
    #[should_panic(expected = "interceptor failed")]
    fn interceptor_panic_reaches_the_publisher() {
        let channel = EventChannel::<u32>::new("A");
        channel.intercept("n", |_, _| panic!("interceptor failed"));
        channel.publish("n", 1);
    }

    #[test]
    #[should_panic(expected = "response interceptor failed")]
    fn response_interceptor_panic_reaches_the_requester() {
        let config = ChannelConfig::new().event(
            "req",
            EventConfig::builder().response_event("resp").build(),
        );
        let channel = EventChannel::<u32>::with_config("A", Some(Arc::new(config)));
        channel.response("req", |v, r| r.resolve(v), true);
        channel.intercept("resp", |_, _| panic!("response interceptor failed"));

        let _ = channel.request("req", 1).now_or_never();
    }

    struct SlowDouble;

    #[async_trait::async_trait]
    impl EventResponder<u32> for SlowDouble {
        async fn respond(&self, payload: u32) -> Result<u32, u32> {
            Ok(payload * 2)
        }
    }

    #[test]
    fn async_responder_without_runtime_rejects_with_no_runtime() {
        let channel = EventChannel::<u32>::new("A");
        channel.respond_with("req", Arc::new(SlowDouble), false);

        let outcome = channel.request("req", 1).now_or_never();

        assert!(
            matches!(outcome, Some(Err(RequestError::NoRuntime { ref event })) if event == "req"),
            "unexpected outcome: {outcome:?}"
        );
    }

    #[tokio::test]
    async fn async_responder_inside_runtime_resolves() {
        let channel = EventChannel::<u32>::new("A");
        channel.respond_with("req", Arc::new(SlowDouble), false);

        let outcome = channel.request("req", 4).await.unwrap();

        assert_eq!(outcome, Some(Response::Value(8)));
    }

    #[test]
    fn subscriber_removed_mid_notify_is_skipped() {
        let channel = EventChannel::<u32>::new("A");
        let (seen, handler) = recorder();

        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let v = victim.clone();
        channel.subscribe(
            "n",
            move |_| {
                if let Some(sub) = v.lock().unwrap().take() {
                    sub.dispose();
                }
            },
            SubscribeOptions::sync(),
        );
        let sub = channel.subscribe("n", handler, SubscribeOptions::sync());
        *victim.lock().unwrap() = Some(sub);

        channel.publish("n", 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn handlers_may_reenter_the_channel() {
        let channel = EventChannel::<u32>::new("A");
        let (seen, handler) = recorder();
        channel.subscribe("out", handler, SubscribeOptions::sync());

        let ch = channel.clone();
        channel.subscribe("in", move |v| ch.publish("out", v * 2), SubscribeOptions::sync());

        channel.publish("in", 4);
        assert_eq!(*seen.lock().unwrap(), vec![8]);
    }

    #[test]
    fn interceptors_transform_before_cache_and_delivery() {
        let channel = EventChannel::<bool>::new("A");
        let (seen, handler) = recorder();
        channel.subscribe("bool", handler, SubscribeOptions::sync());

        channel.publish("bool", true);
        let negate = channel.intercept("bool", |v, _| !v);
        channel.publish("bool", true);
        assert_eq!(channel.cached("bool"), Some(false));

        let stopper = channel.intercept_with_priority("bool", 2, |v, c| {
            c.stop_interceptors();
            v
        });
        channel.publish("bool", true);

        assert_eq!(*seen.lock().unwrap(), vec![true, false, true]);

        stopper.dispose();
        negate.dispose();
        assert_eq!(channel.interceptor_count("bool"), 0);
    }

    #[test]
    fn prevented_publish_is_neither_cached_nor_delivered() {
        let channel = EventChannel::<u32>::new("A");
        channel.publish("n", 1);

        let (seen, handler) = recorder();
        channel.subscribe("n", handler, SubscribeOptions::sync());
        channel.intercept("n", |v, c| {
            if v > 10 {
                c.prevent_publishing();
            }
            v
        });

        channel.publish("n", 11);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(channel.cached("n"), Some(1));
    }

    #[test]
    fn clear_with_event_only_touches_that_event() {
        let channel = EventChannel::<u32>::new("A");
        channel.publish("a", 1);
        channel.publish("b", 2);
        channel.subscribe("a", |_| {}, SubscribeOptions::sync());
        channel.subscribe("b", |_| {}, SubscribeOptions::sync());
        channel.intercept("a", |v, _| v);
        channel.intercept("b", |v, _| v);
        channel.response("a", |v, r| r.resolve(v), false);
        channel.response("b", |v, r| r.resolve(v), false);

        channel.clear_cache(Some("a"));
        channel.clear_subscriptions(Some("a"));
        channel.clear_interceptors(Some("a"));
        channel.clear_responders(Some("a"));
        channel.clear_cache(Some("missing"));

        assert_eq!(channel.cached("a"), None);
        assert_eq!(channel.cached("b"), Some(2));
        assert_eq!(channel.subscription_count("a"), 0);
        assert_eq!(channel.subscription_count("b"), 1);
        assert_eq!(channel.interceptor_count("a"), 0);
        assert_eq!(channel.interceptor_count("b"), 1);
        assert!(!channel.has_responder("a"));
        assert!(channel.has_responder("b"));

        channel.clear();
        assert_eq!(channel.cached("b"), None);
        assert_eq!(channel.subscription_count("b"), 0);
        assert_eq!(channel.interceptor_count("b"), 0);
        assert!(!channel.has_responder("b"));
    }

    #[tokio::test]
    async fn clear_subscriptions_cancels_pending_deliveries() {
        let channel = EventChannel::<u32>::new("A");
        let (seen, handler) = recorder();
        channel.subscribe("n", handler, SubscribeOptions::default());

        channel.publish("n", 1);
        channel.clear_subscriptions(None);
        tokio::task::yield_now().await;

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn stale_responder_disposer_keeps_replacement() {
        let channel = EventChannel::<u32>::new("A");
        let first = channel.response("req", |v, r| r.resolve(v), false);
        channel.response("req", |v, r| r.resolve(v + 1), false);

        first.dispose();
        assert!(channel.has_responder("req"));
    }

    #[tokio::test]
    async fn stream_yields_cached_then_published_values() {
        let channel = EventChannel::<u32>::new("A");
        channel.publish("n", 1);

        let mut stream = channel.stream("n");
        channel.publish("n", 2);

        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));

        drop(stream);
        assert_eq!(channel.subscription_count("n"), 0);
    }
}
