//! 事件总线（EventBus）
//!
//! 按 `ChannelKey` 惰性创建并缓存 `EventChannel`：
//! - 首次获取时以该通道名（`base`）的静态事件配置构建，并写入配置中的默认值；
//! - 每次获取都会应用 `ChannelOptions` 覆写（未设置的项沿用通道当前值，新通道沿用总线默认）；
//! - `close_channel` 清空通道的全部状态并从注册表移除。
//!
use crate::channel::{EventChannel, Payload};
use crate::config::{ChannelConfig, ChannelOptions, EventBusConfig};
use crate::error::BusResult;
use crate::key::ChannelKey;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 以 JSON 值为载荷的总线
pub type DynamicBus = EventBus<serde_json::Value>;

struct BusInner<P> {
    cache_events: bool,
    publish_asynchronously: bool,
    events: HashMap<String, Arc<ChannelConfig<P>>>,
    channels: DashMap<ChannelKey, EventChannel<P>>,
}

/// 事件总线句柄（内部为 `Arc`，克隆开销低）
pub struct EventBus<P> {
    inner: Arc<BusInner<P>>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("cache_events", &self.inner.cache_events)
            .field("publish_asynchronously", &self.inner.publish_asynchronously)
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}

impl<P: Payload> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> EventBus<P> {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// 不做校验地使用配置
    pub fn with_config(config: EventBusConfig<P>) -> Self {
        let events = config
            .events
            .into_iter()
            .map(|(name, channel)| (name, Arc::new(channel)))
            .collect();

        Self {
            inner: Arc::new(BusInner {
                cache_events: config.cache_events,
                publish_asynchronously: config.publish_asynchronously,
                events,
                channels: DashMap::new(),
            }),
        }
    }

    /// 校验配置后创建
    pub fn try_new(config: EventBusConfig<P>) -> BusResult<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    pub fn get_channel(&self, key: impl Into<ChannelKey>) -> EventChannel<P> {
        self.get_channel_with(key, ChannelOptions::default())
    }

    /// 获取（必要时创建）通道，并把覆写后的标志位持久化到通道上
    pub fn get_channel_with(&self, key: impl Into<ChannelKey>, options: ChannelOptions) -> EventChannel<P> {
        let key = key.into();

        let (channel, created) = match self.inner.channels.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let config = self.inner.events.get(key.base()).cloned();
                let channel = EventChannel::with_config(key.clone(), config);
                entry.insert(channel.clone());
                (channel, true)
            }
        };

        let (cache_events, publish_asynchronously) = if created {
            (self.inner.cache_events, self.inner.publish_asynchronously)
        } else {
            (channel.cache_events(), channel.publish_asynchronously())
        };
        channel.set_cache_events(options.cache_events.unwrap_or(cache_events));
        channel.set_publish_asynchronously(
            options
                .publish_asynchronously
                .unwrap_or(publish_asynchronously),
        );

        if created {
            tracing::debug!(channel = %key, scoped = key.is_scoped(), "channel created");
        }
        channel
    }

    /// 清空并移除通道；不存在时无操作
    pub fn close_channel(&self, key: impl Into<ChannelKey>) {
        let key = key.into();
        if let Some((_, channel)) = self.inner.channels.remove(&key) {
            channel.clear();
            tracing::debug!(channel = %key, "channel closed");
        }
    }

    /// 关闭所有通道
    pub fn clear(&self) {
        let keys: Vec<ChannelKey> = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            self.close_channel(key);
        }
    }

    pub fn contains_channel(&self, key: impl Into<ChannelKey>) -> bool {
        self.inner.channels.contains_key(&key.into())
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }
}
