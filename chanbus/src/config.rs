//! 总线配置
//!
//! - `EventBusConfig`：总线级默认（是否缓存、是否异步投递）与按通道的事件配置；
//! - `ChannelConfig`：某通道内声明的事件集合；
//! - `EventConfig`：单个事件的默认值、缓存覆写与 request/response 关联事件；
//! - `ChannelOptions`：`get_channel_with` 的逐次覆写。
//!
//! 配置可由 builder 构建，也可通过 serde 从 JSON 加载。
//!
use crate::error::{BusError, BusResult};
use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 单个事件的静态配置
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventConfig<P> {
    /// 通道创建时写入缓存的初始值
    pub default_value: Option<P>,
    /// 为 `Some(false)` 时无论通道设置如何都不缓存该事件
    pub cache: Option<bool>,
    /// 响应成功时发布到的事件
    #[builder(into)]
    pub response_event: Option<String>,
    /// 响应失败时发布到的事件
    #[builder(into)]
    pub error_event: Option<String>,
}

impl<P> Default for EventConfig<P> {
    fn default() -> Self {
        Self {
            default_value: None,
            cache: None,
            response_event: None,
            error_event: None,
        }
    }
}

impl<P> EventConfig<P> {
    pub fn is_cacheable(&self) -> bool {
        self.cache != Some(false)
    }
}

/// 某个通道内声明的事件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelConfig<P> {
    events: HashMap<String, EventConfig<P>>,
}

impl<P> Default for ChannelConfig<P> {
    fn default() -> Self {
        Self {
            events: HashMap::new(),
        }
    }
}

impl<P> ChannelConfig<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明一个事件（重复声明覆盖之前的配置）
    pub fn event(mut self, name: impl Into<String>, config: EventConfig<P>) -> Self {
        self.events.insert(name.into(), config);
        self
    }

    pub fn get(&self, event: &str) -> Option<&EventConfig<P>> {
        self.events.get(event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventConfig<P>)> {
        self.events.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn default_true() -> bool {
    true
}

/// 总线配置
#[derive(Builder, Clone, Debug, Serialize, Deserialize)]
pub struct EventBusConfig<P> {
    /// 新建通道默认是否缓存最近一次的值
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub cache_events: bool,
    /// 新建通道默认是否异步（延迟）投递给订阅者
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub publish_asynchronously: bool,
    /// 通道名 -> 该通道的事件配置
    #[builder(default)]
    #[serde(default = "HashMap::new")]
    pub events: HashMap<String, ChannelConfig<P>>,
}

impl<P> Default for EventBusConfig<P> {
    fn default() -> Self {
        Self {
            cache_events: true,
            publish_asynchronously: true,
            events: HashMap::new(),
        }
    }
}

impl<P> EventBusConfig<P> {
    /// 追加（或替换）一个通道的事件配置
    pub fn channel(mut self, name: impl Into<String>, config: ChannelConfig<P>) -> Self {
        self.events.insert(name.into(), config);
        self
    }

    pub fn channel_config(&self, name: &str) -> Option<&ChannelConfig<P>> {
        self.events.get(name)
    }

    /// 校验 response/error 事件均在同一通道内声明，且不指向请求事件自身
    pub fn validate(&self) -> BusResult<()> {
        for (channel, config) in &self.events {
            for (event, ev) in config.iter() {
                let targets = [
                    ("response_event", ev.response_event.as_deref()),
                    ("error_event", ev.error_event.as_deref()),
                ];
                for (kind, target) in targets {
                    let Some(target) = target else { continue };
                    if target == event {
                        return Err(BusError::invalid_config(
                            channel,
                            event,
                            format!("{kind} must differ from the requesting event"),
                        ));
                    }
                    if !config.contains(target) {
                        return Err(BusError::invalid_config(
                            channel,
                            event,
                            format!("{kind} `{target}` is not declared in this channel"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl<P: DeserializeOwned> EventBusConfig<P> {
    /// 从 JSON 加载并校验
    pub fn from_json_str(raw: &str) -> BusResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}

/// `get_channel_with` 的逐次覆写；未设置的项沿用通道当前值（新通道则沿用总线默认）
#[derive(Builder, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    pub cache_events: Option<bool>,
    pub publish_asynchronously: Option<bool>,
}
