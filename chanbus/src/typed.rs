//! 类型化事件
//!
//! 以 `serde_json::Value` 为载荷的通道上，用实现了 `BusEvent` 的类型收发事件：
//! 发布时序列化为 JSON，订阅时反序列化；无法解码的载荷对该订阅者跳过并记录 `warn`。
//! 事件声明的 `CHANNEL` 必须与通道的 `base` 一致，否则返回 `BusError::ChannelMismatch`。
//!
//! 一般通过 `#[bus_event(channel = "...", name = "...")]` 宏实现该 trait。
//!
use crate::channel::{EventChannel, SubscribeOptions, Subscription};
use crate::error::{BusError, BusResult};
use crate::promise::CancellablePromise;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 类型化事件需要满足的能力边界
pub trait BusEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 所属通道名（不含 scope）
    const CHANNEL: &'static str;

    /// 事件名
    const NAME: &'static str;
}

impl EventChannel<Value> {
    fn ensure_channel<E: BusEvent>(&self) -> BusResult<()> {
        if self.key().base() != E::CHANNEL {
            return Err(BusError::ChannelMismatch {
                expected: E::CHANNEL.to_owned(),
                found: self.key().base().to_owned(),
            });
        }
        Ok(())
    }

    pub fn publish_event<E: BusEvent>(&self, event: &E) -> BusResult<()> {
        self.ensure_channel::<E>()?;
        self.publish(E::NAME, serde_json::to_value(event)?);
        Ok(())
    }

    pub fn run_event<E: BusEvent>(&self, event: &E) -> BusResult<()> {
        self.ensure_channel::<E>()?;
        self.run(E::NAME, serde_json::to_value(event)?);
        Ok(())
    }

    pub fn subscribe_event<E, F>(&self, handler: F, options: SubscribeOptions) -> BusResult<Subscription>
    where
        E: BusEvent,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.ensure_channel::<E>()?;
        let channel = self.key().to_string();
        Ok(self.subscribe(
            E::NAME,
            move |value| {
                if let Some(event) = decode::<E>(&channel, value) {
                    handler(event);
                }
            },
            options,
        ))
    }

    /// 等待下一个事件；若该次载荷无法解码，结果为 `None`
    pub fn once_event<E: BusEvent>(&self) -> BusResult<CancellablePromise<E>> {
        self.ensure_channel::<E>()?;
        let channel = self.key().to_string();
        Ok(CancellablePromise::new(|resolver| {
            let settle = resolver.clone();
            let subscription = self.subscribe(
                E::NAME,
                move |value| {
                    if let Some(event) = decode::<E>(&channel, value) {
                        settle.resolve(event);
                    }
                },
                SubscribeOptions::once(),
            );
            resolver.on_cancel(move || subscription.dispose());
        }))
    }
}

fn decode<E: BusEvent>(channel: &str, value: Value) -> Option<E> {
    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(channel, event = E::NAME, %error, "undecodable payload skipped");
            None
        }
    }
}
