//! 进程内发布/订阅引擎（chanbus）
//!
//! 提供按通道组织的事件系统，用于在同一进程内解耦各个组件：
//! - 可取消的一次性异步结果（`promise`）：所有延迟投递都以它表达，可随时取消；
//! - 事件通道（`channel`）：缓存最近值、拦截器管线、同步/延迟订阅与 request/response；
//! - 事件总线（`bus`）：按 `ChannelKey` 惰性创建、复用并关闭通道，支持私有（带 scope）通道；
//! - 静态配置（`config`）：默认值、缓存覆写与 response/error 事件关联；
//! - 类型化事件（`typed`）：配合 `chanbus-macros` 的 `#[bus_event]` 以强类型收发 JSON 载荷。
//!
//! 典型用法：
//! 1. 以 `EventBusConfig` 声明各通道的事件，构建 `EventBus`；
//! 2. 通过 `get_channel` 获取通道，注册拦截器、订阅者与响应方；
//! 3. 使用 `publish`/`run` 发布事件，或以 `request` 发起请求并等待响应。
//!
//! 延迟投递由每个通道的排空任务在当前 tokio 运行时上串行执行，按注册与发布顺序到达；
//! 多线程运行时下，延迟回调可能在 `publish` 入队后立即开始，而不必等到调用方让出。
//! 本库只输出 `tracing` 事件，不安装订阅器。
//!
pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod key;
pub mod promise;
pub mod typed;

pub(crate) mod sync;

pub use bus::{DynamicBus, EventBus};
pub use channel::{
    Disposer, DynamicChannel, EventChannel, EventResponder, InterceptControl, Payload,
    RequestPromise, Response, SubscribeOptions, Subscription,
};
pub use config::{ChannelConfig, ChannelOptions, EventBusConfig, EventConfig};
pub use error::{BusError, BusResult, RequestError};
pub use key::ChannelKey;
pub use promise::{CancelHandle, CancellablePromise, Resolver};
pub use typed::BusEvent;

// 允许在本 crate 内部通过 ::chanbus 进行自引用，
// 以便过程宏展开的路径在本 crate 内同样可以解析。
extern crate self as chanbus;
