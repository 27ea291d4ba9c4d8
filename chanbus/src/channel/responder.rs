//! 响应方（request/response）
//!
//! 每个事件至多一个响应方，重复注册即替换。响应方可以是闭包
//! （拿到 `Resolver` 自行决定何时 `resolve`/`reject`），也可以实现 `EventResponder`。
//!
use crate::error::RequestError;
use crate::promise::{CancellablePromise, Resolver};
use async_trait::async_trait;
use std::sync::Arc;

/// 闭包形式的响应方：`resolve` 走 response 事件，`reject` 走 error 事件
pub type ResponderFn<P> = Arc<dyn Fn(P, Resolver<P, P>) + Send + Sync>;

/// `request()` 的返回值
pub type RequestPromise<P> = CancellablePromise<Response<P>, RequestError<P>>;

/// 异步响应方
#[async_trait]
pub trait EventResponder<P>: Send + Sync
where
    P: Send + 'static,
{
    /// `Ok` 作为响应，`Err` 作为错误载荷
    async fn respond(&self, payload: P) -> Result<P, P>;
}

/// 请求成功结算的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response<P> {
    /// 响应值（若配置了 response/error 事件，则为其拦截器处理后的值）
    Value(P),
    /// response/error 事件上的拦截器阻止了发布
    Suppressed,
}

impl<P> Response<P> {
    pub fn into_value(self) -> Option<P> {
        match self {
            Response::Value(value) => Some(value),
            Response::Suppressed => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, Response::Suppressed)
    }
}

pub(crate) struct ResponderEntry<P> {
    pub(crate) id: u64,
    pub(crate) respond: ResponderFn<P>,
    pub(crate) force_sync_response: bool,
    // 响应在 tokio 任务中执行
    pub(crate) needs_runtime: bool,
}
