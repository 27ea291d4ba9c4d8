//! 拦截器管线
//!
//! 按优先级降序执行（同优先级保持注册顺序），每个拦截器返回的值作为下一个的输入；
//! `stop_interceptors` 跳过剩余拦截器但仍投递，`prevent_publishing` 则既不缓存也不投递。
//!
use std::cmp::Reverse;
use std::sync::Arc;

pub type InterceptorFn<P> = Arc<dyn Fn(P, &mut InterceptControl) -> P + Send + Sync>;

/// 传给拦截器的控制开关
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterceptControl {
    stopped: bool,
    prevented: bool,
}

impl InterceptControl {
    pub fn stop_interceptors(&mut self) {
        self.stopped = true;
    }

    pub fn prevent_publishing(&mut self) {
        self.prevented = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_prevented(&self) -> bool {
        self.prevented
    }

    fn is_halted(&self) -> bool {
        self.stopped || self.prevented
    }
}

pub(crate) struct InterceptorEntry<P> {
    pub(crate) priority: i32,
    pub(crate) intercept: InterceptorFn<P>,
}

/// 拦截结果
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Intercepted<P> {
    pub(crate) value: P,
    pub(crate) prevented: bool,
}

/// `chain` 需按注册顺序给出
pub(crate) fn run_chain<P>(mut chain: Vec<Arc<InterceptorEntry<P>>>, payload: P) -> Intercepted<P> {
    // 稳定排序：同优先级保持注册顺序
    chain.sort_by_key(|entry| Reverse(entry.priority));

    let mut control = InterceptControl::default();
    let mut value = payload;
    for entry in chain {
        if control.is_halted() {
            break;
        }
        value = (entry.intercept)(value, &mut control);
    }

    Intercepted {
        value,
        prevented: control.is_prevented(),
    }
}
