//! chanbus 的过程宏
//!
//! - `#[bus_event(channel = "...", name = "...")]`：为结构体/枚举补齐
//!   `Clone`、`Debug`、`serde::Serialize`、`serde::Deserialize` 派生，
//!   并实现 `::chanbus::typed::BusEvent`。`name` 缺省为类型名。
//!
//! 使用方需要同时依赖 `chanbus` 与 `serde`。
//!
use proc_macro::TokenStream;
use syn::{Item, parse_macro_input};

mod bus_event;
mod derive_utils;

/// 类型化事件宏
#[proc_macro_attribute]
pub fn bus_event(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as bus_event::BusEventAttr);
    let input = parse_macro_input!(item as Item);

    bus_event::expand(cfg, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
