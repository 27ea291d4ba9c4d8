/// 事件通道示例
/// 展示缓存回放、拦截器、request/response 与私有通道；`RUST_LOG=chanbus=trace` 可查看日志
use anyhow::Result as AnyResult;
use chanbus::{
    ChannelConfig, DynamicBus, EventBusConfig, EventConfig, Response, SubscribeOptions,
};
use chanbus_macros::bus_event;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

// ============================================================================
// 类型化事件
// ============================================================================

#[bus_event(channel = "counter", name = "changed")]
struct CounterChanged {
    value: i64,
}

// ============================================================================
// 配置
// ============================================================================

fn config() -> AnyResult<EventBusConfig<Value>> {
    let raw = json!({
        "events": {
            "counter": {
                "changed": { "default_value": { "value": 0 } },
                "parse": { "response_event": "parsed", "error_event": "failed" },
                "parsed": {},
                "failed": { "cache": false }
            }
        }
    });
    Ok(EventBusConfig::from_json_str(&raw.to_string())?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bus = DynamicBus::try_new(config()?)?;
    let counter = bus.get_channel("counter");

    // 订阅时立即回放默认值
    counter.subscribe_event(
        |e: CounterChanged| println!("[counter] value = {}", e.value),
        SubscribeOptions::default(),
    )?;

    // 把计数限制在 [0, 10]
    counter.intercept("changed", |v, _| {
        let clamped = v["value"].as_i64().unwrap_or_default().clamp(0, 10);
        json!({ "value": clamped })
    });

    counter.publish_event(&CounterChanged { value: 3 })?;
    counter.publish_event(&CounterChanged { value: 42 })?;
    tokio::task::yield_now().await;

    // request/response：解析结果同时发布到 parsed / failed
    counter.response(
        "parse",
        |payload, r| match payload.as_str().map(str::parse::<i64>) {
            Some(Ok(n)) => r.resolve(json!(n)),
            _ => r.reject(json!(format!("not a number: {payload}"))),
        },
        false,
    );
    counter.subscribe(
        "failed",
        |err| println!("[failed] {err}"),
        SubscribeOptions::sync(),
    );

    match counter.request("parse", json!("7")).await? {
        Some(Response::Value(v)) => println!("[parse] ok: {v}"),
        other => println!("[parse] {other:?}"),
    }
    if let Err(err) = counter.request("parse", json!("seven")).await {
        println!("[parse] error: {err}");
    }

    // 私有通道互不可见
    let left = bus.get_channel(("counter", "left"));
    let right = bus.get_channel(("counter", "right"));
    left.run_event(&CounterChanged { value: 1 })?;
    println!(
        "[private] left cached = {:?}, right cached = {:?}",
        left.cached("changed"),
        right.cached("changed")
    );

    bus.clear();
    println!("[bus] channels after clear = {}", bus.channel_count());
    Ok(())
}
