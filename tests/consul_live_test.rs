//! 真实 Consul 集成测试
//!
//! 需要运行中的 Consul agent，默认忽略，使用
//! `cargo test --test consul_live_test -- --ignored` 运行。
//!
//! ```bash
//! docker run -d --name consul-test -p 8500:8500 hashicorp/consul:1.18 agent -dev -client=0.0.0.0
//! ```

use std::time::Duration;

use flare_discovery::{
    ConsulRegistry, Discovery, Registrar, RegistryConfig, ServiceInstance,
};

/// 可以通过环境变量 CONSUL_ADDRESS 覆盖，默认为 http://127.0.0.1:8500
fn consul_address() -> String {
    std::env::var("CONSUL_ADDRESS").unwrap_or_else(|_| "http://127.0.0.1:8500".to_string())
}

#[tokio::test]
#[ignore]
async fn test_live_register_discover_deregister() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = RegistryConfig {
        address: consul_address(),
        healthcheck_interval: 5,
        ..Default::default()
    };
    // TCP 检查指向不存在的端口，这里只验证 TTL 心跳下的可发现性
    let registry = ConsulRegistry::from_config(&config)
        .with_health_check(false)
        .with_passing_only(false);
    let instance = ServiceInstance::new("flare-live-1", "flare-live-test")
        .with_version("v1.0.0")
        .with_endpoint("grpc://127.0.0.1:59000");

    registry.register(&instance).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let found = registry.get_service("flare-live-test").await.unwrap();
    let found = found.iter().find(|i| i.id == instance.id).unwrap();
    assert_eq!(found.version, "v1.0.0");
    assert!(found.endpoints.contains(&"grpc://127.0.0.1:59000".to_string()));

    registry.deregister(&instance).await.unwrap();
    registry.deregister(&instance).await.unwrap();
    let after = registry.get_service("flare-live-test").await.unwrap();
    assert!(after.iter().all(|i| i.id != instance.id));
}
