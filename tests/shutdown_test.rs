//! 优雅关闭管理器测试

use std::time::Duration;

use router::shutdown::ShutdownManager;

#[tokio::test]
async fn test_shutdown_notifies_all_subscribers() {
    let manager = ShutdownManager::new();
    let mut first = manager.subscribe().await;
    let mut second = manager.subscribe().await;

    assert!(!manager.is_shutdown().await);
    manager.shutdown().await;
    assert!(manager.is_shutdown().await);

    tokio::time::timeout(Duration::from_secs(1), first.recv())
        .await
        .expect("第一个订阅者应收到信号")
        .expect("信号应可接收");
    tokio::time::timeout(Duration::from_secs(1), second.recv())
        .await
        .expect("第二个订阅者应收到信号")
        .expect("信号应可接收");
}

#[tokio::test]
async fn test_repeated_shutdown_is_noop() {
    let manager = ShutdownManager::new();
    let mut rx = manager.subscribe().await;

    manager.shutdown().await;
    manager.shutdown().await;

    rx.recv().await.expect("信号应可接收");
    // 没有第二个信号
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_subscribe_after_shutdown_fires_immediately() {
    let manager = ShutdownManager::new();
    manager.shutdown().await;

    let mut late = manager.subscribe().await;
    tokio::time::timeout(Duration::from_secs(1), late.recv())
        .await
        .expect("迟到的订阅者应立即收到信号")
        .expect("信号应可接收");
}

#[tokio::test]
async fn test_clone_shares_shutdown_state() {
    let manager = ShutdownManager::new();
    let cloned = manager.clone();
    let mut rx = cloned.subscribe().await;

    manager.shutdown().await;

    rx.recv().await.expect("克隆实例的订阅者应收到信号");
    assert!(cloned.is_shutdown().await);
}
