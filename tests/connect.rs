mod common;

use std::sync::Arc;
use std::time::Duration;

use shoal::producer::ProducerConfig;
use shoal::{ClientConfig, Record, Shoal, ShoalError};

use common::{connect_client, MockCluster};

#[tokio::test]
async fn test_bootstrap_failover() {
    let cluster = MockCluster::new(3);
    cluster.add_topic("events", 1, 1).await;
    // first endpoint in the list is dead, connect moves on to the next
    cluster.set_down(0).await;

    let config = ClientConfig::builder()
        .bootstrap(cluster.endpoints().await)
        .build()
        .expect("config should build");
    let client = Shoal::connect(cluster.connector(), config)
        .await
        .expect("connect should fail over to a live endpoint");

    let summary = client.cluster_summary().await.expect("summary");
    assert_eq!(summary.brokers.len(), 3);
}

#[tokio::test]
async fn test_all_endpoints_down() {
    let cluster = MockCluster::new(2);
    cluster.set_down(0).await;
    cluster.set_down(1).await;

    let config = ClientConfig::builder()
        .bootstrap(cluster.endpoints().await)
        .build()
        .expect("config should build");
    let result = Shoal::connect(cluster.connector(), config).await;

    assert!(matches!(
        result,
        Err(ShoalError::ClusterUnreachable { attempted: 2 })
    ));
}

#[tokio::test]
async fn test_broker_recovery_after_restart() {
    let cluster = MockCluster::new(2);
    cluster.add_topic("events", 1, 1).await;
    let client = connect_client(&cluster, |b| b).await;

    let producer_config = ProducerConfig::builder()
        .linger(Duration::from_millis(5))
        .build()
        .expect("producer config should build");
    let producer = client.producer_with_config(producer_config);

    producer
        .send(Record::keyless("events", "before restart"))
        .await
        .expect("send should succeed");
    producer.flush().await.expect("flush should succeed");

    // bounce the partition leader; the next send retries until it is back
    cluster.set_down(0).await;
    let bring_back = {
        let cluster = Arc::new(cluster);
        let handle = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.set_up(0).await;
        });
        cluster
    };

    producer
        .send(Record::keyless("events", "after restart"))
        .await
        .expect("send should succeed");
    producer.flush().await.expect("flush should succeed");

    let log = bring_back.partition_log("events", 0).await;
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn test_shared_topology_between_handles() {
    let cluster = MockCluster::new(1);
    let client = connect_client(&cluster, |b| b).await;

    client
        .admin()
        .create_topic("events", 1, 1)
        .await
        .expect("create should succeed");

    // the producer sees the topic without its own refresh round
    let producer_config = ProducerConfig::builder()
        .linger(Duration::from_millis(5))
        .build()
        .expect("producer config should build");
    let producer = client.producer_with_config(producer_config);
    producer
        .send(Record::keyless("events", "shared view"))
        .await
        .expect("send should succeed");
    producer.flush().await.expect("flush should succeed");

    assert_eq!(cluster.partition_log("events", 0).await.len(), 1);
}
