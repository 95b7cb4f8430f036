use anyhow::Result;
use mq_benchmark::{
    cli::{Args, Role, TransportKind},
    measurement::{MeasurementHandler, ReceiveEndpoint},
    transport::{TransportConfig, UdpSource},
    BenchmarkConfig, BenchmarkRunner, CompletionCause,
};
use std::time::Duration;
use tempfile::TempDir;

/// A producer process and a consumer endpoint talking UDP over localhost.
#[tokio::test]
async fn udp_producer_to_consumer_on_localhost() -> Result<()> {
    let dir = TempDir::new()?;
    let source = UdpSource::bind(&TransportConfig {
        port: 0,
        buffer_size: 1024 * 1024,
        ..Default::default()
    })
    .await?;
    let port = source.local_addr()?.port();

    let consumer_args = Args {
        role: Role::Consumer,
        transport: TransportKind::Udp,
        timeout: Some(Duration::from_secs(5)),
        latency_output: dir.path().join("mq_latency.csv"),
        ..Default::default()
    };
    let consumer_config = BenchmarkConfig::from_args(&consumer_args)?;
    let handler = MeasurementHandler::new(consumer_config.measurement.clone())?;
    let consumer = tokio::spawn(ReceiveEndpoint::new(Box::new(source), handler).run());

    let producer_args = Args {
        role: Role::Producer,
        transport: TransportKind::Udp,
        port,
        msg_count: 50,
        rate: 2_000.0,
        message_size: 256,
        ..Default::default()
    };
    let mut producer_config = BenchmarkConfig::from_args(&producer_args)?;
    producer_config.drain.count = 100;
    let outcome = BenchmarkRunner::new(producer_config).run().await?;

    let producer = outcome.producer.expect("producer side ran");
    assert_eq!(producer.messages_sent, 50);
    assert!(outcome.consumer.is_none());

    let report = tokio::time::timeout(Duration::from_secs(10), consumer).await???;
    // Datagrams may be dropped, but localhost at this rate rarely loses the
    // whole FIN burst.
    assert_eq!(report.cause, CompletionCause::Fin);
    assert!(report.message_count >= 1 && report.message_count <= 51);
    Ok(())
}
