use serde_json::Value;
use station_devkit::report_builder::sign;
use station_devkit::test_utils::HARNESS_SECRET;
use station_devkit::{SensorReadings, SignedScope, TestHarness};
use station_kernel::Framing;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// One message per connection, the way deployed stations use chunk framing
async fn send_once(harness: &TestHarness, raw: &str) {
    let mut stream = TcpStream::connect(harness.addr()).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
}

#[tokio::test]
async fn scenario_marker_fragment_is_accepted() {
    let harness = TestHarness::start(Framing::Chunk).await.unwrap();
    let digest = sign(HARNESS_SECRET.as_bytes(), r#"{"lux1":123}"#).unwrap();
    let raw = format!(r#"{{"data":{{"lux1":123,"temp":22}},"meta":{{"hmac":"{digest}"}}}}"#);

    send_once(&harness, &raw).await;

    let lines = harness.wait_for_lines(1, 5000).await.unwrap();
    let stored: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(stored["data"]["lux1"], 123);
    assert_eq!(stored["data"]["temp"], 22);
    assert!(stored["meta"].get("hmac").is_none());
    assert!(stored["received_at"].is_string());
}

#[tokio::test]
async fn scenario_digest_over_whole_data_is_rejected() {
    let harness = TestHarness::start(Framing::Chunk).await.unwrap();
    let raw = harness
        .report(SensorReadings::synthetic(1))
        .signed_scope(SignedScope::WholeData)
        .build()
        .unwrap();

    send_once(&harness, &raw).await;

    harness.wait_for(|h| h.reports_rejected == 1, 5000).await.unwrap();
    assert!(harness.read_lines().unwrap().is_empty());
}

#[tokio::test]
async fn missing_digest_and_missing_marker_are_rejected() {
    let harness = TestHarness::start(Framing::Newline).await.unwrap();
    let mut station = harness.station();

    let no_digest = harness
        .report(SensorReadings::synthetic(2))
        .without_digest()
        .to_line()
        .unwrap();
    station.send(&no_digest).await.unwrap();
    station
        .send("{\"data\":{\"temp\":22},\"meta\":{\"hmac\":\"00ff\"}}\n")
        .await
        .unwrap();
    station.close().await.unwrap();

    let health = harness
        .wait_for(|h| h.reports_rejected == 2 && h.active_connections == 0, 5000)
        .await
        .unwrap();
    assert_eq!(health.reports_persisted, 0);
    assert!(harness.read_lines().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_stations_produce_one_line_per_report() {
    const STATIONS: u64 = 8;
    const REPORTS: u64 = 25;

    let harness = TestHarness::start(Framing::Newline).await.unwrap();

    let mut tasks = Vec::new();
    for station_id in 0..STATIONS {
        let mut station = harness.station();
        let lines: Vec<String> = (0..REPORTS)
            .map(|seq| {
                harness
                    .report(SensorReadings::synthetic(station_id * 100 + seq))
                    .extra_field("station", Value::from(station_id))
                    .extra_field("seq", Value::from(seq))
                    .to_line()
                    .unwrap()
            })
            .collect();

        tasks.push(tokio::spawn(async move {
            for line in lines {
                station.send(&line).await.unwrap();
            }
            station.close().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let total = (STATIONS * REPORTS) as usize;
    harness
        .wait_for(|h| h.reports_persisted == total as u64, 10_000)
        .await
        .unwrap();

    let reports = harness.read_reports().unwrap();
    assert_eq!(reports.len(), total);

    // per-station arrival order survives the shared file
    let mut next_seq = vec![0u64; STATIONS as usize];
    for report in &reports {
        let station = report.data["station"].as_u64().unwrap() as usize;
        assert_eq!(report.data["seq"].as_u64().unwrap(), next_seq[station]);
        next_seq[station] += 1;
    }
    assert!(next_seq.iter().all(|n| *n == REPORTS));
}

#[tokio::test]
async fn concurrent_chunk_stations_produce_one_line_per_report() {
    const STATIONS: u64 = 6;
    const REPORTS: u64 = 10;

    let harness = TestHarness::start(Framing::Chunk).await.unwrap();

    let mut tasks = Vec::new();
    for station_id in 0..STATIONS {
        let addr = harness.addr();
        let reports: Vec<String> = (0..REPORTS)
            .map(|seq| {
                harness
                    .report(SensorReadings::synthetic(station_id * 100 + seq))
                    .extra_field("station", Value::from(station_id))
                    .extra_field("seq", Value::from(seq))
                    .build()
                    .unwrap()
            })
            .collect();

        // a fresh connection per report keeps each read a single message
        tasks.push(tokio::spawn(async move {
            for raw in reports {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                stream.write_all(raw.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let total = (STATIONS * REPORTS) as usize;
    let health = harness
        .wait_for(|h| h.reports_persisted == total as u64, 10_000)
        .await
        .unwrap();
    assert_eq!(health.malformed_messages, 0);
    assert_eq!(health.reports_rejected, 0);

    let reports = harness.read_reports().unwrap();
    assert_eq!(reports.len(), total);

    let mut seen = vec![vec![0u32; REPORTS as usize]; STATIONS as usize];
    for report in &reports {
        let station = report.data["station"].as_u64().unwrap() as usize;
        let seq = report.data["seq"].as_u64().unwrap() as usize;
        seen[station][seq] += 1;
    }
    assert!(seen.iter().flatten().all(|n| *n == 1));
}

#[tokio::test]
async fn clean_close_does_not_disturb_other_stations() {
    let harness = TestHarness::start(Framing::Newline).await.unwrap();
    let mut leaving = harness.station();
    let mut staying = harness.station();

    let line = |step| harness.report(SensorReadings::synthetic(step)).to_line().unwrap();

    staying.send(&line(1)).await.unwrap();
    leaving.send(&line(2)).await.unwrap();
    leaving.close().await.unwrap();

    harness
        .wait_for(|h| h.active_connections == 1 && h.reports_persisted == 2, 5000)
        .await
        .unwrap();

    staying.send(&line(3)).await.unwrap();
    harness.wait_for_lines(3, 5000).await.unwrap();
    assert!(staying.is_connected());
    staying.close().await.unwrap();

    let health = harness
        .wait_for(|h| h.active_connections == 0, 5000)
        .await
        .unwrap();
    assert_eq!(health.connections_accepted, 2);
    assert_eq!(health.reports_persisted, 3);
}

#[tokio::test]
async fn device_received_at_is_preserved() {
    let harness = TestHarness::start(Framing::Newline).await.unwrap();
    let mut station = harness.station();

    let line = harness
        .report(SensorReadings::synthetic(4))
        .received_at("2023-06-01T12:30-03:00")
        .to_line()
        .unwrap();
    station.send(&line).await.unwrap();
    station.close().await.unwrap();

    harness.wait_for_lines(1, 5000).await.unwrap();
    let reports = harness.read_reports().unwrap();
    assert_eq!(reports[0].received_at.as_deref(), Some("2023-06-01T12:30-03:00"));
}

#[tokio::test]
async fn malformed_message_keeps_connection_open() {
    let harness = TestHarness::start(Framing::Newline).await.unwrap();
    let mut station = harness.station();

    station.send("{\"data\": not json\n").await.unwrap();
    let good = harness.report(SensorReadings::synthetic(5)).to_line().unwrap();
    station.send(&good).await.unwrap();

    harness.wait_for_lines(1, 5000).await.unwrap();
    let health = harness.stats();
    assert_eq!(health.malformed_messages, 1);
    assert_eq!(health.active_connections, 1);
    station.close().await.unwrap();
}

#[tokio::test]
async fn connection_cap_queues_extra_stations() {
    let harness = TestHarness::with_config(|cfg| {
        cfg.framing = Framing::Newline;
        cfg.max_connections = 1;
    })
    .await
    .unwrap();

    let mut first = harness.station();
    let mut second = harness.station();
    let line = |step| harness.report(SensorReadings::synthetic(step)).to_line().unwrap();

    first.send(&line(1)).await.unwrap();
    harness.wait_for_lines(1, 5000).await.unwrap();

    // accepted by the kernel's backlog, but not served while `first` holds the slot
    second.send(&line(2)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(harness.read_lines().unwrap().len(), 1);

    first.close().await.unwrap();
    harness.wait_for_lines(2, 5000).await.unwrap();
    second.close().await.unwrap();
}
