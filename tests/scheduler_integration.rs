//! End-to-end scheduling over the scripted transport

#![allow(clippy::unwrap_used)]

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use mprobe::measurement::udpping::PingResponse;
use mprobe::result::ResultEvent;
use mprobe::scheduler::parse_tasks;
use mprobe::socket::{ScriptedReply, ScriptedTransport, SocketSpec};
use mprobe::{Context, ManualClock, MeasurementResult, ResultStore, Scheduler, TaskId, TaskStatus};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

const TASKS: &str = r#"[
    {
        "task_id": 10,
        "method": "traceroute",
        "options": {"host": "198.51.100.7", "count": 2, "interval": 0, "receive_timeout": 50},
        "timing": {"calendar": {
            "months": [1,2,3,4,5,6,7,8,9,10,11,12],
            "days_of_week": [1,2,3,4,5,6,7],
            "days_of_month": [1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,
                              21,22,23,24,25,26,27,28,29,30,31],
            "hours": [9],
            "minutes": [0],
            "seconds": [0]
        }}
    },
    {
        "task_id": 20,
        "method": "udpping",
        "options": {"url": "198.51.100.7", "count": 3, "interval": 0, "receive_timeout": 50},
        "timing": {"immediate": {}}
    }
]"#;

fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// Three routers, then the destination rejects the port
fn network(spec: &SocketSpec) -> ScriptedReply {
    match spec.ttl {
        1..=3 => ScriptedReply::TtlExceeded {
            from: IpAddr::V4(Ipv4Addr::new(10, 0, 0, spec.ttl)),
            rtt_us: 1000 * u64::from(spec.ttl),
        },
        _ => ScriptedReply::Unreachable {
            from: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)),
            rtt_us: 9000,
        },
    }
}

#[tokio::test]
async fn test_task_file_through_scheduler() {
    let clock = Arc::new(ManualClock::new(at(15, 8, 59)));
    let transport = ScriptedTransport::new(network);
    let results = Arc::new(ResultStore::new(5));
    let scheduler = Scheduler::new(
        Context::new(clock.clone(), Arc::new(transport.clone())),
        results.clone(),
        4,
    );
    let mut events = results.subscribe();

    for task in parse_tasks(TASKS).unwrap() {
        scheduler.enqueue(task).unwrap();
    }
    assert_eq!(scheduler.next_due(), Some(at(15, 8, 59)));

    // Only the immediate ping is due
    assert_eq!(scheduler.run_pending().await, 1);
    let ping = events.try_recv().unwrap();
    assert_eq!(ping.task_id(), TaskId(20));
    let MeasurementResult::Ping(report) = &ping.report().results[0] else {
        panic!("expected ping result");
    };
    assert_eq!(report.probes.len(), 3);
    assert!(report
        .probes
        .iter()
        .all(|p| p.response == PingResponse::DestinationUnreachable));
    assert_eq!(report.statistics.avg, 9000.0);

    clock.set(at(15, 9, 0));
    assert_eq!(scheduler.run_pending().await, 1);
    let trace = events.try_recv().unwrap();
    assert!(matches!(trace, ResultEvent::Added { position: 1, .. }));
    let MeasurementResult::Traceroute(report) = &trace.report().results[0] else {
        panic!("expected traceroute result");
    };
    assert_eq!(report.hop_count, 4);
    assert_eq!(
        report.results[2].address,
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)))
    );
    assert_eq!(report.results[3].rtt_avg, 9000.0);

    // Next day's run appends to the same report
    assert_eq!(
        scheduler.task_state(TaskId(10)).unwrap().next_run,
        Some(at(16, 9, 0))
    );
    clock.advance(TimeDelta::days(1));
    assert_eq!(scheduler.run_pending().await, 1);
    let again = events.try_recv().unwrap();
    assert!(matches!(again, ResultEvent::Modified { position: 1, .. }));
    assert_eq!(again.report().results.len(), 2);

    // Every probe socket was released
    assert_eq!(transport.opened(), transport.closed());

    let rows = results.rows(&scheduler);
    assert_eq!(rows[0].method, "UDPPING");
    assert_eq!(rows[1].method, "TRACEROUTE");
    assert_eq!(rows[1].target, "198.51.100.7");

    let states = scheduler.tasks();
    assert_eq!(states.len(), 2);
    assert!(states.iter().all(|s| s.status == TaskStatus::Finished));
}
