use commonware_macros::test_traced;
use federate::{
    config,
    lifecycle::{self, Outcome, Settings},
    role::Role,
    simulated::{Config, Federation, Published},
    Error,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{path::PathBuf, thread, time::Duration};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

fn write(name: &str, file: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("federate-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file);
    std::fs::write(&path, content).unwrap();
    path
}

fn producer(test: &str) -> config::Federate {
    let path = write(
        test,
        "send.json",
        r#"{
            "name": "send",
            "coreType": "zmq",
            "publications": [{"key": "temp::send", "type": "string", "global": true}],
            "subscriptions": [{"key": "echo/temp", "type": "string"}]
        }"#,
    );
    config::load(&path).unwrap()
}

fn relay(test: &str, required: &str) -> config::Federate {
    let path = write(
        test,
        "echo.yml",
        &format!(
            "
name: echo
publications:
  - key: temp
subscriptions:
  - key: {required}
    required: true
"
        ),
    );
    config::load(&path).unwrap()
}

/// Run every federate on its own thread against one federation.
fn run(federates: &[(config::Federate, Settings)]) -> (Vec<Outcome>, Vec<Published>) {
    let federation = Federation::new(Config {
        federates: federates.len(),
        record: true,
    });
    let outcomes = thread::scope(|s| {
        let handles: Vec<_> = federates
            .iter()
            .enumerate()
            .map(|(seed, (config, settings))| {
                let federation = &federation;
                s.spawn(move || {
                    lifecycle::run(
                        federation,
                        config,
                        settings,
                        StdRng::seed_from_u64(seed as u64),
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });
    assert!(federation.closed());
    (outcomes, federation.published())
}

fn values(published: &[Published], key: &str) -> Vec<(f64, String)> {
    published
        .iter()
        .filter(|p| p.key == key)
        .map(|p| (p.time, p.value.clone()))
        .collect()
}

#[test_traced]
fn test_echo_with_mixed_steps() {
    let federates = [
        (
            producer("mixed"),
            Settings {
                role: Role::Producer { message_size: 16 },
                stop_time: 2.0,
                delta_time: 0.5,
                timeout: TIMEOUT,
            },
        ),
        (
            relay("mixed", "temp::send"),
            Settings {
                role: Role::Relay,
                stop_time: 2.0,
                delta_time: 1.0,
                timeout: TIMEOUT,
            },
        ),
    ];
    let (outcomes, published) = run(&federates);
    for outcome in outcomes.iter() {
        assert_eq!(outcome.code(), lifecycle::SUCCESS, "{outcome:?}");
    }
    let Outcome::Completed(report) = &outcomes[0] else {
        panic!("producer did not complete");
    };
    assert_eq!(report.summary.boundaries, 5);
    assert_eq!(report.summary.requests, 4);

    // The relay sees the last value sent strictly before each of its boundaries
    let sent = values(&published, "temp::send");
    let times: Vec<f64> = sent.iter().map(|(time, _)| *time).collect();
    assert_eq!(times, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    assert!(sent.iter().all(|(_, value)| value.len() == 16));
    assert_eq!(
        values(&published, "echo/temp"),
        vec![
            (0.0, String::new()),
            (1.0, sent[1].1.clone()),
            (2.0, sent[3].1.clone()),
        ]
    );
}

#[test_traced]
fn test_failure_aborts_peers() {
    let federates = [
        (
            producer("abort"),
            Settings {
                role: Role::Producer { message_size: 4 },
                stop_time: 5.0,
                delta_time: 1.0,
                timeout: TIMEOUT,
            },
        ),
        (
            relay("abort", "nobody::send"),
            Settings {
                role: Role::Relay,
                stop_time: 5.0,
                delta_time: 1.0,
                timeout: TIMEOUT,
            },
        ),
    ];
    let (outcomes, published) = run(&federates);
    assert!(matches!(
        &outcomes[1],
        Outcome::Failed(Error::MissingPublisher(key)) if key == "nobody::send"
    ));
    match &outcomes[0] {
        Outcome::Failed(Error::PeerFailed {
            federate,
            code,
            message,
        }) => {
            assert_eq!(federate, "echo");
            assert_eq!(*code, lifecycle::KNOWN_FAILURE);
            assert!(message.contains("nobody::send"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(published.is_empty());
}

#[test]
fn test_timeout_without_peers() {
    // The second federate never joins
    let federation = Federation::new(Config {
        federates: 2,
        record: false,
    });
    let outcome = lifecycle::run(
        &federation,
        &producer("lonely"),
        &Settings {
            role: Role::Producer { message_size: 4 },
            stop_time: 1.0,
            delta_time: 1.0,
            timeout: Some(Duration::from_millis(50)),
        },
        StdRng::seed_from_u64(0),
    );
    assert!(matches!(outcome, Outcome::Failed(Error::Timeout(_))));
    assert_eq!(outcome.code(), lifecycle::KNOWN_FAILURE);
    assert!(!federation.closed());
}
