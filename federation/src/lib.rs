//! Run a manifest of federates together against one in-process federation.
//!
//! Every federate listed in a [Manifest] is loaded and validated before any of them joins, so a
//! malformed member fails the whole run at startup instead of leaving its peers blocked in a
//! collective call. Each federate then runs on its own thread and reports its own exit code.
//!
//! ```yaml
//! timeout: 30
//! seed: 7
//! federates:
//!   - config: send.json
//!     role: producer
//!     stop_time: 10
//!     delta_time: 1
//!     message_size: 64
//!     log_time: true
//!   - config: echo.yaml
//!     role: relay
//!     stop_time: 10
//!     delta_time: 1
//! ```

use federate::{
    catalog::Catalog,
    clock::Clock,
    config::{self, Kind, Manifest, Member},
    lifecycle::{self, Outcome, Settings},
    role::Role,
    simulated, timing, Error,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    thread,
    time::Duration,
};
use tracing::{error, info};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A validated federate, ready to join.
#[derive(Clone, Debug)]
pub struct Participant {
    pub config: config::Federate,
    pub settings: Settings,
    pub log_time: bool,
}

/// Exit code of one federate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub name: String,
    pub code: i32,
}

/// Returns the settings of `member`.
pub fn settings(member: &Member, timeout: Option<Duration>) -> Settings {
    let role = match member.role {
        Kind::Relay => Role::Relay,
        Kind::Producer => Role::Producer {
            message_size: member.message_size,
        },
    };
    Settings {
        role,
        stop_time: member.stop_time,
        delta_time: member.delta_time,
        timeout,
    }
}

/// Load and validate every federate of `manifest`.
///
/// Fails if two federates share a name or a declared publication, since the federation would
/// reject the second one on connect.
pub fn prepare(manifest: &Manifest) -> Result<Vec<Participant>, Error> {
    let timeout = manifest.timeout.map(Duration::from_secs_f64);
    let mut names = BTreeSet::new();
    let mut owners = BTreeMap::new();
    let mut participants = Vec::with_capacity(manifest.federates.len());
    for member in manifest.federates.iter() {
        let config = config::load(&member.config)?;
        if !names.insert(config.name.clone()) {
            return Err(Error::DuplicateFederate(config.name));
        }
        for publication in config.publications.iter() {
            let key = config.qualify(&publication.key);
            if let Some(owner) = owners.insert(key.clone(), config.name.clone()) {
                if owner != config.name {
                    return Err(Error::DuplicatePublication(key));
                }
            }
        }
        let settings = settings(member, timeout);
        Catalog::resolve(&config, &settings.role)?;
        Clock::new(settings.delta_time, settings.stop_time)?;
        participants.push(Participant {
            config,
            settings,
            log_time: member.log_time,
        });
    }
    Ok(participants)
}

/// Run `participants` to completion, writing requested timing files into `output`.
///
/// Each federate draws payloads from its own generator, derived from `seed` when provided.
pub fn run(participants: &[Participant], seed: Option<u64>, output: &Path) -> Vec<Status> {
    let federation = simulated::Federation::new(simulated::Config {
        federates: participants.len(),
        record: false,
    });
    let mut seeds = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    let rngs: Vec<StdRng> = participants
        .iter()
        .map(|_| StdRng::seed_from_u64(seeds.gen()))
        .collect();

    // Run every federate on its own thread
    let outcomes: Vec<Outcome> = thread::scope(|s| {
        let handles: Vec<_> = participants
            .iter()
            .zip(rngs)
            .map(|(participant, rng)| {
                let federation = &federation;
                s.spawn(move || {
                    lifecycle::run(federation, &participant.config, &participant.settings, rng)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Outcome::Panicked(lifecycle::UNKNOWN_MESSAGE.to_string()))
            })
            .collect()
    });

    // Collect results
    participants
        .iter()
        .zip(outcomes)
        .map(|(participant, outcome)| {
            let name = participant.config.name.clone();
            match &outcome {
                Outcome::Completed(report) => {
                    info!(
                        name = %name,
                        boundaries = report.summary.boundaries,
                        requests = report.summary.requests,
                        "federate completed"
                    );
                    if participant.log_time {
                        let path = output.join(timing::named(&name));
                        if let Err(e) = report.timings.write(&path) {
                            error!(error = ?e, ?path, "failed to write timings");
                        }
                    }
                }
                outcome => {
                    error!(name = %name, code = outcome.code(), ?outcome, "federate failed");
                }
            }
            Status {
                name,
                code: outcome.code(),
            }
        })
        .collect()
}

/// Returns the first failing code, or [lifecycle::SUCCESS] if every federate succeeded.
pub fn exit(statuses: &[Status]) -> i32 {
    statuses
        .iter()
        .map(|status| status.code)
        .find(|code| *code != lifecycle::SUCCESS)
        .unwrap_or(lifecycle::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use std::path::PathBuf;

    fn workspace(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("federation-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("send.json"),
            r#"{
                "name": "send",
                "publications": [{"key": "temp::send", "global": true}],
                "subscriptions": [{"key": "echo/temp"}]
            }"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("echo.yaml"),
            "
name: echo
publications:
  - key: temp
subscriptions:
  - key: temp::send
    required: true
",
        )
        .unwrap();
        dir
    }

    fn manifest(dir: &Path, content: &str) -> Manifest {
        let path = dir.join("manifest.yaml");
        std::fs::write(&path, content).unwrap();
        Manifest::load(&path).unwrap()
    }

    #[test_traced]
    fn test_run_manifest() {
        let dir = workspace("run");
        let manifest = manifest(
            &dir,
            "
timeout: 10
seed: 3
federates:
  - config: send.json
    role: producer
    stop_time: 3
    delta_time: 1
    message_size: 5
    log_time: true
  - config: echo.yaml
    role: relay
    stop_time: 3
    delta_time: 1
",
        );
        let participants = prepare(&manifest).unwrap();
        assert_eq!(
            participants[0].settings.role,
            Role::Producer { message_size: 5 }
        );
        assert_eq!(participants[1].settings.role, Role::Relay);
        assert_eq!(
            participants[0].settings.timeout,
            Some(Duration::from_secs(10))
        );

        let statuses = run(&participants, manifest.seed, &dir);
        assert_eq!(
            statuses,
            vec![
                Status {
                    name: "send".into(),
                    code: lifecycle::SUCCESS
                },
                Status {
                    name: "echo".into(),
                    code: lifecycle::SUCCESS
                },
            ]
        );
        assert_eq!(exit(&statuses), lifecycle::SUCCESS);

        // Only the producer asked for timings
        let timings = std::fs::read_to_string(dir.join(timing::named("send"))).unwrap();
        assert!(timings.starts_with(timing::HEADER));
        assert!(!dir.join(timing::named("echo")).exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_prepare_rejects_invalid_member() {
        let dir = workspace("invalid");
        let invalid = manifest(
            &dir,
            "
federates:
  - config: send.json
    role: producer
    stop_time: 3
    delta_time: 0
",
        );
        assert!(matches!(
            prepare(&invalid),
            Err(Error::InvalidStepDelta(_))
        ));

        let duplicate = manifest(
            &dir,
            "
federates:
  - config: echo.yaml
    role: relay
    stop_time: 3
    delta_time: 1
  - config: echo.yaml
    role: relay
    stop_time: 3
    delta_time: 1
",
        );
        assert!(matches!(
            prepare(&duplicate),
            Err(Error::DuplicateFederate(name)) if name == "echo"
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test_traced]
    fn test_shared_publication() {
        let dir = workspace("shared");
        for name in ["a", "b"] {
            std::fs::write(
                dir.join(format!("{name}.yaml")),
                format!(
                    "
name: {name}
publications:
  - key: x
    global: true
"
                ),
            )
            .unwrap();
        }
        let shared = manifest(
            &dir,
            "
federates:
  - config: a.yaml
    role: producer
    stop_time: 1
    delta_time: 1
  - config: b.yaml
    role: producer
    stop_time: 1
    delta_time: 1
",
        );
        assert!(matches!(
            prepare(&shared),
            Err(Error::DuplicatePublication(key)) if key == "x"
        ));

        // Without a timeout, the member that joins still fails instead of waiting forever
        let participants: Vec<Participant> = ["a.yaml", "b.yaml"]
            .iter()
            .map(|file| Participant {
                config: config::load(&dir.join(file)).unwrap(),
                settings: Settings {
                    role: Role::Producer { message_size: 1 },
                    stop_time: 1.0,
                    delta_time: 1.0,
                    timeout: None,
                },
                log_time: false,
            })
            .collect();
        let statuses = run(&participants, Some(0), &dir);
        let mut codes: Vec<i32> = statuses.iter().map(|status| status.code).collect();
        codes.sort();
        assert_eq!(
            codes,
            vec![lifecycle::KNOWN_FAILURE, lifecycle::STARTUP_FAILURE]
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_exit() {
        let status = |code| Status {
            name: "fed".into(),
            code,
        };
        assert_eq!(exit(&[]), lifecycle::SUCCESS);
        assert_eq!(exit(&[status(0), status(0)]), lifecycle::SUCCESS);
        assert_eq!(
            exit(&[status(0), status(lifecycle::UNKNOWN_FAILURE), status(1)]),
            lifecycle::UNKNOWN_FAILURE
        );
    }
}
