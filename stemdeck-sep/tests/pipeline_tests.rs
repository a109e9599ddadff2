//! Execution pipeline tests
//!
//! Runs real plans through the pipeline with a scripted engine and checks
//! the event stream, the job tracker and what ends up on disk.

mod helpers;

use helpers::{collect_events, strs, FakeFetcher, ScriptedEngine, TestEnv};
use stemdeck_common::events::{JobEvent, ModelStatus, ModuleStatus};
use stemdeck_sep::models::JobState;
use stemdeck_sep::services::waveform::waveform_path;
use stemdeck_sep::services::{PipelineError, Source};

fn position(events: &[JobEvent], wanted: &JobEvent) -> usize {
    events
        .iter()
        .position(|e| e == wanted)
        .unwrap_or_else(|| panic!("{:?} not found in {:?}", wanted, events))
}

fn completed(module: &str, events: &[JobEvent]) -> usize {
    events
        .iter()
        .position(|e| matches!(e, JobEvent::ModuleCompleted { module: m, .. } if m == module))
        .unwrap_or_else(|| panic!("{} never completed in {:?}", module, events))
}

/// Create a project from a staged upload without running anything
async fn seeded_project(env: &TestEnv) -> String {
    let upload = env.staged_upload("Seed.wav");
    env.store.create("Seed.wav", &upload).await.unwrap().id
}

#[tokio::test]
async fn test_upload_runs_dependency_before_dependent() {
    let env = TestEnv::new(ScriptedEngine::new()).await;
    let temp_sub = env.bus.subscribe("temp-upload");
    let upload = env.staged_upload("My Song.wav");

    let handle = env
        .pipeline
        .submit_new(
            Some("temp-upload".to_string()),
            Source::Upload {
                path: upload.clone(),
                display_name: "My Song.wav".to_string(),
            },
            &strs(&["lead_backing"]),
        )
        .unwrap();
    assert_eq!(handle.plan, strs(&["vocal_instrumental", "lead_backing"]));

    let summary = handle.wait().await.unwrap();
    let project = summary.project;
    assert_eq!(summary.job_id, "temp-upload");
    assert_eq!(
        project.executed_modules,
        strs(&["vocal_instrumental", "lead_backing"])
    );
    assert!(!upload.exists(), "upload should have been moved into the project");

    // Temporary channel ends with the hand-over to the project id
    let temp_events = collect_events(temp_sub).await;
    assert_eq!(
        temp_events.last(),
        Some(&JobEvent::IdChanged {
            new_id: project.id.clone()
        })
    );

    let events = collect_events(env.bus.subscribe(&project.id)).await;
    let vi_description = env
        .registry
        .get("vocal_instrumental")
        .unwrap()
        .description
        .clone();

    let resolving = position(
        &events,
        &JobEvent::ModuleProcessing {
            module: "lead_backing".to_string(),
            status: ModuleStatus::ResolvingDependency,
            message: vi_description,
        },
    );
    let vi_start = position(&events, &JobEvent::running("vocal_instrumental", 0));
    let vi_done = completed("vocal_instrumental", &events);
    let lb_start = position(&events, &JobEvent::running("lead_backing", 0));
    let lb_done = completed("lead_backing", &events);
    assert!(resolving < vi_start);
    assert!(vi_start < vi_done);
    assert!(vi_done < lb_start);
    assert!(lb_start < lb_done);

    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::ModelDownloading {
            status: ModelStatus::Complete,
            ..
        }
    )));

    match events.last() {
        Some(JobEvent::Done {
            project_id,
            executed_modules,
            stems,
        }) => {
            assert_eq!(project_id, &project.id);
            assert_eq!(executed_modules, &project.executed_modules);
            for stem in ["base_vocals.wav", "base_instrumental.wav", "lead.wav", "backing.wav"] {
                assert!(stems.contains(&stem.to_string()), "missing {}", stem);
            }
            assert!(!stems.contains(project.original_file.as_ref().unwrap()));
        }
        other => panic!("expected done, got {:?}", other),
    }

    // Dependent consumed the parent's vocals
    let lb_result = &project.results["lead_backing"];
    assert_eq!(lb_result.input_used, "base_vocals.wav");

    let dir = env.store.project_dir(&project.id).unwrap();
    assert!(waveform_path(&dir, "lead.wav").exists());

    let record = env.pipeline.jobs().get("temp-upload").unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.project_id.as_deref(), Some(project.id.as_str()));
}

#[tokio::test]
async fn test_rerun_skips_executed_modules() {
    let env = TestEnv::new(ScriptedEngine::new()).await;
    let id = seeded_project(&env).await;

    let first = env
        .pipeline
        .submit_project(&id, &strs(&["lead_backing"]))
        .await
        .unwrap();
    first.wait().await.unwrap();
    assert_eq!(env.engine.calls(), strs(&["vocal_instrumental", "lead_backing"]));

    // Everything requested is done: empty plan, engine untouched
    let again = env
        .pipeline
        .submit_project(&id, &strs(&["lead_backing", "vocal_instrumental"]))
        .await
        .unwrap();
    assert!(again.plan.is_empty());
    let summary = again.wait().await.unwrap();
    assert_eq!(summary.project.executed_modules.len(), 2);
    assert_eq!(env.engine.calls().len(), 2);

    // A sibling only needs itself
    let sibling = env
        .pipeline
        .submit_project(&id, &strs(&["male_female"]))
        .await
        .unwrap();
    assert_eq!(sibling.plan, strs(&["male_female"]));
    let summary = sibling.wait().await.unwrap();
    assert_eq!(summary.project.results["male_female"].input_used, "base_vocals.wav");
    assert_eq!(
        summary.project.executed_modules,
        strs(&["vocal_instrumental", "lead_backing", "male_female"])
    );
}

#[tokio::test]
async fn test_failure_keeps_completed_modules() {
    let env = TestEnv::new(ScriptedEngine::new().failing_on("male_female")).await;
    let id = seeded_project(&env).await;
    let sub = env.bus.subscribe(&id);

    let handle = env
        .pipeline
        .submit_project(
            &id,
            &strs(&[
                "vocal_instrumental",
                "lead_backing",
                "male_female",
                "male_female_secondary",
                "htdemucs_6s",
            ]),
        )
        .await
        .unwrap();
    assert_eq!(handle.plan.len(), 5);

    let err = handle.wait().await.unwrap_err();
    assert!(
        matches!(&err, PipelineError::Engine { module, .. } if module == "male_female"),
        "unexpected error {:?}",
        err
    );

    let events = collect_events(sub).await;
    match events.last() {
        Some(JobEvent::Error { module, message }) => {
            assert_eq!(module.as_deref(), Some("male_female"));
            assert!(message.contains("scripted failure"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(!events.iter().any(|e| matches!(e, JobEvent::Done { .. })));

    let project = env.store.get(&id).await.unwrap();
    assert_eq!(
        project.executed_modules,
        strs(&["vocal_instrumental", "lead_backing"])
    );
    assert!(!project.stems.contains("male.wav"));
    assert_eq!(
        env.engine.calls(),
        strs(&["vocal_instrumental", "lead_backing", "male_female"])
    );

    match env.pipeline.jobs().get(&id).unwrap().state {
        JobState::Failed { message } => assert!(message.contains("male_female")),
        other => panic!("expected failed job, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_request_creates_nothing() {
    let env = TestEnv::new(ScriptedEngine::new()).await;
    let upload = env.staged_upload("Song.wav");

    let err = env
        .pipeline
        .submit_new(
            Some("temp-bad".to_string()),
            Source::Upload {
                path: upload,
                display_name: "Song.wav".to_string(),
            },
            &strs(&["karaoke"]),
        )
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "Invalid modules: karaoke");

    assert!(env.pipeline.jobs().get("temp-bad").is_none());
    assert!(!env.bus.has_channel("temp-bad"));
    assert!(env.store.list().await.is_empty());

    let missing = env
        .pipeline
        .submit_project("20240101000000_no", &strs(&["vocal_instrumental"]))
        .await
        .err()
        .unwrap();
    assert!(matches!(missing, PipelineError::Store(_)));
}

#[tokio::test]
async fn test_url_job_reports_download_then_promotes() {
    let env = TestEnv::new(ScriptedEngine::new()).await;
    let temp_sub = env.bus.subscribe("temp-url");

    let handle = env
        .pipeline
        .submit_new(
            Some("temp-url".to_string()),
            Source::Url("https://example.com/song.wav".to_string()),
            &strs(&["htdemucs_6s"]),
        )
        .unwrap();
    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.project.name, "Remote Song");

    let events = collect_events(temp_sub).await;
    assert_eq!(events.first(), Some(&JobEvent::Download { percent: 0 }));
    assert!(events.contains(&JobEvent::Download { percent: 100 }));
    assert_eq!(
        events.last(),
        Some(&JobEvent::IdChanged {
            new_id: summary.project.id.clone()
        })
    );
    assert_eq!(summary.project.executed_modules, strs(&["htdemucs_6s"]));
}

#[tokio::test]
async fn test_url_download_failure_emits_error_without_project() {
    let env = TestEnv::with_fetcher(ScriptedEngine::new(), FakeFetcher { fail: true }).await;
    let temp_sub = env.bus.subscribe("temp-404");

    let handle = env
        .pipeline
        .submit_new(
            Some("temp-404".to_string()),
            Source::Url("https://example.com/missing.wav".to_string()),
            &strs(&["vocal_instrumental"]),
        )
        .unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, PipelineError::Fetch(_)));

    let events = collect_events(temp_sub).await;
    match events.last() {
        Some(JobEvent::Error { module, message }) => {
            assert!(module.is_none());
            assert!(message.contains("404"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(env.store.list().await.is_empty());
    assert!(env.engine.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_url_rejected_before_spawn() {
    let env = TestEnv::new(ScriptedEngine::new()).await;
    let err = env
        .pipeline
        .submit_new(
            Some("temp-ftp".to_string()),
            Source::Url("ftp://example.com/a.wav".to_string()),
            &strs(&["vocal_instrumental"]),
        )
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::Fetch(_)));
    assert!(env.pipeline.jobs().get("temp-ftp").is_none());
}

#[tokio::test]
async fn test_concurrent_runs_execute_module_once() {
    let env = TestEnv::new(ScriptedEngine::new().with_delay(std::time::Duration::from_millis(50))).await;
    let id = seeded_project(&env).await;

    let a = env
        .pipeline
        .submit_project(&id, &strs(&["vocal_instrumental"]))
        .await
        .unwrap();
    let b = env
        .pipeline
        .submit_project(&id, &strs(&["vocal_instrumental"]))
        .await
        .unwrap();

    let (a, b) = tokio::join!(a.wait(), b.wait());
    a.unwrap();
    b.unwrap();

    assert_eq!(env.engine.calls(), strs(&["vocal_instrumental"]));
    let project = env.store.get(&id).await.unwrap();
    assert_eq!(project.executed_modules, strs(&["vocal_instrumental"]));
}

#[tokio::test]
async fn test_dropped_handle_does_not_cancel_run() {
    let env = TestEnv::new(ScriptedEngine::new().with_delay(std::time::Duration::from_millis(20))).await;
    let id = seeded_project(&env).await;
    let sub = env.bus.subscribe(&id);

    let handle = env
        .pipeline
        .submit_project(&id, &strs(&["vocal_instrumental"]))
        .await
        .unwrap();
    drop(handle);

    let events = collect_events(sub).await;
    assert!(matches!(events.last(), Some(JobEvent::Done { .. })));
    assert!(env.store.get(&id).await.unwrap().has_executed("vocal_instrumental"));
}

#[tokio::test]
async fn test_overlapping_runs_share_one_terminal_event() {
    let env = TestEnv::new(ScriptedEngine::new().with_delay(std::time::Duration::from_millis(20))).await;
    let id = seeded_project(&env).await;

    let a = env
        .pipeline
        .submit_project(&id, &strs(&["vocal_instrumental"]))
        .await
        .unwrap();
    let b = env
        .pipeline
        .submit_project(&id, &strs(&["htdemucs_6s"]))
        .await
        .unwrap();
    let sub = env.bus.subscribe(&id);

    let (a, b) = tokio::join!(a.wait(), b.wait());
    a.unwrap();
    b.unwrap();

    let events = collect_events(sub).await;
    completed("vocal_instrumental", &events);
    completed("htdemucs_6s", &events);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    match events.last() {
        Some(JobEvent::Done {
            executed_modules, ..
        }) => {
            let mut executed = executed_modules.clone();
            executed.sort();
            assert_eq!(executed, strs(&["htdemucs_6s", "vocal_instrumental"]));
        }
        other => panic!("expected done, got {:?}", other),
    }

    let record = env.pipeline.jobs().get(&id).unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert!(record.plan.contains(&"vocal_instrumental".to_string()));
    assert!(record.plan.contains(&"htdemucs_6s".to_string()));
}

#[tokio::test]
async fn test_overlapping_run_failure_reported_after_last_run() {
    let env = TestEnv::new(
        ScriptedEngine::new()
            .failing_on("htdemucs_6s")
            .with_delay(std::time::Duration::from_millis(20)),
    )
    .await;
    let id = seeded_project(&env).await;
    let sub = env.bus.subscribe(&id);

    let failing = env
        .pipeline
        .submit_project(&id, &strs(&["htdemucs_6s"]))
        .await
        .unwrap();
    let passing = env
        .pipeline
        .submit_project(&id, &strs(&["vocal_instrumental"]))
        .await
        .unwrap();

    let (failing, passing) = tokio::join!(failing.wait(), passing.wait());
    assert!(matches!(failing, Err(PipelineError::Engine { .. })));
    passing.unwrap();

    let events = collect_events(sub).await;
    completed("vocal_instrumental", &events);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    match events.last() {
        Some(JobEvent::Error { module, .. }) => assert_eq!(module.as_deref(), Some("htdemucs_6s")),
        other => panic!("expected error, got {:?}", other),
    }

    assert!(env.store.get(&id).await.unwrap().has_executed("vocal_instrumental"));
    assert!(matches!(
        env.pipeline.jobs().get(&id).unwrap().state,
        JobState::Failed { .. }
    ));
}
