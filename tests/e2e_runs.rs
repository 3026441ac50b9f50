
use std::sync::Arc;
use std::time::Duration;

use loadctl::domain::{AgentTarget, ExecutionMode, RunStatus};
use loadctl::engine::Engine;
use loadctl::error::ErrorKind;
use tempfile::tempdir;

use support_runs::{
    RESULT_CSV, sample_request, test_settings, workspace_entries, write_fake_generator,
};

async fn engine_for(dir: &std::path::Path, exit_code: i32, delay_secs: u32) -> Result<Engine, String> {
    let generator = write_fake_generator(dir, exit_code, delay_secs)?;
    Engine::from_settings(test_settings(dir, generator))
        .await
        .map_err(|err| format!("engine failed: {}", err))
}

#[tokio::test(flavor = "current_thread")]
async fn synchronous_run_succeeds_and_exposes_results() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = engine_for(dir.path(), 0, 0).await?;

    let record = engine
        .submit_run(&sample_request(), ExecutionMode::Synchronous)
        .await
        .map_err(|err| format!("submit failed: {}", err))?;
    if record.status != RunStatus::Succeeded || record.exit_code != Some(0) {
        return Err(format!("Unexpected record: {:?}", record));
    }

    let properties = std::fs::read_to_string(
        record
            .workspace
            .join(format!("config_{}.properties", record.id)),
    )
    .map_err(|err| format!("read properties failed: {}", err))?;
    for expected in ["hostname=service.internal", "threads=4", "loopCount=2"] {
        if !properties.contains(expected) {
            return Err(format!("Missing {} in properties:\n{}", expected, properties));
        }
    }

    let rows = engine
        .run_results(&record.id)
        .await
        .map_err(|err| format!("results failed: {}", err))?;
    if rows.len() != RESULT_CSV.lines().count() {
        return Err(format!("Unexpected row count {}", rows.len()));
    }
    if rows.first().and_then(|header| header.first()).map(String::as_str) != Some("timeStamp") {
        return Err(format!("Unexpected header: {:?}", rows.first()));
    }

    let summary = engine
        .run_summary(&record.id)
        .await
        .map_err(|err| format!("summary failed: {}", err))?;
    let home = summary
        .iter()
        .find(|label| label.label == "home")
        .ok_or_else(|| "Missing home label".to_owned())?;
    if home.request_count != 2 || (home.error_percent - 50.0).abs() > 1e-9 {
        return Err(format!("Unexpected home summary: {:?}", home));
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn failing_generator_marks_run_failed_with_output() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = engine_for(dir.path(), 3, 0).await?;

    let record = engine
        .submit_run(&sample_request(), ExecutionMode::Synchronous)
        .await
        .map_err(|err| format!("submit failed: {}", err))?;
    if record.status != RunStatus::Failed || record.exit_code != Some(3) {
        return Err(format!("Unexpected record: {:?}", record));
    }
    let diagnostic = record.diagnostic.clone().unwrap_or_default();
    if !diagnostic.contains("generator wrote") || !diagnostic.contains("generator warning") {
        return Err(format!("Diagnostic misses generator output: {}", diagnostic));
    }

    let stored = engine
        .run_status(&record.id)
        .await
        .map_err(|err| format!("status failed: {}", err))?;
    if stored != record {
        return Err("Persisted record differs from returned record".to_owned());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn detached_run_resolves_once_result_exists() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = engine_for(dir.path(), 0, 1).await?;

    let record = engine
        .submit_run(&sample_request(), ExecutionMode::Detached)
        .await
        .map_err(|err| format!("submit failed: {}", err))?;
    if record.status != RunStatus::Running {
        return Err(format!("Expected running record, got {:?}", record.status));
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let current = engine
            .run_status(&record.id)
            .await
            .map_err(|err| format!("status failed: {}", err))?;
        if current.status == RunStatus::Succeeded {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("Run never resolved: {:?}", current));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_request_leaves_no_workspace() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = engine_for(dir.path(), 0, 0).await?;

    let mut request = sample_request();
    request.hostname = String::new();
    match engine.submit_run(&request, ExecutionMode::Synchronous).await {
        Err(err) if err.kind() == ErrorKind::Validation => {}
        other => return Err(format!("Expected validation error, got {:?}", other)),
    }
    if workspace_entries(&dir.path().join("workspace")) != 0 {
        return Err("Rejected request created a workspace".to_owned());
    }
    let runs = engine
        .list_runs()
        .await
        .map_err(|err| format!("list failed: {}", err))?;
    if !runs.is_empty() {
        return Err("Rejected request created a record".to_owned());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn distributed_run_requires_running_agents() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = engine_for(dir.path(), 0, 0).await?;

    let mut request = sample_request();
    request.agents = vec![AgentTarget {
        agent_host: "10.0.0.7".to_owned(),
        agent_port: "1099".to_owned(),
    }];
    match engine.submit_run(&request, ExecutionMode::Synchronous).await {
        Err(err) if err.kind() == ErrorKind::State => {}
        other => return Err(format!("Expected state error, got {:?}", other)),
    }
    if workspace_entries(&dir.path().join("workspace")) != 0 {
        return Err("Rejected distributed request created a workspace".to_owned());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_runs_get_distinct_workspaces() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = Arc::new(engine_for(dir.path(), 0, 0).await?);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            engine
                .submit_run(&sample_request(), ExecutionMode::Synchronous)
                .await
        }));
    }
    let mut ids = std::collections::HashSet::new();
    for task in tasks {
        let record = task
            .await
            .map_err(|err| format!("join failed: {}", err))?
            .map_err(|err| format!("submit failed: {}", err))?;
        if record.status != RunStatus::Succeeded {
            return Err(format!("Unexpected status {:?}", record.status));
        }
        ids.insert(record.workspace);
    }
    if ids.len() != 8 || workspace_entries(&dir.path().join("workspace")) != 8 {
        return Err(format!("Expected 8 distinct workspaces, got {}", ids.len()));
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn cleanup_evicts_finished_runs() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = engine_for(dir.path(), 0, 0).await?;

    let record = engine
        .submit_run(&sample_request(), ExecutionMode::Synchronous)
        .await
        .map_err(|err| format!("submit failed: {}", err))?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let preview = engine
        .cleanup(Some(Duration::from_millis(1)), true)
        .await
        .map_err(|err| format!("dry run failed: {}", err))?;
    if preview.removed != vec![record.id.to_string()] || !record.workspace.exists() {
        return Err(format!("Unexpected dry run: {:?}", preview));
    }

    let report = engine
        .cleanup(Some(Duration::from_millis(1)), false)
        .await
        .map_err(|err| format!("cleanup failed: {}", err))?;
    if report.removed != vec![record.id.to_string()] || record.workspace.exists() {
        return Err(format!("Unexpected cleanup: {:?}", report));
    }
    match engine.run_status(&record.id).await {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => Err(format!("Expected evicted record, got {:?}", other)),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn in_flight_run_stays_observable_and_survives_sweeps() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = Arc::new(engine_for(dir.path(), 0, 3).await?);

    let submitting = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .submit_run(&sample_request(), ExecutionMode::Synchronous)
                .await
        })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let running = loop {
        let runs = engine
            .list_runs()
            .await
            .map_err(|err| format!("list failed: {}", err))?;
        if let Some(run) = runs.into_iter().find(|run| run.status == RunStatus::Running) {
            break run;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err("Run never reached running".to_owned());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    let current = tokio::time::timeout(Duration::from_secs(1), engine.run_status(&running.id))
        .await
        .map_err(|_elapsed| "Status blocked on the in-flight run".to_owned())?
        .map_err(|err| format!("status failed: {}", err))?;
    if current.status != RunStatus::Running {
        return Err(format!("Unexpected in-flight status {:?}", current.status));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    let report = tokio::time::timeout(
        Duration::from_secs(1),
        engine.cleanup(Some(Duration::from_millis(1)), false),
    )
    .await
    .map_err(|_elapsed| "Sweep blocked on the in-flight run".to_owned())?
    .map_err(|err| format!("cleanup failed: {}", err))?;
    if report.active != vec![running.id.to_string()] || !report.removed.is_empty() {
        return Err(format!("In-flight run not spared: {:?}", report));
    }
    if !running.workspace.exists() {
        return Err("In-flight workspace was removed".to_owned());
    }

    let finished = submitting
        .await
        .map_err(|err| format!("join failed: {}", err))?
        .map_err(|err| format!("submit failed: {}", err))?;
    if finished.status != RunStatus::Succeeded {
        return Err(format!("Unexpected final record: {:?}", finished));
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn agent_metrics_are_read_from_the_run_workspace() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let engine = engine_for(dir.path(), 1, 0).await?;

    let record = engine
        .submit_run(&sample_request(), ExecutionMode::Synchronous)
        .await
        .map_err(|err| format!("submit failed: {}", err))?;
    if record.status != RunStatus::Failed {
        return Err(format!("Unexpected record: {:?}", record));
    }

    // A failed run still keeps what the agents recorded.
    let metrics = engine
        .run_metrics(&record.id)
        .await
        .map_err(|err| format!("metrics failed: {}", err))?;
    match metrics.series.as_slice() {
        [cpu] if cpu.tag == "cpu_all_combined" && cpu.count == 2 && cpu.max == 60.0 => {}
        other => return Err(format!("Unexpected series: {:?}", other)),
    }

    let unknown = loadctl::domain::RunId::from_parts(1, 1);
    match engine.run_metrics(&unknown).await {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => Err(format!("Expected not found, got {:?}", other)),
    }
}
