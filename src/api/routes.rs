use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::domain::{AgentId, AgentInstallRequest, ExecutionMode, RunId, RunRequest};
use crate::engine::Engine;
use crate::error::AppError;

use super::wire::{HttpError, HttpRequest};

pub(crate) struct Reply {
    pub(crate) status: u16,
    pub(crate) body: Value,
}

impl Reply {
    fn ok<T: serde::Serialize>(value: &T) -> Result<Self, HttpError> {
        Self::with_status(200, value)
    }

    fn with_status<T: serde::Serialize>(status: u16, value: &T) -> Result<Self, HttpError> {
        let body = serde_json::to_value(value).map_err(AppError::from)?;
        Ok(Self { status, body })
    }
}

#[derive(Debug, Deserialize)]
struct SubmitRunBody {
    #[serde(flatten)]
    request: RunRequest,
    #[serde(default)]
    detached: bool,
}

pub(crate) async fn route(engine: &Engine, request: &HttpRequest) -> Result<Reply, HttpError> {
    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("POST", ["ant", "runs"]) => {
            let body: SubmitRunBody = parse_body(&request.body)?;
            let mode = if body.detached {
                ExecutionMode::Detached
            } else {
                ExecutionMode::Synchronous
            };
            let record = engine.submit_run(&body.request, mode).await?;
            Reply::with_status(201, &record)
        }
        ("GET", ["ant", "runs"]) => Reply::ok(&engine.list_runs().await?),
        ("GET", ["ant", "runs", id]) => Reply::ok(&engine.run_status(&run_id(id)?).await?),
        ("GET", ["ant", "runs", id, "result"]) => {
            let rows = engine.run_results(&run_id(id)?).await?;
            Ok(Reply {
                status: 200,
                body: json!({ "rows": rows }),
            })
        }
        ("GET", ["ant", "runs", id, "summary"]) => {
            Reply::ok(&engine.run_summary(&run_id(id)?).await?)
        }
        ("GET", ["ant", "runs", id, "metrics"]) => {
            Reply::ok(&engine.run_metrics(&run_id(id)?).await?)
        }
        ("POST", ["ant", "agents"]) => {
            let install: AgentInstallRequest = parse_body(&request.body)?;
            let record = engine.install_agent(&install).await?;
            Ok(Reply {
                status: 201,
                body: json!({ "agentId": record.id }),
            })
        }
        ("GET", ["ant", "agents"]) => Reply::ok(&engine.list_agents().await?),
        ("GET", ["ant", "agents", id]) => Reply::ok(&engine.agent(&agent_id(id)?).await?),
        ("DELETE", ["ant", "agents", id]) => {
            let id = agent_id(id)?;
            engine.remove_agent(&id).await?;
            Ok(Reply {
                status: 200,
                body: json!({ "agentId": id, "removed": true }),
            })
        }
        ("POST", ["ant", "agents", id, "start"]) => {
            Reply::ok(&engine.start_agent(&agent_id(id)?).await?)
        }
        ("POST", ["ant", "agents", id, "stop"]) => {
            Reply::ok(&engine.stop_agent(&agent_id(id)?).await?)
        }
        ("GET", ["ant", "agents", id, "ready"]) => {
            let id = agent_id(id)?;
            let ready = engine.probe_agent(&id).await?;
            Ok(Reply {
                status: 200,
                body: json!({ "agentId": id, "ready": ready }),
            })
        }
        (_, ["ant", "runs", ..] | ["ant", "agents", ..]) if known_path(&segments) => Err(
            HttpError::new(405, "validation", "Method not allowed"),
        ),
        _ => Err(HttpError::new(404, "not_found", "Not found")),
    }
}

fn known_path(segments: &[&str]) -> bool {
    matches!(
        segments,
        ["ant", "runs"]
            | ["ant", "runs", _]
            | ["ant", "runs", _, "result" | "summary" | "metrics"]
            | ["ant", "agents"]
            | ["ant", "agents", _]
            | ["ant", "agents", _, "start" | "stop" | "ready"]
    )
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, HttpError> {
    serde_json::from_slice(body)
        .map_err(|err| HttpError::bad_request(format!("Invalid JSON body: {}", err)))
}

fn run_id(value: &str) -> Result<RunId, HttpError> {
    RunId::parse(value).map_err(|err| AppError::from(err).into())
}

fn agent_id(value: &str) -> Result<AgentId, HttpError> {
    AgentId::parse(value).map_err(|err| AppError::from(err).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_body_accepts_detached_flag() -> Result<(), String> {
        let body: SubmitRunBody = parse_body(
            br#"{"protocol":"http","hostname":"svc","path":"/","threads":2,"detached":true}"#,
        )
        .map_err(|err| err.message)?;
        if !body.detached || body.request.threads != 2 || body.request.hostname != "svc" {
            return Err(format!("Unexpected body: {:?}", body));
        }
        Ok(())
    }

    #[test]
    fn known_paths_cover_agent_actions() -> Result<(), String> {
        if !known_path(&["ant", "agents", "a1", "ready"]) {
            return Err("Expected ready path known".to_owned());
        }
        if !known_path(&["ant", "runs", "r1", "metrics"]) {
            return Err("Expected metrics path known".to_owned());
        }
        if known_path(&["ant", "agents", "a1", "reboot"]) {
            return Err("Expected reboot path unknown".to_owned());
        }
        Ok(())
    }

    #[test]
    fn malformed_json_is_a_bad_request() -> Result<(), String> {
        match parse_body::<AgentInstallRequest>(b"{not json") {
            Err(err) if err.status == 400 => Ok(()),
            Err(err) => Err(format!("Unexpected status {}", err.status)),
            Ok(_) => Err("Expected parse failure".to_owned()),
        }
    }
}
