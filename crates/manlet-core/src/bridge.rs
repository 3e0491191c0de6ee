//! Cross-runtime action execution.
//!
//! An action is invoked by rendering a small program fragment that imports it
//! from the external actions module, running the fragment in a child process,
//! and reading a JSON result from stdout or an error from stderr.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

static ACTION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("action runtime '{program}' not found on PATH: {source}")]
    RuntimeUnavailable {
        program: String,
        #[source]
        source: which::Error,
    },
    #[error("invalid action name '{0}'")]
    InvalidActionName(String),
    #[error("parameter '{0}' must be a number, string or boolean")]
    InvalidParameter(String),
    #[error("actions module '{0}' cannot be expressed as a file URL")]
    ModulePath(PathBuf),
    #[error("failed to serialize action request: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A named action plus its scalar parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    name: String,
    parameters: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(name: impl Into<String>, parameters: Map<String, Value>) -> Result<Self, BridgeError> {
        let name = name.into();
        if !ACTION_NAME_RE.is_match(&name) {
            return Err(BridgeError::InvalidActionName(name));
        }
        if let Some((key, _)) = parameters.iter().find(|(_, v)| !is_scalar(v)) {
            return Err(BridgeError::InvalidParameter(key.clone()));
        }
        Ok(Self { name, parameters })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Number(_) | Value::String(_) | Value::Bool(_))
}

/// Normalized result of one bridge call.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Success(Value),
    Failure(String),
}

impl ActionOutcome {
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            ActionOutcome::Success(payload) => Ok(payload),
            ActionOutcome::Failure(message) => Err(message),
        }
    }
}

/// The execution context actions run in: an interpreter and a way to render
/// a program fragment it can run.
pub trait ActionRuntime: Send + Sync {
    fn program(&self) -> &str;

    /// Arguments placed before the fragment path.
    fn leading_args(&self) -> &[String] {
        &[]
    }

    /// File extension of rendered fragments.
    fn extension(&self) -> &str;

    fn render(&self, request: &ActionRequest) -> Result<String, BridgeError>;
}

/// Runs actions exported by an ES module through Node.js.
pub struct NodeRuntime {
    program: String,
    args: Vec<String>,
    module_url: Url,
}

impl NodeRuntime {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        actions_module: &Path,
    ) -> Result<Self, BridgeError> {
        let absolute = if actions_module.is_absolute() {
            actions_module.to_path_buf()
        } else {
            std::env::current_dir()?.join(actions_module)
        };
        let module_url = Url::from_file_path(&absolute)
            .map_err(|_| BridgeError::ModulePath(absolute.clone()))?;
        Ok(Self {
            program: program.into(),
            args,
            module_url,
        })
    }

    pub fn module_url(&self) -> &Url {
        &self.module_url
    }
}

impl ActionRuntime for NodeRuntime {
    fn program(&self) -> &str {
        &self.program
    }

    fn leading_args(&self) -> &[String] {
        &self.args
    }

    fn extension(&self) -> &str {
        "mjs"
    }

    fn render(&self, request: &ActionRequest) -> Result<String, BridgeError> {
        let module = serde_json::to_string(self.module_url.as_str())?;
        let name = serde_json::to_string(request.name())?;
        let params = serde_json::to_string(request.parameters())?;
        Ok(format!(
            r#"import * as actions from {module};

const name = {name};
const params = {params};

try {{
  const action = actions[name];
  if (typeof action !== "function") {{
    throw new Error(`unknown action: ${{name}}`);
  }}
  const result = await action(params);
  console.log(JSON.stringify(result ?? null));
}} catch (error) {{
  console.error(JSON.stringify({{ error: error?.message ?? String(error) }}));
  process.exit(1);
}}
"#
        ))
    }
}

/// Anything that can carry an [`ActionRequest`] to an action and back.
#[async_trait]
pub trait ActionDispatch: Send + Sync {
    async fn dispatch(&self, request: &ActionRequest) -> ActionOutcome;
}

/// Executes actions in a fresh child process per call.
///
/// Each call writes its fragment to a unique file under the scratch
/// directory and removes it afterwards, so concurrent calls never share a
/// fragment.
pub struct ActionBridge {
    runtime: Arc<dyn ActionRuntime>,
    scratch_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ActionBridge {
    /// Fails when the runtime's interpreter cannot be found on PATH.
    pub fn new(
        runtime: Arc<dyn ActionRuntime>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Result<Self, BridgeError> {
        let program = runtime.program().to_string();
        which::which(&program)
            .map_err(|source| BridgeError::RuntimeUnavailable { program, source })?;

        let scratch_dir = scratch_dir.into();
        std::fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            runtime,
            scratch_dir,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Run `action_name` with `parameters`. Never errors: invalid requests
    /// and failed runs both come back as [`ActionOutcome::Failure`].
    pub async fn execute(&self, action_name: &str, parameters: Map<String, Value>) -> ActionOutcome {
        match ActionRequest::new(action_name, parameters) {
            Ok(request) => self.dispatch(&request).await,
            Err(e) => ActionOutcome::Failure(e.to_string()),
        }
    }

    async fn run_fragment(&self, path: &Path) -> ActionOutcome {
        let program = self.runtime.program();
        let mut command = Command::new(program);
        command
            .args(self.runtime.leading_args())
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return ActionOutcome::Failure(format!(
                        "action timed out after {} s",
                        limit.as_secs_f64()
                    ))
                }
            },
            None => command.output().await,
        };

        match output {
            Ok(output) => interpret_output(&output),
            Err(e) => ActionOutcome::Failure(format!("failed to run '{program}': {e}")),
        }
    }
}

#[async_trait]
impl ActionDispatch for ActionBridge {
    async fn dispatch(&self, request: &ActionRequest) -> ActionOutcome {
        let script = match self.runtime.render(request) {
            Ok(s) => s,
            Err(e) => return ActionOutcome::Failure(e.to_string()),
        };

        let path = self.scratch_dir.join(format!(
            "manlet-action-{}.{}",
            Uuid::new_v4(),
            self.runtime.extension()
        ));
        if let Err(e) = tokio::fs::write(&path, script).await {
            return ActionOutcome::Failure(format!(
                "failed to write action fragment '{}': {e}",
                path.display()
            ));
        }

        debug!("Bridge: running {} ({})", request.name(), path.display());
        let outcome = self.run_fragment(&path).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("Failed to remove action fragment '{}': {e}", path.display());
        }
        match &outcome {
            ActionOutcome::Success(_) => debug!("Bridge: {} succeeded", request.name()),
            ActionOutcome::Failure(msg) => warn!("Action '{}' failed: {msg}", request.name()),
        }
        outcome
    }
}

/// Map a finished child process onto an outcome.
///
/// The payload is the last non-empty stdout line, so actions may log before
/// printing their result.
fn interpret_output(output: &Output) -> ActionOutcome {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return ActionOutcome::Failure(failure_message(&stderr, output.status.code()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let Some(line) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return ActionOutcome::Failure("action produced no output".into());
    };
    match serde_json::from_str(line) {
        Ok(payload) => ActionOutcome::Success(payload),
        Err(e) => ActionOutcome::Failure(format!("failed to parse action output as JSON: {e}")),
    }
}

fn failure_message(stderr: &str, code: Option<i32>) -> String {
    let trimmed = stderr.trim();
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(msg) = obj.get("error").and_then(|e| e.as_str()) {
            return msg.to_string();
        }
    }
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    match code {
        Some(code) => format!("action exited with status {code}"),
        None => "action terminated by signal".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Runs fragments with `sh` so tests don't need node installed.
    struct ShellRuntime {
        script: fn(&ActionRequest) -> String,
    }

    impl ActionRuntime for ShellRuntime {
        fn program(&self) -> &str {
            "sh"
        }

        fn extension(&self) -> &str {
            "sh"
        }

        fn render(&self, request: &ActionRequest) -> Result<String, BridgeError> {
            Ok((self.script)(request))
        }
    }

    fn echo_params(request: &ActionRequest) -> String {
        let json = serde_json::to_string(request.parameters()).unwrap();
        format!("printf '%s\\n' '{}'\n", json.replace('\'', "'\\''"))
    }

    fn bridge(script: fn(&ActionRequest) -> String, dir: &Path) -> ActionBridge {
        ActionBridge::new(Arc::new(ShellRuntime { script }), dir).unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn echo_round_trip_returns_params() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(echo_params, dir.path());
        let input = params(json!({
            "amount": 0.25,
            "assetId": "So11111111111111111111111111111111111111112",
            "note": "it's fine",
            "confirm": true,
            "count": 3
        }));

        let outcome = bridge.execute("transferAsset", input.clone()).await;
        assert_eq!(outcome, ActionOutcome::Success(Value::Object(input)));
    }

    #[tokio::test]
    async fn nonzero_exit_maps_stderr_to_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(|_| "printf 'boom' >&2\nexit 1\n".into(), dir.path());
        let outcome = bridge.execute("createToken", Map::new()).await;
        assert_eq!(outcome, ActionOutcome::Failure("boom".into()));
    }

    #[tokio::test]
    async fn json_error_object_is_unwrapped() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(
            |_| "printf '%s' '{\"error\":\"insufficient funds\"}' >&2\nexit 1\n".into(),
            dir.path(),
        );
        let outcome = bridge.execute("transferAsset", Map::new()).await;
        assert_eq!(outcome, ActionOutcome::Failure("insufficient funds".into()));
    }

    #[tokio::test]
    async fn silent_failure_reports_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(|_| "exit 3\n".into(), dir.path());
        let outcome = bridge.execute("getBalance", Map::new()).await;
        assert_eq!(
            outcome,
            ActionOutcome::Failure("action exited with status 3".into())
        );
    }

    #[tokio::test]
    async fn malformed_stdout_is_a_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(|_| "echo not-json\n".into(), dir.path());
        match bridge.execute("getBalance", Map::new()).await {
            ActionOutcome::Failure(msg) => assert!(msg.contains("failed to parse")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_stdout_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(|_| "true\n".into(), dir.path());
        assert_eq!(
            bridge.execute("getBalance", Map::new()).await,
            ActionOutcome::Failure("action produced no output".into())
        );
    }

    #[tokio::test]
    async fn log_lines_before_result_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(
            |_| "echo 'connecting to devnet...'\nprintf '%s\\n' '{\"ok\":true}'\n".into(),
            dir.path(),
        );
        assert_eq!(
            bridge.execute("requestSolFromFaucet", Map::new()).await,
            ActionOutcome::Success(json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn fragments_are_removed_after_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(echo_params, dir.path());
        bridge.execute("getBalance", Map::new()).await;
        bridge.execute("getBalance", Map::new()).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_do_not_share_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(echo_params, dir.path());
        let a = params(json!({"assetId": "mint-a"}));
        let b = params(json!({"assetId": "mint-b"}));

        let (ra, rb) = tokio::join!(
            bridge.execute("getBalance", a.clone()),
            bridge.execute("getBalance", b.clone())
        );
        assert_eq!(ra, ActionOutcome::Success(Value::Object(a)));
        assert_eq!(rb, ActionOutcome::Success(Value::Object(b)));
    }

    #[tokio::test]
    async fn timeout_kills_slow_actions() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(|_| "sleep 5\n".into(), dir.path())
            .with_timeout(Some(Duration::from_millis(200)));
        match bridge.execute("mintNFT", Map::new()).await {
            ActionOutcome::Failure(msg) => assert_eq!(msg, "action timed out after 0.2 s"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_requests_fail_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(echo_params, dir.path());

        let outcome = bridge
            .execute("transfer; rm -rf /", Map::new())
            .await;
        assert!(matches!(outcome, ActionOutcome::Failure(ref m) if m.contains("invalid action name")));

        let nested = params(json!({"meta": {"k": 1}}));
        let outcome = bridge.execute("deployNFT", nested).await;
        assert!(matches!(outcome, ActionOutcome::Failure(ref m) if m.contains("'meta'")));
    }

    #[test]
    fn request_rejects_non_scalar_parameters() {
        assert!(ActionRequest::new("getBalance", params(json!({"assetId": "x"}))).is_ok());
        assert!(matches!(
            ActionRequest::new("getBalance", params(json!({"ids": [1, 2]}))),
            Err(BridgeError::InvalidParameter(k)) if k == "ids"
        ));
        assert!(matches!(
            ActionRequest::new("getBalance", params(json!({"assetId": null}))),
            Err(BridgeError::InvalidParameter(_))
        ));
        assert!(matches!(
            ActionRequest::new("2fast", Map::new()),
            Err(BridgeError::InvalidActionName(_))
        ));
    }

    #[test]
    fn missing_interpreter_is_a_construction_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = NodeRuntime::new(
            "manlet-no-such-interpreter",
            Vec::new(),
            Path::new("/opt/manlet/actions.mjs"),
        )
        .unwrap();
        let result = ActionBridge::new(Arc::new(runtime), dir.path());
        assert!(matches!(
            result,
            Err(BridgeError::RuntimeUnavailable { ref program, .. }) if program == "manlet-no-such-interpreter"
        ));
    }

    #[test]
    fn node_fragment_imports_module_and_embeds_params() {
        let runtime =
            NodeRuntime::new("node", Vec::new(), Path::new("/opt/manlet/actions.mjs")).unwrap();
        let request = ActionRequest::new(
            "deployNFT",
            params(json!({"name": "CreativeAgentNFT", "symbol": "CA"})),
        )
        .unwrap();

        let script = runtime.render(&request).unwrap();
        assert!(script.contains(r#"import * as actions from "file:///opt/manlet/actions.mjs";"#));
        assert!(script.contains(r#"const name = "deployNFT";"#));
        assert!(script.contains(r#""name":"CreativeAgentNFT""#));
        assert!(script.contains("process.exit(1)"));
    }

    #[test]
    fn relative_module_resolves_against_cwd() {
        let runtime = NodeRuntime::new("node", Vec::new(), Path::new("actions.mjs")).unwrap();
        let expected = std::env::current_dir().unwrap().join("actions.mjs");
        assert_eq!(runtime.module_url().to_file_path().unwrap(), expected);
    }
}
