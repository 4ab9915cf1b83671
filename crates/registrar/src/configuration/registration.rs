// Registration driver: the seam between the reconciliation engine and the
// external runner binary.
//
// The CLI driver never lets the binary touch the real configuration file. It
// hands the binary a scratch copy beside the real file, reads the result back
// and leaves committing to the caller.

use async_trait::async_trait;
use registrar_common::constants::{command_line, keys};
use registrar_common::tracing::Tracing;
use registrar_common::{ConfigDocument, HostContext, RegistrarError, Result};
use registrar_sdk::{IOUtil, ProcessInvoker, ProcessOutput, StringUtil, TraceWriter, WhichUtil};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toml::{Table, Value};

use crate::configuration::desired_state::DesiredState;
use crate::configuration::params::EnvironmentVariable;

/// Everything the binary needs to register one runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationRequest {
    pub url: String,
    pub token: String,
    pub name: String,
    pub executor: Option<String>,
    pub default_image: Option<String>,
    pub template_file: Option<PathBuf>,
    pub environ_vars: Vec<EnvironmentVariable>,
}

impl RegistrationRequest {
    pub fn from_desired(desired: &DesiredState) -> Self {
        Self {
            url: desired.identity.url.clone(),
            token: desired.identity.token.clone(),
            name: desired.identity.name.clone(),
            executor: desired.identity.executor.clone(),
            default_image: desired.default_image.clone(),
            template_file: desired.template_file.clone(),
            environ_vars: desired.environ_vars.clone(),
        }
    }

    /// Arguments of `register` against the configuration file at `config`.
    pub fn arguments(&self, config: &Path) -> Vec<String> {
        let mut args = vec![
            command_line::commands::REGISTER.to_string(),
            command_line::flags::NON_INTERACTIVE.to_string(),
            command_line::flags::CONFIG.to_string(),
            config.display().to_string(),
            command_line::flags::URL.to_string(),
            self.url.clone(),
            command_line::flags::TOKEN.to_string(),
            self.token.clone(),
            command_line::flags::NAME.to_string(),
            self.name.clone(),
        ];
        if let Some(executor) = &self.executor {
            args.push(command_line::flags::EXECUTOR.to_string());
            args.push(executor.clone());
        }
        if let Some(image) = &self.default_image {
            args.push(command_line::flags::DOCKER_IMAGE.to_string());
            args.push(image.clone());
        }
        if let Some(template) = &self.template_file {
            args.push(command_line::flags::TEMPLATE_CONFIG.to_string());
            args.push(template.display().to_string());
        }
        args
    }

    /// Declared variables as process environment. Values become text here.
    pub fn environment(&self) -> HashMap<String, String> {
        self.environ_vars
            .iter()
            .map(|v| (v.name.clone(), StringUtil::value_to_text(&v.value)))
            .collect()
    }
}

/// Performs registration and deregistration against the coordinator.
///
/// Implementations must not modify the real configuration file; the caller
/// commits the document once every step succeeded.
#[async_trait]
pub trait RegistrationDriver: Send + Sync {
    /// Register a runner starting from `document` and return the entry the
    /// registration produced.
    async fn register(
        &self,
        document: &ConfigDocument,
        request: &RegistrationRequest,
    ) -> Result<Table>;

    /// Remove the registration identified by `url` and `token`.
    async fn unregister(&self, document: &ConfigDocument, url: &str, token: &str) -> Result<()>;

    /// Output of the service status command.
    async fn service_status(&self) -> Result<ProcessOutput>;
}

// ---------------------------------------------------------------------------
// gitlab-runner CLI
// ---------------------------------------------------------------------------

/// Drives the `gitlab-runner` binary.
pub struct GitlabRunnerCli {
    context: Arc<HostContext>,
    trace: Tracing,
}

impl GitlabRunnerCli {
    pub fn new(context: Arc<HostContext>) -> Self {
        let trace = context.get_trace("GitlabRunnerCli");
        Self { context, trace }
    }

    fn binary(&self, operation: &str) -> Result<PathBuf> {
        let binary = self.context.runner_binary();
        match WhichUtil::which(binary, true) {
            Ok(Some(path)) => Ok(path),
            Ok(None) => Err(self.start_failure(operation, format!("{binary}: command not found"))),
            Err(e) => Err(self.start_failure(operation, format!("{e:#}"))),
        }
    }

    fn start_failure(&self, operation: &str, message: String) -> RegistrarError {
        RegistrarError::ProcessInvocation {
            operation: operation.to_string(),
            message: self.context.mask(&message),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Write `document` to a scratch file next to the real configuration.
    /// The file disappears when the handle is dropped.
    fn scratch_copy(&self, document: &ConfigDocument) -> Result<tempfile::NamedTempFile> {
        let dir = self.context.config_directory();
        let rendered = document.render()?;

        let mut scratch = tempfile::Builder::new()
            .prefix(".config.")
            .suffix(".toml.scratch")
            .tempfile_in(dir)
            .map_err(|e| RegistrarError::io(dir, e))?;
        if let Err(e) = scratch
            .write_all(rendered.as_bytes())
            .and_then(|_| scratch.flush())
        {
            return Err(RegistrarError::io(scratch.path(), e));
        }

        self.trace
            .verbose(&format!("Scratch configuration at '{}'", scratch.path().display()));
        Ok(scratch)
    }

    async fn invoke(
        &self,
        operation: &str,
        arguments: &[String],
        environment: Option<&HashMap<String, String>>,
        require_success: bool,
    ) -> Result<ProcessOutput> {
        let binary = self.binary(operation)?;
        let working_directory = self.context.config_directory().display().to_string();

        let invoker = ProcessInvoker::new(Arc::new(self.trace.clone()));
        let output = invoker
            .execute(
                &working_directory,
                &binary.display().to_string(),
                arguments,
                environment,
            )
            .await
            .map_err(|e| self.start_failure(operation, format!("{e:#}")))?;

        if require_success && !output.success() {
            return Err(RegistrarError::ProcessInvocation {
                operation: operation.to_string(),
                message: format!(
                    "'{}' exited with code {}",
                    binary.display(),
                    output.exit_code
                ),
                exit_code: Some(output.exit_code),
                stdout: self.context.mask(&output.stdout_text()),
                stderr: self.context.mask(&output.stderr_text()),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl RegistrationDriver for GitlabRunnerCli {
    async fn register(
        &self,
        document: &ConfigDocument,
        request: &RegistrationRequest,
    ) -> Result<Table> {
        let scratch = self.scratch_copy(document)?;
        let arguments = request.arguments(scratch.path());
        let environment = request.environment();

        self.trace.info(&format!("Registering runner '{}'", request.name));
        let env = (!environment.is_empty()).then_some(&environment);
        let output = self
            .invoke(command_line::commands::REGISTER, &arguments, env, true)
            .await?;

        let written = IOUtil::read_if_exists(scratch.path())
            .map_err(|e| RegistrarError::io(scratch.path(), format!("{e:#}")))?
            .unwrap_or_default();
        let result = ConfigDocument::parse(&written).map_err(|message| {
            RegistrarError::ConfigParse {
                path: scratch.path().to_path_buf(),
                message,
            }
        })?;

        // The binary appends; the last entry with the name is the new one.
        result
            .runners()
            .into_iter()
            .rev()
            .find(|r| r.get(keys::NAME).and_then(Value::as_str) == Some(request.name.as_str()))
            .cloned()
            .ok_or_else(|| RegistrarError::ProcessInvocation {
                operation: command_line::commands::REGISTER.to_string(),
                message: format!(
                    "registration succeeded but no entry named '{}' was written",
                    request.name
                ),
                exit_code: Some(output.exit_code),
                stdout: self.context.mask(&output.stdout_text()),
                stderr: self.context.mask(&output.stderr_text()),
            })
    }

    async fn unregister(&self, document: &ConfigDocument, url: &str, token: &str) -> Result<()> {
        let scratch = self.scratch_copy(document)?;
        let arguments = vec![
            command_line::commands::UNREGISTER.to_string(),
            command_line::flags::CONFIG.to_string(),
            scratch.path().display().to_string(),
            command_line::flags::URL.to_string(),
            url.to_string(),
            command_line::flags::TOKEN.to_string(),
            token.to_string(),
        ];

        self.trace.info(&format!("Unregistering runner at {url}"));
        self.invoke(command_line::commands::UNREGISTER, &arguments, None, true)
            .await?;
        Ok(())
    }

    async fn service_status(&self) -> Result<ProcessOutput> {
        let arguments = vec![command_line::commands::STATUS.to_string()];
        self.invoke(command_line::commands::STATUS, &arguments, None, false)
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::configuration::desired_state::DesiredStateBuilder;
    use crate::configuration::params::ModuleParams;
    use registrar_common::HostPaths;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    // Stand-in for gitlab-runner: appends an entry on register, fails for
    // the token "glrt-rejected" and reports a running service.
    const FAKE_RUNNER: &str = r#"#!/bin/sh
cmd="$1"; shift
config=""; name=""; token=""; url=""; executor=""
while [ $# -gt 0 ]; do
  case "$1" in
    --config) config="$2"; shift 2 ;;
    --name) name="$2"; shift 2 ;;
    --token) token="$2"; shift 2 ;;
    --url) url="$2"; shift 2 ;;
    --executor) executor="$2"; shift 2 ;;
    *) shift ;;
  esac
done
case "$cmd" in
  register)
    if [ "$token" = "glrt-rejected" ]; then
      echo "ERROR: Verifying runner... is not valid token=$token" >&2
      exit 1
    fi
    printf '\n[[runners]]\n  name = "%s"\n  url = "%s"\n  id = 7\n  token = "%s"\n  executor = "%s"\n  tag_list = "%s"\n' \
      "$name" "$url" "$token" "$executor" "$RUNNER_TAG_LIST" >> "$config"
    echo "Runner registered successfully."
    ;;
  unregister)
    echo "Unregistering runner... succeeded"
    ;;
  status)
    echo "gitlab-runner: Service is running"
    ;;
esac
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PathBuf,
        context: Arc<HostContext>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("gitlab-runner");
        fs::write(&binary, FAKE_RUNNER).unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();

        let config = dir.path().join("config.toml");
        let context = HostContext::new(HostPaths {
            runner_config: config.clone(),
            system_id: dir.path().join(".runner_system_id"),
            runner_binary: binary.display().to_string(),
        });
        Fixture {
            _dir: dir,
            config,
            context,
        }
    }

    fn request(token: &str) -> RegistrationRequest {
        let params = ModuleParams {
            api_url: "https://gitlab.example.com".into(),
            token: token.into(),
            name: "host1".into(),
            executor: Some("shell".into()),
            environ_vars: vec![EnvironmentVariable::new(
                "RUNNER_TAG_LIST",
                Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
            )],
            ..ModuleParams::default()
        };
        RegistrationRequest::from_desired(&DesiredStateBuilder::new().build(&params).unwrap())
    }

    #[test]
    fn register_arguments() {
        let mut req = request("glrt-abc");
        req.default_image = Some("alpine:latest".into());
        req.template_file = Some(PathBuf::from("/tmp/t.toml"));
        let args = req.arguments(Path::new("/tmp/scratch.toml"));
        assert_eq!(
            args,
            vec![
                "register",
                "--non-interactive",
                "--config",
                "/tmp/scratch.toml",
                "--url",
                "https://gitlab.example.com",
                "--token",
                "glrt-abc",
                "--name",
                "host1",
                "--executor",
                "shell",
                "--docker-image",
                "alpine:latest",
                "--template-config",
                "/tmp/t.toml",
            ]
        );
        assert_eq!(req.environment()["RUNNER_TAG_LIST"], "a,b");
    }

    #[tokio::test]
    async fn register_returns_written_entry_and_leaves_real_file_alone() {
        let fx = fixture();
        fs::write(&fx.config, "concurrent = 1\n").unwrap();
        let document = ConfigDocument::load(&fx.config).unwrap();

        let driver = GitlabRunnerCli::new(fx.context.clone());
        let entry = driver.register(&document, &request("glrt-abc")).await.unwrap();

        assert_eq!(entry["name"].as_str(), Some("host1"));
        assert_eq!(entry["token"].as_str(), Some("glrt-abc"));
        assert_eq!(entry["id"].as_integer(), Some(7));
        assert_eq!(entry["tag_list"].as_str(), Some("a,b"));
        assert_eq!(fs::read_to_string(&fx.config).unwrap(), "concurrent = 1\n");

        let leftovers: Vec<_> = fs::read_dir(fx.config.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".scratch"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn failed_register_is_process_invocation_with_masked_output() {
        let fx = fixture();
        fx.context.add_secret("glrt-rejected");
        let driver = GitlabRunnerCli::new(fx.context.clone());

        let err = driver
            .register(&ConfigDocument::empty(), &request("glrt-rejected"))
            .await
            .unwrap_err();
        match err {
            RegistrarError::ProcessInvocation {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(1));
                assert!(stderr.contains("is not valid"));
                assert!(!stderr.contains("glrt-rejected"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fx.config.exists());
    }

    #[tokio::test]
    async fn unregister_and_status() {
        let fx = fixture();
        let driver = GitlabRunnerCli::new(fx.context.clone());
        driver
            .unregister(&ConfigDocument::empty(), "https://gitlab.example.com", "glrt-abc")
            .await
            .unwrap();

        let status = driver.service_status().await.unwrap();
        assert!(status.stdout_text().contains("Service is running"));
    }

    #[tokio::test]
    async fn missing_binary_is_process_invocation_without_exit_code() {
        let fx = fixture();
        let context = HostContext::new(HostPaths {
            runner_config: fx.config.clone(),
            system_id: PathBuf::from("/nonexistent/.runner_system_id"),
            runner_binary: "/nonexistent/gitlab-runner".into(),
        });
        let driver = GitlabRunnerCli::new(context);
        let err = driver.service_status().await.unwrap_err();
        assert!(matches!(
            err,
            RegistrarError::ProcessInvocation { exit_code: None, .. }
        ));
    }
}
