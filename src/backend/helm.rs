// ABOUTME: Deployment backend driving helm and kubectl as child processes.
// ABOUTME: Tolerates already-exists / not-found so every operation is idempotent.

use super::error::{
    BackendError, CommandFailedSnafu, ParseSnafu, ProbeSnafu, SpawnSnafu, TimeoutSnafu,
};
use super::{DeleteOptions, DeploymentBackend, DeploymentSpec, Release, ReleaseStatus};
use crate::config::BackendConfig;
use crate::http::{HttpClient, HttpError};
use crate::types::Namespace;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use snafu::{IntoError, ResultExt};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Result of a finished backend command.
#[derive(Debug)]
struct CommandOutput {
    stdout: String,
}

#[derive(Debug, Clone)]
pub struct HelmBackend {
    config: BackendConfig,
    http: HttpClient,
}

impl HelmBackend {
    pub fn new(config: BackendConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    /// Run a command to completion, feeding `stdin` if given.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, BackendError> {
        tracing::debug!("Running {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu { program })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await.context(SpawnSnafu { program })?;
        }

        let output = tokio::time::timeout(self.config.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                TimeoutSnafu {
                    program,
                    timeout: self.config.command_timeout,
                }
                .build()
            })?
            .context(SpawnSnafu { program })?;

        if !output.status.success() {
            return CommandFailedSnafu {
                program,
                args: args.join(" "),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .fail();
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    async fn kubectl(&self, args: Vec<String>) -> Result<CommandOutput, BackendError> {
        self.run(&self.config.kubectl, &args, None).await
    }

    pub fn deploy_args(&self, spec: &DeploymentSpec) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            spec.deployment_type.clone(),
            self.config.chart.clone(),
            "--namespace".to_string(),
            spec.namespace.to_string(),
            "--values".to_string(),
            "-".to_string(),
            "--timeout".to_string(),
            format!("{}s", self.config.command_timeout.as_secs()),
        ];
        if let Some(version) = &self.config.chart_version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        args
    }

    /// Reachable in-cluster address of a worker's service.
    pub fn service_address(&self, namespace: &Namespace, deployment_type: &str) -> String {
        format!(
            "{deployment_type}.{namespace}.svc.cluster.local:{}",
            self.config.service_port
        )
    }
}

/// Whether a failed command only reported that the target is already gone
/// or already present.
fn is_benign(err: &BackendError, needles: &[&str]) -> bool {
    err.stderr()
        .is_some_and(|stderr| needles.iter().any(|n| stderr.contains(n)))
}

#[async_trait]
impl DeploymentBackend for HelmBackend {
    async fn init(&self, spec: &DeploymentSpec) -> Result<(), BackendError> {
        let result = self
            .kubectl(vec![
                "create".into(),
                "namespace".into(),
                spec.namespace.to_string(),
            ])
            .await;
        match result {
            Ok(_) => Ok(()),
            // Race: namespace created by an earlier attempt
            Err(e) if is_benign(&e, &["AlreadyExists", "already exists"]) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn deploy(&self, spec: &DeploymentSpec) -> Result<(), BackendError> {
        let values = serde_json::to_vec(&spec.values).context(ParseSnafu {
            program: self.config.helm.clone(),
        })?;
        self.run(&self.config.helm, &self.deploy_args(spec), Some(&values))
            .await?;
        Ok(())
    }

    async fn is_ready(
        &self,
        namespace: &Namespace,
        deployment_type: &str,
    ) -> Result<bool, BackendError> {
        let result = self
            .kubectl(vec![
                "--namespace".into(),
                namespace.to_string(),
                "get".into(),
                "deployment".into(),
                deployment_type.to_string(),
                "--output".into(),
                "json".into(),
            ])
            .await;
        let output = match result {
            Ok(output) => output,
            Err(e) if is_benign(&e, &["NotFound", "not found"]) => return Ok(false),
            Err(e) => return Err(e),
        };
        let deployment: KubeDeployment =
            serde_json::from_str(&output.stdout).context(ParseSnafu {
                program: self.config.kubectl.clone(),
            })?;
        Ok(deployment.is_ready())
    }

    async fn get_hostname(
        &self,
        namespace: &Namespace,
        deployment_type: &str,
    ) -> Result<String, BackendError> {
        Ok(self.service_address(namespace, deployment_type))
    }

    async fn verify_access(&self, address: &str) -> Result<bool, BackendError> {
        let url = format!("http://{}{}", address, self.config.probe_path);
        match self.http.get(&url, &[], self.config.probe_timeout).await {
            Ok(response) => {
                let ok = response.is_success() && response.text().contains(&self.config.probe_expect);
                if !ok {
                    tracing::debug!(url = %url, status = response.status, "access probe rejected");
                }
                Ok(ok)
            }
            Err(e @ HttpError::InvalidUrl { .. }) => Err(ProbeSnafu.into_error(e)),
            Err(e) => {
                tracing::debug!(url = %url, "access probe failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn delete(
        &self,
        namespace: &Namespace,
        deployment_type: &str,
        options: DeleteOptions,
    ) -> Result<(), BackendError> {
        if options.delete_release {
            let result = self
                .run(
                    &self.config.helm,
                    &[
                        "uninstall".into(),
                        deployment_type.to_string(),
                        "--namespace".into(),
                        namespace.to_string(),
                    ],
                    None,
                )
                .await;
            match result {
                Ok(_) => {}
                Err(e) if is_benign(&e, &["not found"]) => {}
                Err(e) => return Err(e),
            }
        }
        if options.delete_namespace {
            self.kubectl(vec![
                "delete".into(),
                "namespace".into(),
                namespace.to_string(),
                "--ignore-not-found".into(),
                "--wait=false".into(),
            ])
            .await?;
        }
        Ok(())
    }

    async fn list_releases(&self) -> Result<Vec<Release>, BackendError> {
        let output = self
            .run(
                &self.config.helm,
                &[
                    "list".into(),
                    "--all-namespaces".into(),
                    "--all".into(),
                    "--output".into(),
                    "json".into(),
                ],
                None,
            )
            .await?;
        let releases = parse_helm_list(&output.stdout).context(ParseSnafu {
            program: self.config.helm.clone(),
        })?;
        Ok(releases
            .into_iter()
            .filter(|r| r.name == self.config.deployment_type)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct HelmListEntry {
    name: String,
    namespace: String,
    revision: String,
    updated: String,
    status: String,
}

fn parse_helm_list(json: &str) -> Result<Vec<Release>, serde_json::Error> {
    let entries: Vec<HelmListEntry> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let Some(updated) = parse_helm_time(&entry.updated) else {
                tracing::warn!(release = %entry.name, namespace = %entry.namespace, "unparseable release time: {}", entry.updated);
                return None;
            };
            Some(Release {
                revision: entry.revision.parse().unwrap_or(0),
                status: ReleaseStatus::parse(&entry.status),
                name: entry.name,
                namespace: entry.namespace,
                updated,
            })
        })
        .collect())
}

/// Parse helm's release timestamp, e.g. `2024-03-04 10:11:12.123456 +0000 UTC`.
pub fn parse_helm_time(value: &str) -> Option<DateTime<Utc>> {
    let mut parts = value.split_whitespace();
    let (date, time, offset) = (parts.next()?, parts.next()?, parts.next()?);
    let stamp = format!("{date} {time} {offset}");
    DateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.f %z")
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[derive(Debug, Default, Deserialize)]
struct KubeDeployment {
    #[serde(default)]
    spec: KubeDeploymentSpec,
    #[serde(default)]
    status: KubeDeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
struct KubeDeploymentSpec {
    #[serde(default)]
    replicas: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeDeploymentStatus {
    #[serde(default)]
    ready_replicas: u32,
}

impl KubeDeployment {
    fn is_ready(&self) -> bool {
        let desired = self.spec.replicas.unwrap_or(1);
        desired > 0 && self.status.ready_replicas >= desired
    }
}
