use std::collections::HashMap;

use bollard::models::{BuildInfo, CreateImageInfo, EventMessage, ExecInspectResponse, SystemVersion};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Client, Request};
use crate::auth::{self, encode_full_header, encode_header};
use crate::error::DockerError;
use crate::stream::{JsonStream, LogStream, StreamingResponse, collect_output};

pub const X_REGISTRY_AUTH: &str = "x-registry-auth";
pub const X_REGISTRY_CONFIG: &str = "x-registry-config";

const RAW_STREAM: &str = "application/vnd.docker.raw-stream";
const MULTIPLEXED_STREAM: &str = "application/vnd.docker.multiplexed-stream";

/// Filters for [`Client::events`]
#[derive(Debug, Clone, Default)]
pub struct EventsOptions {
    /// Unix timestamp to replay events from
    pub since: Option<i64>,
    /// Stop streaming at this Unix timestamp
    pub until: Option<i64>,
    /// e.g. `{"type": ["container"], "event": ["start"]}`
    pub filters: HashMap<String, Vec<String>>,
}

/// Options for [`Client::logs`]
#[derive(Debug, Clone)]
pub struct LogsOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub follow: bool,
    pub timestamps: bool,
    pub since: Option<i64>,
    /// Requires API 1.35
    pub until: Option<i64>,
    /// Number of lines from the end, or `all`
    pub tail: Option<String>,
    /// Whether the container has a TTY; looked up with an inspect call when unset
    pub tty: Option<bool>,
}

impl Default for LogsOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            since: None,
            until: None,
            tail: None,
            tty: None,
        }
    }
}

/// Options for [`Client::attach`]
#[derive(Debug, Clone)]
pub struct AttachOptions {
    pub stdout: bool,
    pub stderr: bool,
    /// Keep the stream open for output produced after attaching
    pub stream: bool,
    /// Replay output produced before attaching
    pub logs: bool,
    /// Whether the container has a TTY; looked up with an inspect call when unset
    pub tty: Option<bool>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            stream: false,
            logs: false,
            tty: None,
        }
    }
}

/// Options for [`Client::exec_create`]
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cmd: Vec<String>,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
    pub privileged: bool,
    pub user: Option<String>,
    /// Requires API 1.25
    pub env: Vec<String>,
    /// Requires API 1.35
    pub working_dir: Option<String>,
}

impl ExecOptions {
    /// Capture stdout and stderr of `cmd`
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            stdout: true,
            stderr: true,
            ..Default::default()
        }
    }
}

/// Options for [`Client::pull_image`]
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Taken from the image reference when unset, then `latest`
    pub tag: Option<String>,
    /// e.g. `linux/arm64`, requires API 1.32
    pub platform: Option<String>,
}

/// Options for [`Client::build_image`]
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Name and optional tag for the result, e.g. `app:latest`
    pub tag: Option<String>,
    /// Path of the Dockerfile inside the context
    pub dockerfile: Option<String>,
    pub quiet: bool,
    pub nocache: bool,
    /// Remove intermediate containers after a successful build
    pub rm: bool,
    pub forcerm: bool,
    pub pull: bool,
    pub buildargs: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub target: Option<String>,
    /// Requires API 1.32
    pub platform: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            tag: None,
            dockerfile: None,
            quiet: false,
            nocache: false,
            rm: true,
            forcerm: false,
            pull: false,
            buildargs: HashMap::new(),
            labels: HashMap::new(),
            target: None,
            platform: None,
        }
    }
}

#[derive(Deserialize)]
struct CreatedId {
    #[serde(rename = "Id")]
    id: String,
}

/// Split `repo[:tag]` or `repo@digest`, leaving registry ports alone
#[must_use]
pub fn parse_repository_tag(name: &str) -> (&str, Option<&str>) {
    if let Some((repo, digest)) = name.split_once('@') {
        return (repo, Some(digest));
    }
    match name.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
        _ => (name, None),
    }
}

impl Client {
    /// `GET /_ping`, returns the daemon's reply (normally `OK`)
    pub async fn ping(&self) -> Result<String, DockerError> {
        let response = self.request(Request::get("/_ping").unversioned()).await?;
        Ok(response.text())
    }

    pub async fn version(&self) -> Result<SystemVersion, DockerError> {
        self.request(Request::get("/version")).await?.json()
    }

    /// Live daemon events, one document per event
    pub async fn events(
        &self,
        options: EventsOptions,
    ) -> Result<JsonStream<EventMessage>, DockerError> {
        let EventsOptions {
            since,
            until,
            filters,
        } = options;
        let mut request = Request::get("/events")
            .query_opt("since", since)
            .query_opt("until", until);
        if !filters.is_empty() {
            request = request.query_json("filters", &filters)?;
        }

        Ok(self.stream(request).await?.into_json())
    }

    /// Container output as log frames
    ///
    /// Output of TTY containers is not multiplexed and arrives as
    /// [`LogOutput::Console`](bollard::container::LogOutput::Console).
    pub async fn logs(
        &self,
        container: &str,
        options: LogsOptions,
    ) -> Result<LogStream, DockerError> {
        if options.until.is_some() {
            self.check_min_version("until", "1.35")?;
        }

        let tty = match options.tty {
            Some(tty) => tty,
            None => self.container_tty(container).await?,
        };

        let request = Request::get(format!("/containers/{}/logs", container))
            .query_bool("stdout", options.stdout)
            .query_bool("stderr", options.stderr)
            .query_bool("follow", options.follow)
            .query_bool("timestamps", options.timestamps)
            .query_opt("since", options.since)
            .query_opt("until", options.until)
            .query_opt("tail", options.tail);

        let response = self.stream(request).await?;
        let tty = stream_is_tty(&response).unwrap_or(tty);
        Ok(response.into_frames(tty))
    }

    /// Container output collected into `(stdout, stderr)`
    pub async fn logs_output(
        &self,
        container: &str,
        options: LogsOptions,
    ) -> Result<(Vec<u8>, Vec<u8>), DockerError> {
        let frames = self.logs(container, options).await?;
        collect_output(frames).await
    }

    /// Attach to a container's output
    ///
    /// Without `stream` the daemon ends the body once the requested output is sent;
    /// with it the body stays open until the container stops or the stream is closed.
    pub async fn attach(
        &self,
        container: &str,
        options: AttachOptions,
    ) -> Result<LogStream, DockerError> {
        let tty = match options.tty {
            Some(tty) => tty,
            None => self.container_tty(container).await?,
        };

        let request = Request::post(format!("/containers/{}/attach", container))
            .query_bool("logs", options.logs)
            .query_bool("stdout", options.stdout)
            .query_bool("stderr", options.stderr)
            .query_bool("stream", options.stream);

        let response = self.stream(request).await?;
        let tty = stream_is_tty(&response).unwrap_or(tty);
        Ok(response.into_frames(tty))
    }

    async fn container_tty(&self, container: &str) -> Result<bool, DockerError> {
        let inspect: Value = self
            .request(Request::get(format!("/containers/{}/json", container)))
            .await?
            .json()?;
        Ok(inspect
            .pointer("/Config/Tty")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Create an exec instance, returning its id
    pub async fn exec_create(
        &self,
        container: &str,
        options: ExecOptions,
    ) -> Result<String, DockerError> {
        let mut body = Map::new();
        body.insert("AttachStdin".into(), Value::Bool(false));
        body.insert("AttachStdout".into(), Value::Bool(options.stdout));
        body.insert("AttachStderr".into(), Value::Bool(options.stderr));
        body.insert("Tty".into(), Value::Bool(options.tty));
        body.insert("Privileged".into(), Value::Bool(options.privileged));
        body.insert("Cmd".into(), json!(options.cmd));
        if let Some(user) = options.user {
            body.insert("User".into(), Value::String(user));
        }
        if !options.env.is_empty() {
            self.check_min_version("Setting environment for exec", "1.25")?;
            body.insert("Env".into(), json!(options.env));
        }
        if let Some(workdir) = options.working_dir {
            self.check_min_version("workdir", "1.35")?;
            body.insert("WorkingDir".into(), Value::String(workdir));
        }

        let request = Request::post(format!("/containers/{}/exec", container)).json(&body)?;
        let created: CreatedId = self.request(request).await?.json()?;
        log::debug!("Created exec {} in {}", created.id, container);
        Ok(created.id)
    }

    /// Start an exec instance and stream its output
    pub async fn exec_start(&self, exec_id: &str, tty: bool) -> Result<LogStream, DockerError> {
        let response = self.start_exec(exec_id, false, tty).await?;
        let tty = stream_is_tty(&response).unwrap_or(tty);
        Ok(response.into_frames(tty))
    }

    /// Start an exec instance and wait for it, returning `(stdout, stderr)`
    pub async fn exec_output(
        &self,
        exec_id: &str,
        tty: bool,
    ) -> Result<(Vec<u8>, Vec<u8>), DockerError> {
        let frames = self.exec_start(exec_id, tty).await?;
        collect_output(frames).await
    }

    /// Start an exec instance without attaching to it
    pub async fn exec_start_detached(&self, exec_id: &str) -> Result<(), DockerError> {
        let response = self.start_exec(exec_id, true, false).await?;
        response.bytes().await?;
        Ok(())
    }

    pub async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspectResponse, DockerError> {
        self.request(Request::get(format!("/exec/{}/json", exec_id)))
            .await?
            .json()
    }

    async fn start_exec(
        &self,
        exec_id: &str,
        detach: bool,
        tty: bool,
    ) -> Result<StreamingResponse, DockerError> {
        let request = Request::post(format!("/exec/{}/start", exec_id))
            .json(&json!({ "Detach": detach, "Tty": tty }))?;
        self.stream(request).await
    }

    /// Pull an image, streaming progress
    ///
    /// Registry credentials for the image's registry are sent as `X-Registry-Auth` when
    /// the client has a credential provider that knows them.
    pub async fn pull_image(
        &self,
        image: &str,
        options: PullOptions,
    ) -> Result<JsonStream<CreateImageInfo>, DockerError> {
        let (repository, image_tag) = parse_repository_tag(image);
        let tag = options
            .tag
            .or_else(|| image_tag.map(str::to_string))
            .unwrap_or_else(|| "latest".to_string());

        let mut request = Request::post("/images/create")
            .query("fromImage", repository)
            .query("tag", tag);
        if let Some(platform) = options.platform {
            self.check_min_version("platform", "1.32")?;
            request = request.query("platform", platform);
        }

        let (registry, _) = auth::resolve_repository_name(repository)?;
        if let Some(header) = self.registry_auth(&registry)? {
            request = request.header(HeaderName::from_static(X_REGISTRY_AUTH), header);
        }

        Ok(self.stream(request).await?.into_json())
    }

    fn registry_auth(&self, registry: &str) -> Result<Option<HeaderValue>, DockerError> {
        let Some(credentials) = self.credentials().and_then(|p| p.credentials(registry)) else {
            log::debug!("No auth config found for {}", registry);
            return Ok(None);
        };

        log::debug!("Sending auth for {}", registry);
        header_value(encode_header(&credentials)?).map(Some)
    }

    /// Build an image from a tar archive of the build context
    ///
    /// Every credential the provider knows is sent as `X-Registry-Config`, since the
    /// Dockerfile may pull from any registry.
    pub async fn build_image(
        &self,
        context: Bytes,
        options: BuildOptions,
    ) -> Result<JsonStream<BuildInfo>, DockerError> {
        let mut request = Request::post("/build")
            .query_opt("t", options.tag)
            .query_opt("dockerfile", options.dockerfile)
            .query_bool("q", options.quiet)
            .query_bool("nocache", options.nocache)
            .query_bool("rm", options.rm)
            .query_bool("forcerm", options.forcerm)
            .query_bool("pull", options.pull)
            .query_opt("target", options.target);
        if !options.buildargs.is_empty() {
            request = request.query_json("buildargs", &options.buildargs)?;
        }
        if !options.labels.is_empty() {
            request = request.query_json("labels", &options.labels)?;
        }
        if let Some(platform) = options.platform {
            self.check_min_version("platform", "1.32")?;
            request = request.query("platform", platform);
        }

        if let Some(provider) = self.credentials() {
            let all = provider.all_credentials();
            if !all.is_empty() {
                log::debug!("Sending auth config for {} registries", all.len());
                let header = header_value(encode_full_header(&all)?)?;
                request = request.header(HeaderName::from_static(X_REGISTRY_CONFIG), header);
            }
        }

        let request = request.raw_body(context, "application/x-tar");
        Ok(self.stream(request).await?.into_json())
    }
}

fn header_value(encoded: String) -> Result<HeaderValue, DockerError> {
    HeaderValue::try_from(encoded)
        .map_err(|e| DockerError::InvalidRequest(format!("invalid auth header: {}", e)))
}

/// Newer daemons say in the content type whether the stream is multiplexed
fn stream_is_tty(response: &StreamingResponse) -> Option<bool> {
    let content_type = response.headers().get(CONTENT_TYPE)?.to_str().ok()?;
    if content_type.starts_with(RAW_STREAM) {
        Some(true)
    } else if content_type.starts_with(MULTIPLEXED_STREAM) {
        Some(false)
    } else {
        None
    }
}
