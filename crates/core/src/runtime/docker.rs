use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{
    BuildImageOptions, ImportImageOptions, ListImagesOptions, RemoveImageOptions, TagImageOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;

use super::{ContainerRuntime, ContainerSpec, ImageBuild, ImageSummary, LineForwarder};
use crate::error::RuntimeError;
use crate::executor::{LogSink, LogStream};

/// Seconds the daemon waits after SIGTERM before killing a stopped container.
const STOP_GRACE_SECS: i64 = 10;

/// Archive name used when the Dockerfile lives outside the build context.
const EXTERNAL_DOCKERFILE: &str = ".geoengine.Dockerfile";

/// Runtime backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    ///
    /// The connection is lazy; an unreachable daemon surfaces on first use.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| match e {
                e if is_not_found(&e) => RuntimeError::ImageNotFound(spec.image.clone()),
                e => RuntimeError::StartFailed(format!("{}: {e}", spec.image)),
            })?;
        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "{warning}");
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))
    }

    async fn follow_logs(&self, id: &str, sink: LogSink) -> Result<(), RuntimeError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stdout = LineForwarder::new(LogStream::Stdout, sink.clone());
        let mut stderr = LineForwarder::new(LogStream::Stderr, sink);

        let mut stream = self.docker.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk? {
                LogOutput::StdErr { message } => stderr.push(&message),
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.push(&message)
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        stdout.finish();
        stderr.finish();
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => {
                tracing::warn!(container = %id, "Wait stream ended without an exit status");
                Ok(-1)
            }
        }
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        let options = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_image(&self, build: &ImageBuild) -> Result<(), RuntimeError> {
        let context = build.context.clone();
        let dockerfile = build.dockerfile.clone();
        let (archive, dockerfile_name) =
            tokio::task::spawn_blocking(move || context_archive(&context, &dockerfile))
                .await
                .map_err(|e| RuntimeError::BuildFailed(format!("context archive task failed: {e}")))??;

        let options = BuildImageOptions {
            t: build.tag.clone(),
            dockerfile: dockerfile_name,
            buildargs: build
                .args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
            nocache: build.no_cache,
            rm: true,
            ..Default::default()
        };

        tracing::info!(tag = %build.tag, dockerfile = %build.dockerfile.display(), "Building image");
        let mut stream = self.docker.build_image(options, None, Some(archive.into()));
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| RuntimeError::BuildFailed(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(RuntimeError::BuildFailed(error));
            }
            if let Some(line) = info.stream.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
                tracing::info!(target: "geoengine::build", "{line}");
            }
        }
        tracing::info!(tag = %build.tag, "Image built");
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        let (repo, tag) = split_reference(target);
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        self.docker.tag_image(source, Some(options)).await?;
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, RuntimeError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String>::default()))
            .await?;
        Ok(images
            .into_iter()
            .map(|img| ImageSummary {
                id: img.id,
                tags: img.repo_tags,
                size: img.size,
                created: img.created,
            })
            .collect())
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        match self.docker.remove_image(image, Some(options), None).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(RuntimeError::ImageNotFound(image.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn import_image(&self, archive: &Path) -> Result<Vec<String>, RuntimeError> {
        let contents = tokio::fs::read(archive).await?;
        let mut stream =
            self.docker
                .import_image(ImportImageOptions::default(), contents.into(), None);

        let mut loaded = Vec::new();
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| RuntimeError::ImportFailed(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(RuntimeError::ImportFailed(error));
            }
            if let Some(reference) = info.stream.as_deref().and_then(loaded_reference) {
                loaded.push(reference);
            }
        }
        if loaded.is_empty() {
            return Err(RuntimeError::ImportFailed(format!(
                "{} did not contain an image",
                archive.display()
            )));
        }
        Ok(loaded)
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let binds = spec.mounts.iter().map(|m| m.bind_spec()).collect();
    let env = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.args.clone()),
        env: Some(env),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            binds: Some(binds),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `repo[:tag]` split at the last colon that is not part of a registry port.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

/// Tar the build context. Returns the archive and the Dockerfile's path
/// inside it.
fn context_archive(context: &Path, dockerfile: &Path) -> Result<(Vec<u8>, String), RuntimeError> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.append_dir_all(".", context)?;
    let name = match dockerfile.strip_prefix(context) {
        Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
        Err(_) => {
            archive.append_path_with_name(dockerfile, EXTERNAL_DOCKERFILE)?;
            EXTERNAL_DOCKERFILE.to_string()
        }
    };
    Ok((archive.into_inner()?, name))
}

/// Image reference from a `docker load` progress line.
fn loaded_reference(line: &str) -> Option<String> {
    let line = line.trim();
    line.strip_prefix("Loaded image: ")
        .or_else(|| line.strip_prefix("Loaded image ID: "))
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Mount;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        let mut env = BTreeMap::new();
        env.insert("GEOENGINE_OUTPUT_DIR".to_string(), "/output".to_string());
        ContainerSpec {
            name: "geoengine-job-1".into(),
            image: "geoengine-local/ndvi:1.0.0".into(),
            args: vec!["python".into(), "main.py".into(), "--input".into(), "/inputs/input/a.tif".into()],
            mounts: vec![
                Mount {
                    host_path: PathBuf::from("/data/a.tif"),
                    container_path: "/inputs/input/a.tif".into(),
                    readonly: true,
                },
                Mount {
                    host_path: PathBuf::from("scratch"),
                    container_path: "/scratch".into(),
                    readonly: false,
                },
            ],
            env,
            output_dir: None,
        }
    }

    #[test]
    fn container_config_carries_binds_env_and_argv() {
        let config = container_config(&spec());
        assert_eq!(config.image.as_deref(), Some("geoengine-local/ndvi:1.0.0"));
        assert_eq!(config.cmd.unwrap()[..2], ["python", "main.py"]);
        assert_eq!(config.env.unwrap(), vec!["GEOENGINE_OUTPUT_DIR=/output"]);
        assert_eq!(
            config.host_config.unwrap().binds.unwrap(),
            vec!["/data/a.tif:/inputs/input/a.tif:ro", "scratch:/scratch"]
        );
    }

    #[test]
    fn references_split_on_the_tag_colon() {
        assert_eq!(split_reference("geoengine-local/ndvi:1.1.0"), ("geoengine-local/ndvi", "1.1.0"));
        assert_eq!(split_reference("ndvi"), ("ndvi", "latest"));
        assert_eq!(split_reference("registry:5000/ndvi"), ("registry:5000/ndvi", "latest"));
        assert_eq!(split_reference("registry:5000/ndvi:2"), ("registry:5000/ndvi", "2"));
    }

    #[test]
    fn load_progress_lines_name_the_image() {
        assert_eq!(
            loaded_reference("Loaded image: geoengine-local/ndvi:1.0.0\n").as_deref(),
            Some("geoengine-local/ndvi:1.0.0")
        );
        assert_eq!(loaded_reference("Loaded image ID: sha256:abc").as_deref(), Some("sha256:abc"));
        assert_eq!(loaded_reference("Loading layer 1/3"), None);
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut names: Vec<String> = tar::Archive::new(archive)
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().trim_start_matches("./").to_string())
            .filter(|n| !n.is_empty() && n != ".")
            .collect();
        names.sort();
        names
    }

    #[test]
    fn context_archive_holds_the_context_and_nested_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docker")).unwrap();
        std::fs::write(dir.path().join("docker/Dockerfile"), "FROM alpine\n").unwrap();
        std::fs::write(dir.path().join("main.py"), "print()\n").unwrap();

        let (archive, name) =
            context_archive(dir.path(), &dir.path().join("docker/Dockerfile")).unwrap();
        assert_eq!(name, "docker/Dockerfile");
        let names = entry_names(&archive);
        assert!(names.contains(&"docker/Dockerfile".to_string()));
        assert!(names.contains(&"main.py".to_string()));
    }

    #[test]
    fn dockerfile_outside_the_context_is_added() {
        let context = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(context.path().join("main.py"), "print()\n").unwrap();
        std::fs::write(other.path().join("Dockerfile"), "FROM alpine\n").unwrap();

        let (archive, name) =
            context_archive(context.path(), &other.path().join("Dockerfile")).unwrap();
        assert_eq!(name, EXTERNAL_DOCKERFILE);
        assert!(entry_names(&archive).contains(&EXTERNAL_DOCKERFILE.to_string()));
    }
}
