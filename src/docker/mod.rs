//! Container runtime access
//!
//! The migrator only talks to the container runtime through the
//! [`ContainerRuntime`] trait. [`DockerCli`] implements it on top of the
//! `docker` command line, run through a [`CommandRunner`] and wrapped by the
//! local [`PrivilegeDetector`].

pub mod size;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::privilege::{CommandRunner, LocalRunner, PrivilegeDetector, PrivilegeState};
use crate::shell::{validate_identifier, CommandLine};

pub use size::{format_bytes, parse_size_to_bytes};

/// Image used for the throwaway archive containers
pub const HELPER_IMAGE: &str = "alpine";

/// Placeholder for an unknown mount path
pub const UNKNOWN_MOUNT: &str = "N/A";

/// Placeholder for an unknown size
pub const UNKNOWN_SIZE: &str = "Unknown";

/// A named volume as seen by the migrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// First container found referencing the volume
    pub container: String,
    /// Mount destination inside `container`
    pub mount_path: String,
    /// Human-readable size as reported by the runtime
    pub size: String,
    /// Size in bytes (0 when unknown)
    pub size_bytes: u64,
}

/// Container runtime operations the migrator depends on
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Resolve the local sudo requirement; must run before anything else
    async fn detect_privilege(&self) -> Result<PrivilegeState>;

    /// Names of the named volumes mounted by `container`
    async fn list_volumes(&self, container: &str) -> Result<Vec<String>>;

    /// Mount destination of `volume` inside `container`
    async fn mount_path_of(&self, container: &str, volume: &str) -> Result<String>;

    /// Human-readable size and byte count of `volume`
    async fn size_of(&self, volume: &str) -> Result<(String, u64)>;

    /// Archive `volume` into `dir`, returning the archive path
    async fn export(&self, volume: &str, dir: &Path) -> Result<PathBuf>;
}

/// Archive file name for a volume
pub fn archive_name(volume: &str) -> String {
    format!("{}.tar.gz", volume)
}

/// Query every container and build the deduplicated volume list.
///
/// Order follows the containers, then the mounts of each container. A volume
/// shared by several containers is owned by the first one that lists it.
/// Mount path and size lookups degrade to placeholders instead of failing.
pub async fn discover_volumes(
    runtime: &dyn ContainerRuntime,
    containers: &[String],
) -> Result<Vec<Volume>> {
    let mut volumes: Vec<Volume> = Vec::new();

    for container in containers {
        let names = runtime.list_volumes(container).await?;
        debug!(container = %container, count = names.len(), "Listed volumes");

        for name in names {
            if volumes.iter().any(|v| v.name == name) {
                debug!(volume = %name, container = %container, "Volume already discovered, skipping");
                continue;
            }

            let mount_path = match runtime.mount_path_of(container, &name).await {
                Ok(path) => path,
                Err(e) => {
                    debug!(volume = %name, "Mount path lookup failed: {}", e);
                    UNKNOWN_MOUNT.to_string()
                }
            };

            let (size, size_bytes) = match runtime.size_of(&name).await {
                Ok(size) => size,
                Err(e) => {
                    warn!(volume = %name, "Size lookup failed: {}", e);
                    (UNKNOWN_SIZE.to_string(), 0)
                }
            };

            volumes.push(Volume {
                name,
                container: container.clone(),
                mount_path,
                size,
                size_bytes,
            });
        }
    }

    Ok(volumes)
}

/// `docker` CLI backed runtime
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    privilege: PrivilegeDetector,
}

impl DockerCli {
    /// Runtime driving the local docker daemon
    pub fn local() -> Self {
        Self::new(Arc::new(LocalRunner::new()))
    }

    /// Runtime issuing its commands through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            privilege: PrivilegeDetector::new("local"),
        }
    }

    /// Whether local docker commands run behind sudo
    pub fn requires_sudo(&self) -> bool {
        self.privilege.is_required()
    }

    async fn docker<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self.privilege.docker(args)?;
        let output = self.runner.run(&command).await?;
        Ok(output.stdout)
    }

    async fn inspect(&self, container: &str) -> Result<Vec<MountInfo>> {
        let stdout = match self.docker(["inspect", container]).await {
            Ok(stdout) => stdout,
            Err(MigrateError::CommandFailed { stderr, .. })
                if stderr.contains("No such object") || stderr.contains("No such container") =>
            {
                return Err(MigrateError::ContainerNotFound(container.to_string()));
            }
            Err(e) => return Err(e),
        };

        parse_inspect_mounts(&stdout)?
            .ok_or_else(|| MigrateError::ContainerNotFound(container.to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn detect_privilege(&self) -> Result<PrivilegeState> {
        self.privilege.detect(self.runner.as_ref()).await
    }

    async fn list_volumes(&self, container: &str) -> Result<Vec<String>> {
        let mounts = self.inspect(container).await?;
        Ok(mounts
            .into_iter()
            .filter(MountInfo::is_named_volume)
            .map(|m| m.name)
            .collect())
    }

    async fn mount_path_of(&self, container: &str, volume: &str) -> Result<String> {
        let mounts = self.inspect(container).await?;
        mounts
            .into_iter()
            .find(|m| m.is_named_volume() && m.name == volume)
            .map(|m| m.destination)
            .ok_or_else(|| {
                MigrateError::Docker(format!(
                    "volume {} not found in container {}",
                    volume, container
                ))
            })
    }

    async fn size_of(&self, volume: &str) -> Result<(String, u64)> {
        let stdout = self.docker(["system", "df", "-v"]).await?;
        Ok(match parse_volume_size(&stdout, volume) {
            Some(size) => {
                let bytes = parse_size_to_bytes(&size);
                (size, bytes)
            }
            None => ("0B".to_string(), 0),
        })
    }

    async fn export(&self, volume: &str, dir: &Path) -> Result<PathBuf> {
        if !validate_identifier(volume) {
            return Err(MigrateError::InvalidIdentifier(volume.to_string()));
        }

        let archive = dir.join(archive_name(volume));
        debug!(volume = %volume, path = %archive.display(), "Exporting volume");

        let command = self.privilege.wrap_command(export_command(volume, dir))?;
        self.runner
            .run(&command)
            .await
            .map_err(|e| MigrateError::export(volume, e.to_string()))?;

        let metadata = tokio::fs::metadata(&archive).await.map_err(|_| {
            MigrateError::export(
                volume,
                format!("archive {} was not created", archive.display()),
            )
        })?;

        debug!(
            volume = %volume,
            size = %format_bytes(metadata.len()),
            "Exported volume"
        );
        Ok(archive)
    }
}

/// `docker run` invocation archiving `volume` (read-only) into `dir`
pub fn export_command(volume: &str, dir: &Path) -> CommandLine {
    CommandLine::new(crate::privilege::DOCKER).args([
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:/data:ro", volume),
        "-v".to_string(),
        format!("{}:/backup", dir.display()),
        HELPER_IMAGE.to_string(),
        "tar".to_string(),
        "czf".to_string(),
        format!("/backup/{}", archive_name(volume)),
        "-C".to_string(),
        "/data".to_string(),
        ".".to_string(),
    ])
}

/// Docker arguments creating `volume`
pub fn volume_create_args(volume: &str) -> Vec<String> {
    vec!["volume".into(), "create".into(), volume.into()]
}

/// Docker arguments removing `volume`
pub fn volume_remove_args(volume: &str) -> Vec<String> {
    vec!["volume".into(), "rm".into(), volume.into()]
}

/// Docker arguments unpacking `dir/file` into `volume`
pub fn import_args(volume: &str, dir: &str, file: &str) -> Vec<String> {
    vec![
        "run".into(),
        "--rm".into(),
        "-v".into(),
        format!("{}:/data", volume),
        "-v".into(),
        format!("{}:/backup", dir),
        HELPER_IMAGE.into(),
        "tar".into(),
        "xzf".into(),
        format!("/backup/{}", file),
        "-C".into(),
        "/data".into(),
    ]
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "Mounts", default)]
    mounts: Vec<MountInfo>,
}

/// One entry of a container's `Mounts`
#[derive(Debug, Clone, Deserialize)]
pub struct MountInfo {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Destination", default)]
    pub destination: String,
}

impl MountInfo {
    /// Named volumes only; bind mounts and tmpfs are skipped
    fn is_named_volume(&self) -> bool {
        self.kind == "volume" && !self.name.is_empty()
    }
}

/// Mounts of the first container in `docker inspect` output, `None` if empty
pub fn parse_inspect_mounts(json: &str) -> Result<Option<Vec<MountInfo>>> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)
        .map_err(|e| MigrateError::Docker(format!("failed to parse inspect output: {}", e)))?;

    Ok(entries.into_iter().next().map(|entry| entry.mounts))
}

/// Size column for `volume` in the volumes section of `docker system df -v`
pub fn parse_volume_size(output: &str, volume: &str) -> Option<String> {
    let mut in_volumes = false;

    for line in output.lines() {
        if line.contains("VOLUME NAME") {
            in_volumes = true;
            continue;
        }
        if !in_volumes {
            continue;
        }
        if line.trim().is_empty() {
            break;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 3 && fields[0] == volume {
            return Some(fields[2].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::CommandOutput;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const DF_OUTPUT: &str = "\
Images space usage:

REPOSITORY   TAG       IMAGE ID       CREATED       SIZE      SHARED SIZE   UNIQUE SIZE   CONTAINERS
alpine       latest    c1aabb73d233   2 weeks ago   7.33MB    0B            7.33MB        0

Local Volumes space usage:

VOLUME NAME   LINKS     SIZE
shared        2         1.5GB
db-data       1         512MB
db            1         12kB

Build cache usage: 0B
";

    const INSPECT_WEB: &str = r#"[{
        "Id": "abc",
        "Name": "/web",
        "Mounts": [
            {"Type": "volume", "Name": "shared", "Source": "/var/lib/docker/volumes/shared/_data", "Destination": "/srv/shared"},
            {"Type": "bind", "Source": "/etc/localtime", "Destination": "/etc/localtime"},
            {"Type": "volume", "Name": "web-cache", "Destination": "/cache"}
        ]
    }]"#;

    #[test]
    fn test_parse_volume_size() {
        assert_eq!(parse_volume_size(DF_OUTPUT, "shared").as_deref(), Some("1.5GB"));
        assert_eq!(parse_volume_size(DF_OUTPUT, "db").as_deref(), Some("12kB"));
        assert_eq!(parse_volume_size(DF_OUTPUT, "db-data").as_deref(), Some("512MB"));
        assert_eq!(parse_volume_size(DF_OUTPUT, "missing"), None);
        assert_eq!(parse_volume_size(DF_OUTPUT, "alpine"), None);
    }

    #[test]
    fn test_parse_inspect_mounts() {
        let mounts = parse_inspect_mounts(INSPECT_WEB).unwrap().unwrap();
        assert_eq!(mounts.len(), 3);
        let named: Vec<_> = mounts.iter().filter(|m| m.is_named_volume()).collect();
        assert_eq!(named.len(), 2);
        assert_eq!(named[0].destination, "/srv/shared");

        assert!(parse_inspect_mounts("[]").unwrap().is_none());
        assert!(parse_inspect_mounts("not json").is_err());
    }

    #[test]
    fn test_export_command() {
        let cmd = export_command("db-data", Path::new("/tmp/volume-migration-1"));
        assert_eq!(
            cmd.to_shell_string(),
            "docker run --rm -v 'db-data:/data:ro' -v '/tmp/volume-migration-1:/backup' alpine \
             tar czf /backup/db-data.tar.gz -C /data ."
        );
    }

    #[test]
    fn test_import_args() {
        let cmd = CommandLine::new("docker").args(import_args("db", "/tmp/stage dir", "db.tar.gz"));
        assert_eq!(
            cmd.to_shell_string(),
            "docker run --rm -v 'db:/data' -v '/tmp/stage dir:/backup' alpine tar xzf /backup/db.tar.gz -C /data"
        );
    }

    /// Fake runner answering by the docker subcommand
    struct ScriptedRunner {
        replies: HashMap<String, std::result::Result<String, String>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            let mut replies = HashMap::new();
            replies.insert("docker ps".to_string(), Ok(String::new()));
            replies.insert("docker inspect web".to_string(), Ok(INSPECT_WEB.to_string()));
            replies.insert(
                "docker inspect ghost".to_string(),
                Err("Error: No such object: ghost".to_string()),
            );
            replies.insert("docker system df -v".to_string(), Ok(DF_OUTPUT.to_string()));
            Self {
                replies,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
            let line = command.to_shell_string();
            self.seen.lock().unwrap().push(line.clone());
            match self.replies.get(&line) {
                Some(Ok(stdout)) => Ok(CommandOutput {
                    stdout: stdout.clone(),
                    stderr: String::new(),
                    exit_code: Some(0),
                }),
                Some(Err(stderr)) => Err(MigrateError::CommandFailed {
                    command: line,
                    status: 1,
                    stderr: stderr.clone(),
                }),
                None => Err(MigrateError::CommandFailed {
                    command: line,
                    status: 127,
                    stderr: "unexpected command".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_docker_cli_queries() {
        let runner = Arc::new(ScriptedRunner::new());
        let docker = DockerCli::new(runner.clone());

        assert_eq!(
            docker.detect_privilege().await.unwrap(),
            PrivilegeState::NotRequired
        );
        assert!(!docker.requires_sudo());

        assert_eq!(
            docker.list_volumes("web").await.unwrap(),
            vec!["shared", "web-cache"]
        );
        assert_eq!(
            docker.mount_path_of("web", "shared").await.unwrap(),
            "/srv/shared"
        );
        assert_eq!(
            docker.size_of("shared").await.unwrap(),
            ("1.5GB".to_string(), 1024 * 1024 * 1024 * 3 / 2)
        );
        assert_eq!(
            docker.size_of("web-cache").await.unwrap(),
            ("0B".to_string(), 0)
        );

        let err = docker.list_volumes("ghost").await.unwrap_err();
        assert!(matches!(err, MigrateError::ContainerNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_commands_fail_before_detection() {
        let docker = DockerCli::new(Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            docker.list_volumes("web").await,
            Err(MigrateError::PrivilegeDetection(_))
        ));
    }

    #[tokio::test]
    async fn test_export_rejects_invalid_identifier() {
        let runner = Arc::new(ScriptedRunner::new());
        let docker = DockerCli::new(runner.clone());
        docker.detect_privilege().await.unwrap();

        let err = docker
            .export("../etc", Path::new("/tmp/stage"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidIdentifier(_)));
        // Only the detection probe ran
        assert_eq!(runner.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_discover_volumes_degrades_lookups() {
        let runner = Arc::new(ScriptedRunner::new());
        let docker = DockerCli::new(runner);
        docker.detect_privilege().await.unwrap();

        let volumes = discover_volumes(&docker, &["web".to_string()]).await.unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].name, "shared");
        assert_eq!(volumes[0].container, "web");
        assert_eq!(volumes[0].size, "1.5GB");
        assert_eq!(volumes[1].mount_path, "/cache");
        assert_eq!(volumes[1].size_bytes, 0);
    }
}
