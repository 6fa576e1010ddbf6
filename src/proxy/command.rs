//! `ProxyControl` backed by a sites directory and shell commands.
//!
//! Commands run on their own task and are never killed. A caller that
//! stops waiting (a timed-out reconciler step) leaves the command running;
//! the next install, reload or restart waits until it has exited.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::model::ServiceKind;
use crate::config::schema::NginxSettings;
use crate::proxy::nginx::{RenderedConfig, SiteFile};
use crate::proxy::{ControlError, ProxyControl};

/// Controls a local nginx through its site files and service manager.
#[derive(Debug, Clone)]
pub struct NginxControl {
    sites_dir: PathBuf,
    reload_command: Vec<String>,
    restart_command: Vec<String>,
    test_command: Option<Vec<String>>,
    /// Held for the whole life of a command, including detached ones.
    serial: Arc<Mutex<()>>,
}

impl NginxControl {
    pub fn new(settings: &NginxSettings) -> Self {
        Self {
            sites_dir: settings.sites_dir.clone(),
            reload_command: settings.reload_command.clone(),
            restart_command: settings.restart_command.clone(),
            test_command: settings.test_command.clone(),
            serial: Arc::new(Mutex::new(())),
        }
    }

    pub fn sites_dir(&self) -> &Path {
        &self.sites_dir
    }

    async fn write_site(&self, site: &SiteFile) -> Result<(), ControlError> {
        let path = self.sites_dir.join(site.file_name);
        let tmp = self.sites_dir.join(format!(".{}.tmp", site.file_name));
        let install_failed = |source| ControlError::InstallFailed {
            path: path.clone(),
            source,
        };

        tokio::fs::write(&tmp, &site.contents)
            .await
            .map_err(install_failed)?;
        tokio::fs::rename(&tmp, &path).await.map_err(install_failed)?;
        tracing::debug!(service = %site.service, path = %path.display(), "Site file installed");
        Ok(())
    }

    async fn remove_site(&self, kind: ServiceKind) -> Result<(), ControlError> {
        let path = self.sites_dir.join(SiteFile::file_name_for(kind));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(service = %kind, path = %path.display(), "Site file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ControlError::InstallFailed { path, source }),
        }
    }

    /// Run the configuration test (if any), then `command`.
    ///
    /// Both run on a spawned task that owns the serial lock, so dropping
    /// this future detaches the commands instead of killing them.
    async fn test_then_run(&self, command: &[String]) -> Result<(), String> {
        let serial = self.serial.clone().lock_owned().await;
        let test = self.test_command.clone();
        let command = command.to_vec();

        let task = tokio::spawn(async move {
            let _serial = serial;
            if let Some(test) = &test {
                run_command(test)
                    .await
                    .map_err(|reason| format!("configuration test failed: {reason}"))?;
            }
            run_command(&command).await
        });
        task.await
            .map_err(|e| format!("control command task failed: {e}"))?
    }
}

impl ProxyControl for NginxControl {
    async fn install(&self, rendered: &RenderedConfig) -> Result<(), ControlError> {
        let _serial = self.serial.lock().await;
        tokio::fs::create_dir_all(&self.sites_dir)
            .await
            .map_err(|source| ControlError::InstallFailed {
                path: self.sites_dir.clone(),
                source,
            })?;

        for kind in ServiceKind::ALL {
            match rendered.site(kind) {
                Some(site) => self.write_site(site).await?,
                None => self.remove_site(kind).await?,
            }
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), ControlError> {
        self.test_then_run(&self.reload_command)
            .await
            .map_err(|reason| ControlError::ReloadFailed { reason })
    }

    async fn restart(&self) -> Result<(), ControlError> {
        self.test_then_run(&self.restart_command)
            .await
            .map_err(|reason| ControlError::RestartFailed { reason })
    }
}

async fn run_command(command: &[String]) -> Result<(), String> {
    let Some((program, args)) = command.split_first() else {
        return Err("no command configured".to_string());
    };

    tracing::debug!(program = %program, args = ?args, "Running control command");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("{program}: {e}"))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        Err(format!("{program} exited with {}", output.status))
    } else {
        Err(format!("{program} exited with {}: {stderr}", output.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse;
    use crate::diff::snapshot::AppliedState;
    use crate::proxy::nginx::render_state;

    fn settings(dir: &Path, reload: &[&str], restart: &[&str]) -> NginxSettings {
        NginxSettings {
            sites_dir: dir.to_path_buf(),
            reload_command: reload.iter().map(|s| s.to_string()).collect(),
            restart_command: restart.iter().map(|s| s.to_string()).collect(),
            test_command: None,
        }
    }

    fn applied() -> AppliedState {
        AppliedState::from(
            &parse(
                "external_url \"http://git.example.org\"\n\
                 registry_external_url \"http://registry.example.org\"\n",
            )
            .unwrap()
            .services,
        )
    }

    #[tokio::test]
    async fn test_install_writes_and_removes_sites() {
        let dir = tempfile::tempdir().unwrap();
        let sites = dir.path().join("conf");
        let control = NginxControl::new(&settings(&sites, &["true"], &["true"]));

        let mut state = applied();
        control.install(&render_state(&state)).await.unwrap();
        let git = std::fs::read_to_string(sites.join("gitlab-http.conf")).unwrap();
        assert!(git.contains("server_name git.example.org;"));
        assert!(sites.join("gitlab-registry.conf").exists());

        state.registry = None;
        control.install(&render_state(&state)).await.unwrap();
        assert!(!sites.join("gitlab-registry.conf").exists());
        assert!(sites.join("gitlab-http.conf").exists());
    }

    #[tokio::test]
    async fn test_command_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let control = NginxControl::new(&settings(dir.path(), &["true"], &["false"]));

        control.reload().await.unwrap();
        let err = control.restart().await.unwrap_err();
        assert!(matches!(err, ControlError::RestartFailed { .. }));
    }

    #[tokio::test]
    async fn test_failing_configuration_test_blocks_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut nginx = settings(dir.path(), &["true"], &["true"]);
        nginx.test_command = Some(vec!["false".to_string()]);
        let control = NginxControl::new(&nginx);

        match control.reload().await.unwrap_err() {
            ControlError::ReloadFailed { reason } => {
                assert!(reason.starts_with("configuration test failed"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn shell(script: &str, log: &Path) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            log.display().to_string(),
        ]
    }

    #[tokio::test]
    async fn test_abandoned_command_finishes_before_next_one() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("commands.log");
        let mut nginx = settings(dir.path(), &[], &[]);
        nginx.restart_command = shell("echo start >> \"$0\"; sleep 0.4; echo end >> \"$0\"", &log);
        nginx.reload_command = shell("echo reload >> \"$0\"", &log);
        let control = NginxControl::new(&nginx);

        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(100), control.restart()).await;
        assert!(abandoned.is_err());

        control.reload().await.unwrap();
        let log = std::fs::read_to_string(&log).unwrap();
        assert_eq!(log, "start\nend\nreload\n");
    }

    #[tokio::test]
    async fn test_install_waits_for_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let sites = dir.path().join("conf");
        let marker = dir.path().join("restarted");
        let mut nginx = settings(&sites, &["true"], &[]);
        nginx.restart_command = shell("sleep 0.3; touch \"$0\"", &marker);
        let control = NginxControl::new(&nginx);

        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(50), control.restart()).await;
        assert!(abandoned.is_err());

        control.install(&render_state(&applied())).await.unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_empty_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let control = NginxControl::new(&settings(dir.path(), &[], &["true"]));
        assert!(control.reload().await.is_err());
    }
}
