//! Process-wide sidecar template cache
//!
//! The template is read-mostly: it is loaded once at startup and handed to
//! every request as an `Arc`. A reload swaps the whole `Arc` under the lock,
//! so a reader holds either the old or the new template, never a mix.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{load_template, SidecarTemplate, TemplateError};

/// When the template file is read
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TemplateLoadMode {
    /// Read once at startup; requests share the cached copy
    #[default]
    Preloaded,
    /// Read again for every request
    PerRequest,
}

/// Cached sidecar template with controlled reloads
#[derive(Debug)]
pub struct TemplateStore {
    /// Backing file, if any
    path: Option<PathBuf>,
    mode: TemplateLoadMode,
    current: RwLock<Arc<SidecarTemplate>>,
}

impl TemplateStore {
    /// Load the template at `path`
    ///
    /// Fails when the file cannot be read or is not a valid template, so a
    /// broken mount stops the process at startup in either mode.
    pub async fn load(
        path: impl Into<PathBuf>,
        mode: TemplateLoadMode,
    ) -> Result<Self, TemplateError> {
        let path = path.into();
        let template = load_template(&path).await?;
        info!(
            path = %path.display(),
            mode = ?mode,
            sidecar = %template.containers[0].name,
            "Sidecar template loaded"
        );
        template.warn_ignored_containers();

        Ok(Self {
            path: Some(path),
            mode,
            current: RwLock::new(Arc::new(template)),
        })
    }

    /// Create a store around an in-memory template with no backing file
    pub fn fixed(template: SidecarTemplate) -> Self {
        Self {
            path: None,
            mode: TemplateLoadMode::Preloaded,
            current: RwLock::new(Arc::new(template)),
        }
    }

    /// Backing file path
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Configured load mode
    pub fn mode(&self) -> TemplateLoadMode {
        self.mode
    }

    /// Last successfully loaded template
    pub fn current(&self) -> Arc<SidecarTemplate> {
        self.current.read().clone()
    }

    /// Template to use for one admission request
    pub async fn template(&self) -> Result<Arc<SidecarTemplate>, TemplateError> {
        match self.mode {
            TemplateLoadMode::Preloaded => Ok(self.current()),
            TemplateLoadMode::PerRequest => self.reload().await,
        }
    }

    /// Re-read the backing file and swap in the result
    ///
    /// On failure the previous template stays in place.
    pub async fn reload(&self) -> Result<Arc<SidecarTemplate>, TemplateError> {
        let Some(path) = &self.path else {
            return Ok(self.current());
        };

        let template = Arc::new(load_template(path).await?);
        if self.install(template.clone()) {
            info!(path = %path.display(), "Sidecar template changed on reload");
            template.warn_ignored_containers();
        } else {
            debug!(path = %path.display(), "Sidecar template unchanged");
        }
        Ok(template)
    }

    /// Swap in `template`, returning whether it differs from the previous one
    fn install(&self, template: Arc<SidecarTemplate>) -> bool {
        let mut current = self.current.write();
        let changed = **current != *template;
        *current = template;
        changed
    }

    /// Reload the template on a fixed schedule
    pub fn spawn_reload(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; the template is already loaded
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.reload().await {
                    warn!(error = %e, "Sidecar template reload failed, keeping previous template");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn template_yaml(image: &str) -> String {
        format!(
            r#"
initContainers:
  - name: net-sidecar
    image: {image}
    env:
      - name: CIDR
"#
        )
    }

    fn overwrite(file: &mut tempfile::NamedTempFile, contents: &str) {
        let file = file.as_file_mut();
        file.set_len(0).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    fn write_template(file: &mut tempfile::NamedTempFile, image: &str) {
        overwrite(file, &template_yaml(image));
    }

    fn image_of(template: &SidecarTemplate) -> Option<String> {
        template.containers[0].image.clone()
    }

    #[tokio::test]
    async fn preloaded_mode_does_not_observe_file_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_template(&mut file, "sidecar:v1");

        let store = TemplateStore::load(file.path(), TemplateLoadMode::Preloaded)
            .await
            .unwrap();
        write_template(&mut file, "sidecar:v2");

        let template = store.template().await.unwrap();
        assert_eq!(image_of(&template).as_deref(), Some("sidecar:v1"));
    }

    #[tokio::test]
    async fn per_request_mode_rereads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_template(&mut file, "sidecar:v1");

        let store = TemplateStore::load(file.path(), TemplateLoadMode::PerRequest)
            .await
            .unwrap();
        write_template(&mut file, "sidecar:v2");

        let template = store.template().await.unwrap();
        assert_eq!(image_of(&template).as_deref(), Some("sidecar:v2"));
        assert_eq!(image_of(&store.current()).as_deref(), Some("sidecar:v2"));
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_template() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_template(&mut file, "sidecar:v1");

        let store = TemplateStore::load(file.path(), TemplateLoadMode::Preloaded)
            .await
            .unwrap();

        overwrite(&mut file, "initContainers: []");

        let err = store.reload().await.unwrap_err();
        assert!(matches!(err, TemplateError::EmptyTemplate));
        assert_eq!(image_of(&store.current()).as_deref(), Some("sidecar:v1"));
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_reload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_template(&mut file, "sidecar:v1");

        let store = TemplateStore::load(file.path(), TemplateLoadMode::Preloaded)
            .await
            .unwrap();
        let snapshot = store.current();

        write_template(&mut file, "sidecar:v2");
        store.reload().await.unwrap();

        assert_eq!(image_of(&snapshot).as_deref(), Some("sidecar:v1"));
        assert_eq!(image_of(&store.current()).as_deref(), Some("sidecar:v2"));
    }

    #[tokio::test]
    async fn install_reports_change_only_for_new_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_template(&mut file, "sidecar:v1");

        let store = TemplateStore::load(file.path(), TemplateLoadMode::PerRequest)
            .await
            .unwrap();

        // Re-reading an unchanged file on every request is not a change
        let same = Arc::new(load_template(file.path()).await.unwrap());
        assert!(!store.install(same));

        write_template(&mut file, "sidecar:v2");
        let updated = Arc::new(load_template(file.path()).await.unwrap());
        assert!(store.install(updated.clone()));
        assert!(!store.install(updated));
    }

    #[tokio::test]
    async fn load_fails_for_missing_file() {
        let err = TemplateStore::load("/nonexistent/sidecarconfig.yaml", TemplateLoadMode::Preloaded)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn fixed_store_reload_is_a_no_op() {
        let template = SidecarTemplate::default();
        let store = TemplateStore::fixed(template.clone());

        assert!(store.path().is_none());
        assert_eq!(*store.reload().await.unwrap(), template);
    }
}
