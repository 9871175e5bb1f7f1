use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::{
    estimator::SiteInput,
    settings::SitesSettings,
    sites::{Site, SiteError, SiteId, Task, TaskResult},
};

/// The name of the input file in the data directory of a site.
pub const DATA_FILE: &str = "data.json";
/// The name of the file the local contribution is written to.
pub const LOCAL_RESULT_FILE: &str = "local_result.json";
/// The name of the file the global estimate is written to.
pub const GLOBAL_RESULT_FILE: &str = "global_average.json";

#[derive(Debug, Clone)]
/// A site backed by a data directory on the local file system.
pub struct LocalSite {
    id: SiteId,
    data_dir: PathBuf,
    results_dir: PathBuf,
    seed: Option<u64>,
}

impl LocalSite {
    /// Creates a site reading from `data_dir` and writing into `results_dir`.
    pub fn new(id: impl Into<SiteId>, data_dir: PathBuf, results_dir: PathBuf) -> Self {
        Self {
            id: id.into(),
            data_dir,
            results_dir,
            seed: None,
        }
    }

    /// Seeds the noise of the site.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Creates the sites described by the settings.
    ///
    /// Without explicit names every sub-directory of the data directory is a site, in
    /// lexicographical order.
    pub async fn discover(settings: &SitesSettings) -> Result<Vec<Self>, SiteError> {
        let names = match &settings.names {
            Some(names) => names.clone(),
            None => list_dirs(&settings.data_dir).await?,
        };

        let sites = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let site = Self::new(
                    name.as_str(),
                    settings.data_dir.join(&name),
                    settings.results_dir.join(&name),
                );
                match settings.seed {
                    Some(seed) => site.with_seed(seed.wrapping_add(index as u64)),
                    None => site,
                }
            })
            .collect::<Vec<_>>();
        info!("discovered {} sites in {}", sites.len(), settings.data_dir.display());
        Ok(sites)
    }

    async fn write_json<T>(&self, file: &str, value: &T) -> Result<(), SiteError>
    where
        T: Serialize + ?Sized,
    {
        tokio::fs::create_dir_all(&self.results_dir)
            .await
            .map_err(|source| SiteError::Io {
                path: self.results_dir.clone(),
                source,
            })?;
        let path = self.results_dir.join(file);
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| SiteError::Io { path: path.clone(), source })?;
        debug!("wrote {}", path.display());
        Ok(())
    }
}

async fn list_dirs(root: &Path) -> Result<Vec<String>, SiteError> {
    let io_error = |source| SiteError::Io {
        path: root.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(root).await.map_err(io_error)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        if entry.file_type().await.map_err(io_error)?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl Site for LocalSite {
    fn id(&self) -> &SiteId {
        &self.id
    }

    async fn execute(&self, task: Task) -> Result<TaskResult, SiteError> {
        match task {
            Task::ComputeLocalEstimate(params) => {
                let input = SiteInput::load(self.data_dir.join(DATA_FILE)).await?;
                let seed = self.seed;
                let contribution = spawn_blocking(move || {
                    let mut rng = match seed {
                        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
                        None => ChaCha20Rng::from_entropy(),
                    };
                    input.estimate(Some(&params), &mut rng)
                })
                .await
                .map_err(|err| SiteError::Crashed(err.to_string()))??;
                self.write_json(LOCAL_RESULT_FILE, &contribution).await?;
                Ok(TaskResult::LocalEstimate(contribution))
            }
            Task::AcceptGlobalAverage(aggregate) => {
                self.write_json(GLOBAL_RESULT_FILE, aggregate.as_ref()).await?;
                Ok(TaskResult::Acknowledged)
            }
        }
    }
}
