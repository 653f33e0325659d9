//! Lazily loaded, process-wide analyzer.

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

use super::analyzer::ChestXrayAnalyzer;
use crate::core::config::AnalysisConfig;
use crate::core::errors::AnalysisError;

type Loader = Box<dyn Fn() -> Result<ChestXrayAnalyzer, AnalysisError> + Send + Sync>;

/// Holds one [`ChestXrayAnalyzer`], loading it on first use.
///
/// Concurrent first callers block until a single load finishes. A failed load is
/// returned to the caller and not cached, so a later call tries again.
pub struct SharedAnalyzer {
    loader: Loader,
    cell: OnceCell<Arc<ChestXrayAnalyzer>>,
}

impl SharedAnalyzer {
    /// Loads from `config` on first use.
    pub fn new(config: AnalysisConfig) -> Self {
        Self::with_loader(move || ChestXrayAnalyzer::from_config(&config))
    }

    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn() -> Result<ChestXrayAnalyzer, AnalysisError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            cell: OnceCell::new(),
        }
    }

    /// The loaded analyzer.
    pub fn get(&self) -> Result<Arc<ChestXrayAnalyzer>, AnalysisError> {
        self.cell
            .get_or_try_init(|| {
                tracing::info!("loading shared analyzer");
                (self.loader)().map(Arc::new).inspect_err(|e| {
                    tracing::error!(error = %e, "shared analyzer failed to load");
                })
            })
            .map(Arc::clone)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for SharedAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAnalyzer")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
