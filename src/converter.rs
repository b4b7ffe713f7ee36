//! The image-conversion capability and a registry to select implementations.
//!
//! A host may carry several PDF-to-image engines. Each implements
//! [`ImageConverter`]; the host registers them in a [`ConverterRegistry`] and
//! picks one by identifier at request time.

use crate::config::ConversionRequest;
use crate::context::ExecContext;
use crate::error::Pdf2PngError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Something that can rasterise a PDF into image files.
#[async_trait]
pub trait ImageConverter: Send + Sync {
    /// Stable identifier the host selects this engine by, e.g. `"pdftoppm"`.
    fn id(&self) -> &str;

    /// Convert `request.input_path` into images under `request.output_dir`.
    ///
    /// Returns the produced paths; an empty vector means the engine ran
    /// successfully but wrote nothing.
    async fn convert(
        &self,
        ctx: &ExecContext,
        request: &ConversionRequest,
    ) -> Result<Vec<PathBuf>, Pdf2PngError>;

    /// Best-effort diagnostics. Must not fail.
    fn describe(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Image converters keyed by [`ImageConverter::id`].
#[derive(Default, Clone)]
pub struct ConverterRegistry {
    converters: BTreeMap<String, Arc<dyn ImageConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a converter. A second converter with the same id is rejected.
    pub fn register(&mut self, converter: Arc<dyn ImageConverter>) -> Result<(), Pdf2PngError> {
        let id = converter.id().to_string();
        if self.converters.contains_key(&id) {
            return Err(Pdf2PngError::InvalidConfig(format!(
                "image converter '{id}' is already registered"
            )));
        }
        info!("Registered image converter '{}'", id);
        self.converters.insert(id, converter);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ImageConverter>> {
        self.converters.get(id).cloned()
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        self.converters.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("converters", &self.ids())
            .finish()
    }
}
