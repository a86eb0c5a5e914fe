//! Config file loading: read, expand templates, parse, normalize.
//!
//! Rendering never touches the network; the resulting `ImposterSet` is handed
//! to the client for transmission.

mod template;

use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

pub use template::{render, stringify, RenderContext, TemplateError, MAX_INCLUDE_DEPTH};

use crate::error::{CtlError, Result};
use crate::imposter::ImposterSet;
use crate::options::LaunchOptions;

/// Turns a config file into the imposters document sent to the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigRenderer {
    no_parse: bool,
}

impl ConfigRenderer {
    /// `no_parse` loads the file as plain JSON without template expansion.
    pub fn new(no_parse: bool) -> Self {
        Self { no_parse }
    }

    pub fn from_options(options: &LaunchOptions) -> Self {
        Self::new(options.no_parse)
    }

    /// Read and expand `path`, returning the JSON text.
    pub fn render_text(&self, path: &Path) -> Result<String> {
        let contents = read_config(path)?;
        if self.no_parse {
            return Ok(contents);
        }
        let ctx = RenderContext::new(path);
        Ok(render(&contents, &ctx)?)
    }

    /// Read, expand, parse and normalize `path`.
    pub fn render(&self, path: &Path) -> Result<ImposterSet> {
        let text = self.render_text(path)?;
        let document: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| CtlError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        let set = ImposterSet::from_document(document);
        debug!(
            "Rendered {} imposter(s) from {}",
            set.len(),
            path.display()
        );
        Ok(set)
    }
}

fn read_config(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            CtlError::ConfigFileMissing(path.to_path_buf())
        } else {
            CtlError::ConfigRead {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}
