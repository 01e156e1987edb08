//! CLI commands for miner libraries
use crate::cli::OutputFormat;
use crate::error::Result as ByteminerResult;
use crate::extractor::MinerSpec;
use crate::output_formats::format_listing;
use crate::plugin_system::{self, resolve_library_path};
use colored::Colorize;
use log::debug;
use std::io::Write;
use std::path::PathBuf;

pub struct PluginCli {
    search_paths: Vec<PathBuf>,
}

impl PluginCli {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn resolve(&self, library: &str) -> String {
        let resolved = resolve_library_path(library, &self.search_paths);
        if resolved != library {
            debug!("Resolved miner library {} to {}", library, resolved);
        }
        resolved
    }

    /// Rewrite the library of each spec to a loadable path
    pub fn resolve_specs(&self, specs: &[MinerSpec]) -> Vec<MinerSpec> {
        specs
            .iter()
            .map(|spec| MinerSpec {
                library: self.resolve(&spec.library),
                ..spec.clone()
            })
            .collect()
    }

    /// Print what a library declares without instantiating anything
    pub fn show_meta(
        &self,
        library: &str,
        format: OutputFormat,
        color: bool,
        out: &mut impl Write,
    ) -> ByteminerResult<()> {
        let path = self.resolve(library);
        let listed = plugin_system::introspect(&path)?;

        if format == OutputFormat::Text {
            let header = format!("{} ({} miners)", path, listed.len());
            if color {
                writeln!(out, "{}", header.green().bold())?;
            } else {
                writeln!(out, "{header}")?;
            }
        }
        write!(out, "{}", format_listing(&listed, format, color))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_show_meta_missing_library() {
        let cli = PluginCli::new(vec![]);
        let mut out = Vec::new();
        let err = cli
            .show_meta("/nonexistent/libnothing.so", OutputFormat::Text, false, &mut out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(out.is_empty());
    }

    #[test]
    fn test_resolve_specs_keeps_paths() {
        let cli = PluginCli::new(vec![PathBuf::from("/nonexistent")]);
        let specs = vec![MinerSpec::new("./libx.so", "match_x", "cfg")];
        let resolved = cli.resolve_specs(&specs);
        assert_eq!(resolved, specs);
    }
}
