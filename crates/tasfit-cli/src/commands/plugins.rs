use super::plugin_loader;
use crate::error::Result;
use std::fmt::Write as _;
use std::path::PathBuf;
use tasfit::core::sqw::loader::PluginLoader;
use tracing::warn;

pub async fn run(plugin_dirs: &[PathBuf]) -> Result<()> {
    let loader = plugin_loader(plugin_dirs);
    print!("{}", render(&loader));
    Ok(())
}

fn render(loader: &PluginLoader) -> String {
    let mut out = String::from("Built-in models:\n");
    for info in loader.list() {
        let _ = writeln!(out, "  {:<12} {}", info.name, info.description);
    }

    if loader.search_paths().is_empty() {
        return out;
    }
    out.push_str("Model libraries:\n");
    let found = loader.discover();
    if found.is_empty() {
        let _ = writeln!(out, "  (none found in {:?})", loader.search_paths());
    }
    for (path, info) in found {
        match info {
            Ok(info) => {
                let _ = writeln!(
                    out,
                    "  {:<12} {} [{}, tasfit {}]",
                    info.name,
                    info.description,
                    path.display(),
                    info.crate_version
                );
            }
            Err(e) => {
                warn!(path = %path.display(), "Unusable model library: {}", e);
                let _ = writeln!(out, "  {:<12} unusable: {}", "?", e);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_builtins_without_search_paths() {
        let text = render(&plugin_loader(&[]));
        assert!(text.starts_with("Built-in models:\n"));
        assert!(text.contains("  gauss"));
        assert!(text.contains("  phonon"));
        assert!(!text.contains("Model libraries"));
    }

    #[test]
    fn empty_search_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let text = render(&plugin_loader(&[dir.path().to_path_buf()]));
        assert!(text.contains("Model libraries:\n  (none found"));
    }
}
