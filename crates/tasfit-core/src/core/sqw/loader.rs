use super::{CRATE_VERSION, INTERFACE_VERSION, PluginInfo, ScatteringFunction, builtin};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Entry point reporting a module's identification.
pub type InfoFn = fn() -> PluginInfo;

/// Entry point constructing a model, optionally configured from a file.
pub type ConstructFn = fn(Option<&Path>) -> Box<dyn ScatteringFunction>;

/// The two entry points a scattering-function module exposes.
#[derive(Clone, Copy)]
pub struct PluginModule {
    pub info: InfoFn,
    pub construct: ConstructFn,
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("info", &(self.info)())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Model '{name}' not found (searched: {searched:?})")]
    NotFound { name: String, searched: Vec<PathBuf> },
    #[error("Failed to load model '{name}': {reason}")]
    Load { name: String, reason: String },
    #[error("Model '{name}' failed to initialize (configuration: {config:?})")]
    Init {
        name: String,
        config: Option<PathBuf>,
    },
}

/// Resolves scattering-function models by name.
///
/// Names are looked up first among registered modules (the built-in models
/// plus anything registered at runtime). With the `dynamic-plugins` feature, an
/// unknown name is then searched for as a shared library
/// `tasfit_<name>` in each search path, or treated as a direct library path.
#[derive(Debug, Default)]
pub struct PluginLoader {
    modules: Vec<PluginModule>,
    search_paths: Vec<PathBuf>,
}

impl PluginLoader {
    /// A loader with no registered modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader with every built-in model registered.
    pub fn with_builtins() -> Self {
        let mut loader = Self::new();
        for module in builtin::modules() {
            loader.register(module);
        }
        loader
    }

    /// Registers a module; a later registration shadows an earlier one of the
    /// same name.
    pub fn register(&mut self, module: PluginModule) {
        let name = (module.info)().name;
        self.modules.retain(|m| (m.info)().name != name);
        debug!(model = %name, "Registered scattering-function module");
        self.modules.push(module);
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Identification of every registered module, sorted by name.
    pub fn list(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<_> = self.modules.iter().map(|m| (m.info)()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Constructs the model `name`, configured from `config` if given.
    pub fn load(
        &self,
        name: &str,
        config: Option<&Path>,
    ) -> Result<Box<dyn ScatteringFunction>, PluginError> {
        if let Some(module) = self.modules.iter().find(|m| (m.info)().name == name) {
            return instantiate(name, module, config);
        }

        #[cfg(feature = "dynamic-plugins")]
        {
            if let Some(path) = self.locate_library(name) {
                return dynamic::load(name, &path, config);
            }
        }

        Err(PluginError::NotFound {
            name: name.to_string(),
            searched: self.search_paths.clone(),
        })
    }

    /// Model libraries found in the search paths, each with the
    /// identification it exports or the reason it could not be read.
    #[cfg(feature = "dynamic-plugins")]
    pub fn discover(&self) -> Vec<(PathBuf, Result<PluginInfo, PluginError>)> {
        let prefix = format!("{}tasfit_", std::env::consts::DLL_PREFIX);
        let suffix = std::env::consts::DLL_SUFFIX;
        let mut found = Vec::new();
        for dir in &self.search_paths {
            let Ok(entries) = std::fs::read_dir(dir) else {
                debug!(path = %dir.display(), "Plugin search path is not readable");
                continue;
            };
            let mut libraries: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(suffix))
                })
                .collect();
            libraries.sort();
            for path in libraries {
                let info = dynamic::probe(&path);
                found.push((path, info));
            }
        }
        found
    }

    #[cfg(feature = "dynamic-plugins")]
    fn locate_library(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }
        let file_name = libloading::library_filename(format!("tasfit_{name}"));
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

fn check_version(name: &str, info: &PluginInfo) -> Result<(), PluginError> {
    if info.interface_version != INTERFACE_VERSION {
        return Err(PluginError::Load {
            name: name.to_string(),
            reason: format!(
                "interface version '{}' (tasfit {}) does not match '{}'",
                info.interface_version, info.crate_version, INTERFACE_VERSION
            ),
        });
    }
    if info.crate_version != CRATE_VERSION {
        debug!(
            model = %name,
            built_with = %info.crate_version,
            host = CRATE_VERSION,
            "Model built against a different tasfit release with the same interface"
        );
    }
    Ok(())
}

fn instantiate(
    name: &str,
    module: &PluginModule,
    config: Option<&Path>,
) -> Result<Box<dyn ScatteringFunction>, PluginError> {
    let info = (module.info)();
    check_version(name, &info)?;
    let model = (module.construct)(config);
    if !model.is_valid() {
        return Err(PluginError::Init {
            name: name.to_string(),
            config: config.map(Path::to_path_buf),
        });
    }
    info!(model = %info.name, "Loaded scattering-function model");
    Ok(model)
}

#[cfg(feature = "dynamic-plugins")]
mod dynamic {
    use super::*;
    use crate::core::models::params::ParamValue;
    use crate::core::sqw::abi::{self, ForeignModel, RawModel, RawPluginInfo};
    use libloading::{Library, Symbol};
    use std::ffi::c_char;
    use std::sync::Arc;

    type RawInfoFn = unsafe extern "C" fn() -> *const RawPluginInfo;
    type RawConstructFn = unsafe extern "C" fn(*const c_char) -> RawModel;

    /// A model whose code lives in a loaded library. The model is declared
    /// first so it is dropped before the library handle.
    struct LibraryModel {
        inner: Box<dyn ScatteringFunction>,
        _library: Arc<Library>,
    }

    impl ScatteringFunction for LibraryModel {
        fn evaluate(&mut self, h: f64, k: f64, l: f64, e: f64) -> f64 {
            self.inner.evaluate(h, k, l, e)
        }

        fn parameters(&self) -> Vec<(String, ParamValue)> {
            self.inner.parameters()
        }

        fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool {
            self.inner.set_parameter_if_present(name, value)
        }

        fn copy(&self) -> Box<dyn ScatteringFunction> {
            Box::new(LibraryModel {
                inner: self.inner.copy(),
                _library: Arc::clone(&self._library),
            })
        }

        fn is_valid(&self) -> bool {
            self.inner.is_valid()
        }
    }

    fn open(path: &Path, name: &str) -> Result<(Library, PluginInfo), PluginError> {
        let load_err = |reason: String| PluginError::Load {
            name: name.to_string(),
            reason,
        };
        // SAFETY: loading runs the library's initializers; model libraries are
        // expected to be built with `declare_plugin!`.
        let library = unsafe { Library::new(path) }
            .map_err(|e| load_err(format!("{}: {e}", path.display())))?;
        // SAFETY: `tasfit_plugin_info` is an `extern "C"` function returning a
        // pointer to a `RawPluginInfo`; `read_info` checks the version first.
        let info = unsafe {
            let info_fn: Symbol<RawInfoFn> = library
                .get(b"tasfit_plugin_info\0")
                .map_err(|e| load_err(e.to_string()))?;
            abi::read_info(info_fn()).map_err(load_err)?
        };
        check_version(name, &info)?;
        Ok((library, info))
    }

    pub(super) fn load(
        name: &str,
        path: &Path,
        config: Option<&Path>,
    ) -> Result<Box<dyn ScatteringFunction>, PluginError> {
        let (library, info) = open(path, name)?;
        let init_err = || PluginError::Init {
            name: name.to_string(),
            config: config.map(Path::to_path_buf),
        };
        let argument = abi::config_argument(config).map_err(|reason| PluginError::Load {
            name: name.to_string(),
            reason,
        })?;

        // SAFETY: the interface version matched, so the constructor has the
        // signature declared here; the library handle outlives the model.
        let inner = unsafe {
            let construct: Symbol<RawConstructFn> = library
                .get(b"tasfit_plugin_construct\0")
                .map_err(|e| PluginError::Load {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            let raw = construct(argument.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()));
            ForeignModel::from_raw(raw).ok_or_else(init_err)?
        };
        if !inner.is_valid() {
            return Err(init_err());
        }

        info!(model = %info.name, path = %path.display(), "Loaded scattering-function model from library");
        Ok(Box::new(LibraryModel {
            inner: Box::new(inner),
            _library: Arc::new(library),
        }))
    }

    /// Reads the identification exported by the library at `path`.
    pub(super) fn probe(path: &Path) -> Result<PluginInfo, PluginError> {
        open(path, &path.display().to_string()).map(|(_, info)| info)
    }
}

/// Exports the C entry points the loader looks up in a model library.
///
/// `tasfit_plugin_info` returns a pointer to a [`RawPluginInfo`] that lives
/// as long as the library; `tasfit_plugin_construct` takes a NUL-terminated
/// configuration path (or null) and returns a [`RawModel`].
///
/// [`RawPluginInfo`]: crate::core::sqw::abi::RawPluginInfo
/// [`RawModel`]: crate::core::sqw::abi::RawModel
///
/// ```ignore
/// tasfit::declare_plugin!("dho", "Damped harmonic oscillator", DampedOscillator::boxed);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($name:expr, $description:expr, $construct:path) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn tasfit_plugin_info() -> *const $crate::core::sqw::abi::RawPluginInfo {
            static INFO: ::std::sync::OnceLock<$crate::core::sqw::abi::ExportedInfo> =
                ::std::sync::OnceLock::new();
            INFO.get_or_init(|| $crate::core::sqw::abi::ExportedInfo::new($name, $description))
                .as_raw()
        }

        /// # Safety
        ///
        /// `config` must be null or a NUL-terminated UTF-8 path.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn tasfit_plugin_construct(
            config: *const ::std::ffi::c_char,
        ) -> $crate::core::sqw::abi::RawModel {
            unsafe { $crate::core::sqw::abi::export_model(config, $construct) }
        }
    };
}
