//! Models compiled into the library and registered with every loader.

pub mod gauss;
pub mod phonon;

use super::loader::PluginModule;

/// Modules available without any external library.
pub fn modules() -> Vec<PluginModule> {
    vec![gauss::module(), phonon::module()]
}
