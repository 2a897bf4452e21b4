//! Transform-space loading.
//!
//! A transform space is addressed by a path. Spaces compiled into the
//! binary are looked up in a [`TransformRegistry`]; out-of-tree spaces are
//! shared libraries exporting a `transform` symbol, opened by
//! [`DynamicLibraryLoader`]. Either way the caller gets a
//! [`ParametrizedTransform`], raw templates being wrapped with no bindings.

use crate::error::{Result, TuneError};
use crate::transform::{ParametrizedTransform, TransformFn};
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Name of the symbol a transform-space library must export.
pub const TRANSFORM_SYMBOL: &str = "transform";

/// What a transform space hands out: either a fully declared template or a
/// bare callable with nothing to tune.
pub enum TransformExport<K> {
    Parametrized(ParametrizedTransform<K>),
    Raw(TransformFn<K>),
}

impl<K> TransformExport<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn into_parametrized(self) -> ParametrizedTransform<K> {
        match self {
            TransformExport::Parametrized(transform) => transform,
            TransformExport::Raw(func) => ParametrizedTransform::from_fn(func),
        }
    }
}

/// Signature of the exported `transform` symbol and of registry factories.
pub type TransformFactory<K> = fn() -> TransformExport<K>;

pub trait TransformSpaceLoader<K> {
    fn load(&self, path: &Path) -> Result<ParametrizedTransform<K>>;
}

/// Transform spaces compiled into the binary, keyed by path.
pub struct TransformRegistry<K> {
    spaces: HashMap<PathBuf, TransformFactory<K>>,
}

impl<K> Default for TransformRegistry<K> {
    fn default() -> Self {
        Self {
            spaces: HashMap::new(),
        }
    }
}

impl<K> Clone for TransformRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            spaces: self.spaces.clone(),
        }
    }
}

impl<K> TransformRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>, factory: TransformFactory<K>) {
        self.spaces.insert(path.into(), factory);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.spaces.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.spaces.keys().map(PathBuf::as_path)
    }
}

impl<K> TransformSpaceLoader<K> for TransformRegistry<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn load(&self, path: &Path) -> Result<ParametrizedTransform<K>> {
        let factory = self
            .spaces
            .get(path)
            .ok_or_else(|| TuneError::loader(path, "no transform space registered at this path"))?;
        Ok(factory().into_parametrized())
    }
}

/// Opens transform spaces packaged as shared libraries.
///
/// The library must be built against the same `einforge-autotune` and
/// kernel type as the host, and export
/// `#[no_mangle] pub fn transform() -> TransformExport<K>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLibraryLoader;

impl DynamicLibraryLoader {
    pub fn new() -> Self {
        Self
    }
}

impl<K> TransformSpaceLoader<K> for DynamicLibraryLoader
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn load(&self, path: &Path) -> Result<ParametrizedTransform<K>> {
        if !path.is_file() {
            return Err(TuneError::loader(path, "no such file"));
        }

        // SAFETY: loading runs the library's initializers; transform spaces
        // are trusted code supplied by the user running the tuner.
        let library = unsafe { Library::new(path) }
            .map_err(|err| TuneError::loader(path, err.to_string()))?;

        let export = {
            // SAFETY: the symbol is declared with the factory signature above;
            // a mismatch is a packaging error on the library side.
            let factory: Symbol<'_, TransformFactory<K>> =
                unsafe { library.get(TRANSFORM_SYMBOL.as_bytes()) }.map_err(|err| {
                    TuneError::loader(path, format!("missing '{TRANSFORM_SYMBOL}' symbol: {err}"))
                })?;
            factory()
        };

        info!(path = %path.display(), "loaded transform space library");
        Ok(export.into_parametrized().with_guard(Arc::new(library)))
    }
}

/// Identity under which results of a transform space are cached.
///
/// Spaces shipped in `impls_dir` are known by file name so caches stay valid
/// across installations; anything else by its full path.
pub fn transform_space_id(module_path: &Path, impls_dir: Option<&Path>) -> String {
    let in_impls = match (module_path.parent(), impls_dir) {
        (Some(parent), Some(impls)) => parent == impls,
        _ => false,
    };
    match module_path.file_name() {
        Some(name) if in_impls => name.to_string_lossy().into_owned(),
        _ => module_path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::BoolParameter;
    use crate::transform::TransformArgs;

    fn raw_space() -> TransformExport<String> {
        TransformExport::Raw(Arc::new(|kernel: &String, _: &TransformArgs| {
            Ok::<_, crate::error::KernelError>(kernel.to_uppercase())
        }))
    }

    fn declared_space() -> TransformExport<String> {
        TransformExport::Parametrized(
            ParametrizedTransform::new(|kernel: &String, args: &TransformArgs| {
                Ok(format!("{kernel}:{}", args.boolean("prefetch")?))
            })
            .with_transform_param("prefetch", |_| Ok(BoolParameter.into())),
        )
    }

    #[test]
    fn raw_callables_are_wrapped() {
        let mut registry = TransformRegistry::new();
        registry.register("/impls/upper.so", raw_space as TransformFactory<String>);

        let transform = registry.load(Path::new("/impls/upper.so")).unwrap();
        assert!(transform.einsum_args().is_empty());
        assert!(transform.transform_params().is_empty());
        assert_eq!(
            transform.call(&"abc".to_string(), &TransformArgs::new()).unwrap(),
            "ABC"
        );
    }

    #[test]
    fn parametrized_exports_pass_through() {
        let mut registry = TransformRegistry::new();
        registry.register("/impls/prefetch.so", declared_space as TransformFactory<String>);

        let transform = registry.load(Path::new("/impls/prefetch.so")).unwrap();
        let names: Vec<_> = transform.transform_params().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["prefetch"]);
    }

    #[test]
    fn unknown_paths_fail_to_load() {
        let registry = TransformRegistry::<String>::new();
        let err = registry.load(Path::new("/nowhere.so")).unwrap_err();
        assert!(matches!(err, TuneError::Loader { .. }));

        let err = TransformSpaceLoader::<String>::load(
            &DynamicLibraryLoader::new(),
            Path::new("/definitely/not/here.so"),
        )
        .unwrap_err();
        assert!(matches!(err, TuneError::Loader { .. }));
    }

    #[test]
    fn non_library_files_fail_to_load() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a shared object").unwrap();
        let err = TransformSpaceLoader::<String>::load(&DynamicLibraryLoader::new(), file.path())
            .unwrap_err();
        assert!(matches!(err, TuneError::Loader { .. }));
    }

    #[test]
    fn space_ids_are_short_inside_impls_dir() {
        let impls = Path::new("/opt/einforge/impls");
        assert_eq!(
            transform_space_id(Path::new("/opt/einforge/impls/grad.so"), Some(impls)),
            "grad.so"
        );
        assert_eq!(
            transform_space_id(Path::new("/home/me/grad.so"), Some(impls)),
            "/home/me/grad.so"
        );
        assert_eq!(
            transform_space_id(Path::new("/home/me/grad.so"), None),
            "/home/me/grad.so"
        );
    }
}
